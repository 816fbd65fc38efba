//! Working-copy database scenarios
//!
//! Each test builds a small checkout in a temporary directory and drives it
//! through the public `WcDb` API.

use bytes::Bytes;
use svnwc_core::{
    BaseContent, CancellationToken, ChangedInfo, Checksum, CommitArgs, CopyOrigin, Depth, Kind, NewBaseNode,
    OpenMode, PristineCheck, PropertySet, ReposLocation, Skel, Status, WcConfig, WcDb, WcError, WorkItem,
    run_work_queue,
};
use tempfile::TempDir;

const ROOT_URL: &str = "http://svn.example.com/repo";
const UUID: &str = "9b6b8bf6-3e3c-4c2b-9a0e-3f2f1c9d7e11";

fn repos(relpath: &str) -> ReposLocation {
    ReposLocation::new(svnwc_core::relpath::join("trunk", relpath), ROOT_URL, UUID)
}

/// A checkout of trunk at r1 holding `A/mu`, `A/B/lambda` and `iota`.
fn checkout() -> (TempDir, WcDb) {
    let dir = TempDir::new().unwrap();
    let db = WcDb::init(dir.path(), &repos(""), 0, Depth::Infinity, WcConfig::default()).unwrap();
    let root = db.root().to_path_buf();
    let dirs = [("", vec!["A", "iota"]), ("A", vec!["B", "mu"]), ("A/B", vec!["lambda"])];
    for (relpath, children) in dirs {
        db.add_base_node(
            &db.from_relpath(relpath),
            &NewBaseNode::new(repos(relpath), 1),
            BaseContent::Directory { children: children.into_iter().map(String::from).collect(), depth: Depth::Infinity },
            &[],
        )
        .unwrap();
    }
    for relpath in ["A/mu", "A/B/lambda", "iota"] {
        let text = db.write_temp(format!("This is the file '{}'.\n", relpath).as_bytes()).unwrap();
        db.install_pristine(&text.path, &text.sha1, &text.md5).unwrap();
        db.add_base_file(&root.join(relpath), &NewBaseNode::new(repos(relpath), 1), text.sha1, None)
            .unwrap();
    }
    (dir, db)
}

#[test]
fn test_read_info_is_idempotent_for_every_node() {
    let (_dir, db) = checkout();
    let root = db.root().to_path_buf();
    db.op_add_directory(&root.join("A/C")).unwrap();
    db.op_delete(&root.join("A/B")).unwrap();
    db.op_copy(&root.join("iota"), &root.join("A/iota-copy"), &[]).unwrap();

    for relpath in ["", "A", "A/mu", "A/B", "A/B/lambda", "A/C", "A/iota-copy", "iota"] {
        let path = db.from_relpath(relpath);
        let first = db.read_info(&path).unwrap();
        let second = db.read_info(&path).unwrap();
        assert_eq!(first, second, "status of '{}' changed between reads", relpath);
    }
    assert_eq!(db.read_info(&root.join("A/B/lambda")).unwrap().status, Status::Deleted);
    assert_eq!(db.read_children(&root.join("A")).unwrap(), vec!["B", "C", "iota-copy", "mu"]);
}

#[test]
fn test_scan_addition_on_normal_node_is_unexpected() {
    let (_dir, db) = checkout();
    let root = db.root().to_path_buf();
    assert!(matches!(db.scan_addition(&root.join("A/mu")), Err(WcError::UnexpectedStatus(_))));

    db.op_add_file(&root.join("A/new.txt")).unwrap();
    let info = db.scan_addition(&root.join("A/new.txt")).unwrap();
    assert_eq!(info.status, Status::Added);
    assert_eq!(info.original, None);
    assert_eq!(info.repos.url(), format!("{}/trunk/A/new.txt", ROOT_URL));
}

#[test]
fn test_scan_deletion_inside_replaced_move_source() {
    let (_dir, db) = checkout();
    let root = db.root().to_path_buf();
    db.op_move(&root.join("A/B"), &root.join("B-moved")).unwrap();
    db.op_add_directory(&root.join("A/B")).unwrap();

    let info = db.scan_deletion(&root.join("A/B/lambda")).unwrap();
    assert_eq!(info.base_del_abspath, Some(root.join("A/B")));
    assert!(info.base_replaced);
    assert_eq!(info.moved_to_abspath, Some(root.join("B-moved")));
    assert_eq!(info.work_del_abspath, None);

    let moved = db.scan_addition(&root.join("B-moved/lambda")).unwrap();
    assert_eq!(moved.status, Status::MovedHere);
    assert_eq!(moved.op_root_abspath, root.join("B-moved"));
    assert_eq!(moved.original.unwrap().repos.relpath, "trunk/A/B");
}

#[test]
fn test_commit_with_bad_work_item_changes_nothing() {
    let (_dir, db) = checkout();
    let path = db.root().join("A/mu");
    db.op_modified(&path).unwrap();
    let before = db.read_info(&path).unwrap();

    let args = CommitArgs {
        new_revision: 2,
        changed_author: Some("jrandom".into()),
        work_items: vec![Skel::parse(Bytes::from_static(b"(no-such-operation)")).unwrap()],
        ..Default::default()
    };
    assert!(matches!(db.global_commit(&path, &args), Err(WcError::MalformedData(_))));
    assert_eq!(db.read_info(&path).unwrap(), before);
    assert_eq!(db.work_queue_len().unwrap(), 0);
}

#[test]
fn test_commit_then_cleanup_converges_to_normal() {
    let (dir, db) = checkout();
    let path = db.root().join("A/mu");
    let text = db.write_temp(b"new contents\n").unwrap();
    db.install_pristine(&text.path, &text.sha1, &text.md5).unwrap();
    db.op_modified(&path).unwrap();

    let install = WorkItem::FileInstall { relpath: "A/mu".into(), use_commit_times: false, record_fileinfo: true };
    let args = CommitArgs {
        new_revision: 2,
        changed_date: Some(1_262_304_000_000_000),
        changed_author: Some("jrandom".into()),
        new_checksum: Some(text.sha1.clone()),
        work_items: vec![install.to_skel()],
        ..Default::default()
    };
    db.global_commit(&path, &args).unwrap();
    drop(db);

    // The queued install has not run yet: the working copy needs cleanup.
    assert!(matches!(WcDb::open(dir.path(), OpenMode::ReadWrite), Err(WcError::CleanupRequired(_))));
    let db = WcDb::open(dir.path(), OpenMode::Cleanup).unwrap();
    assert_eq!(run_work_queue(&db, &CancellationToken::new()).unwrap(), 1);

    let info = db.read_info(&path).unwrap();
    assert_eq!(info.status, Status::Normal);
    assert_eq!(info.revision, Some(2));
    assert!(!info.text_mod);
    assert_eq!(info.checksum, Some(text.sha1));
    assert_eq!(std::fs::read(&path).unwrap(), b"new contents\n");
}

#[test]
fn test_pristine_install_twice_keeps_one_blob() {
    let (_dir, db) = checkout();
    let first = db.write_temp(b"same bytes").unwrap();
    let second = db.write_temp(b"same bytes").unwrap();
    db.install_pristine(&first.path, &first.sha1, &first.md5).unwrap();
    db.install_pristine(&second.path, &second.sha1, &second.md5).unwrap();

    let blob = db.get_pristine_path(&first.sha1).unwrap();
    let siblings = std::fs::read_dir(blob.parent().unwrap())
        .unwrap()
        .filter(|entry| entry.as_ref().unwrap().file_name().to_string_lossy().starts_with(&first.sha1.to_hex()))
        .count();
    assert_eq!(siblings, 1);
    assert!(db.check_pristine(&first.sha1, PristineCheck::Validate).unwrap());
    assert!(matches!(
        db.read_pristine(&Checksum::sha1_of(b"never stored")),
        Err(WcError::NotFound(_))
    ));
}

#[test]
fn test_schema_version_checks() {
    let (dir, db) = checkout();
    drop(db);
    let db_path = dir.path().join(".svn").join("wc.db");

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.pragma_update(None, "user_version", 18).unwrap();
    drop(conn);
    assert!(matches!(
        WcDb::open(dir.path(), OpenMode::ReadOnly),
        Err(WcError::SchemaTooNew { found: 18, .. })
    ));

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.pragma_update(None, "user_version", 12).unwrap();
    drop(conn);
    assert!(matches!(
        WcDb::open(dir.path(), OpenMode::ReadOnly),
        Err(WcError::SchemaTooOld { found: 12, .. })
    ));
}

#[test]
fn test_open_outside_working_copy() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(WcDb::open(dir.path(), OpenMode::ReadOnly), Err(WcError::NotWorkingCopy(_))));
}

#[test]
fn test_copies_from_repository_and_symlinks() {
    let (_dir, db) = checkout();
    let root = db.root().to_path_buf();
    let origin = CopyOrigin { repos: ReposLocation::new("branches/b1/x", ROOT_URL, UUID), revision: 3 };
    let changed = ChangedInfo { rev: Some(2), date: None, author: Some("jrandom".into()) };
    let mut props = PropertySet::new();
    props.set("svn:eol-style".into(), "native".into());

    db.op_copy_file(&root.join("A/x"), &origin, &props, &changed, Checksum::sha1_of(b"x")).unwrap();
    db.op_copy_dir(&root.join("A/D"), &origin, &PropertySet::new(), &changed, vec!["G".into()], Depth::Infinity)
        .unwrap();
    db.op_copy_symlink(&root.join("A/link"), &origin, &PropertySet::new(), &changed, "mu").unwrap();
    db.op_add_symlink(&root.join("A/local-link"), "../iota").unwrap();

    let copied = db.read_info(&root.join("A/x")).unwrap();
    assert_eq!(copied.status, Status::Added);
    let addition = db.scan_addition(&root.join("A/x")).unwrap();
    assert_eq!(addition.status, Status::Copied);
    assert_eq!(addition.original, Some(origin.clone()));
    assert_eq!(copied.original_repos_relpath.as_deref(), Some("branches/b1/x"));
    assert_eq!(copied.original_revision, Some(3));
    assert_eq!(db.read_property(&root.join("A/x"), "svn:eol-style").unwrap().as_deref(), Some("native"));

    assert_eq!(db.read_kind(&root.join("A/D")).unwrap(), Kind::Dir);
    assert_eq!(db.read_children(&root.join("A/D")).unwrap(), vec!["G"]);
    assert_eq!(db.read_kind(&root.join("A/link")).unwrap(), Kind::Symlink);

    let added = db.read_info(&root.join("A/local-link")).unwrap();
    assert_eq!(added.status, Status::Added);
    assert_eq!(added.symlink_target.as_deref(), Some("../iota"));

    let err = db.op_add_file(&root.join("A/x")).unwrap_err();
    assert!(!err.is_path_not_found());
}

#[test]
fn test_open_with_explicit_config() {
    let (_dir, db) = checkout();
    let root = db.root().to_path_buf();
    db.add_work_queue(&WorkItem::PristineCleanup.to_skel()).unwrap();
    drop(db);

    let strict = WcConfig { enforce_empty_work_queue: true, ..WcConfig::default() };
    assert!(matches!(
        WcDb::open_with_config(&root, OpenMode::ReadWrite, strict),
        Err(WcError::CleanupRequired(_))
    ));
    let relaxed = WcConfig { enforce_empty_work_queue: false, ..WcConfig::default() };
    let db = WcDb::open_with_config(&root.join("A"), OpenMode::ReadWrite, relaxed).unwrap();
    assert_eq!(db.work_queue_len().unwrap(), 1);
}
