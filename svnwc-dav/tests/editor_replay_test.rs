//! Editor replay scenarios
//!
//! Report bodies are fed through `EditorHandler`, either into a
//! `RecordingEditor` to check the exact call sequence or into a
//! `WcUpdateEditor` to check the resulting working copy.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;
use svnwc_core::properties::svn_props;
use svnwc_core::{BaseContent, Checksum, Depth, NewBaseNode, PropertySet, ReposLocation, Status, WcConfig, WcDb, WcError};
use svnwc_dav::svndiff;
use svnwc_dav::{
    DavError, Dialect, EditorCall, EditorHandler, PropertyFetcher, RecordingEditor, ReplayConfig, WcUpdateEditor,
};
use tempfile::TempDir;

const ROOT_URL: &str = "http://svn.example.com/repo";
const UUID: &str = "0c4f7a9e-6a0d-4d52-8d3b-6f1f8f5b2a10";

fn record(dialect: Dialect, xml: &str) -> (Result<(), DavError>, Vec<EditorCall>) {
    let mut handler = EditorHandler::new(RecordingEditor::new(), dialect);
    let result = handler.feed_xml(xml.as_bytes());
    (result, handler.into_editor().calls)
}

fn file_prop(path: &str, name: &str, value: &str) -> EditorCall {
    EditorCall::ChangeFileProp { path: path.into(), name: name.into(), value: Some(value.into()) }
}

#[test]
fn test_replay_add_file_call_sequence() {
    let (result, calls) = record(
        Dialect::Replay,
        r#"<open-root rev="5"/><add-file name="a.txt"/><change-file-prop name="svn:eol-style">native</change-file-prop><close-file/><close-directory/>"#,
    );
    result.unwrap();
    assert_eq!(
        calls,
        vec![
            EditorCall::OpenRoot(5),
            EditorCall::AddFile { path: "a.txt".into(), copyfrom_path: None, copyfrom_rev: -1 },
            file_prop("a.txt", "svn:eol-style", "native"),
            EditorCall::CloseFile { path: "a.txt".into(), checksum: None },
            EditorCall::CloseDir,
        ]
    );
}

#[test]
fn test_replay_frames_balance() {
    let mut handler = EditorHandler::new(RecordingEditor::new(), Dialect::Replay);
    handler
        .feed_xml(
            br#"<S:editor-report xmlns:S="svn:">
                <S:target-revision rev="9"/>
                <S:open-root rev="8"/>
                <S:open-directory name="A" rev="8"/>
                <S:open-directory name="B" rev="8"/>
                <S:open-file name="lambda" rev="8"/>"#,
        )
        .unwrap();
    assert_eq!(handler.depth(), 3);
    assert_eq!(handler.current_path(), "A/B/lambda");

    handler
        .feed_xml(
            br#"<S:close-file checksum="d41d8cd98f00b204e9800998ecf8427e"/>
                <S:close-directory/>
                <S:add-directory name="C" copyfrom-path="/trunk/A/B" copyfrom-rev="7"/>
                <S:close-directory/>
                <S:delete-entry name="mu" rev="8"/>
                <S:close-directory/>
                <S:close-directory/>
                </S:editor-report>"#,
        )
        .unwrap();
    assert_eq!(handler.depth(), 0);
    assert_eq!(handler.current_path(), "");

    let calls = handler.finish().unwrap().calls;
    assert_eq!(calls.first(), Some(&EditorCall::TargetRevision(9)));
    assert!(calls.contains(&EditorCall::CloseFile {
        path: "A/B/lambda".into(),
        checksum: Some("d41d8cd98f00b204e9800998ecf8427e".into()),
    }));
    assert!(calls.contains(&EditorCall::AddDir {
        path: "A/C".into(),
        copyfrom_path: Some("/trunk/A/B".into()),
        copyfrom_rev: 7,
    }));
    assert!(calls.contains(&EditorCall::DeleteEntry { path: "A/mu".into(), revision: 8 }));
    assert_eq!(calls.iter().filter(|c| **c == EditorCall::CloseDir).count(), 4);
    assert_eq!(calls.last(), Some(&EditorCall::CloseEdit));
}

#[test]
fn test_close_file_in_directory_mode_halts() {
    let mut handler = EditorHandler::new(RecordingEditor::new(), Dialect::Replay);
    let result = handler.feed_xml(br#"<open-root rev="1"/><close-file/><add-file name="late"/>"#);
    assert!(matches!(result, Err(DavError::MalformedData(_))));

    // Nothing after the bad element reaches the editor.
    assert!(handler.start_element("close-directory", &[]).is_err());
    assert_eq!(handler.editor().calls, vec![EditorCall::OpenRoot(1), EditorCall::AbortEdit]);
    assert!(handler.finish().is_err());
}

#[test]
fn test_non_ascii_delta_text_is_malformed() {
    let (result, calls) = record(
        Dialect::Replay,
        r#"<open-root rev="1"/><open-file name="f" rev="1"/><apply-textdelta>abcé</apply-textdelta>"#,
    );
    assert!(matches!(result, Err(DavError::MalformedData(_))));
    assert_eq!(
        calls,
        vec![
            EditorCall::OpenRoot(1),
            EditorCall::OpenFile { path: "f".into(), revision: 1 },
            EditorCall::ApplyTextDelta { path: "f".into(), base_checksum: None },
            EditorCall::AbortEdit,
        ]
    );
}

#[test]
fn test_non_ascii_property_value_is_malformed() {
    let (result, calls) = record(
        Dialect::Replay,
        r#"<open-root rev="1"/><change-dir-prop name="p" encoding="base64">aGVsé</change-dir-prop>"#,
    );
    assert!(matches!(result, Err(DavError::MalformedData(_))));
    assert_eq!(calls, vec![EditorCall::OpenRoot(1), EditorCall::AbortEdit]);
}

#[test]
fn test_replay_unknown_elements_are_ignored() {
    let (result, calls) = record(
        Dialect::Replay,
        r#"<open-root rev="2"><future-element attr="x">text</future-element></open-root><close-directory/>"#,
    );
    result.unwrap();
    assert_eq!(calls, vec![EditorCall::OpenRoot(2), EditorCall::CloseDir]);
}

#[test]
fn test_update_report_send_all() {
    let delta = STANDARD.encode(svndiff::encode_fulltext(b"hello\n"));
    let xml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<S:update-report xmlns:S="svn:" xmlns:V="http://subversion.tigris.org/xmlns/dav/" xmlns:D="DAV:" send-all="true">
<S:target-revision rev="4"/>
<S:open-directory rev="3">
<D:checked-in><D:href>/repo/!svn/ver/4/trunk</D:href></D:checked-in>
<S:remove-prop name="svn:ignore"/>
<S:add-file name="hello.txt">
<D:version-name>4</D:version-name>
<D:creator-displayname>sally</D:creator-displayname>
<S:set-prop name="svn:mime-type" encoding="base64">dGV4dC9wbGFpbg==</S:set-prop>
<S:txdelta>{}</S:txdelta>
<S:prop><V:md5-checksum>b1946ac92492d2347c6235b4d2611184</V:md5-checksum></S:prop>
</S:add-file>
<S:absent-directory name="secret"/>
<S:delete-entry name="old"/>
</S:open-directory>
</S:update-report>"#,
        delta
    );
    let (result, calls) = record(Dialect::Update, &xml);
    result.unwrap();

    let expected = vec![
        EditorCall::TargetRevision(4),
        EditorCall::OpenRoot(3),
        EditorCall::ChangeDirProp {
            path: "".into(),
            name: svn_props::WC_VERSION_URL.into(),
            value: Some("/repo/!svn/ver/4/trunk".into()),
        },
        EditorCall::ChangeDirProp { path: "".into(), name: "svn:ignore".into(), value: None },
        EditorCall::AddFile { path: "hello.txt".into(), copyfrom_path: None, copyfrom_rev: -1 },
        file_prop("hello.txt", svn_props::ENTRY_COMMITTED_REV, "4"),
        file_prop("hello.txt", svn_props::ENTRY_LAST_AUTHOR, "sally"),
        file_prop("hello.txt", "svn:mime-type", "text/plain"),
        EditorCall::ApplyTextDelta { path: "hello.txt".into(), base_checksum: None },
        EditorCall::TextDeltaChunk { path: "hello.txt".into(), data: svndiff::encode_fulltext(b"hello\n") },
        EditorCall::TextDeltaEnd { path: "hello.txt".into() },
        EditorCall::CloseFile {
            path: "hello.txt".into(),
            checksum: Some("b1946ac92492d2347c6235b4d2611184".into()),
        },
        EditorCall::AbsentDir("secret".into()),
        EditorCall::DeleteEntry { path: "old".into(), revision: -1 },
        EditorCall::CloseDir,
        EditorCall::CloseEdit,
    ];
    assert_eq!(calls, expected);
}

#[test]
fn test_update_without_contents_skips_delta_data() {
    let config = ReplayConfig { fetch_contents: false, send_all: true };
    let mut handler = EditorHandler::with_config(RecordingEditor::new(), Dialect::Update, config);
    handler
        .feed_xml(
            br#"<S:update-report xmlns:S="svn:" send-all="true"><S:open-directory rev="1">
                <S:open-file name="f" rev="1"><S:txdelta>U1ZOAA==</S:txdelta></S:open-file>
                </S:open-directory></S:update-report>"#,
        )
        .unwrap();
    let calls = handler.into_editor().calls;
    assert!(!calls.iter().any(|c| matches!(c, EditorCall::TextDeltaChunk { .. })));
    assert!(calls.contains(&EditorCall::TextDeltaEnd { path: "f".into() }));
}

/// Serves canned properties and texts, remembering what was asked for.
struct CannedFetcher {
    requests: Rc<RefCell<Vec<String>>>,
}

impl PropertyFetcher for CannedFetcher {
    fn fetch_props(&mut self, version_url: &str) -> Result<PropertySet, DavError> {
        self.requests.borrow_mut().push(format!("props {}", version_url));
        Ok([("svn:mime-type".to_string(), "text/plain".to_string())].into_iter().collect())
    }

    fn fetch_file(&mut self, version_url: &str) -> Result<Bytes, DavError> {
        self.requests.borrow_mut().push(format!("file {}", version_url));
        Ok(Bytes::from_static(b"fetched\n"))
    }
}

const SKELETAL_REPORT: &str = r#"<S:update-report xmlns:S="svn:" xmlns:D="DAV:">
<S:target-revision rev="3"/>
<S:open-directory rev="2">
<D:checked-in><D:href>/repo/!svn/ver/3/trunk</D:href></D:checked-in>
<S:add-file name="f.txt">
<D:checked-in><D:href>/repo/!svn/ver/3/trunk/f.txt</D:href></D:checked-in>
<S:fetch-props/>
<S:fetch-file/>
</S:add-file>
</S:open-directory>
</S:update-report>"#;

#[test]
fn test_skeletal_report_fetches_inline() {
    let requests = Rc::new(RefCell::new(Vec::new()));
    let fetcher = CannedFetcher { requests: requests.clone() };
    let mut handler = EditorHandler::new(RecordingEditor::new(), Dialect::Update).with_fetcher(Box::new(fetcher));
    handler.feed_xml(SKELETAL_REPORT.as_bytes()).unwrap();
    assert_eq!(handler.version_url("f.txt"), Some("/repo/!svn/ver/3/trunk/f.txt"));

    let calls = handler.into_editor().calls;
    let add = calls.iter().position(|c| matches!(c, EditorCall::AddFile { .. })).unwrap();
    assert_eq!(
        &calls[add + 1..add + 6],
        &[
            file_prop("f.txt", svn_props::WC_VERSION_URL, "/repo/!svn/ver/3/trunk/f.txt"),
            file_prop("f.txt", "svn:mime-type", "text/plain"),
            EditorCall::ApplyTextDelta { path: "f.txt".into(), base_checksum: None },
            EditorCall::TextDeltaChunk { path: "f.txt".into(), data: svndiff::encode_fulltext(b"fetched\n") },
            EditorCall::TextDeltaEnd { path: "f.txt".into() },
        ]
    );
    assert_eq!(
        *requests.borrow(),
        vec!["props /repo/!svn/ver/3/trunk/f.txt", "file /repo/!svn/ver/3/trunk/f.txt"]
    );
}

#[test]
fn test_skeletal_report_without_fetcher() {
    let (result, calls) = record(Dialect::Update, SKELETAL_REPORT);
    assert!(matches!(result, Err(DavError::NotImplemented(_))));
    assert_eq!(calls.last(), Some(&EditorCall::AbortEdit));
}

fn repos(relpath: &str) -> ReposLocation {
    ReposLocation::new(svnwc_core::relpath::join("trunk", relpath), ROOT_URL, UUID)
}

fn original_text(relpath: &str) -> String {
    format!("This is the file '{}'.\n", relpath)
}

/// A checkout of trunk at r1 holding `A/mu`, `A/B/lambda` and `iota`,
/// with the working files on disk.
fn checkout() -> (TempDir, WcDb) {
    let dir = TempDir::new().unwrap();
    let db = WcDb::init(dir.path(), &repos(""), 0, Depth::Infinity, WcConfig::default()).unwrap();
    let root = db.root().to_path_buf();
    for (relpath, children) in [("", vec!["A", "iota"]), ("A", vec!["B", "mu"]), ("A/B", vec!["lambda"])] {
        db.add_base_node(
            &db.from_relpath(relpath),
            &NewBaseNode::new(repos(relpath), 1),
            BaseContent::Directory { children: children.into_iter().map(String::from).collect(), depth: Depth::Infinity },
            &[],
        )
        .unwrap();
        std::fs::create_dir_all(root.join(relpath)).unwrap();
    }
    for relpath in ["A/mu", "A/B/lambda", "iota"] {
        let text = original_text(relpath);
        let tmp = db.write_temp(text.as_bytes()).unwrap();
        db.install_pristine(&tmp.path, &tmp.sha1, &tmp.md5).unwrap();
        db.add_base_file(&root.join(relpath), &NewBaseNode::new(repos(relpath), 1), tmp.sha1, None).unwrap();
        std::fs::write(root.join(relpath), text).unwrap();
    }
    (dir, db)
}

fn update_report(mu_base_checksum: &str) -> String {
    let mu_delta = STANDARD.encode(svndiff::encode_fulltext(b"new mu\n"));
    let new_delta = STANDARD.encode(svndiff::encode_fulltext(b"brand new\n"));
    format!(
        r#"<S:update-report xmlns:S="svn:" xmlns:V="http://subversion.tigris.org/xmlns/dav/" xmlns:D="DAV:" send-all="true">
<S:target-revision rev="2"/>
<S:open-directory rev="1">
<D:checked-in><D:href>/repo/!svn/ver/2/trunk</D:href></D:checked-in>
<S:set-prop name="svn:ignore">*.o</S:set-prop>
<S:open-directory name="A" rev="1">
<S:open-file name="mu" rev="1">
<S:txdelta base-checksum="{}">{}</S:txdelta>
<S:prop><V:md5-checksum>{}</V:md5-checksum></S:prop>
</S:open-file>
<S:add-file name="new.txt">
<D:version-name>2</D:version-name>
<D:creationdate>2026-01-02T03:04:05.000000Z</D:creationdate>
<D:creator-displayname>jrandom</D:creator-displayname>
<S:set-prop name="svn:eol-style">native</S:set-prop>
<S:txdelta>{}</S:txdelta>
</S:add-file>
</S:open-directory>
<S:delete-entry name="iota"/>
</S:open-directory>
</S:update-report>"#,
        mu_base_checksum,
        mu_delta,
        Checksum::md5_of(b"new mu\n").to_hex(),
        new_delta
    )
}

#[test]
fn test_update_into_working_copy() {
    let (_dir, db) = checkout();
    let root = db.root().to_path_buf();
    let base_md5 = Checksum::md5_of(original_text("A/mu").as_bytes()).to_hex();

    let mut handler = EditorHandler::new(WcUpdateEditor::new(&db), Dialect::Update);
    handler.feed_xml(update_report(&base_md5).as_bytes()).unwrap();
    assert_eq!(handler.finish().unwrap().files_changed(), 2);
    assert_eq!(db.work_queue_len().unwrap(), 0);

    let mu = db.read_info(&root.join("A/mu")).unwrap();
    assert_eq!((mu.status, mu.revision), (Status::Normal, Some(2)));
    assert_eq!(std::fs::read(root.join("A/mu")).unwrap(), b"new mu\n");

    let added = db.read_info(&root.join("A/new.txt")).unwrap();
    assert_eq!(added.revision, Some(2));
    assert_eq!(added.changed.rev, Some(2));
    assert_eq!(added.changed.author.as_deref(), Some("jrandom"));
    assert_eq!(added.repos.unwrap().relpath, "trunk/A/new.txt");
    assert_eq!(std::fs::read(root.join("A/new.txt")).unwrap(), b"brand new\n");
    assert_eq!(db.read_property(&root.join("A/new.txt"), "svn:eol-style").unwrap().as_deref(), Some("native"));

    assert!(matches!(db.read_info(&root.join("iota")), Err(WcError::PathNotFound(_))));
    assert!(!root.join("iota").exists());

    assert_eq!(db.get_base_prop(&root, "svn:ignore").unwrap().as_deref(), Some("*.o"));
    let cache = db.get_base_dav_cache(&root).unwrap().unwrap();
    assert_eq!(cache.get(svn_props::WC_VERSION_URL).map(String::as_str), Some("/repo/!svn/ver/2/trunk"));

    // Untouched nodes keep their revision.
    assert_eq!(db.read_info(&root.join("A/B/lambda")).unwrap().revision, Some(1));
    assert_eq!(db.read_children(&root.join("A")).unwrap(), vec!["B", "mu", "new.txt"]);
}

#[test]
fn test_failed_update_leaves_node_unchanged() {
    let (_dir, db) = checkout();
    let root = db.root().to_path_buf();

    let mut handler = EditorHandler::new(WcUpdateEditor::new(&db), Dialect::Update);
    let result = handler.feed_xml(update_report("00000000000000000000000000000000").as_bytes());
    assert!(matches!(result, Err(DavError::MalformedData(_))));

    let mu = db.read_info(&root.join("A/mu")).unwrap();
    assert_eq!(mu.revision, Some(1));
    assert_eq!(std::fs::read(root.join("A/mu")).unwrap(), original_text("A/mu").as_bytes());
    assert!(db.read_info(&root.join("A/new.txt")).is_err());
}
