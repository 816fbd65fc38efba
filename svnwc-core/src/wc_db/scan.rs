//! Node status derivation and the scan-up algorithms
//!
//! `read_info` layers WORKING over BASE and adds the ACTUAL overlay.
//! `scan_addition` and `scan_deletion` walk ancestors to find the
//! operation roots a node's status comes from.

use super::base::{read_base_row, scan_base_repository_in};
use super::locks::{LockInfo, read_lock};
use super::working::{CopyOrigin, WorkingRow, read_actual_row, read_working_row};
use super::{ChangedInfo, Depth, Kind, Presence, ReposLocation, Status, WcDb, fetch_repository, parent_of};
use crate::checksum::Checksum;
use crate::error::{Result, WcError};
use crate::properties::PropertySet;
use crate::relpath;
use rusqlite::{Connection, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Combined view of a node across BASE, WORKING and ACTUAL.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub status: Status,
    pub kind: Kind,
    /// BASE revision; `None` for nodes added or replaced in WORKING.
    pub revision: Option<i64>,
    /// Repository location of the BASE node; `None` when WORKING shadows it.
    pub repos: Option<ReposLocation>,
    pub changed: ChangedInfo,
    pub last_mod_time: Option<i64>,
    pub depth: Option<Depth>,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub symlink_target: Option<String>,
    pub changelist: Option<String>,
    /// Copy source, recorded only on a copy's operation root.
    pub original_repos_relpath: Option<String>,
    pub original_root_url: Option<String>,
    pub original_uuid: Option<String>,
    pub original_revision: Option<i64>,
    pub text_mod: bool,
    pub props_mod: bool,
    pub base_shadowed: bool,
    pub conflicted: bool,
    pub lock: Option<LockInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionInfo {
    /// `Added`, `Copied` or `MovedHere`.
    pub status: Status,
    pub op_root_abspath: PathBuf,
    /// Where the node will live in the repository once committed.
    pub repos: ReposLocation,
    /// Source of the operation root, for copies and moves.
    pub original: Option<CopyOrigin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionInfo {
    /// Root of the BASE-tree deletion, if BASE is deleted at all.
    pub base_del_abspath: Option<PathBuf>,
    /// Whether that BASE deletion root is replaced by a WORKING node.
    pub base_replaced: bool,
    /// Destination of the nearest moved-away ancestor.
    pub moved_to_abspath: Option<PathBuf>,
    /// Root of the WORKING-tree deletion inside an add or copy.
    pub work_del_abspath: Option<PathBuf>,
}

/// Relpath form of [`AdditionInfo`] for use inside transactions.
pub(crate) struct Addition {
    pub status: Status,
    pub op_root_relpath: String,
    pub repos: ReposLocation,
    pub original: Option<CopyOrigin>,
}

fn copy_origin(conn: &Connection, row: &WorkingRow) -> Result<Option<CopyOrigin>> {
    match &row.copyfrom {
        Some((repos_id, path, rev)) => {
            let (root_url, uuid) = fetch_repository(conn, *repos_id)?;
            Ok(Some(CopyOrigin { repos: ReposLocation::new(path.clone(), root_url, uuid), revision: *rev }))
        }
        None => Ok(None),
    }
}

pub(crate) fn scan_addition_in(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Addition> {
    let start = match read_working_row(conn, wc_id, relpath)? {
        Some(row) => row,
        None if read_base_row(conn, wc_id, relpath)?.is_some() => {
            return Err(WcError::UnexpectedStatus(format!("expected '{}' to be added", relpath)));
        }
        None => return Err(WcError::PathNotFound(relpath.into())),
    };
    if !start.is_present() {
        return Err(WcError::UnexpectedStatus(format!("expected '{}' to be added", relpath)));
    }

    let mut status = Status::Added;
    let mut original = None;
    let mut op_root: Option<String> = None;
    let mut topmost_added = relpath.to_string();
    let mut current = relpath.to_string();
    let mut row = Some(start);

    // Walk up to the first node without a WORKING row; its BASE gives the
    // repository location the added subtree hangs from.
    while let Some(work) = row {
        if op_root.is_none() && work.copyfrom.is_some() {
            status = if work.moved_here { Status::MovedHere } else { Status::Copied };
            original = copy_origin(conn, &work)?;
            op_root = Some(current.clone());
        }
        topmost_added = current.clone();
        let Some(parent) = parent_of(&current) else {
            return Err(WcError::corrupt("the working-copy root is scheduled for addition"));
        };
        let parent = parent.to_string();
        row = read_working_row(conn, wc_id, &parent)?.filter(WorkingRow::is_present);
        current = parent;
    }

    let base = scan_base_repository_in(conn, wc_id, &current).map_err(|e| match e {
        WcError::PathNotFound(_) => WcError::corrupt(format!("added node '{}' has no versioned parent", relpath)),
        other => other,
    })?;
    let suffix = relpath::skip_ancestor(&current, relpath).unwrap_or_default();
    Ok(Addition {
        status,
        op_root_relpath: op_root.unwrap_or(topmost_added),
        repos: ReposLocation {
            relpath: relpath::join(&base.relpath, suffix),
            root_url: base.root_url,
            uuid: base.uuid,
        },
        original,
    })
}

struct Level {
    relpath: String,
    work: Option<Presence>,
    has_base: bool,
}

fn read_level(conn: &Connection, wc_id: i64, relpath: &str) -> Result<(Option<WorkingRow>, bool)> {
    let work = read_working_row(conn, wc_id, relpath)?;
    let has_base = read_base_row(conn, wc_id, relpath)?
        .is_some_and(|b| matches!(b.presence, Presence::Normal | Presence::Incomplete));
    Ok((work, has_base))
}

pub(crate) fn scan_deletion_in(conn: &Connection, wc_id: i64, relpath: &str) -> Result<(Option<String>, bool, Option<String>, Option<String>)> {
    let (start_work, start_base) = read_level(conn, wc_id, relpath)?;
    match &start_work {
        Some(w) if w.presence.is_deleted() => {}
        None if !start_base && read_base_row(conn, wc_id, relpath)?.is_none() => {
            return Err(WcError::PathNotFound(relpath.into()));
        }
        _ => return Err(WcError::UnexpectedStatus(format!("expected '{}' to be deleted", relpath))),
    }

    let mut base_del: Option<String> = None;
    let mut base_replaced = false;
    let mut moved_to: Option<String> = None;
    let mut work_del: Option<String> = None;

    let mut child: Option<Level> = None;
    let mut current = relpath.to_string();
    let mut level = (start_work, start_base);
    loop {
        let (work, has_base) = level;
        let Some(work) = work else {
            // Fell off the top of the WORKING tree: the child was the
            // topmost deleted node, so it roots the BASE deletion.
            if let Some(c) = &child {
                if base_del.is_none() && c.has_base {
                    base_del = Some(c.relpath.clone());
                    base_replaced = c.work == Some(Presence::Normal);
                }
            }
            break;
        };

        if moved_to.is_none() {
            if let Some(dst) = &work.moved_to {
                moved_to = Some(dst.clone());
                if base_del.is_none() {
                    base_del = Some(current.clone());
                    base_replaced = work.presence == Presence::Normal;
                }
            }
        }
        if let Some(c) = &child {
            if base_del.is_none() && c.has_base && !has_base {
                base_del = Some(c.relpath.clone());
                base_replaced = c.work == Some(Presence::Normal);
            }
            if work_del.is_none() && work.presence == Presence::Normal && c.work == Some(Presence::NotPresent) {
                work_del = Some(c.relpath.clone());
            }
        }

        let this = Level { relpath: current.clone(), work: Some(work.presence), has_base };
        let Some(parent) = parent_of(&current).map(str::to_string) else {
            if base_del.is_none() && has_base {
                base_del = Some(current.clone());
                base_replaced = work.presence == Presence::Normal;
            }
            break;
        };
        child = Some(this);
        level = read_level(conn, wc_id, &parent)?;
        current = parent;
    }
    Ok((base_del, base_replaced, moved_to, work_del))
}

impl WcDb {
    pub fn read_info(&self, abspath: &Path) -> Result<NodeInfo> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let conn = self.conn()?;
        let base = read_base_row(&conn, wc_id, &relpath)?;
        let work = read_working_row(&conn, wc_id, &relpath)?;
        let actual = read_actual_row(&conn, wc_id, &relpath)?;

        let mut info = match (&work, &base) {
            (None, None) if actual.is_some() => {
                return Err(WcError::corrupt(format!("'{}' has only an ACTUAL row", relpath)));
            }
            (None, None) => return Err(WcError::PathNotFound(abspath.to_path_buf())),
            (Some(w), _) => {
                let original = copy_origin(&conn, w)?;
                NodeInfo {
                    status: Status::from_working_presence(w.presence),
                    kind: w.kind,
                    revision: None,
                    repos: None,
                    changed: w.changed.clone(),
                    last_mod_time: w.last_mod_time,
                    depth: w.depth,
                    checksum: w.checksum.clone(),
                    translated_size: w.translated_size,
                    symlink_target: w.symlink_target.clone(),
                    changelist: None,
                    original_repos_relpath: original.as_ref().map(|o| o.repos.relpath.clone()),
                    original_root_url: original.as_ref().map(|o| o.repos.root_url.clone()),
                    original_uuid: original.as_ref().map(|o| o.repos.uuid.clone()),
                    original_revision: original.as_ref().map(|o| o.revision),
                    text_mod: false,
                    props_mod: false,
                    base_shadowed: base.is_some(),
                    conflicted: false,
                    lock: None,
                }
            }
            (None, Some(b)) => {
                let repos = scan_base_repository_in(&conn, wc_id, &relpath)?;
                let lock = match b.repos_id {
                    Some(repos_id) => read_lock(&conn, repos_id, &repos.relpath)?,
                    None => None,
                };
                NodeInfo {
                    status: Status::from_base_presence(b.presence),
                    kind: b.kind,
                    revision: b.revnum,
                    repos: Some(repos),
                    changed: b.changed.clone(),
                    last_mod_time: b.last_mod_time,
                    depth: b.depth,
                    checksum: b.checksum.clone(),
                    translated_size: b.translated_size,
                    symlink_target: b.symlink_target.clone(),
                    changelist: None,
                    original_repos_relpath: None,
                    original_root_url: None,
                    original_uuid: None,
                    original_revision: None,
                    text_mod: false,
                    props_mod: false,
                    base_shadowed: false,
                    conflicted: false,
                    lock,
                }
            }
        };
        if let Some(a) = actual {
            info.changelist = a.changelist;
            info.text_mod = a.text_mod;
            info.props_mod = a.properties.is_some();
            info.conflicted = a.conflict.is_some_and(|c| !c.is_empty());
        }
        Ok(info)
    }

    pub fn read_kind(&self, abspath: &Path) -> Result<Kind> {
        Ok(self.read_info(abspath)?.kind)
    }

    /// Hidden nodes are recorded but not part of the user's tree.
    pub fn is_node_hidden(&self, abspath: &Path) -> Result<bool> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        if let Some(work) = read_working_row(&conn, self.wc_id(), &relpath)? {
            return Ok(work.presence.is_hidden());
        }
        match read_base_row(&conn, self.wc_id(), &relpath)? {
            Some(base) => Ok(base.presence.is_hidden()),
            None => Err(WcError::PathNotFound(abspath.to_path_buf())),
        }
    }

    /// Names of every child in BASE or WORKING, sorted.
    pub fn read_children(&self, dir_abspath: &Path) -> Result<Vec<String>> {
        let relpath = self.to_relpath(dir_abspath)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT local_relpath FROM BASE_NODE WHERE wc_id = ?1 AND parent_relpath = ?2
             UNION
             SELECT local_relpath FROM WORKING_NODE WHERE wc_id = ?1 AND parent_relpath = ?2",
        )?;
        let rows = stmt.query_map(params![self.wc_id(), relpath], |row| row.get::<_, String>(0))?;
        let mut names = BTreeSet::new();
        for child in rows {
            names.insert(relpath::basename(&child?).to_string());
        }
        Ok(names.into_iter().collect())
    }

    /// Properties including local edits.
    pub fn read_properties(&self, abspath: &Path) -> Result<PropertySet> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        if let Some(props) = read_actual_row(&conn, self.wc_id(), &relpath)?.and_then(|a| a.properties) {
            return Ok(props);
        }
        drop(conn);
        Ok(self.read_pristine_properties(abspath)?.unwrap_or_default())
    }

    /// Properties before local edits; `None` for deleted nodes.
    pub fn read_pristine_properties(&self, abspath: &Path) -> Result<Option<PropertySet>> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        super::working::pristine_props_in(&conn, self.wc_id(), &relpath).map_err(|e| match e {
            WcError::PathNotFound(_) => WcError::PathNotFound(abspath.to_path_buf()),
            other => other,
        })
    }

    pub fn read_property(&self, abspath: &Path, name: &str) -> Result<Option<String>> {
        Ok(self.read_properties(abspath)?.remove(name))
    }

    /// Find the operation root of an added, copied or moved node.
    pub fn scan_addition(&self, abspath: &Path) -> Result<AdditionInfo> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let addition = scan_addition_in(&conn, self.wc_id(), &relpath).map_err(|e| match e {
            WcError::PathNotFound(_) => WcError::PathNotFound(abspath.to_path_buf()),
            other => other,
        })?;
        Ok(AdditionInfo {
            status: addition.status,
            op_root_abspath: self.from_relpath(&addition.op_root_relpath),
            repos: addition.repos,
            original: addition.original,
        })
    }

    /// Find the roots a deleted node's deletion comes from.
    pub fn scan_deletion(&self, abspath: &Path) -> Result<DeletionInfo> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let (base_del, base_replaced, moved_to, work_del) = scan_deletion_in(&conn, self.wc_id(), &relpath)
            .map_err(|e| match e {
                WcError::PathNotFound(_) => WcError::PathNotFound(abspath.to_path_buf()),
                other => other,
            })?;
        Ok(DeletionInfo {
            base_del_abspath: base_del.map(|p| self.from_relpath(&p)),
            base_replaced,
            moved_to_abspath: moved_to.map(|p| self.from_relpath(&p)),
            work_del_abspath: work_del.map(|p| self.from_relpath(&p)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_wc;
    use super::super::{BaseContent, NewBaseNode};
    use super::*;

    fn repos(p: &str) -> ReposLocation {
        ReposLocation::new(relpath::join("trunk", p), "http://svn.example.com/repo", "uuid-1")
    }

    fn checkout(db: &WcDb) {
        let root = db.root().to_path_buf();
        db.add_base_node(
            &root,
            &NewBaseNode::new(repos(""), 1),
            BaseContent::Directory { children: vec!["A".into(), "iota".into()], depth: Depth::Infinity },
            &[],
        )
        .unwrap();
        db.add_base_directory(&root.join("A"), &NewBaseNode::new(repos("A"), 1), vec!["B".into()], Depth::Infinity)
            .unwrap();
        db.add_base_directory(&root.join("A/B"), &NewBaseNode::new(repos("A/B"), 1), vec!["f".into()], Depth::Infinity)
            .unwrap();
        db.add_base_file(&root.join("A/B/f"), &NewBaseNode::new(repos("A/B/f"), 1), Checksum::sha1_of(b"f"), None)
            .unwrap();
        db.add_base_file(&root.join("iota"), &NewBaseNode::new(repos("iota"), 1), Checksum::sha1_of(b"i"), None)
            .unwrap();
    }

    #[test]
    fn test_read_info_is_stable() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let path = db.root().join("A/B/f");
        assert_eq!(db.read_info(&path).unwrap(), db.read_info(&path).unwrap());
        assert_eq!(db.read_children(db.root()).unwrap(), vec!["A", "iota"]);
        assert!(!db.is_node_hidden(&path).unwrap());
    }

    #[test]
    fn test_scan_addition_preconditions() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let root = db.root().to_path_buf();
        assert!(matches!(db.scan_addition(&root.join("iota")), Err(WcError::UnexpectedStatus(_))));
        assert!(matches!(db.scan_addition(&root.join("nope")), Err(WcError::PathNotFound(_))));

        db.op_add_directory(&root.join("A/new")).unwrap();
        db.op_add_file(&root.join("A/new/g")).unwrap();
        let info = db.scan_addition(&root.join("A/new/g")).unwrap();
        assert_eq!(info.status, Status::Added);
        assert_eq!(info.op_root_abspath, root.join("A/new"));
        assert_eq!(info.repos.relpath, "trunk/A/new/g");
        assert_eq!(info.original, None);
    }

    #[test]
    fn test_scan_addition_copy_and_move() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let root = db.root().to_path_buf();
        db.op_copy(&root.join("A/B"), &root.join("C"), &[]).unwrap();
        let info = db.scan_addition(&root.join("C/f")).unwrap();
        assert_eq!(info.status, Status::Copied);
        assert_eq!(info.op_root_abspath, root.join("C"));
        assert_eq!(info.repos.relpath, "trunk/C/f");
        let original = info.original.unwrap();
        assert_eq!(original.repos.relpath, "trunk/A/B");
        assert_eq!(original.revision, 1);

        db.op_move(&root.join("iota"), &root.join("A/iota2")).unwrap();
        let moved = db.scan_addition(&root.join("A/iota2")).unwrap();
        assert_eq!(moved.status, Status::MovedHere);
        let deleted = db.scan_deletion(&root.join("iota")).unwrap();
        assert_eq!(deleted.moved_to_abspath, Some(root.join("A/iota2")));
        assert_eq!(deleted.base_del_abspath, Some(root.join("iota")));
        assert!(!deleted.base_replaced);
    }

    #[test]
    fn test_scan_deletion_base_root() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let root = db.root().to_path_buf();
        assert!(matches!(db.scan_deletion(&root.join("iota")), Err(WcError::UnexpectedStatus(_))));
        assert!(matches!(db.scan_deletion(&root.join("zzz")), Err(WcError::PathNotFound(_))));
        db.op_delete(&root.join("A")).unwrap();
        let info = db.scan_deletion(&root.join("A/B/f")).unwrap();
        assert_eq!(info.base_del_abspath, Some(root.join("A")));
        assert!(!info.base_replaced);
        assert_eq!(info.moved_to_abspath, None);
        assert_eq!(info.work_del_abspath, None);
    }

    #[test]
    fn test_scan_deletion_replacement_and_move_at_different_levels() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let root = db.root().to_path_buf();
        // Move A away, put a new directory in its place, copy something
        // into the replacement and delete part of that copy.
        db.op_move(&root.join("A"), &root.join("moved")).unwrap();
        db.op_add_directory(&root.join("A")).unwrap();
        db.op_copy(&root.join("moved/B"), &root.join("A/sub"), &[]).unwrap();
        db.op_delete(&root.join("A/sub/f")).unwrap();

        let base_child = db.scan_deletion(&root.join("A/B/f")).unwrap();
        assert_eq!(base_child.base_del_abspath, Some(root.join("A")));
        assert!(base_child.base_replaced);
        assert_eq!(base_child.moved_to_abspath, Some(root.join("moved")));
        assert_eq!(base_child.work_del_abspath, None);

        let copied_child = db.scan_deletion(&root.join("A/sub/f")).unwrap();
        assert_eq!(copied_child.work_del_abspath, Some(root.join("A/sub/f")));
        assert_eq!(copied_child.moved_to_abspath, Some(root.join("moved")));
        assert_eq!(copied_child.base_del_abspath, Some(root.join("A")));
        assert!(copied_child.base_replaced);
    }
}
