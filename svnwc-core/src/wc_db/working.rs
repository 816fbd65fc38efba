//! WORKING and ACTUAL tree operations
//!
//! Only operation roots carry copy-from information (`copyfrom_*` and
//! `moved_here`); their descendants inherit it. A move records `moved_to`
//! on the WORKING row of the deleted source.

use super::base::{BaseContent, BaseRow, read_base_row, scan_base_repository_in};
use super::scan::scan_addition_in;
use super::{
    ChangedInfo, Depth, Kind, Presence, ReposLocation, Status, WcDb, descendants_pattern,
    ensure_repository_in, parent_of, parse_opt, props_from_blob, props_to_blob, queue_work_items,
};
use crate::checksum::Checksum;
use crate::conflict::Conflict;
use crate::error::{Result, WcError};
use crate::properties::PropertySet;
use crate::relpath;
use crate::skel::Skel;
use bytes::Bytes;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::debug;

/// Repository source of a copy or move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOrigin {
    pub repos: ReposLocation,
    pub revision: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct WorkingRow {
    pub presence: Presence,
    pub kind: Kind,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub changed: ChangedInfo,
    pub depth: Option<Depth>,
    pub symlink_target: Option<String>,
    /// `(repos_id, repos_relpath, revnum)`, only on operation roots.
    pub copyfrom: Option<(i64, String, i64)>,
    pub moved_here: bool,
    pub moved_to: Option<String>,
    pub last_mod_time: Option<i64>,
    pub properties: Option<PropertySet>,
}

impl WorkingRow {
    pub fn is_present(&self) -> bool {
        matches!(self.presence, Presence::Normal | Presence::Incomplete)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ActualRow {
    pub properties: Option<PropertySet>,
    pub changelist: Option<String>,
    pub text_mod: bool,
    pub conflict: Option<Conflict>,
}

pub(crate) fn read_working_row(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Option<WorkingRow>> {
    let raw = conn
        .query_row(
            "SELECT presence, kind, checksum, translated_size, changed_rev, changed_date,
                    changed_author, depth, symlink_target, copyfrom_repos_id, copyfrom_repos_path,
                    copyfrom_revnum, moved_here, moved_to, last_mod_time, properties
             FROM WORKING_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath],
            |row| {
                let copyfrom = match (
                    row.get::<_, Option<i64>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<i64>>(11)?,
                ) {
                    (Some(id), Some(path), Some(rev)) => Some((id, path, rev)),
                    _ => None,
                };
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    ChangedInfo { rev: row.get(4)?, date: row.get(5)?, author: row.get(6)? },
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    copyfrom,
                    row.get::<_, Option<i64>>(12)?.unwrap_or(0) != 0,
                    row.get::<_, Option<String>>(13)?,
                    row.get::<_, Option<i64>>(14)?,
                    row.get::<_, Option<Vec<u8>>>(15)?,
                ))
            },
        )
        .optional()?;
    let Some((presence, kind, checksum, size, changed, depth, target, copyfrom, moved_here, moved_to, mtime, props)) =
        raw
    else {
        return Ok(None);
    };
    Ok(Some(WorkingRow {
        presence: Presence::parse(&presence)?,
        kind: Kind::parse(&kind)?,
        checksum: parse_opt(checksum, Checksum::parse)?,
        translated_size: size,
        changed,
        depth: parse_opt(depth, Depth::parse)?,
        symlink_target: target,
        copyfrom,
        moved_here,
        moved_to,
        last_mod_time: mtime,
        properties: props_from_blob(props)?,
    }))
}

pub(crate) fn read_actual_row(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Option<ActualRow>> {
    let raw: Option<(Option<Vec<u8>>, Option<String>, Option<i64>, Option<Vec<u8>>)> = conn
        .query_row(
            "SELECT properties, changelist, text_mod, conflict_data FROM ACTUAL_NODE
             WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    let Some((props, changelist, text_mod, conflict)) = raw else {
        return Ok(None);
    };
    let conflict = match conflict {
        Some(blob) => Some(Conflict::from_skel(&Skel::parse(Bytes::from(blob))?)?),
        None => None,
    };
    Ok(Some(ActualRow {
        properties: props_from_blob(props)?,
        changelist,
        text_mod: text_mod.unwrap_or(0) != 0,
        conflict,
    }))
}

/// Relpaths of `relpath` and every descendant present in BASE or WORKING.
pub(crate) fn subtree_relpaths(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT local_relpath FROM BASE_NODE
            WHERE wc_id = ?1 AND (local_relpath = ?2 OR local_relpath LIKE ?3 ESCAPE '#')
         UNION
         SELECT local_relpath FROM WORKING_NODE
            WHERE wc_id = ?1 AND (local_relpath = ?2 OR local_relpath LIKE ?3 ESCAPE '#')
         ORDER BY 1",
    )?;
    let rows = stmt.query_map(params![wc_id, relpath, descendants_pattern(relpath)], |row| {
        row.get::<_, String>(0)
    })?;
    let mut paths = Vec::new();
    for path in rows {
        paths.push(path?);
    }
    Ok(paths)
}

/// Nearest WORKING operation root at or above `relpath` that carries
/// copy-from information, following only present WORKING rows.
pub(crate) fn copy_root_of(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Option<String>> {
    let mut current = Some(relpath);
    while let Some(path) = current {
        match read_working_row(conn, wc_id, path)? {
            Some(row) if row.is_present() => {
                if row.copyfrom.is_some() {
                    return Ok(Some(path.to_string()));
                }
            }
            _ => return Ok(None),
        }
        current = parent_of(path);
    }
    Ok(None)
}

fn base_is_present(base: Option<&BaseRow>) -> bool {
    base.is_some_and(|b| matches!(b.presence, Presence::Normal | Presence::Incomplete))
}

/// Kind of the node as seen through WORKING, or BASE when not shadowed.
/// `None` when the node is missing, hidden or deleted.
fn visible_kind(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Option<Kind>> {
    if let Some(work) = read_working_row(conn, wc_id, relpath)? {
        return Ok(work.is_present().then_some(work.kind));
    }
    let base = read_base_row(conn, wc_id, relpath)?;
    Ok(base.filter(|b| base_is_present(Some(b))).map(|b| b.kind))
}

fn require_dir_parent(conn: &Connection, wc_id: i64, relpath: &str) -> Result<()> {
    let Some(parent) = parent_of(relpath) else {
        return Err(WcError::InvalidArgument("the working-copy root cannot be added".into()));
    };
    match visible_kind(conn, wc_id, parent)? {
        Some(Kind::Dir) => Ok(()),
        Some(kind) => Err(WcError::InvalidArgument(format!(
            "parent '{}' is a {}, not a directory",
            parent, kind
        ))),
        None => Err(WcError::PathNotFound(parent.into())),
    }
}

pub(crate) fn ensure_actual_row(conn: &Connection, wc_id: i64, relpath: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO ACTUAL_NODE (wc_id, local_relpath, parent_relpath) VALUES (?1, ?2, ?3)",
        params![wc_id, relpath, parent_of(relpath)],
    )?;
    Ok(())
}

/// Drop ACTUAL rows under `relpath` that no longer carry anything.
pub(crate) fn prune_actual(conn: &Connection, wc_id: i64, relpath: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM ACTUAL_NODE WHERE wc_id = ?1
            AND (local_relpath = ?2 OR local_relpath LIKE ?3 ESCAPE '#')
            AND properties IS NULL AND changelist IS NULL AND conflict_data IS NULL
            AND (text_mod IS NULL OR text_mod = 0)",
        params![wc_id, relpath, descendants_pattern(relpath)],
    )?;
    Ok(())
}

/// Properties a node had before local property edits.
pub(crate) fn pristine_props_in(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Option<PropertySet>> {
    if let Some(work) = read_working_row(conn, wc_id, relpath)? {
        return Ok(work.is_present().then(|| work.properties.unwrap_or_default()));
    }
    match read_base_row(conn, wc_id, relpath)? {
        Some(base) => Ok(Some(base.properties.unwrap_or_default())),
        None => Err(WcError::PathNotFound(relpath.into())),
    }
}

#[derive(Debug)]
enum DeleteAction {
    RemoveWorking,
    SetBaseDeleted(Kind),
    SetNotPresent,
    InsertBaseDeleted(Kind),
    Keep,
}

/// Mark `relpath` and its subtree deleted; `moved_to` is recorded on the
/// root when it stays in WORKING.
pub(crate) fn delete_in(conn: &Connection, wc_id: i64, relpath: &str, moved_to: Option<&str>) -> Result<()> {
    let nodes = subtree_relpaths(conn, wc_id, relpath)?;
    if nodes.first().map(String::as_str) != Some(relpath) {
        return Err(WcError::PathNotFound(relpath.into()));
    }

    let mut plan = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let base = read_base_row(conn, wc_id, node)?;
        let action = match read_working_row(conn, wc_id, node)? {
            Some(work) if work.is_present() => {
                let copy_root = copy_root_of(conn, wc_id, node)?;
                if copy_root.is_none() || copy_root.as_deref() == Some(node.as_str()) {
                    match &base {
                        Some(b) if base_is_present(Some(b)) => DeleteAction::SetBaseDeleted(b.kind),
                        _ => DeleteAction::RemoveWorking,
                    }
                } else {
                    DeleteAction::SetNotPresent
                }
            }
            Some(_) => DeleteAction::Keep,
            None => match &base {
                Some(b) if base_is_present(Some(b)) => DeleteAction::InsertBaseDeleted(b.kind),
                _ if node == relpath => {
                    return Err(WcError::UnexpectedStatus(format!("'{}' is not present", relpath)));
                }
                _ => DeleteAction::Keep,
            },
        };
        plan.push((node, action));
    }

    for (node, action) in plan {
        match action {
            DeleteAction::RemoveWorking => {
                conn.execute(
                    "DELETE FROM WORKING_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, node],
                )?;
                conn.execute(
                    "DELETE FROM ACTUAL_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, node],
                )?;
                continue;
            }
            DeleteAction::SetBaseDeleted(kind) => {
                conn.execute(
                    "UPDATE WORKING_NODE SET presence = 'base-deleted', kind = ?3, checksum = NULL,
                        translated_size = NULL, changed_rev = NULL, changed_date = NULL,
                        changed_author = NULL, depth = NULL, symlink_target = NULL,
                        copyfrom_repos_id = NULL, copyfrom_repos_path = NULL, copyfrom_revnum = NULL,
                        moved_here = NULL, properties = NULL
                     WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, node, kind.as_str()],
                )?;
            }
            DeleteAction::SetNotPresent => {
                conn.execute(
                    "UPDATE WORKING_NODE SET presence = 'not-present'
                     WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, node],
                )?;
            }
            DeleteAction::InsertBaseDeleted(kind) => {
                conn.execute(
                    "INSERT INTO WORKING_NODE (wc_id, local_relpath, parent_relpath, presence, kind)
                     VALUES (?1, ?2, ?3, 'base-deleted', ?4)",
                    params![wc_id, node, parent_of(node), kind.as_str()],
                )?;
            }
            DeleteAction::Keep => continue,
        }
        conn.execute(
            "UPDATE ACTUAL_NODE SET properties = NULL, text_mod = NULL
             WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, node],
        )?;
        if node == relpath {
            if let Some(dst) = moved_to {
                conn.execute(
                    "UPDATE WORKING_NODE SET moved_to = ?3 WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, node, dst],
                )?;
            }
        }
    }
    prune_actual(conn, wc_id, relpath)?;
    debug!("Deleted '{}'{}", relpath, moved_to.map(|d| format!(" (moved to '{}')", d)).unwrap_or_default());
    Ok(())
}

/// Where a node's text and history come from, as far as a copy is concerned.
fn copy_source_origin(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Option<(i64, String, i64)>> {
    if let Some(work) = read_working_row(conn, wc_id, relpath)? {
        if !work.is_present() {
            return Err(WcError::UnexpectedStatus(format!("'{}' is deleted", relpath)));
        }
        let addition = scan_addition_in(conn, wc_id, relpath)?;
        return match addition.status {
            Status::Added => Ok(None),
            _ => {
                let root = addition.op_root_relpath.as_str();
                let suffix = relpath::skip_ancestor(root, relpath).unwrap_or_default();
                let original = addition
                    .original
                    .ok_or_else(|| WcError::corrupt(format!("copy root '{}' lost its origin", root)))?;
                let repos_id = ensure_repository_in(conn, &original.repos.root_url, &original.repos.uuid)?;
                Ok(Some((repos_id, relpath::join(&original.repos.relpath, suffix), original.revision)))
            }
        };
    }
    let base = read_base_row(conn, wc_id, relpath)?.ok_or_else(|| WcError::PathNotFound(relpath.into()))?;
    if !base_is_present(Some(&base)) {
        return Err(WcError::UnexpectedStatus(format!("'{}' is {}", relpath, base.presence)));
    }
    let repos = scan_base_repository_in(conn, wc_id, relpath)?;
    let repos_id = ensure_repository_in(conn, &repos.root_url, &repos.uuid)?;
    let revision = base
        .revnum
        .ok_or_else(|| WcError::corrupt(format!("BASE '{}' has no revision", relpath)))?;
    Ok(Some((repos_id, repos.relpath, revision)))
}

struct WorkingInsert<'a> {
    relpath: &'a str,
    presence: Presence,
    kind: Kind,
    checksum: Option<String>,
    translated_size: Option<i64>,
    changed: ChangedInfo,
    depth: Option<&'static str>,
    symlink_target: Option<String>,
    copyfrom: Option<(i64, String, i64)>,
    moved_here: bool,
    properties: Option<Vec<u8>>,
}

/// Insert a WORKING row, keeping any `moved_to` of a row it replaces.
fn insert_working(conn: &Connection, wc_id: i64, row: WorkingInsert<'_>) -> Result<()> {
    let (cf_id, cf_path, cf_rev) = match row.copyfrom {
        Some((id, path, rev)) => (Some(id), Some(path), Some(rev)),
        None => (None, None, None),
    };
    conn.execute(
        "INSERT INTO WORKING_NODE
            (wc_id, local_relpath, parent_relpath, presence, kind, checksum, translated_size,
             changed_rev, changed_date, changed_author, depth, symlink_target, copyfrom_repos_id,
             copyfrom_repos_path, copyfrom_revnum, moved_here, properties)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT (wc_id, local_relpath) DO UPDATE SET
            presence = excluded.presence, kind = excluded.kind, checksum = excluded.checksum,
            translated_size = excluded.translated_size, changed_rev = excluded.changed_rev,
            changed_date = excluded.changed_date, changed_author = excluded.changed_author,
            depth = excluded.depth, symlink_target = excluded.symlink_target,
            copyfrom_repos_id = excluded.copyfrom_repos_id,
            copyfrom_repos_path = excluded.copyfrom_repos_path,
            copyfrom_revnum = excluded.copyfrom_revnum, moved_here = excluded.moved_here,
            properties = excluded.properties",
        params![
            wc_id,
            row.relpath,
            parent_of(row.relpath),
            row.presence.as_str(),
            row.kind.as_str(),
            row.checksum,
            row.translated_size,
            row.changed.rev,
            row.changed.date,
            row.changed.author,
            row.depth,
            row.symlink_target,
            cf_id,
            cf_path,
            cf_rev,
            row.moved_here.then_some(1),
            row.properties,
        ],
    )?;
    Ok(())
}

/// Shadow every present BASE node under `relpath` that has no WORKING row.
fn shadow_base_subtree(conn: &Connection, wc_id: i64, relpath: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO WORKING_NODE (wc_id, local_relpath, parent_relpath, presence, kind)
         SELECT b.wc_id, b.local_relpath, b.parent_relpath, 'base-deleted', b.kind
         FROM BASE_NODE b
         WHERE b.wc_id = ?1 AND (b.local_relpath = ?2 OR b.local_relpath LIKE ?3 ESCAPE '#')
           AND b.presence IN ('normal', 'incomplete')
           AND NOT EXISTS (SELECT 1 FROM WORKING_NODE w
                           WHERE w.wc_id = b.wc_id AND w.local_relpath = b.local_relpath)",
        params![wc_id, relpath, descendants_pattern(relpath)],
    )?;
    Ok(())
}

fn check_new_node_target(conn: &Connection, wc_id: i64, relpath: &str) -> Result<()> {
    require_dir_parent(conn, wc_id, relpath)?;
    if visible_kind(conn, wc_id, relpath)?.is_some() {
        return Err(WcError::InvalidArgument(format!("'{}' is already under version control", relpath)));
    }
    Ok(())
}

/// Copy `src` to `dst` within the working copy.
pub(crate) fn copy_in(conn: &Connection, wc_id: i64, src: &str, dst: &str, is_move: bool) -> Result<()> {
    if relpath::is_ancestor(src, dst) {
        return Err(WcError::InvalidArgument(format!("cannot copy '{}' into itself", src)));
    }
    if visible_kind(conn, wc_id, src)?.is_none() {
        if read_base_row(conn, wc_id, src)?.is_none() && read_working_row(conn, wc_id, src)?.is_none() {
            return Err(WcError::PathNotFound(src.into()));
        }
        return Err(WcError::UnexpectedStatus(format!("'{}' is not present", src)));
    }
    check_new_node_target(conn, wc_id, dst)?;

    let origin = copy_source_origin(conn, wc_id, src)?;
    for node in subtree_relpaths(conn, wc_id, src)? {
        let suffix = relpath::skip_ancestor(src, &node).unwrap_or_default();
        let target = relpath::join(dst, suffix);
        let is_root = suffix.is_empty();
        let work = read_working_row(conn, wc_id, &node)?;
        let base = read_base_row(conn, wc_id, &node)?;
        let row = match (work, base) {
            (Some(w), _) => WorkingInsert {
                relpath: &target,
                presence: match w.presence {
                    Presence::Normal | Presence::Incomplete => w.presence,
                    _ => Presence::NotPresent,
                },
                kind: w.kind,
                checksum: w.checksum.map(|c| c.to_string()),
                translated_size: w.translated_size,
                changed: w.changed,
                depth: w.depth.map(|d| d.as_str()),
                symlink_target: w.symlink_target,
                copyfrom: if is_root { origin.clone() } else { w.copyfrom },
                moved_here: is_root && is_move && origin.is_some(),
                properties: w.properties.as_ref().map(props_to_blob),
            },
            (None, Some(b)) => WorkingInsert {
                relpath: &target,
                presence: match b.presence {
                    Presence::Normal | Presence::Incomplete => b.presence,
                    _ => Presence::NotPresent,
                },
                kind: b.kind,
                checksum: b.checksum.map(|c| c.to_string()),
                translated_size: b.translated_size,
                changed: b.changed,
                depth: b.depth.map(|d| d.as_str()),
                symlink_target: b.symlink_target,
                copyfrom: if is_root { origin.clone() } else { None },
                moved_here: is_root && is_move && origin.is_some(),
                properties: b.properties.as_ref().map(props_to_blob),
            },
            (None, None) => continue,
        };
        insert_working(conn, wc_id, row)?;

        if let Some(actual) = read_actual_row(conn, wc_id, &node)? {
            if let Some(props) = actual.properties {
                ensure_actual_row(conn, wc_id, &target)?;
                conn.execute(
                    "UPDATE ACTUAL_NODE SET properties = ?3 WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, target, props_to_blob(&props)],
                )?;
            }
        }
    }
    shadow_base_subtree(conn, wc_id, dst)?;
    debug!("{} '{}' to '{}'", if is_move { "Moved" } else { "Copied" }, src, dst);
    Ok(())
}

impl WcDb {
    fn op_add(&self, abspath: &Path, kind: Kind, target: Option<&str>) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        check_new_node_target(&tx, wc_id, &relpath)?;
        insert_working(
            &tx,
            wc_id,
            WorkingInsert {
                relpath: &relpath,
                presence: Presence::Normal,
                kind,
                checksum: None,
                translated_size: None,
                changed: ChangedInfo::default(),
                depth: (kind == Kind::Dir).then_some(Depth::Infinity.as_str()),
                symlink_target: target.map(str::to_string),
                copyfrom: None,
                moved_here: false,
                properties: None,
            },
        )?;
        tx.commit()?;
        debug!("Scheduled {} '{}' for addition", kind, relpath);
        Ok(())
    }

    pub fn op_add_directory(&self, abspath: &Path) -> Result<()> {
        self.op_add(abspath, Kind::Dir, None)
    }

    pub fn op_add_file(&self, abspath: &Path) -> Result<()> {
        self.op_add(abspath, Kind::File, None)
    }

    pub fn op_add_symlink(&self, abspath: &Path, target: &str) -> Result<()> {
        self.op_add(abspath, Kind::Symlink, Some(target))
    }

    /// Copy a versioned node, with its subtree, to `dst_abspath`.
    pub fn op_copy(&self, src_abspath: &Path, dst_abspath: &Path, work_items: &[Skel]) -> Result<()> {
        let src = self.to_relpath(src_abspath)?;
        let dst = self.to_relpath(dst_abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        copy_in(&tx, wc_id, &src, &dst, false)?;
        queue_work_items(&tx, work_items)?;
        tx.commit()?;
        Ok(())
    }

    /// Add a node copied from the repository (add-with-history).
    pub fn op_copy_node(
        &self,
        abspath: &Path,
        origin: &CopyOrigin,
        props: &PropertySet,
        changed: &ChangedInfo,
        content: BaseContent,
        work_items: &[Skel],
    ) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        check_new_node_target(&tx, wc_id, &relpath)?;
        let repos_id = ensure_repository_in(&tx, &origin.repos.root_url, &origin.repos.uuid)?;
        let kind = content.kind();
        let (checksum, size, depth, target, children) = match content {
            BaseContent::Directory { children, depth } => (None, None, Some(depth.as_str()), None, children),
            BaseContent::File { checksum, translated_size } => {
                (Some(checksum.to_string()), translated_size, None, None, Vec::new())
            }
            BaseContent::Symlink { target } => (None, None, None, Some(target), Vec::new()),
        };
        insert_working(
            &tx,
            wc_id,
            WorkingInsert {
                relpath: &relpath,
                presence: Presence::Normal,
                kind,
                checksum,
                translated_size: size,
                changed: changed.clone(),
                depth,
                symlink_target: target,
                copyfrom: Some((repos_id, origin.repos.relpath.clone(), origin.revision)),
                moved_here: false,
                properties: Some(props_to_blob(props)),
            },
        )?;
        for name in children {
            let child = relpath::join(&relpath, &name);
            tx.execute(
                "INSERT OR IGNORE INTO WORKING_NODE (wc_id, local_relpath, parent_relpath, presence, kind)
                 VALUES (?1, ?2, ?3, 'incomplete', 'unknown')",
                params![wc_id, child, relpath],
            )?;
        }
        shadow_base_subtree(&tx, wc_id, &relpath)?;
        queue_work_items(&tx, work_items)?;
        tx.commit()?;
        debug!("Copied {} '{}' from {}@{}", kind, relpath, origin.repos.url(), origin.revision);
        Ok(())
    }

    pub fn op_copy_dir(
        &self,
        abspath: &Path,
        origin: &CopyOrigin,
        props: &PropertySet,
        changed: &ChangedInfo,
        children: Vec<String>,
        depth: Depth,
    ) -> Result<()> {
        let content = BaseContent::Directory { children, depth };
        self.op_copy_node(abspath, origin, props, changed, content, &[])
    }

    pub fn op_copy_file(
        &self,
        abspath: &Path,
        origin: &CopyOrigin,
        props: &PropertySet,
        changed: &ChangedInfo,
        checksum: Checksum,
    ) -> Result<()> {
        let content = BaseContent::File { checksum, translated_size: None };
        self.op_copy_node(abspath, origin, props, changed, content, &[])
    }

    pub fn op_copy_symlink(
        &self,
        abspath: &Path,
        origin: &CopyOrigin,
        props: &PropertySet,
        changed: &ChangedInfo,
        target: &str,
    ) -> Result<()> {
        let content = BaseContent::Symlink { target: target.to_string() };
        self.op_copy_node(abspath, origin, props, changed, content, &[])
    }

    /// Schedule a node and its subtree for deletion.
    pub fn op_delete(&self, abspath: &Path) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_in(&tx, wc_id, &relpath, None).map_err(|e| match e {
            WcError::PathNotFound(_) => WcError::PathNotFound(abspath.to_path_buf()),
            other => other,
        })?;
        tx.commit()?;
        Ok(())
    }

    /// Copy `src` to `dst` recording the move, then delete `src`.
    pub fn op_move(&self, src_abspath: &Path, dst_abspath: &Path) -> Result<()> {
        let src = self.to_relpath(src_abspath)?;
        let dst = self.to_relpath(dst_abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        copy_in(&tx, wc_id, &src, &dst, true)?;
        delete_in(&tx, wc_id, &src, Some(&dst))?;
        tx.commit()?;
        Ok(())
    }

    /// Replace the node's actual properties.
    pub fn op_set_props(&self, abspath: &Path, props: &PropertySet) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let pristine = pristine_props_in(&tx, wc_id, &relpath)
            .map_err(|e| match e {
                WcError::PathNotFound(_) => WcError::PathNotFound(abspath.to_path_buf()),
                other => other,
            })?
            .ok_or_else(|| WcError::UnexpectedStatus(format!("'{}' is deleted", relpath)))?;
        let blob = (pristine != *props).then(|| props_to_blob(props));
        ensure_actual_row(&tx, wc_id, &relpath)?;
        tx.execute(
            "UPDATE ACTUAL_NODE SET properties = ?3 WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath, blob],
        )?;
        prune_actual(&tx, wc_id, &relpath)?;
        tx.commit()?;
        Ok(())
    }

    /// Flag the node's text as locally modified.
    pub fn op_modified(&self, abspath: &Path) -> Result<()> {
        self.update_actual(abspath, "text_mod = 1", None)
    }

    pub fn op_set_changelist(&self, abspath: &Path, changelist: Option<&str>) -> Result<()> {
        self.update_actual(abspath, "changelist = ?3", changelist.map(str::to_string))
    }

    fn update_actual(&self, abspath: &Path, assignment: &str, value: Option<String>) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if visible_kind(&tx, wc_id, &relpath)?.is_none() {
            return Err(WcError::PathNotFound(abspath.to_path_buf()));
        }
        ensure_actual_row(&tx, wc_id, &relpath)?;
        let sql = format!(
            "UPDATE ACTUAL_NODE SET {} WHERE wc_id = ?1 AND local_relpath = ?2",
            assignment
        );
        if assignment.contains("?3") {
            tx.execute(&sql, params![wc_id, relpath, value])?;
        } else {
            tx.execute(&sql, params![wc_id, relpath])?;
        }
        prune_actual(&tx, wc_id, &relpath)?;
        tx.commit()?;
        Ok(())
    }

    /// Merge `conflict` into the node's conflict record.
    pub fn op_mark_conflict(&self, abspath: &Path, conflict: &Conflict) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if read_base_row(&tx, wc_id, &relpath)?.is_none() && read_working_row(&tx, wc_id, &relpath)?.is_none() {
            return Err(WcError::PathNotFound(abspath.to_path_buf()));
        }
        let mut record = read_actual_row(&tx, wc_id, &relpath)?
            .and_then(|a| a.conflict)
            .unwrap_or_default();
        record.merge(conflict.clone());
        ensure_actual_row(&tx, wc_id, &relpath)?;
        tx.execute(
            "UPDATE ACTUAL_NODE SET conflict_data = ?3 WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath, record.to_skel().unparse().as_ref()],
        )?;
        tx.commit()?;
        debug!("Recorded conflict on '{}'", relpath);
        Ok(())
    }

    pub fn op_mark_resolved(&self, abspath: &Path, text: bool, props: bool, tree: bool) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some(mut record) = read_actual_row(&tx, wc_id, &relpath)?.and_then(|a| a.conflict) else {
            return Ok(());
        };
        record.resolve(text, props, tree);
        let blob = (!record.is_empty()).then(|| record.to_skel().unparse().to_vec());
        tx.execute(
            "UPDATE ACTUAL_NODE SET conflict_data = ?3 WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath, blob],
        )?;
        prune_actual(&tx, wc_id, &relpath)?;
        tx.commit()?;
        Ok(())
    }

    pub fn read_conflicts(&self, abspath: &Path) -> Result<Conflict> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        Ok(read_actual_row(&conn, self.wc_id(), &relpath)?
            .and_then(|a| a.conflict)
            .unwrap_or_default())
    }

    /// Names of the children of `dir_abspath` that are in conflict.
    pub fn read_conflict_victims(&self, dir_abspath: &Path) -> Result<Vec<String>> {
        let relpath = self.to_relpath(dir_abspath)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT local_relpath FROM ACTUAL_NODE
             WHERE wc_id = ?1 AND parent_relpath = ?2 AND conflict_data IS NOT NULL
             ORDER BY local_relpath",
        )?;
        let rows = stmt.query_map(params![self.wc_id(), relpath], |row| row.get::<_, String>(0))?;
        let mut victims = Vec::new();
        for victim in rows {
            victims.push(relpath::basename(&victim?).to_string());
        }
        Ok(victims)
    }

    /// Drop local changes. `Depth::Empty` reverts only the node itself and
    /// refuses when that would orphan changed children.
    pub fn op_revert(&self, abspath: &Path, depth: Depth) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let work = read_working_row(&tx, wc_id, &relpath)?;
        if work.is_none() && read_base_row(&tx, wc_id, &relpath)?.is_none() {
            return Err(WcError::PathNotFound(abspath.to_path_buf()));
        }
        match depth {
            Depth::Infinity => {
                tx.execute(
                    "DELETE FROM WORKING_NODE WHERE wc_id = ?1
                        AND (local_relpath = ?2 OR local_relpath LIKE ?3 ESCAPE '#')",
                    params![wc_id, relpath, descendants_pattern(&relpath)],
                )?;
                tx.execute(
                    "DELETE FROM ACTUAL_NODE WHERE wc_id = ?1
                        AND (local_relpath = ?2 OR local_relpath LIKE ?3 ESCAPE '#')",
                    params![wc_id, relpath, descendants_pattern(&relpath)],
                )?;
            }
            Depth::Empty => {
                let has_working_children: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM WORKING_NODE WHERE wc_id = ?1 AND parent_relpath = ?2)",
                    params![wc_id, relpath],
                    |row| row.get(0),
                )?;
                if work.is_some_and(|w| w.is_present()) && has_working_children {
                    return Err(WcError::InvalidArgument(format!(
                        "cannot revert '{}' without reverting its children",
                        relpath
                    )));
                }
                tx.execute(
                    "DELETE FROM WORKING_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, relpath],
                )?;
                tx.execute(
                    "DELETE FROM ACTUAL_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
                    params![wc_id, relpath],
                )?;
            }
            other => {
                return Err(WcError::InvalidArgument(format!("revert at depth {} is not supported", other)));
            }
        }
        tx.commit()?;
        debug!("Reverted '{}' ({})", relpath, depth);
        Ok(())
    }
}
