//! BASE tree operations

use super::locks::{LockInfo, read_lock};
use super::{
    ChangedInfo, Depth, Kind, Presence, ReposLocation, Status, WcDb, descendants_pattern,
    ensure_repository_in, fetch_repository, parent_of, parse_opt, props_from_blob, props_to_blob,
    queue_work_items,
};
use crate::checksum::Checksum;
use crate::error::{Result, WcError};
use crate::properties::PropertySet;
use crate::relpath;
use crate::skel::Skel;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::debug;

/// Kind-specific content of a BASE node. A directory carries its children,
/// a file its pristine checksum, a symlink its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseContent {
    Directory { children: Vec<String>, depth: Depth },
    File { checksum: Checksum, translated_size: Option<i64> },
    Symlink { target: String },
}

impl BaseContent {
    pub fn kind(&self) -> Kind {
        match self {
            BaseContent::Directory { .. } => Kind::Dir,
            BaseContent::File { .. } => Kind::File,
            BaseContent::Symlink { .. } => Kind::Symlink,
        }
    }
}

/// Everything but the kind-specific content of a BASE node.
#[derive(Debug, Clone)]
pub struct NewBaseNode {
    pub repos: ReposLocation,
    pub revision: i64,
    pub props: PropertySet,
    pub changed: ChangedInfo,
    pub dav_cache: Option<PropertySet>,
}

impl NewBaseNode {
    pub fn new(repos: ReposLocation, revision: i64) -> Self {
        Self {
            repos,
            revision,
            props: PropertySet::new(),
            changed: ChangedInfo::default(),
            dav_cache: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaseInfo {
    pub status: Status,
    pub kind: Kind,
    pub revision: Option<i64>,
    pub repos: ReposLocation,
    pub changed: ChangedInfo,
    pub last_mod_time: Option<i64>,
    pub depth: Option<Depth>,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub symlink_target: Option<String>,
    pub lock: Option<LockInfo>,
    pub has_props: bool,
}

/// One BASE_NODE row, decoded.
#[derive(Debug, Clone)]
pub(crate) struct BaseRow {
    pub presence: Presence,
    pub kind: Kind,
    pub repos_id: Option<i64>,
    pub repos_relpath: Option<String>,
    pub revnum: Option<i64>,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub changed: ChangedInfo,
    pub depth: Option<Depth>,
    pub symlink_target: Option<String>,
    pub last_mod_time: Option<i64>,
    pub properties: Option<PropertySet>,
}

pub(crate) fn read_base_row(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Option<BaseRow>> {
    let raw = conn
        .query_row(
            "SELECT presence, kind, repos_id, repos_relpath, revnum, checksum, translated_size,
                    changed_rev, changed_date, changed_author, depth, symlink_target,
                    last_mod_time, properties
             FROM BASE_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    ChangedInfo { rev: row.get(7)?, date: row.get(8)?, author: row.get(9)? },
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, Option<i64>>(12)?,
                    row.get::<_, Option<Vec<u8>>>(13)?,
                ))
            },
        )
        .optional()?;
    let Some((presence, kind, repos_id, repos_relpath, revnum, checksum, size, changed, depth, target, mtime, props)) = raw
    else {
        return Ok(None);
    };
    Ok(Some(BaseRow {
        presence: Presence::parse(&presence)?,
        kind: Kind::parse(&kind)?,
        repos_id,
        repos_relpath,
        revnum,
        checksum: parse_opt(checksum, Checksum::parse)?,
        translated_size: size,
        changed,
        depth: parse_opt(depth, Depth::parse)?,
        symlink_target: target,
        last_mod_time: mtime,
        properties: props_from_blob(props)?,
    }))
}

pub(crate) fn has_base(conn: &Connection, wc_id: i64, relpath: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM BASE_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Repository coordinates of a BASE node, inheriting from the nearest
/// ancestor that records them.
pub(crate) fn scan_base_repository_in(conn: &Connection, wc_id: i64, relpath: &str) -> Result<ReposLocation> {
    let mut current = relpath;
    loop {
        let row: Option<(Option<i64>, Option<String>)> = conn
            .query_row(
                "SELECT repos_id, repos_relpath FROM BASE_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
                params![wc_id, current],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            None if current == relpath => {
                return Err(WcError::PathNotFound(relpath.into()));
            }
            None => return Err(WcError::corrupt(format!("BASE parent '{}' is missing", current))),
            Some((Some(repos_id), Some(base_relpath))) => {
                let (root_url, uuid) = fetch_repository(conn, repos_id)?;
                let suffix = relpath::skip_ancestor(current, relpath).unwrap_or_default();
                return Ok(ReposLocation {
                    relpath: relpath::join(&base_relpath, suffix),
                    root_url,
                    uuid,
                });
            }
            Some(_) => {
                current = parent_of(current)
                    .ok_or_else(|| WcError::corrupt("BASE root has no repository location"))?;
            }
        }
    }
}

/// Insert or replace a BASE row. Directory children missing from BASE are
/// added as `incomplete`; with `prune_children` any other BASE child is removed.
pub(crate) fn write_base_node(
    conn: &Connection,
    wc_id: i64,
    relpath: &str,
    node: &NewBaseNode,
    content: &BaseContent,
    prune_children: bool,
) -> Result<()> {
    if let Some(parent) = parent_of(relpath) {
        if !has_base(conn, wc_id, parent)? {
            return Err(WcError::PathNotFound(parent.into()));
        }
    }
    let repos_id = ensure_repository_in(conn, &node.repos.root_url, &node.repos.uuid)?;
    let (checksum, size, depth, target) = match content {
        BaseContent::Directory { depth, .. } => (None, None, Some(depth.as_str()), None),
        BaseContent::File { checksum, translated_size } => {
            if !checksum.is_sha1() {
                return Err(WcError::InvalidArgument(format!(
                    "BASE text of '{}' must be identified by SHA-1",
                    relpath
                )));
            }
            (Some(checksum.to_string()), *translated_size, None, None)
        }
        BaseContent::Symlink { target } => (None, None, None, Some(target.as_str())),
    };
    let dav_cache = node.dav_cache.as_ref().map(props_to_blob);
    conn.execute(
        "INSERT OR REPLACE INTO BASE_NODE
            (wc_id, local_relpath, repos_id, repos_relpath, parent_relpath, presence, kind, revnum,
             checksum, translated_size, changed_rev, changed_date, changed_author, depth,
             symlink_target, properties, dav_cache)
         VALUES (?1, ?2, ?3, ?4, ?5, 'normal', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            wc_id,
            relpath,
            repos_id,
            node.repos.relpath,
            parent_of(relpath),
            content.kind().as_str(),
            node.revision,
            checksum,
            size,
            node.changed.rev,
            node.changed.date,
            node.changed.author,
            depth,
            target,
            props_to_blob(&node.props),
            dav_cache,
        ],
    )?;

    if let BaseContent::Directory { children, .. } = content {
        for name in children {
            let child = relpath::join(relpath, name);
            conn.execute(
                "INSERT OR IGNORE INTO BASE_NODE
                    (wc_id, local_relpath, repos_id, repos_relpath, parent_relpath, presence, kind, revnum)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'incomplete', 'unknown', ?6)",
                params![
                    wc_id,
                    child,
                    repos_id,
                    relpath::join(&node.repos.relpath, name),
                    relpath,
                    node.revision
                ],
            )?;
        }
        if prune_children {
            let existing = base_children_in(conn, wc_id, relpath)?;
            for name in existing.iter().filter(|n| !children.contains(n)) {
                delete_base_subtree(conn, wc_id, &relpath::join(relpath, name))?;
            }
        }
    }
    debug!("BASE {} '{}' r{}", content.kind(), relpath, node.revision);
    Ok(())
}

pub(crate) fn base_children_in(conn: &Connection, wc_id: i64, relpath: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT local_relpath FROM BASE_NODE WHERE wc_id = ?1 AND parent_relpath = ?2
         ORDER BY local_relpath",
    )?;
    let rows = stmt.query_map(params![wc_id, relpath], |row| row.get::<_, String>(0))?;
    let mut names = Vec::new();
    for child in rows {
        names.push(relpath::basename(&child?).to_string());
    }
    Ok(names)
}

pub(crate) fn delete_base_subtree(conn: &Connection, wc_id: i64, relpath: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM BASE_NODE WHERE wc_id = ?1
            AND (local_relpath = ?2 OR local_relpath LIKE ?3 ESCAPE '#')",
        params![wc_id, relpath, descendants_pattern(relpath)],
    )?;
    Ok(removed)
}

impl WcDb {
    /// Record a BASE node received from the repository.
    pub fn add_base_node(
        &self,
        abspath: &Path,
        node: &NewBaseNode,
        content: BaseContent,
        work_items: &[Skel],
    ) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_base_node(&tx, self.wc_id(), &relpath, node, &content, false)?;
        queue_work_items(&tx, work_items)?;
        tx.commit()?;
        Ok(())
    }

    pub fn add_base_directory(
        &self,
        abspath: &Path,
        node: &NewBaseNode,
        children: Vec<String>,
        depth: Depth,
    ) -> Result<()> {
        self.add_base_node(abspath, node, BaseContent::Directory { children, depth }, &[])
    }

    pub fn add_base_file(
        &self,
        abspath: &Path,
        node: &NewBaseNode,
        checksum: Checksum,
        translated_size: Option<i64>,
    ) -> Result<()> {
        self.add_base_node(abspath, node, BaseContent::File { checksum, translated_size }, &[])
    }

    pub fn add_base_symlink(&self, abspath: &Path, node: &NewBaseNode, target: &str) -> Result<()> {
        self.add_base_node(abspath, node, BaseContent::Symlink { target: target.to_string() }, &[])
    }

    /// Record a node the server knows about but did not send: `absent`
    /// (authz-excluded), `excluded` (depth-excluded) or `not-present`.
    pub fn add_base_absent_node(
        &self,
        abspath: &Path,
        repos: &ReposLocation,
        revision: i64,
        kind: Kind,
        presence: Presence,
    ) -> Result<()> {
        if !presence.is_hidden() {
            return Err(WcError::InvalidArgument(format!(
                "'{}' is not a valid presence for an absent node",
                presence
            )));
        }
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if let Some(parent) = parent_of(&relpath) {
            if !has_base(&tx, wc_id, parent)? {
                return Err(WcError::PathNotFound(self.from_relpath(parent)));
            }
        }
        let repos_id = ensure_repository_in(&tx, &repos.root_url, &repos.uuid)?;
        tx.execute(
            "INSERT OR REPLACE INTO BASE_NODE
                (wc_id, local_relpath, repos_id, repos_relpath, parent_relpath, presence, kind, revnum)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                wc_id,
                relpath,
                repos_id,
                repos.relpath,
                parent_of(&relpath),
                presence.as_str(),
                kind.as_str(),
                revision
            ],
        )?;
        tx.commit()?;
        debug!("BASE {} '{}' r{}", presence, relpath, revision);
        Ok(())
    }

    /// Remove a node and its descendants from BASE.
    pub fn remove_base(&self, abspath: &Path) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        if delete_base_subtree(&conn, self.wc_id(), &relpath)? == 0 {
            return Err(WcError::PathNotFound(abspath.to_path_buf()));
        }
        Ok(())
    }

    pub fn get_base_info(&self, abspath: &Path) -> Result<BaseInfo> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let row = read_base_row(&conn, self.wc_id(), &relpath)?
            .ok_or_else(|| WcError::PathNotFound(abspath.to_path_buf()))?;
        let repos = scan_base_repository_in(&conn, self.wc_id(), &relpath)?;
        let lock = match row.repos_id {
            Some(repos_id) => read_lock(&conn, repos_id, &repos.relpath)?,
            None => None,
        };
        Ok(BaseInfo {
            status: Status::from_base_presence(row.presence),
            kind: row.kind,
            revision: row.revnum,
            repos,
            changed: row.changed,
            last_mod_time: row.last_mod_time,
            depth: row.depth,
            checksum: row.checksum,
            translated_size: row.translated_size,
            symlink_target: row.symlink_target,
            lock,
            has_props: row.properties.is_some(),
        })
    }

    pub fn get_base_props(&self, abspath: &Path) -> Result<PropertySet> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let row = read_base_row(&conn, self.wc_id(), &relpath)?
            .ok_or_else(|| WcError::PathNotFound(abspath.to_path_buf()))?;
        Ok(row.properties.unwrap_or_default())
    }

    pub fn get_base_prop(&self, abspath: &Path, name: &str) -> Result<Option<String>> {
        Ok(self.get_base_props(abspath)?.remove(name))
    }

    /// Names of the BASE children of a directory, sorted.
    pub fn get_base_children(&self, abspath: &Path) -> Result<Vec<String>> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        base_children_in(&conn, self.wc_id(), &relpath)
    }

    pub fn set_base_dav_cache(&self, abspath: &Path, cache: Option<&PropertySet>) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE BASE_NODE SET dav_cache = ?3 WHERE wc_id = ?1 AND local_relpath = ?2",
            params![self.wc_id(), relpath, cache.map(props_to_blob)],
        )?;
        if updated == 0 {
            return Err(WcError::PathNotFound(abspath.to_path_buf()));
        }
        Ok(())
    }

    pub fn get_base_dav_cache(&self, abspath: &Path) -> Result<Option<PropertySet>> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let blob: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT dav_cache FROM BASE_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
                params![self.wc_id(), relpath],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            None => Err(WcError::PathNotFound(abspath.to_path_buf())),
            Some(blob) => props_from_blob(blob),
        }
    }

    pub fn scan_base_repository(&self, abspath: &Path) -> Result<ReposLocation> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        scan_base_repository_in(&conn, self.wc_id(), &relpath).map_err(|e| match e {
            WcError::PathNotFound(_) => WcError::PathNotFound(abspath.to_path_buf()),
            other => other,
        })
    }
}
