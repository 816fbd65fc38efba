//! Repository lock tokens and working-copy write locks
//!
//! Repository locks are keyed by repository location, so a lock follows
//! the BASE node it was taken on. Working-copy locks are advisory: one
//! writer per directory, optionally covering `levels` of subdirectories
//! (`-1` for the whole subtree).

use super::base::scan_base_repository_in;
use super::{WcDb, ensure_repository_in, parent_of};
use crate::error::{Result, WcError};
use crate::relpath;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub token: String,
    pub owner: Option<String>,
    pub comment: Option<String>,
    /// Microseconds since the Unix epoch.
    pub date: Option<i64>,
}

pub(crate) fn read_lock(conn: &Connection, repos_id: i64, repos_relpath: &str) -> Result<Option<LockInfo>> {
    Ok(conn
        .query_row(
            "SELECT lock_token, lock_owner, lock_comment, lock_date FROM LOCK
             WHERE repos_id = ?1 AND repos_relpath = ?2",
            params![repos_id, repos_relpath],
            |row| {
                Ok(LockInfo {
                    token: row.get(0)?,
                    owner: row.get(1)?,
                    comment: row.get(2)?,
                    date: row.get(3)?,
                })
            },
        )
        .optional()?)
}

/// Is `dir_relpath` covered by a lock recorded on itself or an ancestor?
fn lock_covering(conn: &Connection, wc_id: i64, dir_relpath: &str) -> Result<Option<String>> {
    let mut current = Some(dir_relpath);
    let mut distance: i64 = 0;
    while let Some(dir) = current {
        let levels: Option<i64> = conn
            .query_row(
                "SELECT locked_levels FROM WC_LOCK WHERE wc_id = ?1 AND local_dir_relpath = ?2",
                params![wc_id, dir],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(levels) = levels {
            if levels < 0 || levels >= distance {
                return Ok(Some(dir.to_string()));
            }
        }
        current = parent_of(dir);
        distance += 1;
    }
    Ok(None)
}

impl WcDb {
    /// Record a repository lock on the BASE node at `abspath`.
    pub fn add_lock(&self, abspath: &Path, lock: &LockInfo) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let repos = scan_base_repository_in(&conn, self.wc_id(), &relpath)?;
        let repos_id = ensure_repository_in(&conn, &repos.root_url, &repos.uuid)?;
        conn.execute(
            "INSERT OR REPLACE INTO LOCK
                (repos_id, repos_relpath, lock_token, lock_owner, lock_comment, lock_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![repos_id, repos.relpath, lock.token, lock.owner, lock.comment, lock.date],
        )?;
        Ok(())
    }

    pub fn remove_lock(&self, abspath: &Path) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let conn = self.conn()?;
        let repos = scan_base_repository_in(&conn, self.wc_id(), &relpath)?;
        let repos_id = ensure_repository_in(&conn, &repos.root_url, &repos.uuid)?;
        conn.execute(
            "DELETE FROM LOCK WHERE repos_id = ?1 AND repos_relpath = ?2",
            params![repos_id, repos.relpath],
        )?;
        Ok(())
    }

    /// Take the write lock on a directory. Fails if it or any covering
    /// ancestor lock already exists, or if the new lock would cover a
    /// locked descendant.
    pub fn set_wc_lock(&self, dir_abspath: &Path, levels_to_lock: i64) -> Result<()> {
        let relpath = self.to_relpath(dir_abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if lock_covering(&tx, wc_id, &relpath)?.is_some() {
            return Err(WcError::Locked(dir_abspath.to_path_buf()));
        }
        {
            let mut stmt = tx.prepare(
                "SELECT local_dir_relpath FROM WC_LOCK
                 WHERE wc_id = ?1 AND local_dir_relpath LIKE ?2 ESCAPE '#'",
            )?;
            let rows = stmt.query_map(params![wc_id, super::descendants_pattern(&relpath)], |row| {
                row.get::<_, String>(0)
            })?;
            for locked in rows {
                let locked = locked?;
                let below = relpath::skip_ancestor(&relpath, &locked).map_or(0, relpath::depth) as i64;
                if levels_to_lock < 0 || below <= levels_to_lock {
                    return Err(WcError::Locked(self.from_relpath(&locked)));
                }
            }
        }
        tx.execute(
            "INSERT INTO WC_LOCK (wc_id, local_dir_relpath, locked_levels) VALUES (?1, ?2, ?3)",
            params![wc_id, relpath, levels_to_lock],
        )?;
        tx.commit()?;
        debug!("Locked '{}' ({} levels)", relpath, levels_to_lock);
        Ok(())
    }

    pub fn is_wc_locked(&self, dir_abspath: &Path) -> Result<bool> {
        let relpath = self.to_relpath(dir_abspath)?;
        let conn = self.conn()?;
        Ok(lock_covering(&conn, self.wc_id(), &relpath)?.is_some())
    }

    pub fn remove_wc_lock(&self, dir_abspath: &Path) -> Result<()> {
        let relpath = self.to_relpath(dir_abspath)?;
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM WC_LOCK WHERE wc_id = ?1 AND local_dir_relpath = ?2",
            params![self.wc_id(), relpath],
        )?;
        if removed == 0 {
            return Err(WcError::NotLocked(dir_abspath.to_path_buf()));
        }
        debug!("Unlocked '{}'", relpath);
        Ok(())
    }
}
