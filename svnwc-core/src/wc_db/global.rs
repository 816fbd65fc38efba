//! Operations that move state between the trees: commit folds WORKING and
//! ACTUAL into BASE, update rewrites BASE under the local changes.

use super::base::{BaseContent, NewBaseNode, has_base, read_base_row, scan_base_repository_in, write_base_node};
use super::scan::scan_addition_in;
use super::working::{prune_actual, read_actual_row, read_working_row};
use super::{
    Kind, WcDb, descendants_pattern, ensure_repository_in, parent_of, props_to_blob,
    queue_work_items,
};
use crate::checksum::Checksum;
use crate::error::{Result, WcError};
use crate::properties::PropertySet;
use crate::skel::Skel;
use rusqlite::params;
use std::path::Path;
use tracing::{debug, info};

/// What the repository reported for one committed node.
#[derive(Debug, Clone, Default)]
pub struct CommitArgs {
    pub new_revision: i64,
    pub changed_date: Option<i64>,
    pub changed_author: Option<String>,
    /// New pristine text of a committed file; `None` keeps the recorded one.
    pub new_checksum: Option<Checksum>,
    pub new_dav_cache: Option<PropertySet>,
    pub keep_changelist: bool,
    pub work_items: Vec<Skel>,
}

impl WcDb {
    /// Fold the node's WORKING and ACTUAL state into BASE at the committed
    /// revision. Everything happens in one transaction, including the
    /// queued work items.
    pub fn global_commit(&self, abspath: &Path, args: &CommitArgs) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let base = read_base_row(&tx, wc_id, &relpath)?;
        let work = read_working_row(&tx, wc_id, &relpath)?;
        let actual = read_actual_row(&tx, wc_id, &relpath)?;
        if base.is_none() && work.is_none() {
            return Err(WcError::PathNotFound(abspath.to_path_buf()));
        }
        if let Some(parent) = parent_of(&relpath) {
            if !has_base(&tx, wc_id, parent)? {
                return Err(WcError::UnexpectedStatus(format!(
                    "parent of '{}' has not been committed",
                    relpath
                )));
            }
        }

        let repos = match &work {
            Some(w) if w.is_present() => scan_addition_in(&tx, wc_id, &relpath)?.repos,
            _ => scan_base_repository_in(&tx, wc_id, &relpath)?,
        };
        let repos_id = ensure_repository_in(&tx, &repos.root_url, &repos.uuid)?;

        if work.as_ref().is_some_and(|w| w.presence.is_deleted()) {
            let kind = work.as_ref().map_or(Kind::Unknown, |w| w.kind);
            for table in ["BASE_NODE", "WORKING_NODE", "ACTUAL_NODE"] {
                tx.execute(
                    &format!(
                        "DELETE FROM {} WHERE wc_id = ?1
                            AND (local_relpath = ?2 OR local_relpath LIKE ?3 ESCAPE '#')",
                        table
                    ),
                    params![wc_id, relpath, descendants_pattern(&relpath)],
                )?;
            }
            if parent_of(&relpath).is_some() {
                tx.execute(
                    "INSERT INTO BASE_NODE
                        (wc_id, local_relpath, repos_id, repos_relpath, parent_relpath, presence, kind, revnum)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'not-present', ?6, ?7)",
                    params![wc_id, relpath, repos_id, repos.relpath, parent_of(&relpath), kind.as_str(), args.new_revision],
                )?;
            }
            queue_work_items(&tx, &args.work_items)?;
            tx.commit()?;
            info!("Committed deletion of '{}' in r{}", relpath, args.new_revision);
            return Ok(());
        }

        let (kind, checksum, size, depth, target, pristine_props) = match (&work, &base) {
            (Some(w), _) => (w.kind, w.checksum.clone(), w.translated_size, w.depth, w.symlink_target.clone(), w.properties.clone()),
            (None, Some(b)) => (b.kind, b.checksum.clone(), b.translated_size, b.depth, b.symlink_target.clone(), b.properties.clone()),
            (None, None) => return Err(WcError::PathNotFound(abspath.to_path_buf())),
        };
        let checksum = args.new_checksum.clone().or(checksum);
        if kind == Kind::File {
            match &checksum {
                Some(c) if c.is_sha1() => {}
                _ => {
                    return Err(WcError::InvalidArgument(format!(
                        "committed file '{}' needs a SHA-1 pristine checksum",
                        relpath
                    )));
                }
            }
        }
        let props = actual
            .as_ref()
            .and_then(|a| a.properties.clone())
            .or(pristine_props)
            .unwrap_or_default();
        let size = if args.new_checksum.is_some() { None } else { size };

        tx.execute(
            "INSERT OR REPLACE INTO BASE_NODE
                (wc_id, local_relpath, repos_id, repos_relpath, parent_relpath, presence, kind, revnum,
                 checksum, translated_size, changed_rev, changed_date, changed_author, depth,
                 symlink_target, properties, dav_cache)
             VALUES (?1, ?2, ?3, ?4, ?5, 'normal', ?6, ?7, ?8, ?9, ?7, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                wc_id,
                relpath,
                repos_id,
                repos.relpath,
                parent_of(&relpath),
                kind.as_str(),
                args.new_revision,
                checksum.map(|c| c.to_string()),
                size,
                args.changed_date,
                args.changed_author,
                depth.map(|d| d.as_str()),
                target,
                props_to_blob(&props),
                args.new_dav_cache.as_ref().map(props_to_blob),
            ],
        )?;
        tx.execute(
            "DELETE FROM WORKING_NODE WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath],
        )?;
        let changelist_sql = if args.keep_changelist { "changelist" } else { "NULL" };
        tx.execute(
            &format!(
                "UPDATE ACTUAL_NODE SET properties = NULL, text_mod = NULL, changelist = {}
                 WHERE wc_id = ?1 AND local_relpath = ?2",
                changelist_sql
            ),
            params![wc_id, relpath],
        )?;
        prune_actual(&tx, wc_id, &relpath)?;
        queue_work_items(&tx, &args.work_items)?;
        tx.commit()?;
        info!("Committed {} '{}' in r{}", kind, relpath, args.new_revision);
        Ok(())
    }

    /// Rewrite the BASE node from the repository, leaving WORKING and
    /// ACTUAL alone. BASE children the new directory listing no longer
    /// names are removed.
    pub fn global_update(
        &self,
        abspath: &Path,
        node: &NewBaseNode,
        content: BaseContent,
        work_items: &[Skel],
    ) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_base_node(&tx, self.wc_id(), &relpath, node, &content, true).map_err(|e| match e {
            WcError::PathNotFound(parent) => WcError::PathNotFound(self.from_relpath(&parent.to_string_lossy())),
            other => other,
        })?;
        queue_work_items(&tx, work_items)?;
        tx.commit()?;
        Ok(())
    }

    /// Point every node recorded against `from_root_url` at `to_root_url`.
    pub fn global_relocate(&self, from_root_url: &str, to_root_url: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE REPOSITORY SET root = ?2 WHERE root = ?1",
            params![from_root_url, to_root_url],
        )?;
        if updated == 0 {
            return Err(WcError::InvalidArgument(format!("no repository at '{}'", from_root_url)));
        }
        info!("Relocated {} to {}", from_root_url, to_root_url);
        Ok(())
    }

    /// Remember the size and timestamp of the working file so later status
    /// checks can skip comparing contents.
    pub fn global_record_fileinfo(&self, abspath: &Path, translated_size: i64, last_mod_time: i64) -> Result<()> {
        let relpath = self.to_relpath(abspath)?;
        let wc_id = self.wc_id();
        let conn = self.conn()?;
        let mut updated = conn.execute(
            "UPDATE WORKING_NODE SET translated_size = ?3, last_mod_time = ?4
             WHERE wc_id = ?1 AND local_relpath = ?2",
            params![wc_id, relpath, translated_size, last_mod_time],
        )?;
        if updated == 0 {
            updated = conn.execute(
                "UPDATE BASE_NODE SET translated_size = ?3, last_mod_time = ?4
                 WHERE wc_id = ?1 AND local_relpath = ?2",
                params![wc_id, relpath, translated_size, last_mod_time],
            )?;
        }
        if updated == 0 {
            return Err(WcError::PathNotFound(abspath.to_path_buf()));
        }
        debug!("Recorded fileinfo for '{}': {} bytes", relpath, translated_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_wc;
    use super::super::{ChangedInfo, Depth, ReposLocation, Status};
    use super::*;

    fn repos(p: &str) -> ReposLocation {
        ReposLocation::new(crate::relpath::join("trunk", p), "http://svn.example.com/repo", "uuid-1")
    }

    fn checkout(db: &WcDb) {
        let root = db.root().to_path_buf();
        db.add_base_directory(&root, &NewBaseNode::new(repos(""), 1), vec!["f".into()], Depth::Infinity)
            .unwrap();
        db.add_base_file(&root.join("f"), &NewBaseNode::new(repos("f"), 1), Checksum::sha1_of(b"f"), Some(1))
            .unwrap();
    }

    #[test]
    fn test_commit_added_file() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let path = db.root().join("new.txt");
        db.op_add_file(&path).unwrap();
        db.op_set_changelist(&path, Some("work")).unwrap();
        let args = CommitArgs {
            new_revision: 2,
            changed_author: Some("bob".into()),
            new_checksum: Some(Checksum::sha1_of(b"new")),
            ..Default::default()
        };
        db.global_commit(&path, &args).unwrap();

        let info = db.read_info(&path).unwrap();
        assert_eq!(info.status, Status::Normal);
        assert_eq!(info.revision, Some(2));
        assert_eq!(info.changed, ChangedInfo { rev: Some(2), date: None, author: Some("bob".into()) });
        assert_eq!(info.repos.unwrap().relpath, "trunk/new.txt");
        assert_eq!(info.changelist, None);
    }

    #[test]
    fn test_commit_keeps_changelist_and_applies_props() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let path = db.root().join("f");
        let mut props = PropertySet::new();
        props.set("svn:keywords".into(), "Id".into());
        db.op_set_props(&path, &props).unwrap();
        db.op_set_changelist(&path, Some("work")).unwrap();
        let args = CommitArgs { new_revision: 3, keep_changelist: true, ..Default::default() };
        db.global_commit(&path, &args).unwrap();

        let info = db.read_info(&path).unwrap();
        assert!(!info.props_mod);
        assert_eq!(info.changelist.as_deref(), Some("work"));
        assert_eq!(db.get_base_props(&path).unwrap(), props);
        assert_eq!(info.checksum, Some(Checksum::sha1_of(b"f")));
    }

    #[test]
    fn test_commit_deletion_leaves_not_present() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let path = db.root().join("f");
        db.op_delete(&path).unwrap();
        db.global_commit(&path, &CommitArgs { new_revision: 4, ..Default::default() }).unwrap();
        let info = db.read_info(&path).unwrap();
        assert_eq!(info.status, Status::NotPresent);
        assert_eq!(info.revision, Some(4));
        assert!(db.is_node_hidden(&path).unwrap());
    }

    #[test]
    fn test_update_preserves_working() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let root = db.root().to_path_buf();
        db.op_add_file(&root.join("local")).unwrap();
        db.global_update(
            &root,
            &NewBaseNode::new(repos(""), 5),
            BaseContent::Directory { children: vec!["g".into()], depth: Depth::Infinity },
            &[],
        )
        .unwrap();
        assert_eq!(db.get_base_children(&root).unwrap(), vec!["g"]);
        assert_eq!(db.read_info(&root.join("local")).unwrap().status, Status::Added);
        assert!(matches!(db.read_info(&root.join("f")), Err(WcError::PathNotFound(_))));
    }

    #[test]
    fn test_relocate_and_fileinfo() {
        let (_dir, db) = new_wc();
        checkout(&db);
        let path = db.root().join("f");
        db.global_record_fileinfo(&path, 10, 1_700_000_000).unwrap();
        let info = db.read_info(&path).unwrap();
        assert_eq!(info.translated_size, Some(10));
        assert_eq!(info.last_mod_time, Some(1_700_000_000));

        db.global_relocate("http://svn.example.com/repo", "https://svn.example.org/repo").unwrap();
        assert_eq!(db.scan_base_repository(&path).unwrap().root_url, "https://svn.example.org/repo");
        assert!(db.global_relocate("http://nowhere", "http://elsewhere").is_err());
    }
}
