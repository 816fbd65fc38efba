//! Editor that applies an update to the working copy's BASE tree
//!
//! Directories are written when they close, so their child list is final.
//! File texts are rebuilt from the current pristine and the svndiff
//! stream, stored in the pristine store and installed into the working
//! tree through `file-install` work items, which run at `close_edit`.

use crate::editor::Editor;
use crate::svndiff;
use crate::{DavError, Result};
use std::collections::BTreeSet;
use std::fs;
use svnwc_core::properties::svn_props;
use svnwc_core::{
    BaseContent, BaseInfo, CancellationToken, ChangedInfo, Checksum, Depth, Kind, NewBaseNode, Presence, PropertySet,
    ReposLocation, WcDb, WcError, WorkItem, relpath, run_work_queue,
};
use tracing::{debug, info, warn};

/// State shared by open directories and files.
#[derive(Debug)]
struct NodeBaton {
    path: String,
    repos_relpath: String,
    revision: i64,
    props: PropertySet,
    changed: ChangedInfo,
    dav_cache: PropertySet,
}

#[derive(Debug)]
struct DirBaton {
    node: NodeBaton,
    depth: Depth,
    children: BTreeSet<String>,
}

#[derive(Debug)]
struct FileBaton {
    node: NodeBaton,
    base_checksum: Option<Checksum>,
    base_text: Vec<u8>,
    delta: Option<Vec<u8>>,
    new_text: Option<Vec<u8>>,
}

pub struct WcUpdateEditor<'a> {
    db: &'a WcDb,
    cancel: CancellationToken,
    repos_root: String,
    repos_uuid: String,
    target_revision: Option<i64>,
    dirs: Vec<DirBaton>,
    file: Option<FileBaton>,
    files_changed: usize,
}

fn mismatch(path: &str, expected: &str, actual: &Checksum) -> DavError {
    DavError::malformed(format!(
        "checksum mismatch for '{}': expected {}, actual {}",
        path,
        expected,
        actual.to_hex()
    ))
}

impl<'a> WcUpdateEditor<'a> {
    /// Edit the working copy rooted at `db`; edit paths are relative to its root.
    pub fn new(db: &'a WcDb) -> Self {
        Self {
            db,
            cancel: CancellationToken::new(),
            repos_root: String::new(),
            repos_uuid: String::new(),
            target_revision: None,
            dirs: Vec::new(),
            file: None,
            files_changed: 0,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Number of files whose text was rewritten.
    pub fn files_changed(&self) -> usize {
        self.files_changed
    }

    fn revision(&self, revision: i64) -> Result<i64> {
        match self.target_revision {
            Some(rev) => Ok(rev),
            None if revision >= 0 => Ok(revision),
            None => Err(DavError::malformed("edit has no target revision")),
        }
    }

    fn parent(&mut self, path: &str) -> Result<&mut DirBaton> {
        let parent = relpath::dirname(path).unwrap_or("");
        match self.dirs.last_mut() {
            Some(dir) if dir.node.path == parent => Ok(dir),
            _ => Err(DavError::malformed(format!("'{}' is not a child of the open directory", path))),
        }
    }

    fn new_node(&mut self, path: &str, revision: i64) -> Result<NodeBaton> {
        let parent = self.parent(path)?;
        parent.children.insert(relpath::basename(path).to_string());
        let repos_relpath = relpath::join(&parent.node.repos_relpath, relpath::basename(path));
        Ok(NodeBaton {
            path: path.to_string(),
            repos_relpath,
            revision,
            props: PropertySet::new(),
            changed: ChangedInfo::default(),
            dav_cache: PropertySet::new(),
        })
    }

    /// Load the BASE state of an existing node.
    fn existing_node(&self, path: &str, revision: i64) -> Result<(NodeBaton, BaseInfo)> {
        let abspath = self.db.from_relpath(path);
        let info = self.db.get_base_info(&abspath)?;
        let node = NodeBaton {
            path: path.to_string(),
            repos_relpath: info.repos.relpath.clone(),
            revision,
            props: self.db.get_base_props(&abspath)?,
            changed: info.changed.clone(),
            dav_cache: self.db.get_base_dav_cache(&abspath)?.unwrap_or_default(),
        };
        Ok((node, info))
    }

    fn base_node(&self, node: NodeBaton) -> NewBaseNode {
        NewBaseNode {
            repos: ReposLocation::new(node.repos_relpath, &self.repos_root, &self.repos_uuid),
            revision: node.revision,
            props: node.props,
            changed: node.changed,
            dav_cache: if node.dav_cache.is_empty() { None } else { Some(node.dav_cache) },
        }
    }

    fn open_dir_baton(&mut self, path: &str, revision: i64) -> Result<()> {
        let revision = self.revision(revision)?;
        let (node, info) = self.existing_node(path, revision)?;
        if info.kind != Kind::Dir {
            return Err(WcError::UnexpectedStatus(format!("'{}' is a {}, not a directory", path, info.kind)).into());
        }
        let children = self.db.get_base_children(&self.db.from_relpath(path))?.into_iter().collect();
        self.dirs.push(DirBaton { node, depth: info.depth.unwrap_or(Depth::Infinity), children });
        Ok(())
    }

    fn file_baton(&mut self, path: &str) -> Result<&mut FileBaton> {
        match self.file.as_mut() {
            Some(file) if file.node.path == path => Ok(file),
            _ => Err(DavError::malformed(format!("file '{}' is not open", path))),
        }
    }

    fn absent(&mut self, path: &str, kind: Kind) -> Result<()> {
        let revision = self.revision(-1)?;
        let node = self.new_node(path, revision)?;
        let repos = ReposLocation::new(node.repos_relpath, &self.repos_root, &self.repos_uuid);
        self.db
            .add_base_absent_node(&self.db.from_relpath(path), &repos, revision, kind, Presence::Absent)?;
        Ok(())
    }
}

/// Route a property change to the node's props, changed info or DAV cache.
fn apply_prop(node: &mut NodeBaton, name: &str, value: Option<&str>) -> Result<()> {
    if svn_props::is_entry_prop(name) {
        match name {
            svn_props::ENTRY_COMMITTED_REV => {
                node.changed.rev = value
                    .map(|v| v.parse().map_err(|_| DavError::malformed(format!("bad committed-rev '{}'", v))))
                    .transpose()?;
            }
            svn_props::ENTRY_COMMITTED_DATE => {
                node.changed.date = value
                    .map(|v| {
                        chrono::DateTime::parse_from_rfc3339(v)
                            .map(|d| d.timestamp_micros())
                            .map_err(|_| DavError::malformed(format!("bad committed-date '{}'", v)))
                    })
                    .transpose()?;
            }
            svn_props::ENTRY_LAST_AUTHOR => node.changed.author = value.map(str::to_string),
            _ => {}
        }
    } else if svn_props::is_wc_prop(name) {
        node.dav_cache.apply(name, value);
    } else {
        node.props.apply(name, value);
    }
    Ok(())
}

impl Editor for WcUpdateEditor<'_> {
    fn target_revision(&mut self, revision: i64) -> Result<()> {
        self.target_revision = Some(revision);
        Ok(())
    }

    fn open_root(&mut self, revision: i64) -> Result<()> {
        let repos = self.db.scan_base_repository(self.db.root())?;
        self.repos_root = repos.root_url;
        self.repos_uuid = repos.uuid;
        self.open_dir_baton("", revision)
    }

    fn open_dir(&mut self, path: &str, revision: i64) -> Result<()> {
        self.parent(path)?;
        self.open_dir_baton(path, revision)
    }

    fn add_dir(&mut self, path: &str, copyfrom_path: Option<&str>, _copyfrom_rev: i64) -> Result<()> {
        if let Some(source) = copyfrom_path {
            return Err(DavError::NotImplemented(format!("adding '{}' as a copy of '{}'", path, source)));
        }
        let revision = self.revision(-1)?;
        let node = self.new_node(path, revision)?;
        let abspath = self.db.from_relpath(path);
        let base = NewBaseNode::new(
            ReposLocation::new(node.repos_relpath.clone(), &self.repos_root, &self.repos_uuid),
            revision,
        );
        self.db.add_base_directory(&abspath, &base, Vec::new(), Depth::Infinity)?;
        fs::create_dir_all(&abspath).map_err(WcError::from)?;
        self.dirs.push(DirBaton { node, depth: Depth::Infinity, children: BTreeSet::new() });
        Ok(())
    }

    fn open_file(&mut self, path: &str, revision: i64) -> Result<()> {
        self.parent(path)?;
        let revision = self.revision(revision)?;
        let (node, info) = self.existing_node(path, revision)?;
        if info.kind != Kind::File {
            return Err(WcError::UnexpectedStatus(format!("'{}' is a {}, not a file", path, info.kind)).into());
        }
        let checksum = info
            .checksum
            .ok_or_else(|| WcError::corrupt(format!("file '{}' has no pristine checksum", path)))?;
        let base_text = self.db.read_pristine(&checksum)?;
        self.file = Some(FileBaton { node, base_checksum: Some(checksum), base_text, delta: None, new_text: None });
        Ok(())
    }

    fn add_file(&mut self, path: &str, copyfrom_path: Option<&str>, _copyfrom_rev: i64) -> Result<()> {
        if let Some(source) = copyfrom_path {
            return Err(DavError::NotImplemented(format!("adding '{}' as a copy of '{}'", path, source)));
        }
        let revision = self.revision(-1)?;
        let node = self.new_node(path, revision)?;
        self.file = Some(FileBaton { node, base_checksum: None, base_text: Vec::new(), delta: None, new_text: None });
        Ok(())
    }

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        match self.dirs.last_mut() {
            Some(dir) if dir.node.path == path => apply_prop(&mut dir.node, name, value),
            _ => Err(DavError::malformed(format!("directory '{}' is not open", path))),
        }
    }

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        apply_prop(&mut self.file_baton(path)?.node, name, value)
    }

    fn apply_text_delta(&mut self, path: &str, base_checksum: Option<&str>) -> Result<()> {
        let file = self.file_baton(path)?;
        if let Some(expected) = base_checksum {
            let actual = Checksum::md5_of(&file.base_text);
            if !actual.to_hex().eq_ignore_ascii_case(expected) {
                return Err(mismatch(path, expected, &actual));
            }
        }
        file.delta = Some(Vec::new());
        Ok(())
    }

    fn text_delta_chunk(&mut self, path: &str, data: &[u8]) -> Result<()> {
        match self.file_baton(path)?.delta.as_mut() {
            Some(delta) => {
                delta.extend_from_slice(data);
                Ok(())
            }
            None => Err(DavError::malformed(format!("delta data for '{}' before apply-textdelta", path))),
        }
    }

    fn text_delta_end(&mut self, path: &str) -> Result<()> {
        let file = self.file_baton(path)?;
        let delta = file.delta.take().unwrap_or_default();
        // No svndiff data at all leaves the text as it was.
        if !delta.is_empty() {
            file.new_text = Some(svndiff::apply(&file.base_text, &delta)?);
        }
        Ok(())
    }

    fn close_file(&mut self, path: &str, checksum: Option<&str>) -> Result<()> {
        self.file_baton(path)?;
        let Some(file) = self.file.take() else {
            return Err(DavError::malformed(format!("file '{}' is not open", path)));
        };
        let text = match (file.new_text, &file.base_checksum) {
            (Some(text), _) => Some(text),
            (None, None) => Some(Vec::new()),
            (None, Some(_)) => None,
        };
        let abspath = self.db.from_relpath(path);
        let mut work_items = Vec::new();
        let sha1 = match text {
            Some(text) => {
                let tmp = self.db.write_temp(&text)?;
                if let Some(expected) = checksum {
                    if !tmp.md5.to_hex().eq_ignore_ascii_case(expected) {
                        return Err(mismatch(path, expected, &tmp.md5));
                    }
                }
                self.db.install_pristine(&tmp.path, &tmp.sha1, &tmp.md5)?;
                work_items.push(
                    WorkItem::FileInstall {
                        relpath: path.to_string(),
                        use_commit_times: self.db.config().use_commit_times,
                        record_fileinfo: true,
                    }
                    .to_skel(),
                );
                self.files_changed += 1;
                tmp.sha1
            }
            None => file
                .base_checksum
                .ok_or_else(|| WcError::corrupt(format!("file '{}' has no pristine checksum", path)))?,
        };
        let node = self.base_node(file.node);
        debug!("Updating file '{}' to r{}", path, node.revision);
        self.db.global_update(
            &abspath,
            &node,
            BaseContent::File { checksum: sha1, translated_size: None },
            &work_items,
        )?;
        Ok(())
    }

    fn close_dir(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Err(DavError::malformed("closing a directory while a file is open"));
        }
        let dir = self.dirs.pop().ok_or_else(|| DavError::malformed("no open directory to close"))?;
        let path = dir.node.path.clone();
        let node = self.base_node(dir.node);
        debug!("Updating directory '{}' to r{}", path, node.revision);
        self.db.global_update(
            &self.db.from_relpath(&path),
            &node,
            BaseContent::Directory { children: dir.children.into_iter().collect(), depth: dir.depth },
            &[],
        )?;
        Ok(())
    }

    fn delete_entry(&mut self, path: &str, _revision: i64) -> Result<()> {
        let name = relpath::basename(path).to_string();
        self.parent(path)?.children.remove(&name);
        let abspath = self.db.from_relpath(path);
        let kind = match self.db.get_base_info(&abspath) {
            Ok(info) => info.kind,
            Err(e) if e.is_path_not_found() => {
                warn!("Deleted entry '{}' is not in BASE", path);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.db.remove_base(&abspath)?;
        let item = match kind {
            Kind::Dir => WorkItem::DirRemove { relpath: path.to_string(), recursive: true },
            _ => WorkItem::FileRemove { relpath: path.to_string() },
        };
        self.db.add_work_queue(&item.to_skel())?;
        debug!("Deleted '{}' from BASE", path);
        Ok(())
    }

    fn absent_dir(&mut self, path: &str) -> Result<()> {
        self.absent(path, Kind::Dir)
    }

    fn absent_file(&mut self, path: &str) -> Result<()> {
        self.absent(path, Kind::File)
    }

    fn close_edit(&mut self) -> Result<()> {
        if !self.dirs.is_empty() || self.file.is_some() {
            return Err(DavError::malformed("edit closed with nodes still open"));
        }
        self.db.add_work_queue(&WorkItem::PristineCleanup.to_skel())?;
        let ran = run_work_queue(self.db, &self.cancel).map_err(|e| match e {
            WcError::Cancelled => DavError::Cancelled,
            other => other.into(),
        })?;
        info!(
            "Updated {} to r{} ({} files changed, {} work items)",
            self.db.root().display(),
            self.target_revision.unwrap_or(-1),
            self.files_changed,
            ran
        );
        Ok(())
    }

    fn abort_edit(&mut self) -> Result<()> {
        warn!("Edit of {} aborted with {} directories open", self.db.root().display(), self.dirs.len());
        self.dirs.clear();
        self.file = None;
        Ok(())
    }
}
