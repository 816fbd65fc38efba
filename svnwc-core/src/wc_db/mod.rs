//! Working-copy metadata database
//!
//! Every node of a working copy is described by up to three rows:
//! - BASE_NODE: the last state received from the repository
//! - WORKING_NODE: local structural changes (adds, deletes, copies, moves)
//! - ACTUAL_NODE: property edits, conflicts, changelists, text modification
//!
//! All three live in one SQLite database at `<wcroot>/.svn/wc.db`. Every
//! mutating operation runs in a single transaction, together with the
//! work-queue items it schedules.

mod base;
mod global;
mod locks;
mod pristine;
mod queue;
mod scan;
pub mod schema;
mod working;

pub use base::{BaseContent, BaseInfo, NewBaseNode};
pub use global::CommitArgs;
pub use locks::LockInfo;
pub use pristine::{PristineCheck, TempText};
pub use scan::{AdditionInfo, DeletionInfo, NodeInfo};
pub use working::CopyOrigin;

use crate::config::WcConfig;
use crate::error::{Result, WcError};
use crate::properties::PropertySet;
use crate::relpath;
use crate::skel::Skel;
use bytes::Bytes;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Name of the administrative directory at the working-copy root.
pub const ADMIN_DIR: &str = ".svn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// Read-write; refuses a pending work queue when configured to.
    ReadWrite,
    /// Read-write without the work-queue check, for draining the queue.
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Dir,
    File,
    Symlink,
    Unknown,
}

/// Row-level presence of a BASE or WORKING node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    Normal,
    Absent,
    Excluded,
    NotPresent,
    Incomplete,
    BaseDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Depth {
    Empty,
    Files,
    Immediates,
    Infinity,
}

/// Derived status of a node across the three layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Normal,
    Added,
    MovedHere,
    Copied,
    Deleted,
    Obstructed,
    ObstructedDelete,
    ObstructedAdd,
    Absent,
    Excluded,
    NotPresent,
    Incomplete,
    BaseDeleted,
}

macro_rules! db_token_enum {
    ($ty:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $token),+
                }
            }

            pub fn parse(s: &str) -> Result<Self> {
                match s {
                    $($token => Ok($ty::$variant),)+
                    other => Err(WcError::corrupt(format!(
                        "unknown {} '{}'",
                        stringify!($ty).to_lowercase(),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

db_token_enum!(Kind { Dir => "dir", File => "file", Symlink => "symlink", Unknown => "unknown" });

db_token_enum!(Presence {
    Normal => "normal",
    Absent => "absent",
    Excluded => "excluded",
    NotPresent => "not-present",
    Incomplete => "incomplete",
    BaseDeleted => "base-deleted",
});

db_token_enum!(Depth {
    Empty => "empty",
    Files => "files",
    Immediates => "immediates",
    Infinity => "infinity",
});

impl Presence {
    /// Hidden nodes exist in the database but not in the user's tree.
    pub fn is_hidden(&self) -> bool {
        matches!(self, Presence::Absent | Presence::Excluded | Presence::NotPresent)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Presence::NotPresent | Presence::BaseDeleted)
    }
}

impl Status {
    fn from_base_presence(presence: Presence) -> Status {
        match presence {
            Presence::Normal => Status::Normal,
            Presence::Absent => Status::Absent,
            Presence::Excluded => Status::Excluded,
            Presence::NotPresent => Status::NotPresent,
            Presence::Incomplete => Status::Incomplete,
            Presence::BaseDeleted => Status::BaseDeleted,
        }
    }

    fn from_working_presence(presence: Presence) -> Status {
        match presence {
            Presence::Normal => Status::Added,
            Presence::NotPresent | Presence::BaseDeleted => Status::Deleted,
            Presence::Incomplete => Status::Incomplete,
            Presence::Excluded => Status::Excluded,
            Presence::Absent => Status::Absent,
        }
    }
}

/// Last-changed information for a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedInfo {
    pub rev: Option<i64>,
    /// Microseconds since the Unix epoch.
    pub date: Option<i64>,
    pub author: Option<String>,
}

/// Repository coordinates of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReposLocation {
    pub relpath: String,
    pub root_url: String,
    pub uuid: String,
}

impl ReposLocation {
    pub fn new(relpath: impl Into<String>, root_url: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self { relpath: relpath.into(), root_url: root_url.into(), uuid: uuid.into() }
    }

    pub fn url(&self) -> String {
        relpath::url_join(&self.root_url, &self.relpath)
    }
}

/// Handle to one working copy's metadata store.
pub struct WcDb {
    root: PathBuf,
    wc_id: i64,
    conn: Mutex<Connection>,
    config: WcConfig,
}

fn admin_dir_of(root: &Path) -> PathBuf {
    root.join(ADMIN_DIR)
}

/// Nearest directory at or above `path` holding an administrative area.
pub fn find_wc_root(path: &Path) -> Result<PathBuf> {
    let abspath = std::path::absolute(path)?;
    let mut current = Some(abspath.as_path());
    while let Some(dir) = current {
        if admin_dir_of(dir).join(schema::DB_FILE).is_file() {
            return Ok(dir.to_path_buf());
        }
        current = dir.parent();
    }
    Err(WcError::NotWorkingCopy(abspath))
}

impl WcDb {
    /// Create a new working copy rooted at `root` whose root directory mirrors
    /// `repos` at `initial_rev`.
    ///
    /// The root is recorded as `incomplete` when `initial_rev > 0`: its
    /// children have not been fetched yet.
    pub fn init(
        root: &Path,
        repos: &ReposLocation,
        initial_rev: i64,
        depth: Depth,
        config: WcConfig,
    ) -> Result<WcDb> {
        let root = std::path::absolute(root)?;
        let admin = admin_dir_of(&root);
        if admin.join(schema::DB_FILE).exists() {
            return Err(WcError::InvalidArgument(format!(
                "'{}' is already a working copy",
                root.display()
            )));
        }
        fs::create_dir_all(admin.join("pristine"))?;
        fs::create_dir_all(admin.join("tmp"))?;

        let mut conn = Connection::open(admin.join(schema::DB_FILE))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        let tx = conn.transaction()?;
        schema::create(&tx)?;
        tx.execute("INSERT INTO WCROOT (local_abspath) VALUES (NULL)", [])?;
        let wc_id = tx.last_insert_rowid();
        let repos_id = ensure_repository_in(&tx, &repos.root_url, &repos.uuid)?;
        let presence = if initial_rev > 0 { Presence::Incomplete } else { Presence::Normal };
        tx.execute(
            "INSERT INTO BASE_NODE (wc_id, local_relpath, repos_id, repos_relpath, parent_relpath,
                                    presence, kind, revnum, depth)
             VALUES (?1, '', ?2, ?3, NULL, ?4, 'dir', ?5, ?6)",
            params![wc_id, repos_id, repos.relpath, presence.as_str(), initial_rev, depth.as_str()],
        )?;
        tx.commit()?;

        info!("Created working copy at {} for {}", root.display(), repos.url());
        Ok(WcDb { root, wc_id, conn: Mutex::new(conn), config })
    }

    /// Open the working copy containing `path`, loading its configuration.
    pub fn open(path: &Path, mode: OpenMode) -> Result<WcDb> {
        let root = find_wc_root(path)?;
        let config = WcConfig::load(&admin_dir_of(&root))?;
        Self::open_root(&root, mode, config)
    }

    pub fn open_with_config(path: &Path, mode: OpenMode, config: WcConfig) -> Result<WcDb> {
        let root = find_wc_root(path)?;
        Self::open_root(&root, mode, config)
    }

    fn open_root(root: &Path, mode: OpenMode, config: WcConfig) -> Result<WcDb> {
        let db_path = admin_dir_of(root).join(schema::DB_FILE);
        let flags = match mode {
            OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            _ => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        };
        let conn = Connection::open_with_flags(&db_path, flags)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        schema::verify(&conn)?;

        let wc_id: i64 = conn
            .query_row("SELECT id FROM WCROOT WHERE local_abspath IS NULL", [], |row| row.get(0))
            .optional()?
            .ok_or_else(|| WcError::corrupt("no WCROOT row"))?;

        if mode == OpenMode::ReadWrite && config.enforce_empty_work_queue {
            let pending: i64 = conn.query_row("SELECT COUNT(*) FROM WORK_QUEUE", [], |row| row.get(0))?;
            if pending > 0 {
                return Err(WcError::CleanupRequired(root.to_path_buf()));
            }
        }

        debug!("Opened {} ({:?})", db_path.display(), mode);
        Ok(WcDb { root: root.to_path_buf(), wc_id, conn: Mutex::new(conn), config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admin_dir(&self) -> PathBuf {
        admin_dir_of(&self.root)
    }

    pub fn config(&self) -> &WcConfig {
        &self.config
    }

    pub(crate) fn wc_id(&self) -> i64 {
        self.wc_id
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| WcError::corrupt("database handle poisoned by an earlier panic"))
    }

    /// Convert an absolute path inside this working copy to its relpath key.
    pub fn to_relpath(&self, abspath: &Path) -> Result<String> {
        if !abspath.is_absolute() {
            return Err(WcError::InvalidPath(format!("'{}' is not absolute", abspath.display())));
        }
        let rest = abspath.strip_prefix(&self.root).map_err(|_| {
            WcError::InvalidPath(format!(
                "'{}' is not inside working copy '{}'",
                abspath.display(),
                self.root.display()
            ))
        })?;
        let mut segments = Vec::new();
        for component in rest.components() {
            match component {
                Component::Normal(seg) => segments.push(seg.to_str().ok_or_else(|| {
                    WcError::InvalidPath(format!("'{}' is not valid UTF-8", abspath.display()))
                })?),
                Component::CurDir => {}
                _ => {
                    return Err(WcError::InvalidPath(format!(
                        "'{}' is not canonical",
                        abspath.display()
                    )));
                }
            }
        }
        if segments.first() == Some(&ADMIN_DIR) {
            return Err(WcError::InvalidPath(format!(
                "'{}' is inside the administrative area",
                abspath.display()
            )));
        }
        Ok(segments.join("/"))
    }

    pub fn from_relpath(&self, relpath: &str) -> PathBuf {
        let mut path = self.root.clone();
        for seg in relpath::segments(relpath) {
            path.push(seg);
        }
        path
    }

    /// Id of the `(root_url, uuid)` repository row, created on demand.
    pub fn ensure_repository(&self, root_url: &str, uuid: &str) -> Result<i64> {
        let conn = self.conn()?;
        ensure_repository_in(&conn, root_url, uuid)
    }
}

pub(crate) fn ensure_repository_in(conn: &Connection, root_url: &str, uuid: &str) -> Result<i64> {
    let existing: Option<(i64, String)> = conn
        .query_row("SELECT id, uuid FROM REPOSITORY WHERE root = ?1", [root_url], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    match existing {
        Some((id, known)) if known == uuid => Ok(id),
        Some((_, known)) => Err(WcError::InvalidArgument(format!(
            "repository '{}' has uuid {}, not {}",
            root_url, known, uuid
        ))),
        None => {
            conn.execute("INSERT INTO REPOSITORY (root, uuid) VALUES (?1, ?2)", [root_url, uuid])?;
            Ok(conn.last_insert_rowid())
        }
    }
}

pub(crate) fn fetch_repository(conn: &Connection, repos_id: i64) -> Result<(String, String)> {
    conn.query_row("SELECT root, uuid FROM REPOSITORY WHERE id = ?1", [repos_id], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
    .optional()?
    .ok_or_else(|| WcError::corrupt(format!("no REPOSITORY row with id {}", repos_id)))
}

/// `LIKE` pattern matching every strict descendant of `relpath`.
pub(crate) fn descendants_pattern(relpath: &str) -> String {
    let escaped: String = relpath
        .chars()
        .flat_map(|c| match c {
            '#' | '%' | '_' => vec!['#', c],
            c => vec![c],
        })
        .collect();
    if escaped.is_empty() { "%".to_string() } else { format!("{}/%", escaped) }
}

pub(crate) fn parent_of(relpath: &str) -> Option<&str> {
    relpath::dirname(relpath)
}

pub(crate) fn props_to_blob(props: &PropertySet) -> Vec<u8> {
    Skel::from_props(props).unparse().to_vec()
}

pub(crate) fn props_from_blob(blob: Option<Vec<u8>>) -> Result<Option<PropertySet>> {
    match blob {
        None => Ok(None),
        Some(bytes) => Ok(Some(Skel::parse(Bytes::from(bytes))?.parse_prop_list()?)),
    }
}

pub(crate) fn parse_opt<T>(value: Option<String>, parse: fn(&str) -> Result<T>) -> Result<Option<T>> {
    value.as_deref().map(parse).transpose()
}

/// Validate then queue work items inside the caller's transaction.
pub(crate) fn queue_work_items(conn: &Connection, items: &[Skel]) -> Result<()> {
    for item in items {
        crate::workqueue::WorkItem::from_skel(item)?;
        conn.execute("INSERT INTO WORK_QUEUE (work) VALUES (?1)", [item.unparse().as_ref()])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn new_wc() -> (TempDir, WcDb) {
        let dir = TempDir::new().unwrap();
        let db = WcDb::init(
            dir.path(),
            &ReposLocation::new("trunk", "http://svn.example.com/repo", "uuid-1"),
            0,
            Depth::Infinity,
            WcConfig::default(),
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn test_init_and_reopen() {
        let (dir, db) = new_wc();
        drop(db);
        let db = WcDb::open(&dir.path().join("some/sub/dir"), OpenMode::ReadOnly).unwrap();
        assert_eq!(db.root(), std::path::absolute(dir.path()).unwrap());
        let info = db.get_base_info(db.root()).unwrap();
        assert_eq!(info.status, Status::Normal);
        assert_eq!(info.repos.relpath, "trunk");
    }

    #[test]
    fn test_init_twice_fails() {
        let (dir, _db) = new_wc();
        let again = WcDb::init(
            dir.path(),
            &ReposLocation::new("", "http://x", "u"),
            0,
            Depth::Infinity,
            WcConfig::default(),
        );
        assert!(matches!(again, Err(WcError::InvalidArgument(_))));
    }

    #[test]
    fn test_open_outside_working_copy() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            WcDb::open(dir.path(), OpenMode::ReadOnly),
            Err(WcError::NotWorkingCopy(_))
        ));
    }

    #[test]
    fn test_relpath_conversion() {
        let (_dir, db) = new_wc();
        let abspath = db.root().join("a").join("b.txt");
        assert_eq!(db.to_relpath(&abspath).unwrap(), "a/b.txt");
        assert_eq!(db.to_relpath(db.root()).unwrap(), "");
        assert_eq!(db.from_relpath("a/b.txt"), abspath);
        assert!(db.to_relpath(Path::new("relative")).is_err());
        assert!(db.to_relpath(Path::new("/elsewhere/x")).is_err());
        assert!(db.to_relpath(&db.root().join(".svn/wc.db")).is_err());
    }

    #[test]
    fn test_repository_uuid_mismatch() {
        let (_dir, db) = new_wc();
        let id = db.ensure_repository("http://svn.example.com/repo", "uuid-1").unwrap();
        assert_eq!(db.ensure_repository("http://svn.example.com/repo", "uuid-1").unwrap(), id);
        assert!(db.ensure_repository("http://svn.example.com/repo", "other").is_err());
    }

    #[test]
    fn test_descendants_pattern_escapes() {
        assert_eq!(descendants_pattern(""), "%");
        assert_eq!(descendants_pattern("a_b"), "a#_b/%");
    }
}
