//! svnwc core library
//!
//! Working-copy metadata for a Subversion-compatible client:
//! - Skel codec for properties, conflicts and work items
//! - Working-copy relative path addressing
//! - The WC-DB node store (BASE, WORKING and ACTUAL trees in SQLite)
//! - Content-addressed pristine text store
//! - Work queue and its runner
//! - Path-based access configuration

pub mod authz;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod properties;
pub mod relpath;
pub mod skel;
pub mod wc_db;
pub mod workqueue;

pub use authz::{AccessLevel, AuthzProvider, AuthzResult, PathBasedAccess};
pub use cancel::CancellationToken;
pub use checksum::{Checksum, ChecksumKind};
pub use config::{ExecutorConfig, WcConfig};
pub use conflict::Conflict;
pub use error::{Result, WcError};
pub use executor::{InlineExecutor, PoolExecutor, TaskExecutor, executor_from_config};
pub use properties::PropertySet;
pub use skel::Skel;
pub use wc_db::{
    AdditionInfo, BaseContent, BaseInfo, ChangedInfo, CommitArgs, CopyOrigin, DeletionInfo, Depth, Kind,
    LockInfo, NewBaseNode, NodeInfo, OpenMode, Presence, PristineCheck, ReposLocation, Status, TempText, WcDb,
};
pub use workqueue::{WorkItem, run_work_queue};
