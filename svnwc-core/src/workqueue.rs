//! Work items and the queue runner
//!
//! Filesystem changes that cannot share the database transaction are queued
//! as work items in the same transaction and carried out afterwards. Every
//! item is safe to run again, so a crash between running an item and
//! marking it complete only repeats it.

use crate::cancel::CancellationToken;
use crate::error::{Result, WcError};
use crate::skel::Skel;
use crate::wc_db::{Kind, WcDb};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Copy the node's pristine text to its working path.
    FileInstall { relpath: String, use_commit_times: bool, record_fileinfo: bool },
    FileRemove { relpath: String },
    DirRemove { relpath: String, recursive: bool },
    /// Record the working file's size and timestamp, optionally stamping
    /// `mtime` (microseconds since the epoch) on it first.
    RecordFileinfo { relpath: String, mtime: Option<i64> },
    PristineCleanup,
}

fn relpath_arg(skel: &Skel, op: &str) -> Result<String> {
    skel.child(1)
        .and_then(Skel::as_str)
        .map(str::to_string)
        .ok_or_else(|| WcError::malformed(format!("work item '{}' lacks a path", op)))
}

fn flag_arg(skel: &Skel, index: usize) -> Result<bool> {
    match skel.child(index) {
        None => Ok(false),
        Some(atom) => match atom.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(WcError::malformed(format!("bad work item flag {:?}", atom))),
        },
    }
}

fn flag(value: bool) -> Skel {
    Skel::int_atom(value as i64)
}

fn micros_to_system_time(micros: i64) -> SystemTime {
    if micros >= 0 {
        UNIX_EPOCH + Duration::from_micros(micros as u64)
    } else {
        UNIX_EPOCH - Duration::from_micros(micros.unsigned_abs())
    }
}

fn system_time_to_micros(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros() as i64,
        Err(e) => -(e.duration().as_micros() as i64),
    }
}

impl WorkItem {
    pub fn from_skel(skel: &Skel) -> Result<WorkItem> {
        let op = skel
            .child(0)
            .and_then(Skel::as_str)
            .ok_or_else(|| WcError::malformed(format!("work item {:?} has no operation", skel)))?;
        match op {
            "file-install" => Ok(WorkItem::FileInstall {
                relpath: relpath_arg(skel, op)?,
                use_commit_times: flag_arg(skel, 2)?,
                record_fileinfo: flag_arg(skel, 3)?,
            }),
            "file-remove" => Ok(WorkItem::FileRemove { relpath: relpath_arg(skel, op)? }),
            "dir-remove" => Ok(WorkItem::DirRemove {
                relpath: relpath_arg(skel, op)?,
                recursive: flag_arg(skel, 2)?,
            }),
            "record-fileinfo" => {
                let mtime = match skel.child(2) {
                    None => None,
                    Some(atom) => Some(
                        atom.as_i64()
                            .ok_or_else(|| WcError::malformed(format!("bad timestamp {:?}", atom)))?,
                    ),
                };
                Ok(WorkItem::RecordFileinfo { relpath: relpath_arg(skel, op)?, mtime })
            }
            "pristine-cleanup" => Ok(WorkItem::PristineCleanup),
            other => Err(WcError::malformed(format!("unknown work item '{}'", other))),
        }
    }

    pub fn to_skel(&self) -> Skel {
        let parts = match self {
            WorkItem::FileInstall { relpath, use_commit_times, record_fileinfo } => vec![
                Skel::str_atom("file-install"),
                Skel::str_atom(relpath),
                flag(*use_commit_times),
                flag(*record_fileinfo),
            ],
            WorkItem::FileRemove { relpath } => vec![Skel::str_atom("file-remove"), Skel::str_atom(relpath)],
            WorkItem::DirRemove { relpath, recursive } => {
                vec![Skel::str_atom("dir-remove"), Skel::str_atom(relpath), flag(*recursive)]
            }
            WorkItem::RecordFileinfo { relpath, mtime } => {
                let mut parts = vec![Skel::str_atom("record-fileinfo"), Skel::str_atom(relpath)];
                if let Some(mtime) = mtime {
                    parts.push(Skel::int_atom(*mtime));
                }
                parts
            }
            WorkItem::PristineCleanup => vec![Skel::str_atom("pristine-cleanup")],
        };
        Skel::List(parts)
    }

    pub fn run(&self, db: &WcDb) -> Result<()> {
        match self {
            WorkItem::FileInstall { relpath, use_commit_times, record_fileinfo } => {
                install_file(db, relpath, *use_commit_times, *record_fileinfo)
            }
            WorkItem::FileRemove { relpath } => match fs::remove_file(db.from_relpath(relpath)) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            },
            WorkItem::DirRemove { relpath, recursive } => {
                let path = db.from_relpath(relpath);
                let removed = if *recursive { fs::remove_dir_all(&path) } else { fs::remove_dir(&path) };
                match removed {
                    Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                    _ => Ok(()),
                }
            }
            WorkItem::RecordFileinfo { relpath, mtime } => {
                let path = db.from_relpath(relpath);
                if let Some(mtime) = mtime {
                    File::options().write(true).open(&path)?.set_modified(micros_to_system_time(*mtime))?;
                }
                record_fileinfo(db, &path)
            }
            WorkItem::PristineCleanup => db.cleanup_pristines().map(|_| ()),
        }
    }
}

fn record_fileinfo(db: &WcDb, path: &Path) -> Result<()> {
    let meta = fs::metadata(path)?;
    db.global_record_fileinfo(path, meta.len() as i64, system_time_to_micros(meta.modified()?))
}

fn install_file(db: &WcDb, relpath: &str, use_commit_times: bool, record: bool) -> Result<()> {
    let path = db.from_relpath(relpath);
    let info = db.read_info(&path)?;
    if info.kind != Kind::File {
        return Err(WcError::UnexpectedStatus(format!("'{}' is a {}, not a file", relpath, info.kind)));
    }
    let checksum = info
        .checksum
        .ok_or_else(|| WcError::corrupt(format!("file '{}' has no pristine checksum", relpath)))?;
    let text = db.read_pristine(&checksum)?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = db.get_pristine_temp_dir().join(format!("{}.install", uuid::Uuid::new_v4()));
    let mut file = File::create(&tmp)?;
    file.write_all(&text)?;
    if use_commit_times {
        if let Some(date) = info.changed.date {
            file.set_modified(micros_to_system_time(date))?;
        }
    }
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &path)?;
    debug!("Installed working file '{}' ({} bytes)", relpath, text.len());
    if record {
        record_fileinfo(db, &path)?;
    }
    Ok(())
}

/// Run queued items in FIFO order until the queue is empty, returning how
/// many ran. Cancellation is honoured between items.
pub fn run_work_queue(db: &WcDb, cancel: &CancellationToken) -> Result<usize> {
    let mut completed = 0;
    loop {
        cancel.check()?;
        let Some((id, skel)) = db.fetch_work_queue()? else {
            break;
        };
        let item = WorkItem::from_skel(&skel)?;
        debug!("Running work item {}: {:?}", id, skel);
        item.run(db)?;
        db.completed_work_queue(id)?;
        completed += 1;
    }
    if completed > 0 {
        info!("Ran {} work items in {}", completed, db.root().display());
    }
    Ok(completed)
}
