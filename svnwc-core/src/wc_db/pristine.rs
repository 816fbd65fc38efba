//! Content-addressed pristine text store
//!
//! Texts live at `.svn/pristine/<xx>/<sha1>.svn-base`, where `xx` is the
//! first byte of the SHA-1 in hex. New texts are written under `.svn/tmp`
//! and renamed into place, so readers never see a partial file.

use super::WcDb;
use crate::checksum::{Checksum, ChecksumKind, digest_reader};
use crate::error::{Result, WcError};
use crate::executor::{Job, TaskExecutor};
use rusqlite::{Connection, OptionalExtension, params};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How thoroughly [`WcDb::check_pristine`] looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PristineCheck {
    /// Recorded and present on disk.
    Usable,
    /// Recorded in the database.
    Single,
    /// Recorded in the database; kept for callers sharing one store
    /// across working copies.
    Multi,
    /// Present on disk with contents matching the checksum.
    Validate,
}

/// A text written to the temp area, ready for [`WcDb::install_pristine`].
#[derive(Debug, Clone)]
pub struct TempText {
    pub path: PathBuf,
    pub sha1: Checksum,
    pub md5: Checksum,
    pub size: u64,
}

fn require_sha1(checksum: &Checksum) -> Result<()> {
    if checksum.is_sha1() {
        Ok(())
    } else {
        Err(WcError::InvalidArgument(format!("pristine texts are keyed by SHA-1, not {}", checksum)))
    }
}

fn recorded(conn: &Connection, sha1: &Checksum) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM PRISTINE WHERE checksum = ?1", [sha1.to_string()], |_| Ok(()))
        .optional()?
        .is_some())
}

fn referenced(conn: &Connection, sha1: &Checksum) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM BASE_NODE WHERE checksum = ?1)
             OR EXISTS (SELECT 1 FROM WORKING_NODE WHERE checksum = ?1)",
        [sha1.to_string()],
        |row| row.get(0),
    )?)
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

impl WcDb {
    fn pristine_file(&self, sha1: &Checksum) -> PathBuf {
        let hex = sha1.to_hex();
        self.admin_dir().join("pristine").join(&hex[..2]).join(format!("{}.svn-base", hex))
    }

    /// Where callers write texts before installing them.
    pub fn get_pristine_temp_dir(&self) -> PathBuf {
        self.admin_dir().join("tmp")
    }

    /// Write `data` to a fresh temp file and checksum it.
    pub fn write_temp(&self, data: &[u8]) -> Result<TempText> {
        let dir = self.get_pristine_temp_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.tmp", uuid::Uuid::new_v4()));
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(TempText {
            path,
            sha1: Checksum::sha1_of(data),
            md5: Checksum::md5_of(data),
            size: data.len() as u64,
        })
    }

    /// Move a temp file into the store. Installing a text that is already
    /// present discards the temp file and succeeds.
    pub fn install_pristine(&self, temp_path: &Path, sha1: &Checksum, md5: &Checksum) -> Result<()> {
        require_sha1(sha1)?;
        if md5.kind != ChecksumKind::Md5 {
            return Err(WcError::InvalidArgument(format!("'{}' is not an MD5 checksum", md5)));
        }
        let target = self.pristine_file(sha1);
        let conn = self.conn()?;
        if recorded(&conn, sha1)? && target.is_file() {
            remove_file_if_exists(temp_path)?;
            debug!("Pristine {} already installed", sha1);
            return Ok(());
        }
        let size = fs::metadata(temp_path)?.len() as i64;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::rename(temp_path, &target)?;
        conn.execute(
            "INSERT OR REPLACE INTO PRISTINE (checksum, size, md5_checksum) VALUES (?1, ?2, ?3)",
            params![sha1.to_string(), size, md5.to_string()],
        )?;
        debug!("Installed pristine {} ({} bytes)", sha1, size);
        Ok(())
    }

    /// Path of an installed text. Accepts an MD5 and maps it to its SHA-1.
    pub fn get_pristine_path(&self, checksum: &Checksum) -> Result<PathBuf> {
        let sha1 = match checksum.kind {
            ChecksumKind::Sha1 => checksum.clone(),
            ChecksumKind::Md5 => self.get_pristine_sha1(checksum)?,
        };
        let conn = self.conn()?;
        if !recorded(&conn, &sha1)? {
            return Err(WcError::NotFound(sha1.to_string()));
        }
        Ok(self.pristine_file(&sha1))
    }

    pub fn read_pristine(&self, checksum: &Checksum) -> Result<Vec<u8>> {
        let path = self.get_pristine_path(checksum)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => WcError::NotFound(checksum.to_string()),
            _ => e.into(),
        })
    }

    pub fn check_pristine(&self, sha1: &Checksum, mode: PristineCheck) -> Result<bool> {
        require_sha1(sha1)?;
        let conn = self.conn()?;
        if !recorded(&conn, sha1)? {
            return Ok(false);
        }
        drop(conn);
        let path = self.pristine_file(sha1);
        Ok(match mode {
            PristineCheck::Single | PristineCheck::Multi => true,
            PristineCheck::Usable => path.is_file(),
            PristineCheck::Validate => match File::open(&path) {
                Ok(file) => digest_reader(file)?.0 == *sha1,
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            },
        })
    }

    /// Remove a text unless a BASE or WORKING node still refers to it.
    pub fn remove_pristine(&self, sha1: &Checksum) -> Result<()> {
        require_sha1(sha1)?;
        let conn = self.conn()?;
        if referenced(&conn, sha1)? {
            debug!("Pristine {} still referenced, keeping it", sha1);
            return Ok(());
        }
        conn.execute("DELETE FROM PRISTINE WHERE checksum = ?1", [sha1.to_string()])?;
        remove_file_if_exists(&self.pristine_file(sha1))?;
        Ok(())
    }

    fn all_pristines(&self) -> Result<Vec<Checksum>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT checksum FROM PRISTINE ORDER BY checksum")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut checksums = Vec::new();
        for checksum in rows {
            checksums.push(Checksum::parse(&checksum?)?);
        }
        Ok(checksums)
    }

    /// Remove every unreferenced text, returning how many went.
    pub fn cleanup_pristines(&self) -> Result<usize> {
        let mut removed = 0;
        for sha1 in self.all_pristines()? {
            let conn = self.conn()?;
            let in_use = referenced(&conn, &sha1)?;
            drop(conn);
            if !in_use {
                self.remove_pristine(&sha1)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} unreferenced pristine texts", removed);
        }
        Ok(removed)
    }

    /// Re-hash every installed text on `executor`, returning the checksums
    /// whose file is missing or no longer matches.
    pub fn validate_all(&self, executor: &dyn TaskExecutor) -> Result<Vec<Checksum>> {
        let checksums = self.all_pristines()?;
        let jobs: Vec<Job> = checksums
            .iter()
            .map(|sha1| {
                let sha1 = sha1.clone();
                let path = self.pristine_file(&sha1);
                Box::new(move || {
                    let (actual, _, _) = digest_reader(File::open(&path)?)?;
                    if actual == sha1 {
                        Ok(())
                    } else {
                        Err(WcError::corrupt(format!("pristine {} hashes to {}", sha1, actual)))
                    }
                }) as Job
            })
            .collect();
        let results = executor.execute_batch(jobs);
        let mut corrupt = Vec::new();
        for (sha1, result) in checksums.into_iter().zip(results) {
            if let Err(e) = result {
                warn!("Pristine {} failed validation: {}", sha1, e);
                corrupt.push(sha1);
            }
        }
        Ok(corrupt)
    }

    pub fn get_pristine_md5(&self, sha1: &Checksum) -> Result<Checksum> {
        require_sha1(sha1)?;
        let conn = self.conn()?;
        let md5: Option<String> = conn
            .query_row("SELECT md5_checksum FROM PRISTINE WHERE checksum = ?1", [sha1.to_string()], |row| {
                row.get(0)
            })
            .optional()?;
        Checksum::parse(&md5.ok_or_else(|| WcError::NotFound(sha1.to_string()))?)
    }

    pub fn get_pristine_sha1(&self, md5: &Checksum) -> Result<Checksum> {
        let conn = self.conn()?;
        let sha1: Option<String> = conn
            .query_row("SELECT checksum FROM PRISTINE WHERE md5_checksum = ?1", [md5.to_string()], |row| {
                row.get(0)
            })
            .optional()?;
        Checksum::parse(&sha1.ok_or_else(|| WcError::NotFound(md5.to_string()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_wc;
    use super::*;
    use crate::executor::InlineExecutor;

    #[test]
    fn test_install_is_idempotent() {
        let (_dir, db) = new_wc();
        let first = db.write_temp(b"hello\n").unwrap();
        db.install_pristine(&first.path, &first.sha1, &first.md5).unwrap();
        let second = db.write_temp(b"hello\n").unwrap();
        db.install_pristine(&second.path, &second.sha1, &second.md5).unwrap();
        assert!(!second.path.exists());

        let bucket = db.get_pristine_path(&first.sha1).unwrap();
        assert_eq!(fs::read_dir(bucket.parent().unwrap()).unwrap().count(), 1);
        assert_eq!(db.read_pristine(&first.sha1).unwrap(), b"hello\n");
        assert_eq!(db.read_pristine(&first.md5).unwrap(), b"hello\n");
        assert_eq!(db.get_pristine_md5(&first.sha1).unwrap(), first.md5);
    }

    #[test]
    fn test_missing_text_is_not_found() {
        let (_dir, db) = new_wc();
        let sha1 = Checksum::sha1_of(b"nothing");
        assert!(matches!(db.read_pristine(&sha1), Err(WcError::NotFound(_))));
        assert!(matches!(db.get_pristine_md5(&sha1), Err(WcError::NotFound(_))));
        assert!(!db.check_pristine(&sha1, PristineCheck::Single).unwrap());
    }

    #[test]
    fn test_validate_detects_corruption() {
        let (_dir, db) = new_wc();
        let text = db.write_temp(b"original").unwrap();
        db.install_pristine(&text.path, &text.sha1, &text.md5).unwrap();
        assert!(db.check_pristine(&text.sha1, PristineCheck::Validate).unwrap());

        fs::write(db.get_pristine_path(&text.sha1).unwrap(), b"tampered").unwrap();
        assert!(db.check_pristine(&text.sha1, PristineCheck::Usable).unwrap());
        assert!(!db.check_pristine(&text.sha1, PristineCheck::Validate).unwrap());
        assert_eq!(db.validate_all(&InlineExecutor).unwrap(), vec![text.sha1]);
    }

    #[test]
    fn test_referenced_text_survives_cleanup() {
        let (_dir, db) = new_wc();
        let kept = db.write_temp(b"kept").unwrap();
        let dropped = db.write_temp(b"dropped").unwrap();
        db.install_pristine(&kept.path, &kept.sha1, &kept.md5).unwrap();
        db.install_pristine(&dropped.path, &dropped.sha1, &dropped.md5).unwrap();
        let root = db.root().to_path_buf();
        db.add_base_file(
            &root.join("kept.txt"),
            &super::super::NewBaseNode::new(
                super::super::ReposLocation::new("trunk/kept.txt", "http://svn.example.com/repo", "uuid-1"),
                1,
            ),
            kept.sha1.clone(),
            None,
        )
        .unwrap();

        db.remove_pristine(&kept.sha1).unwrap();
        assert!(db.check_pristine(&kept.sha1, PristineCheck::Usable).unwrap());
        assert_eq!(db.cleanup_pristines().unwrap(), 1);
        assert!(!db.check_pristine(&dropped.sha1, PristineCheck::Single).unwrap());
    }
}
