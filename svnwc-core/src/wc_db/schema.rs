//! wc.db schema and format checks

use crate::error::{Result, WcError};
use rusqlite::Connection;

/// The only working-copy format this crate reads and writes.
pub const WC_FORMAT: i64 = 17;

pub const DB_FILE: &str = "wc.db";

pub const TABLES: &[&str] = &[
    "REPOSITORY",
    "WCROOT",
    "PRISTINE",
    "BASE_NODE",
    "WORKING_NODE",
    "ACTUAL_NODE",
    "LOCK",
    "WORK_QUEUE",
    "WC_LOCK",
];

const CREATE_SCHEMA: &str = "
CREATE TABLE REPOSITORY (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root TEXT UNIQUE NOT NULL,
    uuid TEXT NOT NULL
);
CREATE INDEX I_UUID ON REPOSITORY (uuid);

CREATE TABLE WCROOT (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    local_abspath TEXT UNIQUE
);

CREATE TABLE PRISTINE (
    checksum TEXT NOT NULL PRIMARY KEY,
    size INTEGER NOT NULL,
    md5_checksum TEXT NOT NULL
);
CREATE INDEX I_PRISTINE_MD5 ON PRISTINE (md5_checksum);

CREATE TABLE BASE_NODE (
    wc_id INTEGER NOT NULL REFERENCES WCROOT (id),
    local_relpath TEXT NOT NULL,
    repos_id INTEGER REFERENCES REPOSITORY (id),
    repos_relpath TEXT,
    parent_relpath TEXT,
    presence TEXT NOT NULL,
    kind TEXT NOT NULL,
    revnum INTEGER,
    checksum TEXT,
    translated_size INTEGER,
    changed_rev INTEGER,
    changed_date INTEGER,
    changed_author TEXT,
    depth TEXT,
    symlink_target TEXT,
    last_mod_time INTEGER,
    properties BLOB,
    dav_cache BLOB,
    file_external TEXT,
    PRIMARY KEY (wc_id, local_relpath)
);
CREATE INDEX I_PARENT ON BASE_NODE (wc_id, parent_relpath);

CREATE TABLE WORKING_NODE (
    wc_id INTEGER NOT NULL REFERENCES WCROOT (id),
    local_relpath TEXT NOT NULL,
    parent_relpath TEXT,
    presence TEXT NOT NULL,
    kind TEXT NOT NULL,
    checksum TEXT,
    translated_size INTEGER,
    changed_rev INTEGER,
    changed_date INTEGER,
    changed_author TEXT,
    depth TEXT,
    symlink_target TEXT,
    copyfrom_repos_id INTEGER REFERENCES REPOSITORY (id),
    copyfrom_repos_path TEXT,
    copyfrom_revnum INTEGER,
    moved_here INTEGER,
    moved_to TEXT,
    last_mod_time INTEGER,
    properties BLOB,
    keep_local INTEGER,
    PRIMARY KEY (wc_id, local_relpath)
);
CREATE INDEX I_WORKING_PARENT ON WORKING_NODE (wc_id, parent_relpath);

CREATE TABLE ACTUAL_NODE (
    wc_id INTEGER NOT NULL REFERENCES WCROOT (id),
    local_relpath TEXT NOT NULL,
    parent_relpath TEXT,
    properties BLOB,
    changelist TEXT,
    text_mod INTEGER,
    conflict_data BLOB,
    PRIMARY KEY (wc_id, local_relpath)
);
CREATE INDEX I_ACTUAL_PARENT ON ACTUAL_NODE (wc_id, parent_relpath);
CREATE INDEX I_ACTUAL_CHANGELIST ON ACTUAL_NODE (changelist);

CREATE TABLE LOCK (
    repos_id INTEGER NOT NULL REFERENCES REPOSITORY (id),
    repos_relpath TEXT NOT NULL,
    lock_token TEXT NOT NULL,
    lock_owner TEXT,
    lock_comment TEXT,
    lock_date INTEGER,
    PRIMARY KEY (repos_id, repos_relpath)
);

CREATE TABLE WORK_QUEUE (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work BLOB NOT NULL
);

CREATE TABLE WC_LOCK (
    wc_id INTEGER NOT NULL REFERENCES WCROOT (id),
    local_dir_relpath TEXT NOT NULL,
    locked_levels INTEGER NOT NULL DEFAULT -1,
    PRIMARY KEY (wc_id, local_dir_relpath)
);
";

/// Create every table and stamp the format.
pub fn create(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA)?;
    conn.pragma_update(None, "user_version", WC_FORMAT)?;
    Ok(())
}

pub fn format_of(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Fail unless the database is a complete format-17 store.
pub fn verify(conn: &Connection) -> Result<()> {
    let found = format_of(conn)?;
    if found == 0 {
        return Err(WcError::corrupt("wc.db carries no format stamp"));
    }
    if found < WC_FORMAT {
        return Err(WcError::SchemaTooOld { found, required: WC_FORMAT });
    }
    if found > WC_FORMAT {
        return Err(WcError::SchemaTooNew { found, supported: WC_FORMAT });
    }
    for table in TABLES {
        let present: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        if present == 0 {
            return Err(WcError::corrupt(format!("missing table {}", table)));
        }
    }
    Ok(())
}
