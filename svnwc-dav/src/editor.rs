//! Tree editor target
//!
//! The replay state machine turns report XML into calls on an [`Editor`].
//! Paths are relative to the edit anchor; the anchor itself is `""`.
//! Revisions use `-1` for "unspecified".

use crate::Result;

pub trait Editor {
    fn target_revision(&mut self, revision: i64) -> Result<()>;

    fn open_root(&mut self, revision: i64) -> Result<()>;

    fn open_dir(&mut self, path: &str, revision: i64) -> Result<()>;

    fn add_dir(&mut self, path: &str, copyfrom_path: Option<&str>, copyfrom_rev: i64) -> Result<()>;

    fn open_file(&mut self, path: &str, revision: i64) -> Result<()>;

    fn add_file(&mut self, path: &str, copyfrom_path: Option<&str>, copyfrom_rev: i64) -> Result<()>;

    /// `None` deletes the property.
    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()>;

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()>;

    /// Start a text delta against the file's current text. `base_checksum`
    /// is the MD5 hex digest that text is expected to have.
    fn apply_text_delta(&mut self, path: &str, base_checksum: Option<&str>) -> Result<()>;

    /// Next slice of svndiff data for the delta started by `apply_text_delta`.
    fn text_delta_chunk(&mut self, path: &str, data: &[u8]) -> Result<()>;

    fn text_delta_end(&mut self, path: &str) -> Result<()>;

    /// `checksum` is the MD5 hex digest of the resulting text, when known.
    fn close_file(&mut self, path: &str, checksum: Option<&str>) -> Result<()>;

    fn close_dir(&mut self) -> Result<()>;

    fn delete_entry(&mut self, path: &str, revision: i64) -> Result<()>;

    fn absent_dir(&mut self, path: &str) -> Result<()>;

    fn absent_file(&mut self, path: &str) -> Result<()>;

    fn close_edit(&mut self) -> Result<()>;

    fn abort_edit(&mut self) -> Result<()>;
}

/// One recorded editor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorCall {
    TargetRevision(i64),
    OpenRoot(i64),
    OpenDir { path: String, revision: i64 },
    AddDir { path: String, copyfrom_path: Option<String>, copyfrom_rev: i64 },
    OpenFile { path: String, revision: i64 },
    AddFile { path: String, copyfrom_path: Option<String>, copyfrom_rev: i64 },
    ChangeDirProp { path: String, name: String, value: Option<String> },
    ChangeFileProp { path: String, name: String, value: Option<String> },
    ApplyTextDelta { path: String, base_checksum: Option<String> },
    TextDeltaChunk { path: String, data: Vec<u8> },
    TextDeltaEnd { path: String },
    CloseFile { path: String, checksum: Option<String> },
    CloseDir,
    DeleteEntry { path: String, revision: i64 },
    AbsentDir(String),
    AbsentFile(String),
    CloseEdit,
    AbortEdit,
}

/// Editor that only remembers what it was told.
#[derive(Debug, Default)]
pub struct RecordingEditor {
    pub calls: Vec<EditorCall>,
}

impl RecordingEditor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, call: EditorCall) -> Result<()> {
        self.calls.push(call);
        Ok(())
    }
}

fn owned(s: Option<&str>) -> Option<String> {
    s.map(str::to_string)
}

impl Editor for RecordingEditor {
    fn target_revision(&mut self, revision: i64) -> Result<()> {
        self.push(EditorCall::TargetRevision(revision))
    }

    fn open_root(&mut self, revision: i64) -> Result<()> {
        self.push(EditorCall::OpenRoot(revision))
    }

    fn open_dir(&mut self, path: &str, revision: i64) -> Result<()> {
        self.push(EditorCall::OpenDir { path: path.into(), revision })
    }

    fn add_dir(&mut self, path: &str, copyfrom_path: Option<&str>, copyfrom_rev: i64) -> Result<()> {
        self.push(EditorCall::AddDir { path: path.into(), copyfrom_path: owned(copyfrom_path), copyfrom_rev })
    }

    fn open_file(&mut self, path: &str, revision: i64) -> Result<()> {
        self.push(EditorCall::OpenFile { path: path.into(), revision })
    }

    fn add_file(&mut self, path: &str, copyfrom_path: Option<&str>, copyfrom_rev: i64) -> Result<()> {
        self.push(EditorCall::AddFile { path: path.into(), copyfrom_path: owned(copyfrom_path), copyfrom_rev })
    }

    fn change_dir_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        self.push(EditorCall::ChangeDirProp { path: path.into(), name: name.into(), value: owned(value) })
    }

    fn change_file_prop(&mut self, path: &str, name: &str, value: Option<&str>) -> Result<()> {
        self.push(EditorCall::ChangeFileProp { path: path.into(), name: name.into(), value: owned(value) })
    }

    fn apply_text_delta(&mut self, path: &str, base_checksum: Option<&str>) -> Result<()> {
        self.push(EditorCall::ApplyTextDelta { path: path.into(), base_checksum: owned(base_checksum) })
    }

    fn text_delta_chunk(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.push(EditorCall::TextDeltaChunk { path: path.into(), data: data.to_vec() })
    }

    fn text_delta_end(&mut self, path: &str) -> Result<()> {
        self.push(EditorCall::TextDeltaEnd { path: path.into() })
    }

    fn close_file(&mut self, path: &str, checksum: Option<&str>) -> Result<()> {
        self.push(EditorCall::CloseFile { path: path.into(), checksum: owned(checksum) })
    }

    fn close_dir(&mut self) -> Result<()> {
        self.push(EditorCall::CloseDir)
    }

    fn delete_entry(&mut self, path: &str, revision: i64) -> Result<()> {
        self.push(EditorCall::DeleteEntry { path: path.into(), revision })
    }

    fn absent_dir(&mut self, path: &str) -> Result<()> {
        self.push(EditorCall::AbsentDir(path.into()))
    }

    fn absent_file(&mut self, path: &str) -> Result<()> {
        self.push(EditorCall::AbsentFile(path.into()))
    }

    fn close_edit(&mut self) -> Result<()> {
        self.push(EditorCall::CloseEdit)
    }

    fn abort_edit(&mut self) -> Result<()> {
        self.push(EditorCall::AbortEdit)
    }
}
