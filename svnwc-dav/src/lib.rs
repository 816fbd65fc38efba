//! svnwc DAV client plumbing
//!
//! Consumes the XML editor streams a Subversion DAV server sends in answer
//! to update and replay reports, and drives a tree editor with them:
//! - Editor target trait and a recording implementation
//! - Streaming editor replay state machine for both report dialects
//! - svndiff window decoding
//! - A working-copy editor that records the edit in the WC-DB
//! - Report request bodies and `!svn/...` resource URI classification

pub mod editor;
pub mod editor_handler;
pub mod fetch;
pub mod resource;
pub mod svndiff;
pub mod wc_editor;
pub mod xml;

pub use editor::{Editor, EditorCall, RecordingEditor};
pub use editor_handler::{Dialect, EditorHandler};
pub use fetch::PropertyFetcher;
pub use resource::{PrepareContext, PreparedResource, ResourceFactories, ResourceKind, ResourceUri};
pub use wc_editor::WcUpdateEditor;
pub use xml::{ReportEntry, UpdateRequest, replay_report_request, update_report_request};

use svnwc_core::WcError;

pub type Result<T> = std::result::Result<T, DavError>;

/// DAV layer errors
#[derive(Debug, thiserror::Error)]
pub enum DavError {
    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Illegal URL '{0}'")]
    IllegalUrl(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Wc(#[from] WcError),
}

impl DavError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        DavError::MalformedData(msg.into())
    }
}

impl From<quick_xml::Error> for DavError {
    fn from(e: quick_xml::Error) -> Self {
        DavError::Xml(e.to_string())
    }
}

/// How a report response is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Forward text deltas to the editor. Without it `txdelta` payloads are
    /// skipped and only `apply_text_delta`/`text_delta_end` are emitted.
    pub fetch_contents: bool,
    /// Whether property values and texts are expected inline. An
    /// `update-report` element's own `send-all` attribute overrides this.
    pub send_all: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { fetch_contents: true, send_all: true }
    }
}
