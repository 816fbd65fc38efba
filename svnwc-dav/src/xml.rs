//! Report request bodies
//!
//! The XML a client sends in a REPORT request to start an update or a
//! replay. Text and attribute values are escaped by the writer.

use crate::{DavError, Result};
use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::writer::Writer;
use std::io::Cursor;

/// Subversion XML namespace
pub const SVN_NS: &str = "svn:";

/// One line of the working copy's state report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEntry {
    /// `path` is at `revision`; `start_empty` means none of its children are.
    Path { path: String, revision: i64, lock_token: Option<String>, start_empty: bool },
    /// `path` is missing from the working copy.
    Missing { path: String },
    /// `path` is switched to `linkpath`, a path below the repository root.
    Link { path: String, linkpath: String, revision: i64, lock_token: Option<String>, start_empty: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub src_url: String,
    pub target_revision: Option<i64>,
    pub update_target: Option<String>,
    pub dst_path: Option<String>,
    pub recurse: bool,
    pub ignore_ancestry: bool,
    pub resource_walk: bool,
    pub fetch_contents: bool,
    pub send_all: bool,
    pub entries: Vec<ReportEntry>,
}

impl UpdateRequest {
    pub fn new(src_url: impl Into<String>) -> Self {
        Self {
            src_url: src_url.into(),
            target_revision: None,
            update_target: None,
            dst_path: None,
            recurse: true,
            ignore_ancestry: false,
            resource_walk: false,
            fetch_contents: true,
            send_all: true,
            entries: Vec::new(),
        }
    }
}

fn xml_err(e: std::io::Error) -> DavError {
    DavError::Xml(e.to_string())
}

fn text_element<W: std::io::Write>(w: &mut Writer<W>, name: &str, text: &str) -> std::io::Result<()> {
    w.create_element(name).write_text_content(BytesText::new(text))?;
    Ok(())
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> Result<String> {
    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| DavError::Xml(e.to_string()))
}

fn write_entry<W: std::io::Write>(w: &mut Writer<W>, entry: &ReportEntry) -> std::io::Result<()> {
    let (path, linkpath, revision, lock_token, start_empty) = match entry {
        ReportEntry::Missing { path } => return text_element(w, "S:missing", path),
        ReportEntry::Path { path, revision, lock_token, start_empty } => {
            (path, None, revision, lock_token, start_empty)
        }
        ReportEntry::Link { path, linkpath, revision, lock_token, start_empty } => {
            (path, Some(linkpath), revision, lock_token, start_empty)
        }
    };
    let rev = revision.to_string();
    let mut element = w.create_element("S:entry").with_attribute(("rev", rev.as_str()));
    if let Some(token) = lock_token {
        element = element.with_attribute(("lock-token", token.as_str()));
    }
    if *start_empty {
        element = element.with_attribute(("start-empty", "true"));
    }
    if let Some(linkpath) = linkpath {
        element = element.with_attribute(("linkpath", linkpath.as_str()));
    }
    element.write_text_content(BytesText::new(path))?;
    Ok(())
}

/// Body of an `update-report` REPORT request.
pub fn update_report_request(request: &UpdateRequest) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_err)?;
    let mut report = writer.create_element("S:update-report");
    if request.send_all {
        report = report.with_attribute(("send-all", "true"));
    }
    report
        .with_attribute(("xmlns:S", SVN_NS))
        .write_inner_content(|w| {
            text_element(w, "S:src-path", &request.src_url)?;
            if let Some(rev) = request.target_revision.filter(|r| *r >= 0) {
                text_element(w, "S:target-revision", &rev.to_string())?;
            }
            if let Some(target) = &request.update_target {
                text_element(w, "S:update-target", target)?;
            }
            if let Some(dst) = &request.dst_path {
                text_element(w, "S:dst-path", dst)?;
            }
            if !request.recurse {
                text_element(w, "S:recursive", "no")?;
            }
            if request.ignore_ancestry {
                text_element(w, "S:ignore-ancestry", "yes")?;
            }
            if request.resource_walk {
                text_element(w, "S:resource-walk", "yes")?;
            }
            if !request.fetch_contents {
                text_element(w, "S:text-deltas", "no")?;
            }
            for entry in &request.entries {
                write_entry(w, entry)?;
            }
            Ok(())
        })
        .map_err(xml_err)?;
    finish(writer)
}

/// Body of a `replay-report` REPORT request for revision `high`, sending
/// nothing at or below `low` that the client already has.
pub fn replay_report_request(high: i64, low: i64, send_deltas: bool) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_err)?;
    writer
        .create_element("S:replay-report")
        .with_attribute(("xmlns:S", SVN_NS))
        .write_inner_content(|w| {
            text_element(w, "S:revision", &high.to_string())?;
            text_element(w, "S:low-water-mark", &low.to_string())?;
            text_element(w, "S:send-deltas", if send_deltas { "1" } else { "0" })?;
            Ok(())
        })
        .map_err(xml_err)?;
    finish(writer)
}
