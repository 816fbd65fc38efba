//! Editor replay state machine
//!
//! Consumes the element stream of an `update-report` or `editor-report`
//! response and drives an [`Editor`]. The handler keeps a stack of open
//! directories and, while a file is open, that file's path. Edit calls are
//! made in exactly the order the elements arrive; side fetches for skeletal
//! reports happen inline.
//!
//! Any malformed input fails the replay: the editor's `abort_edit` is called
//! once and every later event is refused.

use crate::editor::Editor;
use crate::fetch::PropertyFetcher;
use crate::svndiff;
use crate::{DavError, ReplayConfig, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::BufRead;
use svnwc_core::CancellationToken;
use svnwc_core::properties::svn_props;
use svnwc_core::relpath;
use tracing::{debug, warn};

/// Which response format the handler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `update-report`: directory and file elements enclose their content
    /// and close on their end tag.
    Update,
    /// `editor-report` from a replay: flat elements with explicit
    /// `close-file` and `close-directory`.
    Replay,
}

/// Base64 decoder fed in arbitrary text slices.
///
/// Buffered as bytes: any non-ASCII input is left for the decoder to reject.
#[derive(Debug, Default)]
struct Base64Stream {
    pending: Vec<u8>,
}

impl Base64Stream {
    fn push(&mut self, text: &str) -> Result<Vec<u8>> {
        self.pending.extend(text.bytes().filter(|b| !b.is_ascii_whitespace()));
        let ready = self.pending.len() - self.pending.len() % 4;
        let rest = self.pending.split_off(ready);
        let decoded = decode_base64(&self.pending)?;
        self.pending = rest;
        Ok(decoded)
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        decode_base64(&rest)
    }
}

fn decode_base64(data: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| DavError::malformed(format!("bad base64 data: {}", e)))
}

/// What the element currently collecting character data turns into.
#[derive(Debug)]
enum Pending {
    Property { name: String, base64: bool, delete: bool, on_file: bool },
    TextDelta { path: String, forward: bool, decoder: Base64Stream },
    Checksum,
    EntryProp(&'static str),
    VersionUrl,
}

pub struct EditorHandler<E: Editor> {
    editor: E,
    dialect: Dialect,
    config: ReplayConfig,
    fetcher: Option<Box<dyn PropertyFetcher>>,
    cancel: CancellationToken,
    send_all: bool,
    dirs: Vec<String>,
    file: Option<String>,
    elements: Vec<String>,
    /// Element collecting character data and what it turns into.
    pending: Option<(String, Pending)>,
    cdata: String,
    checksum: Option<String>,
    version_urls: HashMap<String, String>,
    failed: bool,
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn attr<'a>(attrs: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| local_name(k) == name).map(|(_, v)| *v)
}

fn required<'a>(attrs: &[(&str, &'a str)], name: &str, element: &str) -> Result<&'a str> {
    attr(attrs, name).ok_or_else(|| DavError::malformed(format!("missing '{}' attribute on <{}>", name, element)))
}

fn parse_rev(value: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| DavError::malformed(format!("invalid revision '{}'", value)))
}

fn entry_name<'a>(attrs: &[(&str, &'a str)], element: &str) -> Result<&'a str> {
    let name = required(attrs, "name", element)?;
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(DavError::malformed(format!("invalid entry name '{}' on <{}>", name, element)));
    }
    Ok(name)
}

fn copyfrom<'a>(attrs: &[(&str, &'a str)]) -> Result<(Option<&'a str>, i64)> {
    match attr(attrs, "copyfrom-path") {
        Some(path) => Ok((Some(path), parse_rev(required(attrs, "copyfrom-rev", "copyfrom")?)?)),
        None => Ok((None, -1)),
    }
}

impl<E: Editor> EditorHandler<E> {
    pub fn new(editor: E, dialect: Dialect) -> Self {
        Self::with_config(editor, dialect, ReplayConfig::default())
    }

    pub fn with_config(editor: E, dialect: Dialect, config: ReplayConfig) -> Self {
        Self {
            editor,
            dialect,
            config,
            fetcher: None,
            cancel: CancellationToken::new(),
            send_all: config.send_all,
            dirs: Vec::new(),
            file: None,
            elements: Vec::new(),
            pending: None,
            cdata: String::new(),
            checksum: None,
            version_urls: HashMap::new(),
            failed: false,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn PropertyFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn into_editor(self) -> E {
        self.editor
    }

    /// Number of open directories.
    pub fn depth(&self) -> usize {
        self.dirs.len()
    }

    /// Path of the open file, else of the innermost open directory.
    pub fn current_path(&self) -> &str {
        self.file
            .as_deref()
            .or_else(|| self.dirs.last().map(String::as_str))
            .unwrap_or("")
    }

    /// Version URL recorded for `path` from its `checked-in` href.
    pub fn version_url(&self, path: &str) -> Option<&str> {
        self.version_urls.get(path).map(String::as_str)
    }

    /// Check that every directory and file was closed and hand back the editor.
    pub fn finish(self) -> Result<E> {
        if self.failed {
            return Err(DavError::malformed("edit stream failed"));
        }
        if self.file.is_some() || !self.dirs.is_empty() {
            return Err(DavError::malformed(format!(
                "edit stream ended with {} open directories",
                self.dirs.len()
            )));
        }
        Ok(self.editor)
    }

    /// Parse a complete response body and replay it.
    pub fn feed_xml(&mut self, xml: &[u8]) -> Result<()> {
        self.feed(xml)
    }

    /// Replay a response read incrementally from `source`.
    ///
    /// Reaching the end of `source` does not close the edit: `close_edit` is
    /// sent only by the report's own end tag, and [`finish`](Self::finish)
    /// reports an edit left open.
    pub fn feed<R: BufRead>(&mut self, source: R) -> Result<()> {
        let mut reader = Reader::from_reader(source);
        let mut buf = Vec::new();
        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => return self.settle(Err(DavError::Xml(e.to_string()))),
            };
            match event {
                Event::Start(ref e) => {
                    let (name, attrs) = self.decode_start(e)?;
                    self.start_element(&name, &borrowed(&attrs))?;
                }
                Event::Empty(ref e) => {
                    let (name, attrs) = self.decode_start(e)?;
                    self.start_element(&name, &borrowed(&attrs))?;
                    self.end_element(&name)?;
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    self.end_element(&name)?;
                }
                Event::Text(ref e) => {
                    let text = match e.unescape() {
                        Ok(text) => text.into_owned(),
                        Err(e) => return self.settle(Err(DavError::Xml(e.to_string()))),
                    };
                    self.characters(&text)?;
                }
                Event::CData(ref e) => {
                    let text = match std::str::from_utf8(e) {
                        Ok(text) => text.to_string(),
                        Err(e) => return self.settle(Err(DavError::Xml(e.to_string()))),
                    };
                    self.characters(&text)?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(())
    }

    fn decode_start(&mut self, e: &BytesStart<'_>) -> Result<(String, Vec<(String, String)>)> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let attrs = e
            .attributes()
            .map(|a| {
                let a = a.map_err(|e| DavError::Xml(e.to_string()))?;
                let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
                Ok((key, a.unescape_value()?.into_owned()))
            })
            .collect::<Result<Vec<_>>>();
        Ok((name, self.settle(attrs)?))
    }

    pub fn start_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        self.guard()?;
        let name = local_name(name);
        let result = if self.cancel.is_cancelled() { Err(DavError::Cancelled) } else { self.on_start(name, attrs) };
        self.elements.push(name.to_string());
        self.settle(result)
    }

    pub fn characters(&mut self, text: &str) -> Result<()> {
        self.guard()?;
        let result = match self.pending.as_mut().map(|(_, p)| p) {
            Some(Pending::TextDelta { path, forward: true, decoder }) => {
                let path = path.clone();
                decoder.push(text).and_then(|data| {
                    if data.is_empty() { Ok(()) } else { self.editor.text_delta_chunk(&path, &data) }
                })
            }
            Some(Pending::TextDelta { forward: false, .. }) => Ok(()),
            Some(_) => {
                self.cdata.push_str(text);
                Ok(())
            }
            None => Ok(()),
        };
        self.settle(result)
    }

    pub fn end_element(&mut self, name: &str) -> Result<()> {
        self.guard()?;
        let name = local_name(name);
        self.elements.pop();
        let result = self.on_end(name);
        self.settle(result)
    }

    fn guard(&self) -> Result<()> {
        if self.failed { Err(DavError::malformed("edit stream already failed")) } else { Ok(()) }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && !self.failed {
            self.failed = true;
            if let Err(e) = self.editor.abort_edit() {
                warn!("Aborting the edit failed: {}", e);
            }
        }
        result
    }

    fn dir_path(&self, element: &str) -> Result<&str> {
        self.dirs
            .last()
            .map(String::as_str)
            .ok_or_else(|| DavError::malformed(format!("<{}> outside of any directory", element)))
    }

    fn child_path(&self, attrs: &[(&str, &str)], element: &str) -> Result<String> {
        if self.file.is_some() {
            return Err(DavError::malformed(format!("<{}> while a file is open", element)));
        }
        let name = entry_name(attrs, element)?;
        Ok(relpath::join(self.dir_path(element)?, name))
    }

    fn file_path(&self, element: &str) -> Result<String> {
        self.file
            .clone()
            .ok_or_else(|| DavError::malformed(format!("<{}> while no file is open", element)))
    }

    /// Path that a property change or entry property applies to.
    fn prop_target(&self, element: &str) -> Result<(String, bool)> {
        match &self.file {
            Some(path) => Ok((path.clone(), true)),
            None => Ok((self.dir_path(element)?.to_string(), false)),
        }
    }

    fn begin(&mut self, element: &str, pending: Pending) {
        self.cdata.clear();
        self.pending = Some((element.to_string(), pending));
    }

    fn on_start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        debug!("<{}> at '{}'", name, self.current_path());
        match (self.dialect, name) {
            (_, "target-revision") => {
                let rev = parse_rev(required(attrs, "rev", name)?)?;
                self.editor.target_revision(rev)
            }
            (Dialect::Update, "update-report") => {
                self.send_all = attr(attrs, "send-all") == Some("true");
                Ok(())
            }
            (Dialect::Replay, "open-root") => {
                if !self.dirs.is_empty() {
                    return Err(DavError::malformed("<open-root> inside an open directory"));
                }
                let rev = parse_rev(required(attrs, "rev", name)?)?;
                self.dirs.push(String::new());
                self.editor.open_root(rev)
            }
            (_, "open-directory") => {
                let rev = parse_rev(required(attrs, "rev", name)?)?;
                if self.dialect == Dialect::Update && self.dirs.is_empty() {
                    self.dirs.push(String::new());
                    return self.editor.open_root(rev);
                }
                let path = self.child_path(attrs, name)?;
                self.editor.open_dir(&path, rev)?;
                self.dirs.push(path);
                Ok(())
            }
            (_, "add-directory") => {
                let path = self.child_path(attrs, name)?;
                let (cf_path, cf_rev) = copyfrom(attrs)?;
                self.editor.add_dir(&path, cf_path, cf_rev)?;
                self.dirs.push(path);
                Ok(())
            }
            (_, "open-file") => {
                let path = self.child_path(attrs, name)?;
                let rev = parse_rev(required(attrs, "rev", name)?)?;
                self.editor.open_file(&path, rev)?;
                self.file = Some(path);
                Ok(())
            }
            (_, "add-file") => {
                let path = self.child_path(attrs, name)?;
                let (cf_path, cf_rev) = copyfrom(attrs)?;
                self.editor.add_file(&path, cf_path, cf_rev)?;
                self.file = Some(path);
                Ok(())
            }
            (_, "absent-directory") => {
                let path = self.child_path(attrs, name)?;
                self.editor.absent_dir(&path)
            }
            (_, "absent-file") => {
                let path = self.child_path(attrs, name)?;
                self.editor.absent_file(&path)
            }
            (_, "delete-entry") => {
                let path = self.child_path(attrs, name)?;
                let rev = attr(attrs, "rev").map(parse_rev).transpose()?.unwrap_or(-1);
                self.editor.delete_entry(&path, rev)
            }
            (Dialect::Replay, "close-file") => {
                let path = self.file_path(name)?;
                let checksum = attr(attrs, "checksum").map(str::to_string).or_else(|| self.checksum.take());
                self.checksum = None;
                self.editor.close_file(&path, checksum.as_deref())?;
                self.file = None;
                Ok(())
            }
            (Dialect::Replay, "close-directory") => {
                if self.file.is_some() {
                    return Err(DavError::malformed("<close-directory> while a file is open"));
                }
                if self.dirs.is_empty() {
                    return Err(DavError::malformed("<close-directory> without an open directory"));
                }
                self.editor.close_dir()?;
                self.dirs.pop();
                Ok(())
            }
            (Dialect::Replay, "change-file-prop") | (Dialect::Replay, "change-dir-prop") => {
                let on_file = name == "change-file-prop";
                if on_file {
                    self.file_path(name)?;
                } else {
                    self.dir_path(name)?;
                }
                let prop = required(attrs, "name", name)?.to_string();
                self.begin(name, Pending::Property {
                    name: prop,
                    base64: attr(attrs, "encoding") == Some("base64"),
                    delete: attr(attrs, "del").is_some(),
                    on_file,
                });
                Ok(())
            }
            (Dialect::Update, "set-prop") => {
                let (_, on_file) = self.prop_target(name)?;
                let prop = required(attrs, "name", name)?.to_string();
                self.begin(name, Pending::Property {
                    name: prop,
                    base64: attr(attrs, "encoding") == Some("base64"),
                    delete: false,
                    on_file,
                });
                Ok(())
            }
            (Dialect::Update, "remove-prop") => {
                let (path, on_file) = self.prop_target(name)?;
                let prop = required(attrs, "name", name)?;
                if on_file {
                    self.editor.change_file_prop(&path, prop, None)
                } else {
                    self.editor.change_dir_prop(&path, prop, None)
                }
            }
            (Dialect::Replay, "apply-textdelta") | (Dialect::Update, "txdelta") => {
                let path = self.file_path(name)?;
                let base = match self.dialect {
                    Dialect::Replay => attr(attrs, "checksum"),
                    Dialect::Update => attr(attrs, "base-checksum"),
                };
                self.editor.apply_text_delta(&path, base)?;
                self.begin(name, Pending::TextDelta {
                    path,
                    forward: self.config.fetch_contents,
                    decoder: Base64Stream::default(),
                });
                Ok(())
            }
            (Dialect::Update, "fetch-props") => {
                if self.send_all {
                    return Ok(());
                }
                let (path, on_file) = self.prop_target(name)?;
                let url = self.version_url_for(&path)?;
                let props = self.fetcher()?.fetch_props(&url)?;
                for (prop, value) in props.iter() {
                    if on_file {
                        self.editor.change_file_prop(&path, prop, Some(value))?;
                    } else {
                        self.editor.change_dir_prop(&path, prop, Some(value))?;
                    }
                }
                Ok(())
            }
            (Dialect::Update, "fetch-file") => {
                if self.send_all {
                    return Ok(());
                }
                let path = self.file_path(name)?;
                if !self.config.fetch_contents {
                    return Ok(());
                }
                let url = self.version_url_for(&path)?;
                let text = self.fetcher()?.fetch_file(&url)?;
                self.editor.apply_text_delta(&path, attr(attrs, "base-checksum"))?;
                self.editor.text_delta_chunk(&path, &svndiff::encode_fulltext(&text))?;
                self.editor.text_delta_end(&path)
            }
            (_, "md5-checksum") => {
                self.begin(name, Pending::Checksum);
                Ok(())
            }
            (_, "version-name") => {
                self.begin(name, Pending::EntryProp(svn_props::ENTRY_COMMITTED_REV));
                Ok(())
            }
            (_, "creationdate") => {
                self.begin(name, Pending::EntryProp(svn_props::ENTRY_COMMITTED_DATE));
                Ok(())
            }
            (_, "creator-displayname") => {
                self.begin(name, Pending::EntryProp(svn_props::ENTRY_LAST_AUTHOR));
                Ok(())
            }
            (_, "href") if self.elements.last().map(String::as_str) == Some("checked-in") => {
                self.begin(name, Pending::VersionUrl);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_end(&mut self, name: &str) -> Result<()> {
        match (self.dialect, name) {
            (Dialect::Update, "open-directory") | (Dialect::Update, "add-directory") => {
                if self.file.is_some() {
                    return Err(DavError::malformed(format!("</{}> while a file is open", name)));
                }
                if self.dirs.is_empty() {
                    return Err(DavError::malformed(format!("</{}> without an open directory", name)));
                }
                self.editor.close_dir()?;
                self.dirs.pop();
                self.checksum = None;
                Ok(())
            }
            (Dialect::Update, "open-file") | (Dialect::Update, "add-file") => {
                let path = self.file_path(name)?;
                let checksum = self.checksum.take();
                self.editor.close_file(&path, checksum.as_deref())?;
                self.file = None;
                Ok(())
            }
            (Dialect::Update, "update-report") | (Dialect::Replay, "editor-report") => {
                if self.file.is_some() || !self.dirs.is_empty() {
                    return Err(DavError::malformed(format!(
                        "</{}> with {} directories still open",
                        name,
                        self.dirs.len()
                    )));
                }
                self.editor.close_edit()
            }
            _ => match self.pending.take() {
                Some((element, pending)) if element == name => self.complete(pending),
                other => {
                    self.pending = other;
                    Ok(())
                }
            },
        }
    }

    /// Finish the element that was collecting character data.
    fn complete(&mut self, pending: Pending) -> Result<()> {
        let cdata = std::mem::take(&mut self.cdata);
        match pending {
            Pending::Property { name, base64, delete, on_file } => {
                let value = if delete {
                    None
                } else if base64 {
                    let bytes = decode_base64(&cdata.split_ascii_whitespace().collect::<String>())?;
                    Some(String::from_utf8(bytes).map_err(|_| {
                        DavError::malformed(format!("value of property '{}' is not UTF-8", name))
                    })?)
                } else {
                    Some(cdata)
                };
                if on_file {
                    let path = self.file_path("change-file-prop")?;
                    self.editor.change_file_prop(&path, &name, value.as_deref())
                } else {
                    let path = self.dir_path("change-dir-prop")?.to_string();
                    self.editor.change_dir_prop(&path, &name, value.as_deref())
                }
            }
            Pending::TextDelta { path, forward, mut decoder } => {
                if forward {
                    let rest = decoder.finish()?;
                    if !rest.is_empty() {
                        self.editor.text_delta_chunk(&path, &rest)?;
                    }
                }
                self.editor.text_delta_end(&path)
            }
            Pending::Checksum => {
                self.checksum = Some(cdata.trim().to_string());
                Ok(())
            }
            Pending::EntryProp(prop) => {
                let (path, on_file) = self.prop_target(prop)?;
                self.change_prop(&path, on_file, prop, cdata.trim())
            }
            Pending::VersionUrl => {
                let (path, on_file) = self.prop_target("href")?;
                let url = cdata.trim().to_string();
                self.change_prop(&path, on_file, svn_props::WC_VERSION_URL, &url)?;
                self.version_urls.insert(path, url);
                Ok(())
            }
        }
    }

    fn change_prop(&mut self, path: &str, on_file: bool, name: &str, value: &str) -> Result<()> {
        if on_file {
            self.editor.change_file_prop(path, name, Some(value))
        } else {
            self.editor.change_dir_prop(path, name, Some(value))
        }
    }

    fn version_url_for(&self, path: &str) -> Result<String> {
        self.version_urls
            .get(path)
            .cloned()
            .ok_or_else(|| DavError::Fetch(format!("no version URL recorded for '{}'", path)))
    }

    fn fetcher(&mut self) -> Result<&mut Box<dyn PropertyFetcher>> {
        self.fetcher.as_mut().ok_or_else(|| {
            DavError::NotImplemented("skeletal report needs a property fetcher; request send-all".into())
        })
    }
}

fn borrowed(attrs: &[(String, String)]) -> Vec<(&str, &str)> {
    attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::{EditorCall, RecordingEditor};

    fn replay(xml: &str) -> (Result<()>, Vec<EditorCall>) {
        let mut handler = EditorHandler::new(RecordingEditor::new(), Dialect::Replay);
        let result = handler.feed_xml(xml.as_bytes());
        (result, handler.into_editor().calls)
    }

    #[test]
    fn test_base64_stream_splits() {
        let mut stream = Base64Stream::default();
        let mut out = stream.push("aGVs").unwrap();
        out.extend(stream.push("bG8g\nd2").unwrap());
        out.extend(stream.push("9ybGQ=").unwrap());
        out.extend(stream.finish().unwrap());
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_base64_stream_rejects_multibyte_text() {
        let mut stream = Base64Stream::default();
        assert!(matches!(stream.push("abcé"), Err(DavError::MalformedData(_))));

        let mut stream = Base64Stream::default();
        assert_eq!(stream.push("aGVsé").unwrap(), b"hel");
        assert!(matches!(stream.finish(), Err(DavError::MalformedData(_))));
    }

    #[test]
    fn test_missing_rev_is_malformed() {
        let (result, calls) = replay(r#"<open-root/>"#);
        assert!(matches!(result, Err(DavError::MalformedData(_))));
        assert_eq!(calls, vec![EditorCall::AbortEdit]);
    }

    #[test]
    fn test_close_directory_in_file_mode() {
        let (result, calls) = replay(r#"<open-root rev="1"/><add-file name="f"/><close-directory/>"#);
        assert!(matches!(result, Err(DavError::MalformedData(_))));
        assert_eq!(calls.last(), Some(&EditorCall::AbortEdit));
    }

    #[test]
    fn test_apply_textdelta_in_dir_mode() {
        let (result, _) = replay(r#"<open-root rev="1"/><apply-textdelta>U1ZOAA==</apply-textdelta>"#);
        assert!(matches!(result, Err(DavError::MalformedData(_))));
    }

    #[test]
    fn test_delete_prop_and_base64_value() {
        let (result, calls) = replay(
            r#"<open-root rev="2"/>
               <change-dir-prop name="svn:ignore" del="true"/>
               <change-dir-prop name="note" encoding="base64">aMOpbGxv</change-dir-prop>
               <close-directory/>"#,
        );
        result.unwrap();
        assert_eq!(
            calls,
            vec![
                EditorCall::OpenRoot(2),
                EditorCall::ChangeDirProp { path: "".into(), name: "svn:ignore".into(), value: None },
                EditorCall::ChangeDirProp { path: "".into(), name: "note".into(), value: Some("héllo".into()) },
                EditorCall::CloseDir,
            ]
        );
    }

    #[test]
    fn test_entry_name_must_be_one_segment() {
        let (result, _) = replay(r#"<open-root rev="1"/><add-file name="../x"/>"#);
        assert!(matches!(result, Err(DavError::MalformedData(_))));
    }

    #[test]
    fn test_cancelled_before_element() {
        let cancel = CancellationToken::new();
        let mut handler =
            EditorHandler::new(RecordingEditor::new(), Dialect::Replay).with_cancellation(cancel.clone());
        handler.start_element("open-root", &[("rev", "1")]).unwrap();
        handler.end_element("open-root").unwrap();
        cancel.cancel();
        assert!(matches!(handler.start_element("close-directory", &[]), Err(DavError::Cancelled)));
        assert_eq!(handler.editor().calls, vec![EditorCall::OpenRoot(1), EditorCall::AbortEdit]);
    }
}
