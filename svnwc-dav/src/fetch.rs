//! Side fetches for skeletal reports
//!
//! A report sent without `send-all` names the nodes that changed but leaves
//! their properties and texts out. The replay handler asks a
//! [`PropertyFetcher`] for them, inline, using the version URL the report
//! recorded for the node.

use crate::Result;
use bytes::Bytes;
use svnwc_core::PropertySet;

pub trait PropertyFetcher {
    /// All properties of the resource at `version_url`, entry and
    /// working-copy properties included.
    fn fetch_props(&mut self, version_url: &str) -> Result<PropertySet>;

    /// Full text of the file at `version_url`.
    fn fetch_file(&mut self, version_url: &str) -> Result<Bytes>;
}
