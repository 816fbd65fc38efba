//! SVN property sets
//!
//! Properties are stored per node as skel property lists; this module only
//! holds the in-memory set and the well-known property names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property value
pub type PropertyValue = String;

/// Properties of a single node, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn set(&mut self, name: String, value: PropertyValue) {
        self.properties.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.properties.iter()
    }

    /// Apply a change; `None` deletes.
    pub fn apply(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(v) => self.set(name.to_string(), v.to_string()),
            None => {
                self.remove(name);
            }
        }
    }
}

impl FromIterator<(String, PropertyValue)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self { properties: iter.into_iter().collect() }
    }
}

/// Well-known property names
pub mod svn_props {
    pub const IGNORE: &str = "svn:ignore";

    /// Entry properties are server supplied bookkeeping, never versioned.
    pub const ENTRY_PREFIX: &str = "svn:entry:";
    pub const ENTRY_COMMITTED_REV: &str = "svn:entry:committed-rev";
    pub const ENTRY_COMMITTED_DATE: &str = "svn:entry:committed-date";
    pub const ENTRY_LAST_AUTHOR: &str = "svn:entry:last-author";

    /// Working-copy cache properties (DAV cache)
    pub const WC_PREFIX: &str = "svn:wc:";
    pub const WC_VERSION_URL: &str = "svn:wc:ra_dav:version-url";

    pub fn is_entry_prop(name: &str) -> bool {
        name.starts_with(ENTRY_PREFIX)
    }

    pub fn is_wc_prop(name: &str) -> bool {
        name.starts_with(WC_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_set_basic_operations() {
        let mut prop_set = PropertySet::new();
        assert!(prop_set.get("test").is_none());

        prop_set.set("test".to_string(), "value".to_string());
        assert_eq!(prop_set.get("test"), Some(&"value".to_string()));

        prop_set.apply("test", None);
        assert!(!prop_set.contains("test"));
        assert!(prop_set.is_empty());
    }

    #[test]
    fn test_property_kinds() {
        assert!(svn_props::is_entry_prop(svn_props::ENTRY_COMMITTED_REV));
        assert!(svn_props::is_wc_prop(svn_props::WC_VERSION_URL));
        assert!(!svn_props::is_wc_prop(svn_props::IGNORE));
        assert!(!svn_props::is_entry_prop(svn_props::IGNORE));
    }
}
