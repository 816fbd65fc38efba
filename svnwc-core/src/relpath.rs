//! Working-copy relative path helpers
//!
//! A relpath is the database key for a node: `/` separated, no leading or
//! trailing separator, no empty, `.` or `..` segments. The working-copy root
//! is the empty string.

use crate::error::{Result, WcError};

pub fn is_canonical(path: &str) -> bool {
    path.is_empty()
        || path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// Normalise separators and drop empty and `.` segments.
///
/// `..` is rejected rather than resolved; a relpath never leaves its root.
pub fn canonicalize(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => continue,
            ".." => return Err(WcError::InvalidPath(format!("'{}' escapes its root", path))),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

pub fn join(base: &str, component: &str) -> String {
    match (base.is_empty(), component.is_empty()) {
        (true, _) => component.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, component),
    }
}

/// Parent of `path`; the root's parent is `None`.
pub fn dirname(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rfind('/').map_or("", |i| &path[..i]))
}

pub fn basename(path: &str) -> &str {
    path.rfind('/').map_or(path, |i| &path[i + 1..])
}

pub fn split(path: &str) -> (&str, &str) {
    (dirname(path).unwrap_or(""), basename(path))
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub fn depth(path: &str) -> usize {
    segments(path).count()
}

/// Is `ancestor` a proper or improper ancestor of `path`?
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    skip_ancestor(ancestor, path).is_some()
}

/// The remainder of `path` below `ancestor`, or `None` when unrelated.
pub fn skip_ancestor<'a>(ancestor: &str, path: &'a str) -> Option<&'a str> {
    if ancestor.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(ancestor)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Append a relpath to a URL, percent-encoding nothing.
pub fn url_join(url: &str, relpath: &str) -> String {
    if relpath.is_empty() {
        url.to_string()
    } else {
        format!("{}/{}", url.trim_end_matches('/'), relpath)
    }
}

/// Like `url_join` but for repository paths that may carry a leading `/`.
pub fn repos_join(url: &str, path: &str) -> String {
    url_join(url, path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical() {
        assert!(is_canonical(""));
        assert!(is_canonical("a/b"));
        assert!(!is_canonical("/a"));
        assert!(!is_canonical("a/"));
        assert!(!is_canonical("a//b"));
        assert!(!is_canonical("a/./b"));
        assert_eq!(canonicalize("./a//b/").unwrap(), "a/b");
        assert_eq!(canonicalize("a\\b").unwrap(), "a/b");
        assert!(canonicalize("a/../b").is_err());
    }

    #[test]
    fn test_decompose() {
        assert_eq!(dirname("a/b/c"), Some("a/b"));
        assert_eq!(dirname("a"), Some(""));
        assert_eq!(dirname(""), None);
        assert_eq!(basename("a/b/c"), "c");
        assert_eq!(split("a/b"), ("a", "b"));
        assert_eq!(depth("a/b/c"), 3);
        assert_eq!(depth(""), 0);
        assert_eq!(join("", "x"), "x");
        assert_eq!(join("a", "x"), "a/x");
    }

    #[test]
    fn test_ancestry() {
        assert_eq!(skip_ancestor("a", "a/b/c"), Some("b/c"));
        assert_eq!(skip_ancestor("a", "a"), Some(""));
        assert_eq!(skip_ancestor("a", "ab/c"), None);
        assert_eq!(skip_ancestor("", "x"), Some("x"));
        assert!(is_ancestor("a/b", "a/b/c"));
        assert!(!is_ancestor("a/b/c", "a/b"));
    }

    #[test]
    fn test_url_join() {
        assert_eq!(url_join("http://h/repo/", "trunk/a"), "http://h/repo/trunk/a");
        assert_eq!(url_join("http://h/repo", ""), "http://h/repo");
        assert_eq!(repos_join("http://h/repo", "/trunk"), "http://h/repo/trunk");
    }
}
