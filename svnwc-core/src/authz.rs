//! Path-based access configuration
//!
//! Reads Subversion-style authz files:
//! ```text
//! [groups]
//! developers = alice, bob
//! everyone = @developers, carol
//!
//! [/]
//! * = r
//!
//! [repo:/trunk/src]
//! @developers = rw
//! bob =
//! ```
//!
//! The text is tokenized by a pull parser that yields immutable tokens.
//! Groups may name other groups with `@`; they are expanded once at load
//! time by a depth-first walk that rejects cycles.

use crate::error::{Result, WcError};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::iter::{Enumerate, Peekable};
use std::path::Path;
use std::str::Lines;
use tracing::debug;

/// Access level for repository paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzResult {
    Granted,
    Denied,
}

pub trait AuthzProvider: Send + Sync {
    fn check_access(&self, username: Option<&str>, path: &str, required_level: AccessLevel) -> AuthzResult;

    fn can_read(&self, username: Option<&str>, path: &str) -> bool {
        self.check_access(username, path, AccessLevel::Read) == AuthzResult::Granted
    }

    fn can_write(&self, username: Option<&str>, path: &str) -> bool {
        self.check_access(username, path, AccessLevel::Write) == AuthzResult::Granted
    }
}

/// One lexical unit of an authz file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Section(String),
    Option { name: String, value: String },
}

/// Pull tokenizer over authz text.
///
/// A line that starts with whitespace continues the value of the option on
/// the line directly above it, joined with one space. Blank lines and `#`
/// or `;` comments end an option; a whitespace-led line anywhere else is
/// an error.
pub struct Tokenizer<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { lines: text.lines().enumerate().peekable() }
    }

    fn is_continuation(line: &str) -> bool {
        let trimmed = line.trim();
        line.starts_with(char::is_whitespace) && !trimmed.is_empty() && !is_comment(trimmed)
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with('#') || trimmed.starts_with(';')
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, line) = self.lines.next()?;
            let lineno = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || is_comment(trimmed) {
                continue;
            }
            if line.starts_with(char::is_whitespace) {
                return Some(Err(WcError::malformed(format!(
                    "line {}: continuation line without an option",
                    lineno
                ))));
            }
            if let Some(rest) = trimmed.strip_prefix('[') {
                return Some(match rest.strip_suffix(']') {
                    Some(name) if !name.trim().is_empty() => Ok(Token::Section(name.trim().to_string())),
                    _ => Err(WcError::malformed(format!("line {}: bad section header '{}'", lineno, trimmed))),
                });
            }
            let Some(split) = trimmed.find(['=', ':']) else {
                return Some(Err(WcError::malformed(format!("line {}: expected 'name = value'", lineno))));
            };
            let name = trimmed[..split].trim();
            if name.is_empty() {
                return Some(Err(WcError::malformed(format!("line {}: option without a name", lineno))));
            }
            let mut value = trimmed[split + 1..].trim().to_string();
            while let Some((_, next)) = self.lines.peek() {
                if !Self::is_continuation(next) {
                    break;
                }
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(next.trim());
                self.lines.next();
            }
            return Some(Ok(Token::Option { name: name.to_string(), value }));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Who {
    Everyone,
    Anonymous,
    Authenticated,
    User(String),
    Group(String),
}

#[derive(Debug, Clone)]
struct AccessRule {
    who: Who,
    level: AccessLevel,
}

/// Rules from an authz file, with groups already expanded.
#[derive(Debug, Clone, Default)]
pub struct PathBasedAccess {
    /// Keyed by `(repository, path)`; `None` for sections that apply to
    /// every repository.
    rules: HashMap<(Option<String>, String), Vec<AccessRule>>,
    groups: HashMap<String, HashSet<String>>,
    repository: Option<String>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(pos) => Some(&path[..pos]),
        None => None,
    }
}

fn expand_group(
    name: &str,
    defs: &HashMap<String, Vec<String>>,
    visiting: &mut HashSet<String>,
    out: &mut HashSet<String>,
) -> Result<()> {
    let members = defs
        .get(name)
        .ok_or_else(|| WcError::malformed(format!("undefined group '{}'", name)))?;
    if !visiting.insert(name.to_string()) {
        return Err(WcError::CircularDependency(name.to_string()));
    }
    for member in members {
        match member.strip_prefix('@') {
            Some(group) => expand_group(group, defs, visiting, out)?,
            None => {
                out.insert(member.clone());
            }
        }
    }
    visiting.remove(name);
    Ok(())
}

impl PathBasedAccess {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&fs::read_to_string(path.as_ref())?)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut group_defs: HashMap<String, Vec<String>> = HashMap::new();
        let mut rules: HashMap<(Option<String>, String), Vec<AccessRule>> = HashMap::new();
        let mut section: Option<String> = None;

        for token in Tokenizer::new(content) {
            match token? {
                Token::Section(name) => section = Some(name),
                Token::Option { name, value } => match section.as_deref() {
                    None => return Err(WcError::malformed(format!("option '{}' outside any section", name))),
                    Some("groups") => {
                        let members = value
                            .split(',')
                            .map(str::trim)
                            .filter(|m| !m.is_empty())
                            .map(str::to_string)
                            .collect();
                        group_defs.insert(name, members);
                    }
                    Some(path_section) => {
                        let key = match path_section.split_once(':') {
                            Some((repo, path)) if path.starts_with('/') => (Some(repo.to_string()), normalize(path)),
                            None if path_section.starts_with('/') => (None, normalize(path_section)),
                            _ => {
                                debug!("Ignoring option '{}' in section [{}]", name, path_section);
                                continue;
                            }
                        };
                        let rule = AccessRule { who: Self::parse_who(&name)?, level: Self::parse_level(&value)? };
                        rules.entry(key).or_default().push(rule);
                    }
                },
            }
        }

        let mut groups = HashMap::new();
        for name in group_defs.keys() {
            let mut members = HashSet::new();
            expand_group(name, &group_defs, &mut HashSet::new(), &mut members)?;
            groups.insert(name.clone(), members);
        }
        for rule in rules.values().flatten() {
            if let Who::Group(group) = &rule.who {
                if !groups.contains_key(group) {
                    return Err(WcError::malformed(format!("rule refers to undefined group '{}'", group)));
                }
            }
        }
        Ok(Self { rules, groups, repository: None })
    }

    /// Apply `[name:/path]` sections for this repository.
    pub fn with_repository(mut self, name: &str) -> Self {
        self.repository = Some(name.to_string());
        self
    }

    fn parse_who(name: &str) -> Result<Who> {
        Ok(match name {
            "*" => Who::Everyone,
            "$anonymous" => Who::Anonymous,
            "$authenticated" => Who::Authenticated,
            _ => match name.strip_prefix('@') {
                Some(group) if !group.is_empty() => Who::Group(group.to_string()),
                Some(_) => return Err(WcError::malformed("empty group reference")),
                None => Who::User(name.to_string()),
            },
        })
    }

    fn parse_level(value: &str) -> Result<AccessLevel> {
        match value {
            "" => Ok(AccessLevel::None),
            "r" => Ok(AccessLevel::Read),
            "rw" => Ok(AccessLevel::Write),
            other => Err(WcError::malformed(format!("bad access level '{}'", other))),
        }
    }

    /// Members of `group`, with nested groups resolved.
    pub fn group_members(&self, group: &str) -> Option<&HashSet<String>> {
        self.groups.get(group)
    }

    fn applies(&self, who: &Who, username: Option<&str>) -> bool {
        match (who, username) {
            (Who::Everyone, _) => true,
            (Who::Anonymous, user) => user.is_none(),
            (Who::Authenticated, user) => user.is_some(),
            (Who::User(name), Some(user)) => name == user,
            (Who::Group(group), Some(user)) => self.groups.get(group).is_some_and(|m| m.contains(user)),
            _ => false,
        }
    }

    /// Access granted at the deepest path with a rule naming this user.
    /// Repository-specific sections take precedence at equal depth.
    pub fn access_level(&self, username: Option<&str>, path: &str) -> AccessLevel {
        let path = normalize(path);
        let mut current = Some(path.as_str());
        while let Some(p) = current {
            let candidates = [
                self.repository.clone().map(|r| (Some(r), p.to_string())),
                Some((None, p.to_string())),
            ];
            for key in candidates.into_iter().flatten() {
                let matching: Vec<AccessLevel> = self
                    .rules
                    .get(&key)
                    .into_iter()
                    .flatten()
                    .filter(|rule| self.applies(&rule.who, username))
                    .map(|rule| rule.level)
                    .collect();
                if let Some(level) = matching.into_iter().max() {
                    return level;
                }
            }
            current = parent_path(p);
        }
        AccessLevel::None
    }
}

impl AuthzProvider for PathBasedAccess {
    fn check_access(&self, username: Option<&str>, path: &str, required_level: AccessLevel) -> AuthzResult {
        if self.access_level(username, path) >= required_level {
            AuthzResult::Granted
        } else {
            AuthzResult::Denied
        }
    }
}
