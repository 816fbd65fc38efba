//! Conflict records
//!
//! A node's conflicts are persisted in `ACTUAL_NODE.conflict_data` as
//!
//! ```text
//! ((text OLD NEW WORKING) (prop REJECT) (tree OPERATION ACTION REASON))
//! ```
//!
//! Every part is optional; an absent file name is written as `()`.

use crate::error::{Result, WcError};
use crate::skel::Skel;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextConflict {
    pub old: Option<String>,
    pub new: Option<String>,
    pub working: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropConflict {
    pub reject_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConflict {
    /// update, switch, merge
    pub operation: String,
    /// edit, add, delete, replace
    pub action: String,
    /// edited, obstructed, deleted, missing, unversioned, added
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conflict {
    pub text: Option<TextConflict>,
    pub prop: Option<PropConflict>,
    pub tree: Option<TreeConflict>,
}

fn opt_atom(value: &Option<String>) -> Skel {
    match value {
        Some(v) => Skel::str_atom(v),
        None => Skel::empty_list(),
    }
}

fn read_opt(skel: Option<&Skel>) -> Result<Option<String>> {
    match skel {
        Some(Skel::List(children)) if children.is_empty() => Ok(None),
        Some(s) => s
            .as_str()
            .map(|v| Some(v.to_string()))
            .ok_or_else(|| WcError::malformed("conflict file name is not an atom")),
        None => Err(WcError::malformed("truncated conflict record")),
    }
}

fn read_str(skel: Option<&Skel>) -> Result<String> {
    skel.and_then(Skel::as_str)
        .map(str::to_string)
        .ok_or_else(|| WcError::malformed("truncated tree conflict record"))
}

impl Conflict {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.prop.is_none() && self.tree.is_none()
    }

    pub fn to_skel(&self) -> Skel {
        let mut skel = Skel::empty_list();
        if let Some(text) = &self.text {
            skel.append(Skel::List(vec![
                Skel::str_atom("text"),
                opt_atom(&text.old),
                opt_atom(&text.new),
                opt_atom(&text.working),
            ]));
        }
        if let Some(prop) = &self.prop {
            skel.append(Skel::List(vec![Skel::str_atom("prop"), opt_atom(&prop.reject_file)]));
        }
        if let Some(tree) = &self.tree {
            skel.append(Skel::List(vec![
                Skel::str_atom("tree"),
                Skel::str_atom(&tree.operation),
                Skel::str_atom(&tree.action),
                Skel::str_atom(&tree.reason),
            ]));
        }
        skel
    }

    pub fn from_skel(skel: &Skel) -> Result<Self> {
        if skel.is_atom() {
            return Err(WcError::malformed("conflict record is not a list"));
        }
        let mut conflict = Conflict::default();
        for part in skel.children() {
            let tag = part.child(0).and_then(Skel::as_str).unwrap_or_default();
            match tag {
                "text" => {
                    conflict.text = Some(TextConflict {
                        old: read_opt(part.child(1))?,
                        new: read_opt(part.child(2))?,
                        working: read_opt(part.child(3))?,
                    })
                }
                "prop" => {
                    conflict.prop = Some(PropConflict { reject_file: read_opt(part.child(1))? })
                }
                "tree" => {
                    conflict.tree = Some(TreeConflict {
                        operation: read_str(part.child(1))?,
                        action: read_str(part.child(2))?,
                        reason: read_str(part.child(3))?,
                    })
                }
                other => {
                    return Err(WcError::malformed(format!("unknown conflict kind '{}'", other)));
                }
            }
        }
        Ok(conflict)
    }

    /// Merge another record into this one, later parts winning.
    pub fn merge(&mut self, other: Conflict) {
        if other.text.is_some() {
            self.text = other.text;
        }
        if other.prop.is_some() {
            self.prop = other.prop;
        }
        if other.tree.is_some() {
            self.tree = other.tree;
        }
    }

    /// Drop the resolved parts.
    pub fn resolve(&mut self, text: bool, prop: bool, tree: bool) {
        if text {
            self.text = None;
        }
        if prop {
            self.prop = None;
        }
        if tree {
            self.tree = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skel_form() {
        let conflict = Conflict {
            text: Some(TextConflict {
                old: Some("a.txt.r1".into()),
                new: Some("a.txt.r2".into()),
                working: None,
            }),
            prop: None,
            tree: Some(TreeConflict {
                operation: "update".into(),
                action: "delete".into(),
                reason: "edited".into(),
            }),
        };
        let bytes = conflict.to_skel().unparse();
        assert_eq!(
            bytes.as_ref(),
            b"((text 8 a.txt.r1 8 a.txt.r2 ()) (tree update delete edited))".as_slice()
        );
        let parsed = Conflict::from_skel(&Skel::parse(bytes).unwrap()).unwrap();
        assert_eq!(parsed, conflict);
    }

    #[test]
    fn test_resolve_parts() {
        let mut conflict = Conflict {
            text: Some(TextConflict::default()),
            prop: Some(PropConflict { reject_file: Some("dir_conflicts.prej".into()) }),
            tree: None,
        };
        conflict.resolve(true, false, false);
        assert!(conflict.text.is_none());
        assert!(!conflict.is_empty());
        conflict.resolve(false, true, true);
        assert!(conflict.is_empty());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let skel = Skel::parse(bytes::Bytes::from_static(b"((weird x))")).unwrap();
        assert!(Conflict::from_skel(&skel).is_err());
    }
}
