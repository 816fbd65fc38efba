//! Skel codec
//!
//! A skel is either an atom (raw bytes) or a parenthesised list of skels.
//! It is the on-disk encoding for property lists, conflict records and
//! work-queue items.
//!
//! Atoms are written in one of two forms:
//! - implicit: a bare token such as `file-install`
//! - explicit: a decimal length, one whitespace byte, then that many bytes
//!
//! Parsing is zero-copy: every atom is a [`Bytes`] slice of the input buffer.

use crate::error::{Result, WcError};
use crate::properties::PropertySet;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharType {
    Nothing,
    Space,
    Digit,
    Paren,
    Name,
}

const fn char_type(b: u8) -> CharType {
    match b {
        b'\t' | b'\n' | 0x0c | b'\r' | b' ' => CharType::Space,
        b'0'..=b'9' => CharType::Digit,
        b'(' | b')' | b'[' | b']' => CharType::Paren,
        b'A'..=b'Z' | b'a'..=b'z' => CharType::Name,
        _ => CharType::Nothing,
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// A parsed or programmatically built skel node.
#[derive(Clone, PartialEq, Eq)]
pub enum Skel {
    Atom(Bytes),
    List(Vec<Skel>),
}

impl Skel {
    pub fn atom(data: impl Into<Bytes>) -> Self {
        Skel::Atom(data.into())
    }

    pub fn str_atom(s: &str) -> Self {
        Skel::Atom(Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn int_atom(n: i64) -> Self {
        Skel::Atom(Bytes::from(n.to_string()))
    }

    pub fn empty_list() -> Self {
        Skel::List(Vec::new())
    }

    /// Parse a whole buffer. Trailing bytes after the top-level element are an error.
    pub fn parse(data: Bytes) -> Result<Skel> {
        let len = data.len();
        Self::parse_range(&data, 0, len)
    }

    /// Parse `length` bytes of `data` starting at `offset`.
    pub fn parse_range(data: &Bytes, offset: usize, length: usize) -> Result<Skel> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| WcError::malformed("skel range exceeds buffer"))?;
        let mut parser = Parser { data, pos: offset, end, depth: 0 };
        let skel = parser.element()?;
        if parser.pos != end {
            return Err(WcError::malformed(format!(
                "{} trailing bytes after skel",
                end - parser.pos
            )));
        }
        Ok(skel)
    }

    pub fn is_atom(&self) -> bool {
        matches!(self, Skel::Atom(_))
    }

    /// Number of immediate children, `None` for atoms.
    pub fn list_len(&self) -> Option<usize> {
        match self {
            Skel::Atom(_) => None,
            Skel::List(children) => Some(children.len()),
        }
    }

    pub fn children(&self) -> &[Skel] {
        match self {
            Skel::Atom(_) => &[],
            Skel::List(children) => children,
        }
    }

    pub fn child(&self, index: usize) -> Option<&Skel> {
        self.children().get(index)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Skel::Atom(data) => Some(data),
            Skel::List(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_str().and_then(|s| s.parse().ok())
    }

    /// Does this atom hold exactly `s`?
    pub fn is_str(&self, s: &str) -> bool {
        self.as_bytes().is_some_and(|b| b.as_ref() == s.as_bytes())
    }

    /// Insert `child` at the front of a list. No-op on atoms.
    pub fn prepend(&mut self, child: Skel) {
        if let Skel::List(children) = self {
            children.insert(0, child);
        }
    }

    pub fn append(&mut self, child: Skel) {
        if let Skel::List(children) = self {
            children.push(child);
        }
    }

    /// True iff this is a list of even length whose immediate children are atoms.
    pub fn is_valid_prop_list(&self) -> bool {
        match self {
            Skel::Atom(_) => false,
            Skel::List(children) => children.len() % 2 == 0 && children.iter().all(Skel::is_atom),
        }
    }

    pub fn parse_prop_list(&self) -> Result<PropertySet> {
        if !self.is_valid_prop_list() {
            return Err(WcError::malformed("not a valid property list skel"));
        }
        let mut props = PropertySet::new();
        for pair in self.children().chunks(2) {
            let name = pair[0]
                .as_str()
                .ok_or_else(|| WcError::malformed("property name is not UTF-8"))?;
            let value = pair[1]
                .as_str()
                .ok_or_else(|| WcError::malformed(format!("value of '{}' is not UTF-8", name)))?;
            props.set(name.to_string(), value.to_string());
        }
        Ok(props)
    }

    pub fn from_props(props: &PropertySet) -> Skel {
        let mut children = Vec::with_capacity(props.len() * 2);
        for (name, value) in props.iter() {
            children.push(Skel::str_atom(name));
            children.push(Skel::str_atom(value));
        }
        Skel::List(children)
    }

    /// Serialize to the byte form accepted by [`Skel::parse`].
    pub fn unparse(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.write_to(&mut out);
        out.freeze()
    }

    fn write_to(&self, out: &mut BytesMut) {
        match self {
            Skel::Atom(data) => {
                if use_implicit(data) {
                    out.put_slice(data);
                } else {
                    out.put_slice(data.len().to_string().as_bytes());
                    out.put_u8(b' ');
                    out.put_slice(data);
                }
            }
            Skel::List(children) => {
                out.put_u8(b'(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.put_u8(b' ');
                    }
                    child.write_to(out);
                }
                out.put_u8(b')');
            }
        }
    }
}

fn use_implicit(data: &[u8]) -> bool {
    !data.is_empty()
        && data.len() < 100
        && char_type(data[0]) == CharType::Name
        && data.iter().all(|b| is_name_byte(*b))
}

impl fmt::Debug for Skel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.unparse()))
    }
}

/// Deepest list nesting the parser accepts.
pub const MAX_NESTING: usize = 256;

struct Parser<'a> {
    data: &'a Bytes,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        (self.pos < self.end).then(|| self.data[self.pos])
    }

    fn element(&mut self) -> Result<Skel> {
        let first = self
            .peek()
            .ok_or_else(|| WcError::malformed("unexpected end of skel"))?;
        if first == b'(' {
            self.list()
        } else if char_type(first) == CharType::Name {
            Ok(self.implicit_atom())
        } else if char_type(first) == CharType::Digit {
            self.explicit_atom()
        } else {
            Err(WcError::malformed(format!(
                "unexpected byte 0x{:02x} at offset {}",
                first, self.pos
            )))
        }
    }

    fn list(&mut self) -> Result<Skel> {
        if self.depth >= MAX_NESTING {
            return Err(WcError::malformed(format!(
                "skel nested deeper than {} lists at offset {}",
                MAX_NESTING, self.pos
            )));
        }
        self.depth += 1;
        let list = self.list_items();
        self.depth -= 1;
        list
    }

    fn list_items(&mut self) -> Result<Skel> {
        self.pos += 1;
        let mut children = Vec::new();
        loop {
            while self.peek().is_some_and(|b| char_type(b) == CharType::Space) {
                self.pos += 1;
            }
            match self.peek() {
                None => return Err(WcError::malformed("unterminated skel list")),
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Skel::List(children));
                }
                Some(_) => children.push(self.element()?),
            }
        }
    }

    fn implicit_atom(&mut self) -> Skel {
        let start = self.pos;
        while let Some(b) = self.peek() {
            let t = char_type(b);
            if t == CharType::Space || t == CharType::Paren {
                break;
            }
            self.pos += 1;
        }
        Skel::Atom(self.data.slice(start..self.pos))
    }

    fn explicit_atom(&mut self) -> Result<Skel> {
        let remaining = self.end - self.pos;
        let mut len: usize = 0;
        while let Some(b) = self.peek().filter(|b| b.is_ascii_digit()) {
            len = len
                .checked_mul(10)
                .and_then(|n| n.checked_add(usize::from(b - b'0')))
                .filter(|n| *n <= remaining)
                .ok_or_else(|| WcError::malformed("explicit atom length exceeds buffer"))?;
            self.pos += 1;
        }
        match self.peek() {
            Some(b) if char_type(b) == CharType::Space => self.pos += 1,
            _ => return Err(WcError::malformed("missing separator after atom length")),
        }
        if len > self.end - self.pos {
            return Err(WcError::malformed("explicit atom length exceeds buffer"));
        }
        let atom = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(Skel::Atom(atom))
    }
}
