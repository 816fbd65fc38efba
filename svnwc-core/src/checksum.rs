//! Content checksums
//!
//! Stored in the database as `$sha1$<hex>` or `$md5 $<hex>`.

use crate::error::{Result, WcError};
use sha1::{Digest, Sha1};
use std::fmt;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumKind {
    Sha1,
    Md5,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub digest: Vec<u8>,
}

impl Checksum {
    pub fn sha1_of(data: &[u8]) -> Self {
        Self { kind: ChecksumKind::Sha1, digest: Sha1::digest(data).to_vec() }
    }

    pub fn md5_of(data: &[u8]) -> Self {
        Self { kind: ChecksumKind::Md5, digest: md5::compute(data).0.to_vec() }
    }

    pub fn from_hex(kind: ChecksumKind, hex_digest: &str) -> Result<Self> {
        let digest = hex::decode(hex_digest)
            .map_err(|e| WcError::malformed(format!("bad checksum '{}': {}", hex_digest, e)))?;
        let expected = match kind {
            ChecksumKind::Sha1 => 20,
            ChecksumKind::Md5 => 16,
        };
        if digest.len() != expected {
            return Err(WcError::malformed(format!("bad checksum length in '{}'", hex_digest)));
        }
        Ok(Self { kind, digest })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Parse the `$kind$hex` database form.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(hex_digest) = s.strip_prefix("$sha1$") {
            Self::from_hex(ChecksumKind::Sha1, hex_digest)
        } else if let Some(hex_digest) = s.strip_prefix("$md5 $") {
            Self::from_hex(ChecksumKind::Md5, hex_digest)
        } else {
            Err(WcError::malformed(format!("unknown checksum format '{}'", s)))
        }
    }

    pub fn is_sha1(&self) -> bool {
        self.kind == ChecksumKind::Sha1
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChecksumKind::Sha1 => write!(f, "$sha1${}", self.to_hex()),
            ChecksumKind::Md5 => write!(f, "$md5 ${}", self.to_hex()),
        }
    }
}

/// Hash a stream with both algorithms in one pass, returning `(sha1, md5, size)`.
pub fn digest_reader<R: Read>(mut reader: R) -> Result<(Checksum, Checksum, u64)> {
    let mut sha = Sha1::new();
    let mut md = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha.update(&buf[..n]);
        md.consume(&buf[..n]);
        size += n as u64;
    }
    Ok((
        Checksum { kind: ChecksumKind::Sha1, digest: sha.finalize().to_vec() },
        Checksum { kind: ChecksumKind::Md5, digest: md.compute().0.to_vec() },
        size,
    ))
}
