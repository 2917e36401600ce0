//! Content digests for stored image payloads.
//!
//! A digest is the SHA-256 of a payload's bytes rendered as 64 lowercase hex
//! characters. The same text is used as the storage key and as the literal
//! `src` value written into stored note content, so the encoding must never
//! change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// Length of a digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 digest of a stored payload, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Compute the digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Parse a digest from its textual form.
    ///
    /// Only the canonical encoding is accepted: exactly 64 characters from
    /// `[0-9a-f]`; uppercase hex is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        if Self::is_canonical(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidInput(format!("not a digest: {:?}", s)))
        }
    }

    /// Check whether `s` is a canonical digest without allocating.
    pub fn is_canonical(s: &str) -> bool {
        s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if Self::is_canonical(&s) {
            Ok(Self(s))
        } else {
            Err(Error::InvalidInput(format!("not a digest: {:?}", s)))
        }
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
