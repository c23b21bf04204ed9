//! Content checksums and content-addressed keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Algorithm prefix accepted (case-insensitively) in front of a hex digest.
pub const CHECKSUM_PREFIX: &str = "sha256:";

/// A SHA-256 digest identifying a complete payload.
///
/// The textual form is 64 lowercase hex characters. Parsing also accepts
/// uppercase hex and an optional `sha256:` prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Create a checksum from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the checksum of an in-memory payload.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Self::hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ChecksumHasher {
        ChecksumHasher(Sha256::new())
    }

    /// Parse from hex, with or without the `sha256:` prefix.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        let hex = match s.get(..CHECKSUM_PREFIX.len()) {
            Some(head) if head.eq_ignore_ascii_case(CHECKSUM_PREFIX) => &s[CHECKSUM_PREFIX.len()..],
            _ => s,
        };
        Self::from_hex(hex)
    }

    /// Parse from a bare hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidChecksum("checksum is empty".to_string()));
        }
        if s.len() != 64 {
            return Err(crate::Error::InvalidChecksum(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_value(pair[0])?;
            let lo = hex_value(pair[1])?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Key of the permanent object holding this content.
    ///
    /// Objects fan out over two directory levels so no single directory
    /// grows unbounded: `content/ab/cd/abcd...`.
    pub fn to_object_key(&self) -> String {
        let hex = self.to_hex();
        format!("content/{}/{}/{}", &hex[0..2], &hex[2..4], hex)
    }
}

fn hex_value(c: u8) -> crate::Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(crate::Error::InvalidChecksum(format!(
            "invalid hex character: {:?}",
            c as char
        ))),
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 hasher for streamed payloads.
pub struct ChecksumHasher(Sha256);

impl ChecksumHasher {
    /// Feed the next run of bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish and return the checksum.
    pub fn finalize(self) -> Checksum {
        Checksum(self.0.finalize().into())
    }
}

impl Default for ChecksumHasher {
    fn default() -> Self {
        Checksum::hasher()
    }
}
