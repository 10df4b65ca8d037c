//! Content hashing for workspace files and history artifacts.

use crate::error::{HistoryError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A 32-byte SHA-256 content hash.
///
/// Hashes are computed over exact file bytes and carried on the wire as
/// lowercase hex. Two files with the same bytes always hash equal, which is
/// what lets the engine detect external modification without storing full
/// copies of every state.
///
/// # Examples
///
/// ```
/// use hist_core::ContentHash;
///
/// let h = ContentHash::of_bytes(b"hello\n");
/// assert_eq!(h.as_hex().len(), 64);
/// assert_eq!(h, ContentHash::of_bytes(b"hello\n"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The length of a hash as a hex string.
    pub const HEX_LEN: usize = 64;

    /// Creates a ContentHash from raw digest bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Computes the hash of a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Computes the hash of a file's contents, streaming in 8 KiB chunks.
    ///
    /// Returns `Ok(None)` when the file does not exist, mirroring the log
    /// convention that an absent file has a null hash.
    pub fn of_file(path: &Path) -> Result<Option<Self>> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Some(Self(hasher.finalize().into())))
    }

    /// Returns this hash as a lowercase hex string.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the first 8 hex characters, for display.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parses a hash from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the string is not exactly 64 hex chars.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(HistoryError::Serialization(format!(
                "expected {} hex chars for content hash, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HistoryError::Serialization("invalid hash length".to_string()))?;
        Ok(Self(arr))
    }
}

/// Renders an optional hash for error messages: hex or "absent".
pub fn describe_hash(hash: Option<ContentHash>) -> String {
    match hash {
        Some(h) => h.as_hex(),
        None => "absent".to_string(),
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}...)", &self.as_hex()[..12])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
