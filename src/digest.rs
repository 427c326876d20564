//! Content digests: the identity primitive for paths, file contents,
//! streams, and invocations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io;
use std::path::Path;

/// A SHA-256 digest.
///
/// Everything the cache compares for equality is reduced to one of
/// these: file contents, path strings, stream payloads, invocation
/// identities.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Sentinel digest recorded when a read target did not exist.
    /// Absence is a verifiable precondition, not an error.
    pub const ABSENT: Digest = Digest([0u8; 32]);

    /// Digest of a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Digest of a path string, used for trie edge keys.
    pub fn of_path(path: &Path) -> Self {
        Self::of_bytes(path.as_os_str().as_encoded_bytes())
    }

    /// Digest of a file's current contents. A missing file yields
    /// [`Digest::ABSENT`]; other read failures propagate.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        match std::fs::read(path) {
            Ok(data) => Ok(Self::of_bytes(&data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::ABSENT),
            Err(e) => Err(e),
        }
    }

    pub fn is_absent(&self) -> bool {
        *self == Self::ABSENT
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters, used for directory names and log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid digest hex"))
    }
}

/// Incremental digest over a sequence of fields.
///
/// Each field is length-prefixed so that adjacent fields can never
/// alias ("ab" + "c" hashes differently from "a" + "bc").
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn field(&mut self, data: &[u8]) {
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }

    pub fn finish(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

impl Default for DigestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
