//! On-disk schemas for the cache: identity metadata, trie edges and
//! recorded results. All of them are small JSON documents; bulk bytes
//! live in the blob store and are referenced by digest.

use crate::artifact::{ExitStatus, StreamId};
use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bumped when any on-disk schema changes shape. Readers treat an
/// unknown format as a miss rather than an error.
pub const STORE_FORMAT: u32 = 1;

/// Describes the invocation an identity directory belongs to. Purely
/// informational; the directory name already commits to the digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMeta {
    pub format: u32,
    pub exe: PathBuf,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
}

/// One trie edge: the input path consulted at this depth and the
/// content it must hold for this branch to apply. The file carries the
/// full untruncated values; directory names only abbreviate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub path: PathBuf,
    pub digest: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub path: PathBuf,
    pub digest: Digest,
    /// Unix permission bits, reapplied on replay.
    pub mode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub stream: StreamId,
    pub len: u64,
}

/// A complete recorded result, stored at a trie leaf. The inputs that
/// selected it are spelled by the edges above it, not repeated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub format: u32,
    pub outputs: Vec<OutputRecord>,
    /// Stream interleaving in observed order; lengths index into the
    /// stdout and stderr blobs.
    pub chunks: Vec<StreamChunk>,
    pub stdout: Digest,
    pub stderr: Digest,
    pub status: ExitStatus,
    pub created_at: DateTime<Utc>,
    pub processes: u32,
    pub wall_ms: u64,
}

impl Recording {
    pub fn is_current_format(&self) -> bool {
        self.format == STORE_FORMAT
    }
}
