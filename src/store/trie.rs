//! The decision trie of one identity. Each node is a directory; each
//! child edge is a subdirectory named by abbreviated path and content
//! digests, carrying the full pair in its `edge.json`. A node with a
//! `recording.json` is a leaf holding a complete result.
//!
//! Lookups never take the lock: edges are immutable once written and
//! leaves are replaced atomically, so a reader sees either the old
//! recording or the new one, never a torn state.

use crate::digest::Digest;
use crate::error::{RecapError, RecapResult};
use crate::store::recording::{EdgeRecord, Recording};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EDGE_FILE: &str = "edge.json";
const RECORDING_FILE: &str = "recording.json";

/// One position in the trie.
#[derive(Debug, Clone)]
pub struct TrieNode {
    dir: PathBuf,
}

/// An outgoing edge: follow it when `path` currently digests to
/// `digest`.
#[derive(Debug)]
pub struct TrieEdge {
    pub path: PathBuf,
    pub digest: Digest,
    pub node: TrieNode,
}

impl TrieNode {
    pub(crate) fn new(dir: PathBuf) -> Self {
        TrieNode { dir }
    }

    /// The recording stored at this node, if any. Unreadable or
    /// outdated recordings count as absent; a stale cache entry is a
    /// miss, not a failure.
    pub fn recording(&self) -> Option<Recording> {
        match super::read_json::<Recording>(&self.dir.join(RECORDING_FILE)) {
            Ok(Some(rec)) if rec.is_current_format() => Some(rec),
            Ok(Some(rec)) => {
                debug!(
                    "ignoring recording with format {} at {}",
                    rec.format,
                    self.dir.display()
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("ignoring unreadable recording at {}: {}", self.dir.display(), e);
                None
            }
        }
    }

    /// All outgoing edges. Directories without a readable marker are
    /// skipped; a half-written edge must never abort a lookup.
    pub fn children(&self) -> Vec<TrieEdge> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut edges = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            match super::read_json::<EdgeRecord>(&dir.join(EDGE_FILE)) {
                Ok(Some(edge)) => edges.push(TrieEdge {
                    path: edge.path,
                    digest: edge.digest,
                    node: TrieNode::new(dir),
                }),
                Ok(None) => {}
                Err(e) => warn!("skipping unreadable edge at {}: {}", dir.display(), e),
            }
        }
        edges
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Directory name of an edge. Digests are abbreviated for the name
/// only; `edge.json` keeps the full values.
fn edge_dir_name(path: &Path, digest: &Digest) -> String {
    format!("{}-{}", Digest::of_path(path).short(), digest.short())
}

/// Find or create the child of `parent` for this edge, returning its
/// directory. Called under the identity lock during recording.
pub(crate) fn ensure_edge(parent: &Path, edge: &EdgeRecord) -> RecapResult<PathBuf> {
    let dir = parent.join(edge_dir_name(&edge.path, &edge.digest));
    let marker = dir.join(EDGE_FILE);
    match super::read_json::<EdgeRecord>(&marker) {
        Ok(Some(existing)) if existing == *edge => {}
        Ok(Some(_)) => {
            // Abbreviated names clashed for two different inputs.
            return Err(RecapError::store_corrupt(
                dir,
                "edge name collides with a different input",
            ));
        }
        // Absent or unreadable: (re)write the marker. We hold the
        // identity lock, so nobody else is mid-write here.
        Ok(None) | Err(_) => {
            std::fs::create_dir_all(&dir)
                .map_err(|e| RecapError::io(format!("creating {}", dir.display()), e))?;
            super::write_json_atomic(&marker, edge)?;
        }
    }
    Ok(dir)
}

/// Recordings reachable from `dir`, including its own.
pub(crate) fn count_recordings(dir: &Path) -> u64 {
    let node = TrieNode::new(dir.to_path_buf());
    let mut count = u64::from(node.recording().is_some());
    for edge in node.children() {
        count += count_recordings(edge.node.dir());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::write_json_atomic;
    use chrono::Utc;
    use tempfile::TempDir;

    fn edge(path: &str, content: &[u8]) -> EdgeRecord {
        EdgeRecord {
            path: PathBuf::from(path),
            digest: Digest::of_bytes(content),
        }
    }

    fn sample_recording() -> Recording {
        Recording {
            format: crate::store::recording::STORE_FORMAT,
            outputs: Vec::new(),
            chunks: Vec::new(),
            stdout: Digest::of_bytes(b""),
            stderr: Digest::of_bytes(b""),
            status: crate::artifact::ExitStatus::Exited(0),
            created_at: Utc::now(),
            processes: 1,
            wall_ms: 1,
        }
    }

    #[test]
    fn empty_node_has_no_children_or_recording() {
        let dir = TempDir::new().unwrap();
        let node = TrieNode::new(dir.path().to_path_buf());
        assert!(node.children().is_empty());
        assert!(node.recording().is_none());
    }

    #[test]
    fn ensure_edge_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let e = edge("/src/a.c", b"int a;");
        let first = ensure_edge(dir.path(), &e).unwrap();
        let second = ensure_edge(dir.path(), &e).unwrap();
        assert_eq!(first, second);

        let node = TrieNode::new(dir.path().to_path_buf());
        let children = node.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, PathBuf::from("/src/a.c"));
        assert_eq!(children[0].digest, Digest::of_bytes(b"int a;"));
    }

    #[test]
    fn same_path_with_different_content_diverges() {
        let dir = TempDir::new().unwrap();
        let a = ensure_edge(dir.path(), &edge("/src/a.c", b"v1")).unwrap();
        let b = ensure_edge(dir.path(), &edge("/src/a.c", b"v2")).unwrap();
        assert_ne!(a, b);
        assert_eq!(TrieNode::new(dir.path().to_path_buf()).children().len(), 2);
    }

    #[test]
    fn name_collision_with_a_different_input_is_detected() {
        let dir = TempDir::new().unwrap();
        let honest = edge("/src/a.c", b"v1");
        let edge_dir = dir
            .path()
            .join(edge_dir_name(&honest.path, &honest.digest));
        std::fs::create_dir_all(&edge_dir).unwrap();
        write_json_atomic(&edge_dir.join(EDGE_FILE), &edge("/other/b.c", b"v9")).unwrap();

        match ensure_edge(dir.path(), &honest) {
            Err(RecapError::StoreCorrupt { .. }) => {}
            other => panic!("expected a collision error, got {other:?}"),
        }
    }

    #[test]
    fn recording_round_trips_at_a_leaf() {
        let dir = TempDir::new().unwrap();
        let leaf = ensure_edge(dir.path(), &edge("/in", b"x")).unwrap();
        write_json_atomic(&leaf.join(RECORDING_FILE), &sample_recording()).unwrap();

        let node = TrieNode::new(leaf);
        let rec = node.recording().unwrap();
        assert_eq!(rec.processes, 1);
    }

    #[test]
    fn corrupt_recording_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RECORDING_FILE), b"not json{").unwrap();
        let node = TrieNode::new(dir.path().to_path_buf());
        assert!(node.recording().is_none());
    }

    #[test]
    fn counts_recordings_across_depths() {
        let dir = TempDir::new().unwrap();
        write_json_atomic(&dir.path().join(RECORDING_FILE), &sample_recording()).unwrap();
        let leaf = ensure_edge(dir.path(), &edge("/in", b"x")).unwrap();
        write_json_atomic(&leaf.join(RECORDING_FILE), &sample_recording()).unwrap();
        assert_eq!(count_recordings(dir.path()), 2);
    }
}
