//! The on-disk cache: one decision trie per invocation identity plus
//! a shared content-addressed object store.
//!
//! Layout under the store root:
//!
//! ```text
//! index/<identity>/meta.json      what was invoked
//! index/<identity>/.lock          writer exclusion, per identity
//! index/<identity>/root/...       trie of input edges and recordings
//! objects/<2-hex>/<digest>        file and stream content
//! ```
//!
//! Writers lock one identity at a time and land every file atomically
//! via temp-and-rename, so readers go lockless.

pub mod blob;
pub mod recording;
pub mod trie;

use crate::artifact::ExitStatus;
use crate::digest::Digest;
use crate::error::{RecapError, RecapResult};
use crate::extract::Dependencies;
use crate::identity::InvocationIdentity;
use blob::BlobStore;
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use recording::{IdentityMeta, OutputRecord, Recording, StreamChunk, STORE_FORMAT};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use trie::TrieNode;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

#[derive(Debug, Default)]
pub struct StoreStats {
    pub identities: u64,
    pub recordings: u64,
    pub objects: u64,
    pub object_bytes: u64,
}

/// One identity directory, as listed by `cache ls`.
#[derive(Debug)]
pub struct IdentitySummary {
    pub hex: String,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
    pub recordings: u64,
}

impl CacheStore {
    /// Opening never touches the filesystem; directories appear on
    /// first write.
    pub fn open(root: PathBuf) -> Self {
        CacheStore { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    fn blobs(&self) -> BlobStore {
        BlobStore::new(self.root.join("objects"))
    }

    /// Entry point of the validation walk: the trie root for this
    /// identity, or `None` when nothing has been recorded for it.
    pub fn identity_root(&self, identity: &InvocationIdentity) -> Option<TrieNode> {
        let dir = self.index_dir().join(identity.hex()).join("root");
        dir.is_dir().then(|| TrieNode::new(dir))
    }

    pub fn blob(&self, digest: &Digest) -> RecapResult<Vec<u8>> {
        self.blobs().get(digest)
    }

    /// Persist one finished run. Output content is read and digested
    /// here, once, after the tree has fully exited; this also settles
    /// writes that only reached the file through a shared mapping.
    pub fn record(
        &self,
        identity: &InvocationIdentity,
        deps: &Dependencies,
        status: ExitStatus,
        processes: u32,
        wall_ms: u64,
    ) -> RecapResult<()> {
        let identity_dir = self.index_dir().join(identity.hex());
        std::fs::create_dir_all(&identity_dir)
            .map_err(|e| RecapError::io("creating the identity directory", e))?;
        let _guard = lock_identity(&identity_dir, identity)?;

        if read_json::<IdentityMeta>(&identity_dir.join("meta.json"))
            .unwrap_or(None)
            .is_none()
        {
            let meta = IdentityMeta {
                format: STORE_FORMAT,
                exe: identity.exe.clone(),
                argv: identity.argv.clone(),
                cwd: identity.cwd.clone(),
                env: identity.env.clone(),
                created_at: Utc::now(),
            };
            write_json_atomic(&identity_dir.join("meta.json"), &meta)?;
        }

        let mut node_dir = identity_dir.join("root");
        std::fs::create_dir_all(&node_dir)
            .map_err(|e| RecapError::io("creating the trie root", e))?;
        for (path, digest) in deps.inputs() {
            let edge = recording::EdgeRecord {
                path: path.clone(),
                digest: *digest,
            };
            node_dir = trie::ensure_edge(&node_dir, &edge)?;
        }

        let blobs = self.blobs();
        let mut outputs = Vec::with_capacity(deps.outputs().len());
        for path in deps.outputs() {
            let meta = std::fs::metadata(path)
                .map_err(|e| RecapError::io(format!("inspecting output {}", path.display()), e))?;
            if !meta.is_file() {
                return Err(RecapError::Internal(format!(
                    "output {} is not a regular file",
                    path.display()
                )));
            }
            let bytes = std::fs::read(path)
                .map_err(|e| RecapError::io(format!("reading output {}", path.display()), e))?;
            let digest = blobs.put(&bytes)?;
            outputs.push(OutputRecord {
                path: path.clone(),
                digest,
                mode: meta.permissions().mode() & 0o7777,
            });
        }
        let stdout = blobs.put(deps.stdout_bytes())?;
        let stderr = blobs.put(deps.stderr_bytes())?;

        let rec = Recording {
            format: STORE_FORMAT,
            outputs,
            chunks: deps
                .chunks()
                .iter()
                .map(|(stream, len)| StreamChunk {
                    stream: *stream,
                    len: *len,
                })
                .collect(),
            stdout,
            stderr,
            status,
            created_at: Utc::now(),
            processes,
            wall_ms,
        };
        // Atomic leaf replacement: concurrent readers see old or new,
        // never a torn recording.
        write_json_atomic(&node_dir.join("recording.json"), &rec)?;
        debug!(
            "recorded {} with {} inputs and {} outputs",
            identity.short(),
            deps.inputs().len(),
            deps.outputs().len()
        );
        Ok(())
    }

    pub fn stats(&self) -> RecapResult<StoreStats> {
        let mut stats = StoreStats::default();
        (stats.objects, stats.object_bytes) = self.blobs().usage()?;
        for summary in self.identities()? {
            stats.identities += 1;
            stats.recordings += summary.recordings;
        }
        Ok(stats)
    }

    pub fn identities(&self) -> RecapResult<Vec<IdentitySummary>> {
        let entries = match std::fs::read_dir(self.index_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RecapError::io("listing the cache index", e)),
        };
        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RecapError::io("listing the cache index", e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir = entry.path();
            let hex = entry.file_name().to_string_lossy().into_owned();
            let meta = match read_json::<IdentityMeta>(&dir.join("meta.json")) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("skipping unreadable identity {}: {}", hex, e);
                    None
                }
            };
            let recordings = trie::count_recordings(&dir.join("root"));
            summaries.push(IdentitySummary {
                hex,
                argv: meta.as_ref().map(|m| m.argv.clone()).unwrap_or_default(),
                cwd: meta
                    .as_ref()
                    .map(|m| m.cwd.clone())
                    .unwrap_or_else(|| PathBuf::from("?")),
                created_at: meta.as_ref().map(|m| m.created_at),
                recordings,
            });
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Remove the entire store. The next recorded run recreates it.
    pub fn clear(&self) -> RecapResult<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecapError::io("clearing the store", e)),
        }
    }
}

/// Exclusive writer lock for one identity, released on drop. Readers
/// never take it.
struct IdentityLock {
    file: std::fs::File,
}

impl Drop for IdentityLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_identity(identity_dir: &Path, identity: &InvocationIdentity) -> RecapResult<IdentityLock> {
    let path = identity_dir.join(".lock");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| RecapError::StoreLock {
            identity: identity.short(),
            source: e,
        })?;
    FileExt::lock_exclusive(&file).map_err(|e| RecapError::StoreLock {
        identity: identity.short(),
        source: e,
    })?;
    Ok(IdentityLock { file })
}

/// Write via a uniquely named sibling, fsync, then rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".partial-{}", Uuid::new_v4()));
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// `None` for a missing file, `StoreCorrupt` for an unparseable one.
/// Read paths downgrade the error to a miss; write paths under the
/// lock repair or report it.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> RecapResult<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(RecapError::store_corrupt(path.to_path_buf(), e.to_string())),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RecapError::io(format!("reading {}", path.display()), e)),
    }
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> RecapResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).map_err(|e| RecapError::io(format!("writing {}", path.display()), e))
}
