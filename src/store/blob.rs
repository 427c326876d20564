//! Content-addressed object storage. An object's name is the hex of
//! its digest, sharded by the first byte to keep directories small.
//! Objects are immutable: writing the same content twice is a no-op.

use crate::digest::Digest;
use crate::error::{RecapError, RecapResult};
use std::io;
use std::path::PathBuf;

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        BlobStore { root }
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    pub fn put(&self, bytes: &[u8]) -> RecapResult<Digest> {
        let digest = Digest::of_bytes(bytes);
        let path = self.object_path(&digest);
        // Same name means same content; nothing to do.
        if path.exists() {
            return Ok(digest);
        }
        super::write_atomic(&path, bytes)
            .map_err(|e| RecapError::io("writing a cached object", e))?;
        Ok(digest)
    }

    pub fn get(&self, digest: &Digest) -> RecapResult<Vec<u8>> {
        match std::fs::read(self.object_path(digest)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RecapError::BlobMissing {
                digest: digest.to_hex(),
            }),
            Err(e) => Err(RecapError::io("reading a cached object", e)),
        }
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.object_path(digest).exists()
    }

    /// Object count and total byte size, for `cache stats`.
    pub fn usage(&self) -> RecapResult<(u64, u64)> {
        let mut objects = 0u64;
        let mut bytes = 0u64;
        let shards = match std::fs::read_dir(&self.root) {
            Ok(iter) => iter,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(RecapError::io("listing cached objects", e)),
        };
        for shard in shards {
            let shard = shard.map_err(|e| RecapError::io("listing cached objects", e))?;
            if !shard.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            for entry in std::fs::read_dir(shard.path())
                .map_err(|e| RecapError::io("listing cached objects", e))?
            {
                let entry = entry.map_err(|e| RecapError::io("listing cached objects", e))?;
                if let Ok(meta) = entry.metadata() {
                    if meta.is_file() {
                        objects += 1;
                        bytes += meta.len();
                    }
                }
            }
        }
        Ok((objects, bytes))
    }
}
