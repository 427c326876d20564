//! Configuration schema for recap
//!
//! Configuration is stored at `~/.config/recap/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run defaults
    pub run: RunConfig,

    /// Store settings
    pub store: StoreConfig,

    /// Invocation identity settings
    pub identity: IdentityConfig,

    /// Tracer settings
    pub trace: TraceConfig,
}

impl Config {
    /// Root directory of the on-disk store.
    pub fn store_root(&self) -> PathBuf {
        self.store.root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("recap")
                .join("store")
        })
    }
}

/// Defaults for the run command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Cache mode: "disabled", "write-only", "read-only" or "read-write"
    pub mode: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: "read-write".to_string(),
        }
    }
}

/// Store location settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root directory (defaults to the user cache directory)
    pub root: Option<PathBuf>,
}

/// Which environment variables participate in invocation identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Environment variable names folded into the cache key
    pub env: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            env: vec![
                "PATH".to_string(),
                "LANG".to_string(),
                "LC_ALL".to_string(),
            ],
        }
    }
}

/// Tracer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Path prefixes whose accesses are neither inputs nor outputs
    pub ignore_prefixes: Vec<PathBuf>,

    /// Cap on captured stream bytes per run; 0 means unlimited.
    /// Runs that exceed the cap are executed but not recorded.
    pub max_stream_bytes: u64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            ignore_prefixes: vec![
                PathBuf::from("/dev"),
                PathBuf::from("/proc"),
                PathBuf::from("/sys"),
            ],
            max_stream_bytes: 0,
        }
    }
}
