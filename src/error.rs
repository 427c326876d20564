//! Error types for recap
//!
//! All modules use `RecapResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for recap operations
pub type RecapResult<T> = Result<T, RecapError>;

/// All errors that can occur in recap
#[derive(Error, Debug)]
pub enum RecapError {
    // Launch errors
    #[error("Failed to launch {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No command given")]
    EmptyCommand,

    // Trace errors
    #[error("Trace failed: {0}")]
    Trace(String),

    // Store errors
    #[error("Cache store corrupted at {path}: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("Failed to lock cache entry {identity}: {source}")]
    StoreLock {
        identity: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing blob {digest} in store")]
    BlobMissing { digest: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecapError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a launch error for a command line
    pub fn launch(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Launch {
            command: command.into(),
            source,
        }
    }

    /// Create a trace error
    pub fn trace(reason: impl Into<String>) -> Self {
        Self::Trace(reason.into())
    }

    /// Create a store corruption error
    pub fn store_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Exit code to surface when this error aborts a wrapped run.
    ///
    /// Launch failures follow the shell convention: 127 for a missing
    /// executable, 126 for one that cannot be executed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Launch { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => 127,
                std::io::ErrorKind::PermissionDenied => 126,
                _ => 125,
            },
            Self::EmptyCommand => 2,
            _ => 1,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::EmptyCommand => Some("Usage: recap run -- <command> [args...]"),
            Self::StoreCorrupt { .. } => Some("Run: recap cache clear"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn error_display() {
        let err = RecapError::launch("make all", io::Error::from_raw_os_error(libc::ENOENT));
        let text = err.to_string();
        assert!(text.contains("make all"));
        assert!(text.contains("No such file"));
    }

    #[test]
    fn launch_exit_codes() {
        let not_found = RecapError::launch("x", io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(not_found.exit_code(), 127);

        let denied = RecapError::launch("x", io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(denied.exit_code(), 126);

        assert_eq!(RecapError::trace("lost child").exit_code(), 1);
    }

    #[test]
    fn error_hint() {
        assert!(RecapError::EmptyCommand.hint().is_some());
        assert!(RecapError::trace("x").hint().is_none());
    }
}
