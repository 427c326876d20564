//! The observable artifacts of a traced command: its standard streams
//! and how it finished. File artifacts live in the store schemas as
//! (path, content digest) records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the command's inherited standard output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamId {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// How the traced command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ExitStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Shell-convention exit code: the code itself, or 128 + signal.
    pub fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit {}", code),
            Self::Signaled(signal) => write!(f, "signal {}", signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_are_stable() {
        assert_eq!(StreamId::Stdout.to_string(), "stdout");
        assert_eq!(serde_json::to_string(&StreamId::Stderr).unwrap(), "\"stderr\"");
    }

    #[test]
    fn exit_code_mapping() {
        assert_eq!(ExitStatus::Exited(0).code(), 0);
        assert_eq!(ExitStatus::Exited(2).code(), 2);
        assert_eq!(ExitStatus::Signaled(9).code(), 137);
    }

    #[test]
    fn exit_status_serde() {
        let json = serde_json::to_string(&ExitStatus::Signaled(15)).unwrap();
        assert!(json.contains("signaled"));
        let back: ExitStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExitStatus::Signaled(15));
    }
}
