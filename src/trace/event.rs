//! Events emitted by the supervisor as the traced process tree runs.

use crate::artifact::{ExitStatus, StreamId};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

/// One observation about the traced tree. Paths are absolute and
/// lexically normalized by the supervisor before they get here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A file was opened. Read opens should be digested now, while the
    /// content is what the tracee saw.
    FileOpened {
        pid: i32,
        path: PathBuf,
        mode: AccessMode,
    },
    /// The last write descriptor for this path went away, so the
    /// content is settled.
    FileClosed { pid: i32, path: PathBuf },
    /// An open failed with ENOENT. Absence is part of the dependency
    /// set: the file appearing later must invalidate the result.
    FileMissing { pid: i32, path: PathBuf },
    /// Bytes written to stdout or stderr, in observed order.
    StreamWrite {
        pid: i32,
        stream: StreamId,
        bytes: Vec<u8>,
    },
    ProcessSpawned { pid: i32, parent: i32 },
    ProcessExec { pid: i32, path: PathBuf },
    ProcessExited { pid: i32, status: ExitStatus },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::FileOpened { pid, path, mode } => {
                write!(f, "[{pid}] open {} ({mode})", path.display())
            }
            TraceEvent::FileClosed { pid, path } => {
                write!(f, "[{pid}] close {}", path.display())
            }
            TraceEvent::FileMissing { pid, path } => {
                write!(f, "[{pid}] missing {}", path.display())
            }
            TraceEvent::StreamWrite { pid, stream, bytes } => {
                write!(f, "[{pid}] {stream} {} bytes", bytes.len())
            }
            TraceEvent::ProcessSpawned { pid, parent } => {
                write!(f, "[{pid}] spawned by {parent}")
            }
            TraceEvent::ProcessExec { pid, path } => {
                write!(f, "[{pid}] exec {}", path.display())
            }
            TraceEvent::ProcessExited { pid, status } => {
                write!(f, "[{pid}] {status}")
            }
        }
    }
}

/// Receives events as they happen. The supervisor calls this from its
/// blocking dispatch loop, so implementations should stay cheap.
pub trait EventSink {
    fn on_event(&mut self, event: &TraceEvent);
}

/// Collects events in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<TraceEvent>,
}

impl EventSink for RecordingSink {
    fn on_event(&mut self, event: &TraceEvent) {
        self.events.push(event.clone());
    }
}
