//! Per-process tracking state: descriptor tables and half-finished
//! syscalls between the entry and exit stops.

use crate::artifact::StreamId;
use crate::trace::event::AccessMode;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// What a tracked descriptor refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FdKind {
    /// A regular file the tracee opened. `write` marks descriptors
    /// whose close settles an output.
    File { path: PathBuf, write: bool },
    /// The inherited stdout or stderr, or a duplicate of one.
    Stream(StreamId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdEntry {
    pub kind: FdKind,
    pub cloexec: bool,
}

/// Descriptor table of one process, or of several processes that share
/// one via CLONE_FILES. Untracked descriptors (sockets, pipes, ignored
/// paths) simply have no entry.
#[derive(Debug, Clone, Default)]
pub struct FdTable {
    entries: HashMap<i32, FdEntry>,
}

impl FdTable {
    /// Table for the root process: its stdout and stderr are ours.
    pub fn with_streams() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            1,
            FdEntry {
                kind: FdKind::Stream(StreamId::Stdout),
                cloexec: false,
            },
        );
        entries.insert(
            2,
            FdEntry {
                kind: FdKind::Stream(StreamId::Stderr),
                cloexec: false,
            },
        );
        FdTable { entries }
    }

    pub fn insert(&mut self, fd: i32, entry: FdEntry) {
        self.entries.insert(fd, entry);
    }

    pub fn remove(&mut self, fd: i32) -> Option<FdEntry> {
        self.entries.remove(&fd)
    }

    pub fn get(&self, fd: i32) -> Option<&FdEntry> {
        self.entries.get(&fd)
    }

    /// Close-on-exec sweep at an exec boundary. Returns the dropped
    /// entries so write-file closes can be reported.
    pub fn drop_cloexec(&mut self) -> Vec<FdEntry> {
        let doomed: Vec<i32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.cloexec)
            .map(|(fd, _)| *fd)
            .collect();
        doomed
            .into_iter()
            .filter_map(|fd| self.entries.remove(&fd))
            .collect()
    }

    /// Paths of every write descriptor still open. Used when a process
    /// exits without closing, which counts as an implicit close.
    pub fn write_file_paths(&self) -> Vec<PathBuf> {
        self.entries
            .values()
            .filter_map(|e| match &e.kind {
                FdKind::File { path, write: true } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub type SharedFds = Rc<RefCell<FdTable>>;

/// A syscall decoded at its entry stop, waiting for the exit stop to
/// learn whether it succeeded.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Open {
        path: PathBuf,
        mode: AccessMode,
        cloexec: bool,
        alias: Option<StreamId>,
    },
    Close {
        fd: i32,
    },
    StreamWrite {
        fd: i32,
        addr: u64,
        len: u64,
    },
    StreamWritev {
        fd: i32,
        iov: u64,
        iovcnt: u64,
    },
    Dup {
        old: i32,
        new: Option<i32>,
        cloexec: bool,
    },
    Clone {
        flags: u64,
    },
    Exec {
        path: PathBuf,
    },
    Other,
}

/// One traced process.
pub struct Tracee {
    pub pid: i32,
    pub fds: SharedFds,
    pub pending: Option<PendingOp>,
    /// Set for children registered from a fork event before their
    /// initial SIGSTOP arrived; that stop is swallowed, not forwarded.
    pub attach_pending: bool,
}

impl Tracee {
    pub fn root(pid: i32) -> Self {
        Tracee {
            pid,
            fds: Rc::new(RefCell::new(FdTable::with_streams())),
            pending: None,
            attach_pending: false,
        }
    }

    pub fn child(pid: i32, fds: SharedFds, attach_pending: bool) -> Self {
        Tracee {
            pid,
            fds,
            pending: None,
            attach_pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_entry(path: &str, write: bool, cloexec: bool) -> FdEntry {
        FdEntry {
            kind: FdKind::File {
                path: PathBuf::from(path),
                write,
            },
            cloexec,
        }
    }

    #[test]
    fn root_table_tracks_both_streams() {
        let table = FdTable::with_streams();
        assert_eq!(
            table.get(1).map(|e| &e.kind),
            Some(&FdKind::Stream(StreamId::Stdout))
        );
        assert_eq!(
            table.get(2).map(|e| &e.kind),
            Some(&FdKind::Stream(StreamId::Stderr))
        );
        assert!(table.get(0).is_none());
    }

    #[test]
    fn cloexec_sweep_returns_dropped_entries() {
        let mut table = FdTable::with_streams();
        table.insert(3, file_entry("/tmp/kept", true, false));
        table.insert(4, file_entry("/tmp/dropped", true, true));
        let dropped = table.drop_cloexec();
        assert_eq!(dropped.len(), 1);
        assert!(table.get(3).is_some());
        assert!(table.get(4).is_none());
    }

    #[test]
    fn write_paths_ignore_read_descriptors() {
        let mut table = FdTable::default();
        table.insert(3, file_entry("/tmp/in", false, false));
        table.insert(4, file_entry("/tmp/out", true, false));
        assert_eq!(table.write_file_paths(), vec![PathBuf::from("/tmp/out")]);
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let mut table = FdTable::with_streams();
        let copy = table.clone();
        table.remove(1);
        assert_eq!(table.len(), 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn shared_table_is_visible_through_both_handles() {
        let shared: SharedFds = Rc::new(RefCell::new(FdTable::with_streams()));
        let alias = Rc::clone(&shared);
        shared.borrow_mut().insert(5, file_entry("/tmp/x", true, false));
        assert!(alias.borrow().get(5).is_some());
        assert_eq!(Rc::strong_count(&shared), 2);
    }
}
