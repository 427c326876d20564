//! The tracing supervisor: spawns the command with tracing enabled and
//! drives every process in the resulting tree through a single
//! `waitpid` dispatch loop.
//!
//! Syscalls arrive as entry/exit stop pairs. Entry decodes arguments
//! into a [`PendingOp`]; exit consumes it once the return value is
//! known. Anything the model cannot express (renames, unlinks, mounts,
//! kernel-side copies into a stream) triggers a bail-out: every tracee
//! is detached and the command simply runs to completion uncached.

use crate::artifact::{ExitStatus, StreamId};
use crate::error::{RecapError, RecapResult};
use crate::trace::arch::{self, Sys, SyscallRegs};
use crate::trace::event::{AccessMode, EventSink, TraceEvent};
use crate::trace::ptrace;
use crate::trace::tracee::{FdEntry, FdKind, FdTable, PendingOp, SharedFds, Tracee};
use libc::c_int;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::process::CommandExt;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, warn};

/// Tuning knobs for one traced run.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    /// Paths under these prefixes are neither recorded nor protected;
    /// destructive syscalls confined to them do not bail.
    pub ignore_prefixes: Vec<PathBuf>,
    /// Stop capturing (and give up on recording) past this many stream
    /// bytes. Zero means unlimited.
    pub max_stream_bytes: u64,
}

/// Why a run stopped being recordable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bailout {
    /// A tracee issued a syscall outside the model.
    Syscall { pid: i32, name: &'static str },
    /// Captured stream output exceeded the configured cap.
    StreamCap { stream: StreamId },
    /// A child appeared whose parent died before telling us about it.
    Orphaned { pid: i32 },
}

impl fmt::Display for Bailout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bailout::Syscall { pid, name } => write!(f, "{name} in pid {pid}"),
            Bailout::StreamCap { stream } => write!(f, "the {stream} capture limit"),
            Bailout::Orphaned { pid } => write!(f, "an orphaned child (pid {pid})"),
        }
    }
}

/// Outcome of a traced run.
#[derive(Debug)]
pub struct TraceReport {
    pub status: ExitStatus,
    pub bailout: Option<Bailout>,
    pub processes: u32,
}

impl TraceReport {
    /// A run is only worth recording if every observation landed in
    /// the model and the root exited on its own.
    pub fn recordable(&self) -> bool {
        self.bailout.is_none() && matches!(self.status, ExitStatus::Exited(_))
    }
}

/// Launch `argv` under the tracer and observe it until the whole tree
/// has exited. The root pid is published through `root_pid_out` so a
/// signal handler can forward interrupts while this call blocks.
pub fn trace_command(
    argv: &[String],
    cwd: &Path,
    options: &TraceOptions,
    sink: &mut dyn EventSink,
    root_pid_out: &AtomicI32,
) -> RecapResult<TraceReport> {
    let Some((program, rest)) = argv.split_first() else {
        return Err(RecapError::EmptyCommand);
    };
    let mut command = Command::new(program);
    command.args(rest).current_dir(cwd);
    unsafe {
        command.pre_exec(|| ptrace::traceme());
    }
    let child = command
        .spawn()
        .map_err(|e| RecapError::launch(argv.join(" "), e))?;
    let root = child.id() as i32;
    root_pid_out.store(root, Ordering::SeqCst);

    wait_initial_stop(root)?;
    if let Err(e) = ptrace::set_options(root) {
        let _ = ptrace::kill(root, libc::SIGKILL);
        let _ = wait_for_exit(root);
        return Err(RecapError::io("configuring the tracer", e));
    }

    let mut supervisor = Supervisor::new(root, options, sink);
    supervisor.announce_root();
    ptrace::syscall_step(root, 0)
        .map_err(|e| RecapError::io("resuming the traced command", e))?;
    supervisor.run()?;

    let status = supervisor
        .root_status
        .ok_or_else(|| RecapError::trace("lost track of the root process"))?;
    Ok(TraceReport {
        status,
        bailout: supervisor.bailout,
        processes: supervisor.processes,
    })
}

fn wait_initial_stop(pid: i32) -> RecapResult<()> {
    match ptrace::wait_pid(pid).map_err(|e| RecapError::io("waiting for the traced command", e))? {
        Some(status) if libc::WIFSTOPPED(status) => Ok(()),
        Some(status) if libc::WIFEXITED(status) => Err(RecapError::trace(format!(
            "command exited with status {} before tracing began",
            libc::WEXITSTATUS(status)
        ))),
        _ => Err(RecapError::trace("command disappeared before tracing began")),
    }
}

fn wait_for_exit(pid: i32) -> io::Result<Option<ExitStatus>> {
    loop {
        match ptrace::wait_pid(pid)? {
            None => return Ok(None),
            Some(status) if libc::WIFEXITED(status) => {
                return Ok(Some(ExitStatus::Exited(libc::WEXITSTATUS(status))));
            }
            Some(status) if libc::WIFSIGNALED(status) => {
                return Ok(Some(ExitStatus::Signaled(libc::WTERMSIG(status))));
            }
            Some(_) => continue,
        }
    }
}

/// A decoded syscall entry: either something to finish at the exit
/// stop, or a reason to stop tracing.
enum Enter {
    Op(PendingOp),
    Bail(&'static str),
}

struct Supervisor<'a> {
    options: &'a TraceOptions,
    sink: &'a mut dyn EventSink,
    root: i32,
    tracees: HashMap<i32, Tracee>,
    /// Stops from pids we have not been introduced to yet. A child's
    /// initial SIGSTOP can arrive before its parent's fork event; the
    /// child stays suspended here until the event names it.
    held: HashSet<i32>,
    root_status: Option<ExitStatus>,
    bailout: Option<Bailout>,
    stream_bytes: u64,
    processes: u32,
}

impl<'a> Supervisor<'a> {
    fn new(root: i32, options: &'a TraceOptions, sink: &'a mut dyn EventSink) -> Self {
        let mut tracees = HashMap::new();
        tracees.insert(root, Tracee::root(root));
        Supervisor {
            options,
            sink,
            root,
            tracees,
            held: HashSet::new(),
            root_status: None,
            bailout: None,
            stream_bytes: 0,
            processes: 1,
        }
    }

    fn announce_root(&mut self) {
        let parent = std::process::id() as i32;
        self.sink.on_event(&TraceEvent::ProcessSpawned {
            pid: self.root,
            parent,
        });
        // The root's own exec happened before options were set, so no
        // exec event will fire for it; resolve the binary directly.
        if let Ok(exe) = std::fs::read_link(format!("/proc/{}/exe", self.root)) {
            self.sink.on_event(&TraceEvent::ProcessExec {
                pid: self.root,
                path: normalize(&exe),
            });
        }
    }

    fn run(&mut self) -> RecapResult<()> {
        loop {
            let Some((pid, status)) =
                ptrace::wait_any().map_err(|e| RecapError::io("waiting for tracees", e))?
            else {
                break;
            };
            if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
                self.reap(pid, status);
                if self.tracees.is_empty() && self.held.is_empty() && self.root_status.is_some() {
                    break;
                }
                continue;
            }
            if !libc::WIFSTOPPED(status) {
                continue;
            }
            match self.handle_stop(pid, status) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                    debug!("tracee {} vanished mid-stop", pid);
                }
                Err(e) => return Err(RecapError::io("handling a trace stop", e)),
            }
            if self.bailout.is_some() {
                self.finish_bailed(pid)?;
                break;
            }
        }
        Ok(())
    }

    fn handle_stop(&mut self, pid: i32, status: c_int) -> io::Result<()> {
        let sig = libc::WSTOPSIG(status);
        let event = status >> 8;

        if !self.tracees.contains_key(&pid) {
            // Unknown pid: a child racing ahead of its fork event.
            // Leave it suspended until the event registers it.
            self.held.insert(pid);
            return Ok(());
        }

        if sig == (libc::SIGTRAP | 0x80) {
            return self.handle_syscall_stop(pid);
        }
        if event == (libc::SIGTRAP | (libc::PTRACE_EVENT_FORK << 8))
            || event == (libc::SIGTRAP | (libc::PTRACE_EVENT_VFORK << 8))
        {
            return self.handle_fork_event(pid, false);
        }
        if event == (libc::SIGTRAP | (libc::PTRACE_EVENT_CLONE << 8)) {
            return self.handle_fork_event(pid, true);
        }
        if event == (libc::SIGTRAP | (libc::PTRACE_EVENT_EXEC << 8)) {
            return self.handle_exec_event(pid);
        }

        // Plain signal delivery. Swallow the synthetic attach stop of
        // a child we registered from its parent's event; forward
        // everything else untouched.
        let forward = match self.tracees.get_mut(&pid) {
            Some(t) if t.attach_pending && sig == libc::SIGSTOP => {
                t.attach_pending = false;
                0
            }
            _ => sig,
        };
        ptrace::syscall_step(pid, forward)
    }

    fn handle_syscall_stop(&mut self, pid: i32) -> io::Result<()> {
        let pending = match self.tracees.get_mut(&pid) {
            Some(t) => t.pending.take(),
            None => return Ok(()),
        };
        match pending {
            None => {
                let regs = arch::syscall_regs(pid)?;
                match self.decode_enter(pid, &regs)? {
                    Enter::Bail(name) => {
                        self.begin_bailout(Bailout::Syscall { pid, name });
                        return Ok(());
                    }
                    Enter::Op(op) => {
                        if let Some(t) = self.tracees.get_mut(&pid) {
                            t.pending = Some(op);
                        }
                    }
                }
            }
            Some(op) => {
                let regs = arch::syscall_regs(pid)?;
                self.finish_syscall(pid, op, regs.ret)?;
                if self.bailout.is_some() {
                    return Ok(());
                }
            }
        }
        ptrace::syscall_step(pid, 0)
    }

    fn handle_fork_event(&mut self, pid: i32, is_clone: bool) -> io::Result<()> {
        let child = ptrace::event_message(pid)? as i32;
        if !self.tracees.contains_key(&child) {
            let share = is_clone
                && matches!(
                    self.tracees.get(&pid).and_then(|t| t.pending.as_ref()),
                    Some(PendingOp::Clone { flags }) if flags & libc::CLONE_FILES as u64 != 0
                );
            let fds: SharedFds = match self.tracees.get(&pid) {
                Some(parent) if share => Rc::clone(&parent.fds),
                Some(parent) => Rc::new(RefCell::new(parent.fds.borrow().clone())),
                None => Rc::new(RefCell::new(FdTable::with_streams())),
            };
            let was_held = self.held.remove(&child);
            self.tracees.insert(child, Tracee::child(child, fds, !was_held));
            self.processes += 1;
            self.sink
                .on_event(&TraceEvent::ProcessSpawned { pid: child, parent: pid });
            if was_held {
                // Its attach stop was already consumed while held.
                if let Err(e) = ptrace::syscall_step(child, 0) {
                    if e.raw_os_error() != Some(libc::ESRCH) {
                        return Err(e);
                    }
                }
            }
        }
        ptrace::syscall_step(pid, 0)
    }

    fn handle_exec_event(&mut self, pid: i32) -> io::Result<()> {
        // Peek, do not take: the syscall exit stop that follows the
        // event still consumes this pending op to stay paired.
        let exec_path = match self.tracees.get(&pid).and_then(|t| t.pending.as_ref()) {
            Some(PendingOp::Exec { path }) => Some(path.clone()),
            _ => None,
        };
        let Some(path) = exec_path else {
            // An exec with no decoded entry behind it (a non-leader
            // thread execing, or an unreadable path argument) leaves
            // the dependency set incomplete.
            self.begin_bailout(Bailout::Syscall {
                pid,
                name: "execve",
            });
            return Ok(());
        };
        let dropped = self
            .tracees
            .get(&pid)
            .map(|t| t.fds.borrow_mut().drop_cloexec());
        if let Some(entries) = dropped {
            for entry in entries {
                if let FdKind::File { path, write: true } = entry.kind {
                    self.sink.on_event(&TraceEvent::FileClosed { pid, path });
                }
            }
        }
        self.sink.on_event(&TraceEvent::ProcessExec { pid, path });
        ptrace::syscall_step(pid, 0)
    }

    fn decode_enter(&self, pid: i32, regs: &SyscallRegs) -> io::Result<Enter> {
        let op = match arch::classify(regs.nr) {
            Sys::Open => self.decode_open(pid, libc::AT_FDCWD, regs.args[0], regs.args[1] as i32)?,
            Sys::Creat => self.decode_open(
                pid,
                libc::AT_FDCWD,
                regs.args[0],
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            )?,
            Sys::Openat => {
                self.decode_open(pid, regs.args[0] as i32, regs.args[1], regs.args[2] as i32)?
            }
            Sys::Openat2 => {
                // struct open_how starts with the u64 flags word.
                let mut buf = [0u8; 8];
                match ptrace::read_memory(pid, regs.args[2], &mut buf) {
                    Ok(8) => {
                        let flags = u64::from_ne_bytes(buf) as i32;
                        self.decode_open(pid, regs.args[0] as i32, regs.args[1], flags)?
                    }
                    _ => PendingOp::Other,
                }
            }
            Sys::Close => PendingOp::Close {
                fd: regs.args[0] as i32,
            },
            Sys::Write => {
                let fd = regs.args[0] as i32;
                if self.stream_at(pid, fd).is_some() {
                    PendingOp::StreamWrite {
                        fd,
                        addr: regs.args[1],
                        len: regs.args[2],
                    }
                } else {
                    PendingOp::Other
                }
            }
            Sys::Writev => {
                let fd = regs.args[0] as i32;
                if self.stream_at(pid, fd).is_some() {
                    PendingOp::StreamWritev {
                        fd,
                        iov: regs.args[1],
                        iovcnt: regs.args[2],
                    }
                } else {
                    PendingOp::Other
                }
            }
            Sys::Dup => PendingOp::Dup {
                old: regs.args[0] as i32,
                new: None,
                cloexec: false,
            },
            Sys::Dup2 => {
                let old = regs.args[0] as i32;
                let new = regs.args[1] as i32;
                if old == new {
                    PendingOp::Other
                } else {
                    PendingOp::Dup {
                        old,
                        new: Some(new),
                        cloexec: false,
                    }
                }
            }
            Sys::Dup3 => {
                let old = regs.args[0] as i32;
                let new = regs.args[1] as i32;
                if old == new {
                    PendingOp::Other
                } else {
                    PendingOp::Dup {
                        old,
                        new: Some(new),
                        cloexec: regs.args[2] as i32 & libc::O_CLOEXEC != 0,
                    }
                }
            }
            Sys::Fcntl => match regs.args[1] as i32 {
                libc::F_DUPFD => PendingOp::Dup {
                    old: regs.args[0] as i32,
                    new: None,
                    cloexec: false,
                },
                libc::F_DUPFD_CLOEXEC => PendingOp::Dup {
                    old: regs.args[0] as i32,
                    new: None,
                    cloexec: true,
                },
                _ => PendingOp::Other,
            },
            Sys::Clone => PendingOp::Clone {
                flags: regs.args[0],
            },
            Sys::Clone3 => {
                // struct clone_args starts with the u64 flags word.
                let mut buf = [0u8; 8];
                let flags = match ptrace::read_memory(pid, regs.args[0], &mut buf) {
                    Ok(8) => u64::from_ne_bytes(buf),
                    _ => 0,
                };
                PendingOp::Clone { flags }
            }
            Sys::Fork => PendingOp::Clone { flags: 0 },
            Sys::Exec { at } => self.decode_exec(pid, regs, at)?,
            Sys::FdTransfer { name, out_arg } => {
                let out = regs.args[out_arg] as i32;
                if self.stream_at(pid, out).is_some() {
                    return Ok(Enter::Bail(name));
                }
                PendingOp::Other
            }
            Sys::FdMutate { name } => {
                let fd = regs.args[0] as i32;
                let tracked_write = self.tracees.get(&pid).map_or(false, |t| {
                    matches!(
                        t.fds.borrow().get(fd),
                        Some(FdEntry {
                            kind: FdKind::File { write: true, .. },
                            ..
                        })
                    )
                });
                if tracked_write {
                    PendingOp::Other
                } else {
                    return Ok(Enter::Bail(name));
                }
            }
            Sys::PoisonPath { name, paths } => {
                for (dirfd_arg, path_arg) in paths {
                    let raw = match ptrace::read_cstring(pid, regs.args[*path_arg], 4096) {
                        Ok(raw) => raw,
                        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Err(e),
                        Err(_) => return Ok(Enter::Bail(name)),
                    };
                    if raw.is_empty() {
                        continue;
                    }
                    let dirfd = match dirfd_arg {
                        Some(i) => regs.args[*i] as i32,
                        None => libc::AT_FDCWD,
                    };
                    let path = resolve_at(pid, dirfd, &PathBuf::from(OsString::from_vec(raw)));
                    if !self.is_ignored(&path) {
                        return Ok(Enter::Bail(name));
                    }
                }
                PendingOp::Other
            }
            Sys::Poison(name) => return Ok(Enter::Bail(name)),
            Sys::Other => PendingOp::Other,
        };
        Ok(Enter::Op(op))
    }

    fn decode_open(
        &self,
        pid: i32,
        dirfd: i32,
        path_addr: u64,
        flags: i32,
    ) -> io::Result<PendingOp> {
        // Directory handles and path-only descriptors never carry
        // content; O_TMPFILE arrives with O_DIRECTORY set.
        if flags & (libc::O_DIRECTORY | libc::O_PATH) != 0 {
            return Ok(PendingOp::Other);
        }
        let raw = match ptrace::read_cstring(pid, path_addr, 4096) {
            Ok(raw) => raw,
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Err(e),
            Err(_) => return Ok(PendingOp::Other),
        };
        if raw.is_empty() {
            return Ok(PendingOp::Other);
        }
        let path = resolve_at(pid, dirfd, &PathBuf::from(OsString::from_vec(raw)));
        let cloexec = flags & libc::O_CLOEXEC != 0;
        if let Some(id) = stream_alias(&path) {
            return Ok(PendingOp::Open {
                path,
                mode: AccessMode::Write,
                cloexec,
                alias: Some(id),
            });
        }
        if self.is_ignored(&path) {
            return Ok(PendingOp::Other);
        }
        let mode = if flags & libc::O_ACCMODE == libc::O_RDONLY
            && flags & (libc::O_CREAT | libc::O_TRUNC) == 0
        {
            AccessMode::Read
        } else {
            AccessMode::Write
        };
        Ok(PendingOp::Open {
            path,
            mode,
            cloexec,
            alias: None,
        })
    }

    fn decode_exec(&self, pid: i32, regs: &SyscallRegs, at: bool) -> io::Result<PendingOp> {
        let (dirfd, path_addr) = if at {
            (regs.args[0] as i32, regs.args[1])
        } else {
            (libc::AT_FDCWD, regs.args[0])
        };
        let raw = match ptrace::read_cstring(pid, path_addr, 4096) {
            Ok(raw) => raw,
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Err(e),
            Err(_) => return Ok(PendingOp::Other),
        };
        let path = if raw.is_empty() {
            // execveat with AT_EMPTY_PATH runs the dirfd itself.
            match std::fs::read_link(format!("/proc/{pid}/fd/{dirfd}")) {
                Ok(p) => normalize(&p),
                Err(_) => return Ok(PendingOp::Other),
            }
        } else {
            resolve_at(pid, dirfd, &PathBuf::from(OsString::from_vec(raw)))
        };
        Ok(PendingOp::Exec { path })
    }

    fn finish_syscall(&mut self, pid: i32, op: PendingOp, ret: i64) -> io::Result<()> {
        match op {
            PendingOp::Open {
                path,
                mode,
                cloexec,
                alias,
            } => {
                if ret >= 0 {
                    let fd = ret as i32;
                    let kind = match alias {
                        Some(id) => FdKind::Stream(id),
                        None => FdKind::File {
                            path: path.clone(),
                            write: mode == AccessMode::Write,
                        },
                    };
                    if let Some(t) = self.tracees.get(&pid) {
                        t.fds.borrow_mut().insert(fd, FdEntry { kind, cloexec });
                    }
                    if alias.is_none() {
                        self.sink
                            .on_event(&TraceEvent::FileOpened { pid, path, mode });
                    }
                } else if ret == -(libc::ENOENT as i64) && alias.is_none() {
                    self.sink.on_event(&TraceEvent::FileMissing { pid, path });
                }
            }
            PendingOp::Close { fd } => {
                // Linux invalidates the descriptor even when close
                // reports an error, so the table entry goes either way.
                let removed = self
                    .tracees
                    .get(&pid)
                    .and_then(|t| t.fds.borrow_mut().remove(fd));
                if let Some(FdEntry {
                    kind: FdKind::File { path, write: true },
                    ..
                }) = removed
                {
                    self.sink.on_event(&TraceEvent::FileClosed { pid, path });
                }
            }
            PendingOp::StreamWrite { fd, addr, len } => {
                if ret > 0 {
                    if let Some(id) = self.stream_at(pid, fd) {
                        let take = (ret as u64).min(len) as usize;
                        let mut buf = vec![0u8; take];
                        match ptrace::read_memory(pid, addr, &mut buf) {
                            Ok(n) => {
                                buf.truncate(n);
                                if n < take {
                                    self.begin_bailout(Bailout::Syscall { pid, name: "write" });
                                } else {
                                    self.capture_stream(pid, id, buf);
                                }
                            }
                            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Err(e),
                            Err(e) => {
                                debug!("stream read failed for pid {}: {}", pid, e);
                                self.begin_bailout(Bailout::Syscall { pid, name: "write" });
                            }
                        }
                    }
                }
            }
            PendingOp::StreamWritev { fd, iov, iovcnt } => {
                if ret > 0 {
                    if let Some(id) = self.stream_at(pid, fd) {
                        match read_iovec_payload(pid, iov, iovcnt, ret as u64) {
                            Ok(Some(bytes)) => self.capture_stream(pid, id, bytes),
                            Ok(None) => {
                                self.begin_bailout(Bailout::Syscall { pid, name: "writev" });
                            }
                            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Err(e),
                            Err(e) => {
                                debug!("writev read failed for pid {}: {}", pid, e);
                                self.begin_bailout(Bailout::Syscall { pid, name: "writev" });
                            }
                        }
                    }
                }
            }
            PendingOp::Dup { old, new, cloexec } => {
                if ret >= 0 {
                    let target = new.unwrap_or(ret as i32);
                    let mut closed: Option<PathBuf> = None;
                    if let Some(t) = self.tracees.get(&pid) {
                        let mut fds = t.fds.borrow_mut();
                        if let Some(FdEntry {
                            kind: FdKind::File { path, write: true },
                            ..
                        }) = fds.remove(target)
                        {
                            closed = Some(path);
                        }
                        if let Some(entry) = fds.get(old).cloned() {
                            fds.insert(
                                target,
                                FdEntry {
                                    kind: entry.kind,
                                    cloexec,
                                },
                            );
                        }
                    }
                    if let Some(path) = closed {
                        self.sink.on_event(&TraceEvent::FileClosed { pid, path });
                    }
                }
            }
            PendingOp::Clone { .. } | PendingOp::Exec { .. } | PendingOp::Other => {}
        }
        Ok(())
    }

    fn capture_stream(&mut self, pid: i32, stream: StreamId, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.stream_bytes = self.stream_bytes.saturating_add(bytes.len() as u64);
        if self.options.max_stream_bytes > 0 && self.stream_bytes > self.options.max_stream_bytes {
            self.begin_bailout(Bailout::StreamCap { stream });
            return;
        }
        self.sink
            .on_event(&TraceEvent::StreamWrite { pid, stream, bytes });
    }

    fn stream_at(&self, pid: i32, fd: i32) -> Option<StreamId> {
        self.tracees.get(&pid).and_then(|t| match t.fds.borrow().get(fd) {
            Some(FdEntry {
                kind: FdKind::Stream(id),
                ..
            }) => Some(*id),
            _ => None,
        })
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.options
            .ignore_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }

    fn begin_bailout(&mut self, bailout: Bailout) {
        if self.bailout.is_none() {
            warn!("tracing bailed out at {}; running uncached", bailout);
            self.bailout = Some(bailout);
        }
    }

    fn reap(&mut self, pid: i32, status: c_int) {
        self.held.remove(&pid);
        if let Some(t) = self.tracees.remove(&pid) {
            // Exit closes every descriptor. Only the last holder of a
            // shared table settles its write files.
            if Rc::strong_count(&t.fds) == 1 {
                for path in t.fds.borrow().write_file_paths() {
                    self.sink.on_event(&TraceEvent::FileClosed { pid, path });
                }
            }
        }
        let exit = if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        };
        if pid == self.root {
            self.root_status = Some(exit);
        }
        self.sink
            .on_event(&TraceEvent::ProcessExited { pid, status: exit });

        // Held pids whose parents are all gone can never be
        // registered; cut them loose and give up on recording.
        if self.tracees.is_empty() && !self.held.is_empty() {
            let orphans: Vec<i32> = self.held.drain().collect();
            self.begin_bailout(Bailout::Orphaned { pid: orphans[0] });
            for orphan in orphans {
                let _ = ptrace::detach(orphan, 0);
                let _ = ptrace::kill(orphan, libc::SIGCONT);
            }
        }
    }

    /// Detach everything and wait for the real exit of the root. The
    /// command keeps running untraced; only recording is lost.
    fn finish_bailed(&mut self, current: i32) -> RecapResult<()> {
        let pids: Vec<i32> = self.tracees.keys().copied().collect();
        for pid in pids {
            if pid == current {
                continue;
            }
            // Nudge the tracee into a stop we can detach from.
            let _ = ptrace::kill(pid, libc::SIGSTOP);
            loop {
                match ptrace::wait_pid(pid).map_err(|e| RecapError::io("stopping a tracee", e))? {
                    None => break,
                    Some(status) if libc::WIFSTOPPED(status) => {
                        let _ = ptrace::detach(pid, 0);
                        let _ = ptrace::kill(pid, libc::SIGCONT);
                        break;
                    }
                    Some(status) if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) => {
                        if pid == self.root {
                            self.root_status = Some(if libc::WIFSIGNALED(status) {
                                ExitStatus::Signaled(libc::WTERMSIG(status))
                            } else {
                                ExitStatus::Exited(libc::WEXITSTATUS(status))
                            });
                        }
                        break;
                    }
                    Some(_) => continue,
                }
            }
        }
        let _ = ptrace::detach(current, 0);
        let _ = ptrace::kill(current, libc::SIGCONT);
        self.tracees.clear();
        self.held.clear();

        if let Some(status) =
            wait_for_exit(self.root).map_err(|e| RecapError::io("awaiting the detached root", e))?
        {
            self.root_status = Some(status);
        } else if self.root_status.is_none() {
            return Err(RecapError::trace("lost the root process while detaching"));
        }
        Ok(())
    }
}

fn tracee_cwd(pid: i32) -> PathBuf {
    std::fs::read_link(format!("/proc/{pid}/cwd")).unwrap_or_else(|_| PathBuf::from("/"))
}

/// Resolve a path argument the way the kernel would: absolute paths
/// stand alone, relative ones join the tracee's current directory or
/// the directory behind `dirfd`.
fn resolve_at(pid: i32, dirfd: i32, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    if dirfd == libc::AT_FDCWD {
        return normalize(&tracee_cwd(pid).join(path));
    }
    match std::fs::read_link(format!("/proc/{pid}/fd/{dirfd}")) {
        Ok(dir) => normalize(&dir.join(path)),
        Err(_) => normalize(&tracee_cwd(pid).join(path)),
    }
}

/// Lexical cleanup of `.` and `..` segments. Symlinks are left alone:
/// the path as the program named it is the path that gets recorded.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn stream_alias(path: &Path) -> Option<StreamId> {
    match path.to_str()? {
        "/dev/stdout" | "/dev/fd/1" | "/proc/self/fd/1" => Some(StreamId::Stdout),
        "/dev/stderr" | "/dev/fd/2" | "/proc/self/fd/2" => Some(StreamId::Stderr),
        _ => None,
    }
}

/// Gather the bytes a successful writev pushed out, walking the iovec
/// array until the returned count is consumed. `None` means tracee
/// memory went unreadable and the capture is incomplete.
fn read_iovec_payload(
    pid: i32,
    iov_addr: u64,
    iovcnt: u64,
    mut remaining: u64,
) -> io::Result<Option<Vec<u8>>> {
    let count = iovcnt.min(1024) as usize;
    let mut raw = vec![0u8; count * 16];
    let got = ptrace::read_memory(pid, iov_addr, &mut raw)?;
    let mut out = Vec::new();
    for entry in raw[..got].chunks_exact(16) {
        if remaining == 0 {
            break;
        }
        let (base_bytes, len_bytes) = entry.split_at(8);
        let base = u64::from_ne_bytes(base_bytes.try_into().unwrap());
        let len = u64::from_ne_bytes(len_bytes.try_into().unwrap());
        let take = len.min(remaining) as usize;
        if take == 0 {
            continue;
        }
        let mut buf = vec![0u8; take];
        let n = ptrace::read_memory(pid, base, &mut buf)?;
        buf.truncate(n);
        remaining -= buf.len() as u64;
        out.extend_from_slice(&buf);
        if n < take {
            return Ok(None);
        }
    }
    if remaining > 0 {
        return Ok(None);
    }
    Ok(Some(out))
}
