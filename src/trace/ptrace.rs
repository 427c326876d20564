//! Thin wrappers over the raw tracing syscalls.
//!
//! Every wrapper returns `io::Result` with the OS error captured via
//! `io::Error::last_os_error()`; policy lives in the supervisor.

use libc::{c_int, c_long, c_void, pid_t};
use std::io;
use std::ptr;

/// Options applied to every tracee: syscall stops are distinguishable
/// from signal stops, new children are attached before they run, and
/// the whole tree dies with the tracer.
const TRACE_OPTIONS: c_int = libc::PTRACE_O_TRACESYSGOOD
    | libc::PTRACE_O_TRACEFORK
    | libc::PTRACE_O_TRACEVFORK
    | libc::PTRACE_O_TRACECLONE
    | libc::PTRACE_O_TRACEEXEC
    | libc::PTRACE_O_EXITKILL;

fn check(rc: c_long) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Mark the calling process as traced by its parent. Called between
/// fork and exec; only async-signal-safe work is allowed there.
pub fn traceme() -> io::Result<()> {
    let rc = unsafe {
        libc::ptrace(
            libc::PTRACE_TRACEME,
            0,
            ptr::null_mut::<c_void>(),
            ptr::null_mut::<c_void>(),
        )
    };
    check(rc)
}

pub fn set_options(pid: pid_t) -> io::Result<()> {
    let rc = unsafe {
        libc::ptrace(
            libc::PTRACE_SETOPTIONS,
            pid,
            ptr::null_mut::<c_void>(),
            TRACE_OPTIONS as c_long as *mut c_void,
        )
    };
    check(rc)
}

/// Resume a stopped tracee until its next syscall boundary, delivering
/// `signal` if nonzero.
pub fn syscall_step(pid: pid_t, signal: c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::ptrace(
            libc::PTRACE_SYSCALL,
            pid,
            ptr::null_mut::<c_void>(),
            signal as c_long as *mut c_void,
        )
    };
    check(rc)
}

/// Detach from a stopped tracee, letting it run untraced.
pub fn detach(pid: pid_t, signal: c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::ptrace(
            libc::PTRACE_DETACH,
            pid,
            ptr::null_mut::<c_void>(),
            signal as c_long as *mut c_void,
        )
    };
    check(rc)
}

/// Fetch the auxiliary message of a ptrace event stop. For fork-family
/// events this is the new child's pid.
pub fn event_message(pid: pid_t) -> io::Result<u64> {
    let mut message: u64 = 0;
    let rc = unsafe {
        libc::ptrace(
            libc::PTRACE_GETEVENTMSG,
            pid,
            ptr::null_mut::<c_void>(),
            &mut message as *mut u64 as *mut c_void,
        )
    };
    check(rc)?;
    Ok(message)
}

pub fn kill(pid: pid_t, signal: c_int) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid, signal) };
    check(rc as c_long)
}

/// Read bytes from a stopped tracee's memory. Returns the number of
/// bytes actually read, which may be short at a mapping boundary.
pub fn read_memory(pid: pid_t, addr: u64, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let local = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    let remote = libc::iovec {
        iov_base: addr as *mut c_void,
        iov_len: buf.len(),
    };
    let n = unsafe { libc::process_vm_readv(pid, &local, 1, &remote, 1, 0) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Read a NUL-terminated byte string from tracee memory, one page at a
/// time so a string ending near an unmapped page does not fault the
/// whole read.
pub fn read_cstring(pid: pid_t, mut addr: u64, max: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while out.len() < max {
        let page_end = (addr & !0xfff) + 0x1000;
        let chunk = ((page_end - addr) as usize).min(max - out.len());
        let mut buf = vec![0u8; chunk];
        let n = read_memory(pid, addr, &mut buf)?;
        if n == 0 {
            break;
        }
        if let Some(nul) = buf[..n].iter().position(|&b| b == 0) {
            out.extend_from_slice(&buf[..nul]);
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
        addr += n as u64;
    }
    Ok(out)
}

/// Wait for a state change in any child. Returns `None` once no
/// children remain.
pub fn wait_any() -> io::Result<Option<(pid_t, c_int)>> {
    let mut status: c_int = 0;
    loop {
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::__WALL) };
        if pid < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(None),
                _ => return Err(err),
            }
        }
        return Ok(Some((pid, status)));
    }
}

/// Wait for a state change in one specific child. Returns `None` if
/// the child is already gone.
pub fn wait_pid(pid: pid_t) -> io::Result<Option<c_int>> {
    let mut status: c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut status, libc::__WALL) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(None),
                _ => return Err(err),
            }
        }
        return Ok(Some(status));
    }
}
