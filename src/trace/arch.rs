//! Architecture-specific register access and syscall classification.

use libc::{c_long, c_void, pid_t};
use std::io;

/// Snapshot of the registers that matter at a syscall stop. Argument
/// registers are only meaningful at syscall entry, the return value
/// only at exit.
#[derive(Debug, Clone, Copy)]
pub struct SyscallRegs {
    pub nr: u64,
    pub ret: i64,
    pub args: [u64; 6],
}

pub fn syscall_regs(pid: pid_t) -> io::Result<SyscallRegs> {
    let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: &mut regs as *mut libc::user_regs_struct as *mut c_void,
        iov_len: std::mem::size_of::<libc::user_regs_struct>(),
    };
    let rc = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            pid,
            libc::NT_PRSTATUS as c_long as *mut c_void,
            &mut iov as *mut libc::iovec as *mut c_void,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(decode_regs(&regs))
}

#[cfg(target_arch = "x86_64")]
fn decode_regs(regs: &libc::user_regs_struct) -> SyscallRegs {
    SyscallRegs {
        nr: regs.orig_rax,
        ret: regs.rax as i64,
        args: [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
    }
}

#[cfg(target_arch = "aarch64")]
fn decode_regs(regs: &libc::user_regs_struct) -> SyscallRegs {
    SyscallRegs {
        nr: regs.regs[8],
        ret: regs.regs[0] as i64,
        args: [
            regs.regs[0],
            regs.regs[1],
            regs.regs[2],
            regs.regs[3],
            regs.regs[4],
            regs.regs[5],
        ],
    }
}

/// Path arguments of a destructive syscall, as (dirfd argument index,
/// path argument index) pairs. A `None` dirfd means the path is
/// relative to the working directory.
pub type PathArgs = &'static [(Option<usize>, usize)];

/// What a syscall means to the tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sys {
    /// open(path, flags, ...)
    Open,
    /// creat(path, mode): open with O_WRONLY|O_CREAT|O_TRUNC
    Creat,
    /// openat(dirfd, path, flags, ...)
    Openat,
    /// openat2(dirfd, path, how, size)
    Openat2,
    Close,
    Write,
    Writev,
    /// dup(old)
    Dup,
    /// dup2(old, new)
    Dup2,
    /// dup3(old, new, flags)
    Dup3,
    /// fcntl(fd, cmd, ...): only F_DUPFD and F_DUPFD_CLOEXEC matter
    Fcntl,
    /// clone(flags, ...) with flags in the first argument
    Clone,
    /// clone3(struct clone_args *, size)
    Clone3,
    /// fork/vfork: child never shares the descriptor table
    Fork,
    Exec {
        at: bool,
    },
    /// Kernel-side copy into an fd we may be observing as a stream.
    FdTransfer {
        name: &'static str,
        out_arg: usize,
    },
    /// Mutates the object behind an fd; tolerable only on a descriptor
    /// we opened for write ourselves.
    FdMutate {
        name: &'static str,
    },
    /// Mutates the filesystem through paths; tolerable only when every
    /// path falls under an ignored prefix.
    PoisonPath {
        name: &'static str,
        paths: PathArgs,
    },
    /// Never tolerable.
    Poison(&'static str),
    Other,
}

/// Classify a syscall number for this architecture.
pub fn classify(nr: u64) -> Sys {
    let nr = nr as c_long;
    match nr {
        libc::SYS_openat => Sys::Openat,
        libc::SYS_openat2 => Sys::Openat2,
        libc::SYS_close => Sys::Close,
        libc::SYS_write => Sys::Write,
        libc::SYS_writev => Sys::Writev,
        libc::SYS_dup => Sys::Dup,
        libc::SYS_dup3 => Sys::Dup3,
        libc::SYS_fcntl => Sys::Fcntl,
        libc::SYS_clone => Sys::Clone,
        libc::SYS_clone3 => Sys::Clone3,
        libc::SYS_execve => Sys::Exec { at: false },
        libc::SYS_execveat => Sys::Exec { at: true },

        libc::SYS_sendfile => Sys::FdTransfer {
            name: "sendfile",
            out_arg: 0,
        },
        libc::SYS_splice => Sys::FdTransfer {
            name: "splice",
            out_arg: 2,
        },
        libc::SYS_tee => Sys::FdTransfer {
            name: "tee",
            out_arg: 1,
        },
        libc::SYS_copy_file_range => Sys::FdTransfer {
            name: "copy_file_range",
            out_arg: 2,
        },
        libc::SYS_vmsplice => Sys::FdTransfer {
            name: "vmsplice",
            out_arg: 0,
        },
        // Positioned writes land in the file without passing through
        // the stream capture, so they may not target a stream fd.
        libc::SYS_pwrite64 => Sys::FdTransfer {
            name: "pwrite64",
            out_arg: 0,
        },
        libc::SYS_pwritev => Sys::FdTransfer {
            name: "pwritev",
            out_arg: 0,
        },
        libc::SYS_pwritev2 => Sys::FdTransfer {
            name: "pwritev2",
            out_arg: 0,
        },

        libc::SYS_ftruncate => Sys::FdMutate { name: "ftruncate" },
        libc::SYS_fchmod => Sys::FdMutate { name: "fchmod" },
        libc::SYS_fallocate => Sys::FdMutate { name: "fallocate" },

        libc::SYS_renameat => Sys::PoisonPath {
            name: "renameat",
            paths: &[(Some(0), 1), (Some(2), 3)],
        },
        libc::SYS_renameat2 => Sys::PoisonPath {
            name: "renameat2",
            paths: &[(Some(0), 1), (Some(2), 3)],
        },
        libc::SYS_unlinkat => Sys::PoisonPath {
            name: "unlinkat",
            paths: &[(Some(0), 1)],
        },
        libc::SYS_linkat => Sys::PoisonPath {
            name: "linkat",
            paths: &[(Some(0), 1), (Some(2), 3)],
        },
        libc::SYS_symlinkat => Sys::PoisonPath {
            name: "symlinkat",
            paths: &[(Some(1), 2)],
        },
        libc::SYS_truncate => Sys::PoisonPath {
            name: "truncate",
            paths: &[(None, 0)],
        },
        libc::SYS_fchmodat => Sys::PoisonPath {
            name: "fchmodat",
            paths: &[(Some(0), 1)],
        },
        libc::SYS_fchownat => Sys::PoisonPath {
            name: "fchownat",
            paths: &[(Some(0), 1)],
        },
        libc::SYS_mknodat => Sys::PoisonPath {
            name: "mknodat",
            paths: &[(Some(0), 1)],
        },

        libc::SYS_fchown => Sys::Poison("fchown"),
        libc::SYS_mount => Sys::Poison("mount"),
        libc::SYS_umount2 => Sys::Poison("umount2"),
        libc::SYS_chroot => Sys::Poison("chroot"),
        libc::SYS_pivot_root => Sys::Poison("pivot_root"),

        #[cfg(target_arch = "x86_64")]
        libc::SYS_open => Sys::Open,
        #[cfg(target_arch = "x86_64")]
        libc::SYS_creat => Sys::Creat,
        #[cfg(target_arch = "x86_64")]
        libc::SYS_dup2 => Sys::Dup2,
        #[cfg(target_arch = "x86_64")]
        libc::SYS_fork => Sys::Fork,
        #[cfg(target_arch = "x86_64")]
        libc::SYS_vfork => Sys::Fork,
        #[cfg(target_arch = "x86_64")]
        libc::SYS_rename => Sys::PoisonPath {
            name: "rename",
            paths: &[(None, 0), (None, 1)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_unlink => Sys::PoisonPath {
            name: "unlink",
            paths: &[(None, 0)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_link => Sys::PoisonPath {
            name: "link",
            paths: &[(None, 0), (None, 1)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_symlink => Sys::PoisonPath {
            name: "symlink",
            paths: &[(None, 1)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_rmdir => Sys::PoisonPath {
            name: "rmdir",
            paths: &[(None, 0)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_chmod => Sys::PoisonPath {
            name: "chmod",
            paths: &[(None, 0)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_chown => Sys::PoisonPath {
            name: "chown",
            paths: &[(None, 0)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_lchown => Sys::PoisonPath {
            name: "lchown",
            paths: &[(None, 0)],
        },
        #[cfg(target_arch = "x86_64")]
        libc::SYS_mknod => Sys::PoisonPath {
            name: "mknod",
            paths: &[(None, 0)],
        },

        _ => Sys::Other,
    }
}
