//! Syscall-level observation of a command and everything it spawns.
//!
//! The supervisor follows the whole process tree through fork, vfork,
//! clone and exec, decoding just enough of the syscall surface to know
//! which files were read, which were written, and what landed on
//! stdout and stderr. Programs that step outside that model are let go
//! mid-flight and run to completion untraced.

pub mod arch;
pub mod event;
pub mod ptrace;
pub mod supervisor;
pub mod tracee;

pub use event::{AccessMode, EventSink, RecordingSink, TraceEvent};
pub use supervisor::{trace_command, Bailout, TraceOptions, TraceReport};
