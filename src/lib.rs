//! Recap - Transparent Execution Cache
//!
//! Runs any command under syscall tracing, records the files it reads
//! and writes, and replays the recorded outputs when the same command
//! is invoked again with identical inputs.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod controller;
pub mod digest;
pub mod error;
pub mod extract;
pub mod identity;
pub mod store;
pub mod trace;

pub use error::{RecapError, RecapResult};
