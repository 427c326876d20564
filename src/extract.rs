//! Folds the supervisor's event stream into the dependency set of a
//! run: which paths were read (and their content at that moment),
//! which were written, and what the command printed.

use crate::artifact::StreamId;
use crate::digest::Digest;
use crate::trace::{AccessMode, EventSink, TraceEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a run depended on and produced, keyed by absolute path.
///
/// Classification follows first observation, with one exception: a
/// path that is both read and written belongs solely to the outputs.
/// Whatever such a file held before the run is the run's own doing,
/// not an external dependency.
#[derive(Debug, Default)]
pub struct Dependencies {
    inputs: BTreeMap<PathBuf, Digest>,
    outputs: BTreeSet<PathBuf>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Interleaving of the two streams, as (stream, byte count) runs
    /// in observed order.
    chunks: Vec<(StreamId, u64)>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inputs are digested here, at observation time, so later edits
    /// to the file cannot corrupt what this run actually saw.
    fn note_input(&mut self, path: &Path) {
        if self.outputs.contains(path) || self.inputs.contains_key(path) {
            return;
        }
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => match Digest::of_file(path) {
                Ok(digest) => {
                    self.inputs.insert(path.to_path_buf(), digest);
                }
                Err(e) => {
                    debug!("skipping unreadable input {}: {}", path.display(), e);
                }
            },
            Ok(_) => {
                // Directories, fifos and device nodes have no stable
                // content to pin.
                debug!("skipping non-regular input {}", path.display());
            }
            Err(_) => {
                self.inputs.insert(path.to_path_buf(), Digest::ABSENT);
            }
        }
    }

    fn note_output(&mut self, path: &Path) {
        self.inputs.remove(path);
        self.outputs.insert(path.to_path_buf());
    }

    fn note_missing(&mut self, path: &Path) {
        if self.outputs.contains(path) || self.inputs.contains_key(path) {
            return;
        }
        self.inputs.insert(path.to_path_buf(), Digest::ABSENT);
    }

    fn note_stream(&mut self, stream: StreamId, bytes: &[u8]) {
        self.chunks.push((stream, bytes.len() as u64));
        match stream {
            StreamId::Stdout => self.stdout.extend_from_slice(bytes),
            StreamId::Stderr => self.stderr.extend_from_slice(bytes),
        }
    }

    pub fn inputs(&self) -> &BTreeMap<PathBuf, Digest> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeSet<PathBuf> {
        &self.outputs
    }

    pub fn stdout_bytes(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr_bytes(&self) -> &[u8] {
        &self.stderr
    }

    pub fn chunks(&self) -> &[(StreamId, u64)] {
        &self.chunks
    }
}

impl EventSink for Dependencies {
    fn on_event(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::FileOpened { path, mode, .. } => match mode {
                AccessMode::Read => self.note_input(path),
                AccessMode::Write => self.note_output(path),
            },
            TraceEvent::FileMissing { path, .. } => self.note_missing(path),
            TraceEvent::StreamWrite { stream, bytes, .. } => self.note_stream(*stream, bytes),
            // The executed binary is as much an input as anything the
            // program opens by hand.
            TraceEvent::ProcessExec { path, .. } => self.note_input(path),
            TraceEvent::FileClosed { .. }
            | TraceEvent::ProcessSpawned { .. }
            | TraceEvent::ProcessExited { .. } => {}
        }
    }
}
