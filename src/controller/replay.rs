//! Materializes a validated recording: restores output files and
//! re-emits the captured streams in their recorded interleaving.

use crate::artifact::{ExitStatus, StreamId};
use crate::error::{RecapError, RecapResult};
use crate::store::recording::Recording;
use crate::store::CacheStore;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use tracing::debug;

/// Replay `recording` against the live filesystem and the real stdout
/// and stderr. Returns the recorded exit status.
pub fn materialize(store: &CacheStore, recording: &Recording) -> RecapResult<ExitStatus> {
    // Fetch every object up front; a missing blob must surface before
    // any output is touched.
    let mut contents = Vec::with_capacity(recording.outputs.len());
    for output in &recording.outputs {
        contents.push(store.blob(&output.digest)?);
    }
    let stdout_bytes = store.blob(&recording.stdout)?;
    let stderr_bytes = store.blob(&recording.stderr)?;

    for (output, bytes) in recording.outputs.iter().zip(contents) {
        if let Some(parent) = output.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecapError::io(format!("creating {}", parent.display()), e))?;
        }
        std::fs::write(&output.path, &bytes)
            .map_err(|e| RecapError::io(format!("restoring {}", output.path.display()), e))?;
        std::fs::set_permissions(
            &output.path,
            std::fs::Permissions::from_mode(output.mode),
        )
        .map_err(|e| {
            RecapError::io(format!("setting permissions on {}", output.path.display()), e)
        })?;
        debug!("restored {}", output.path.display());
    }

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    emit_streams(
        recording,
        &stdout_bytes,
        &stderr_bytes,
        &mut stdout.lock(),
        &mut stderr.lock(),
    )?;
    Ok(recording.status)
}

/// Walk the chunk list, slicing each run out of the right stream blob.
/// Flushing per chunk keeps the cross-stream ordering observable.
fn emit_streams(
    recording: &Recording,
    stdout_bytes: &[u8],
    stderr_bytes: &[u8],
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> RecapResult<()> {
    let mut out_pos = 0usize;
    let mut err_pos = 0usize;
    for chunk in &recording.chunks {
        let (bytes, pos, sink): (&[u8], &mut usize, &mut dyn Write) = match chunk.stream {
            StreamId::Stdout => (stdout_bytes, &mut out_pos, &mut *out),
            StreamId::Stderr => (stderr_bytes, &mut err_pos, &mut *err),
        };
        let end = *pos + chunk.len as usize;
        let slice = bytes.get(*pos..end).ok_or_else(|| {
            RecapError::Internal(format!(
                "{} chunks overrun the captured stream",
                chunk.stream
            ))
        })?;
        sink.write_all(slice)
            .map_err(|e| RecapError::io(format!("replaying {}", chunk.stream), e))?;
        sink.flush()
            .map_err(|e| RecapError::io(format!("replaying {}", chunk.stream), e))?;
        *pos = end;
    }
    Ok(())
}
