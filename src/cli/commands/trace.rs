//! Trace command - run a command and print every observed event
//!
//! Nothing is cached; the command runs for real. Useful for seeing
//! which accesses the cache would treat as inputs and outputs, and
//! why a run is not recordable.

use crate::artifact::ExitStatus;
use crate::cli::args::TraceArgs;
use crate::config::Config;
use crate::error::{RecapError, RecapResult};
use crate::trace::{trace_command, EventSink, TraceEvent, TraceOptions};
use console::style;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::AtomicI32;

/// Prints each event as it happens. Events go to stderr so the traced
/// command keeps stdout to itself.
struct PrintingSink {
    events: u64,
}

impl EventSink for PrintingSink {
    fn on_event(&mut self, event: &TraceEvent) {
        self.events += 1;
        eprintln!("{event}");
    }
}

/// Execute the trace command. Returns the traced command's exit status.
pub async fn execute(args: TraceArgs, config: &Config) -> RecapResult<ExitStatus> {
    let cwd = resolve_dir(args.dir.as_ref())?;
    let options = TraceOptions {
        ignore_prefixes: config.trace.ignore_prefixes.clone(),
        // No capture cap here; nothing is being recorded.
        max_stream_bytes: 0,
    };

    let argv = args.command;
    let (report, events) = tokio::task::spawn_blocking(move || {
        let root_pid = AtomicI32::new(0);
        let mut sink = PrintingSink { events: 0 };
        let report = trace_command(&argv, &cwd, &options, &mut sink, &root_pid)?;
        Ok::<_, RecapError>((report, sink.events))
    })
    .await
    .map_err(|e| RecapError::Internal(format!("trace task failed: {e}")))??;

    eprintln!();
    match report.bailout {
        None => eprintln!(
            "{} {} events from {} process(es), {}",
            style("✓").green(),
            events,
            report.processes,
            report.status
        ),
        Some(reason) => eprintln!(
            "{} {} events from {} process(es); a run like this would not be cached: {}",
            style("!").yellow(),
            events,
            report.processes,
            reason
        ),
    }

    Ok(report.status)
}

fn resolve_dir(dir: Option<&PathBuf>) -> RecapResult<PathBuf> {
    match dir {
        Some(path) => path
            .canonicalize()
            .map_err(|e| RecapError::io(format!("resolving directory {}", path.display()), e)),
        None => env::current_dir().map_err(|e| RecapError::io("getting current directory", e)),
    }
}
