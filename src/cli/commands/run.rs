//! Run command - execute a command through the cache

use crate::artifact::ExitStatus;
use crate::cli::args::{CacheMode, RunArgs};
use crate::config::Config;
use crate::controller::{Controller, RunRequest};
use crate::error::{RecapError, RecapResult};
use crate::store::CacheStore;
use crate::trace::TraceOptions;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Execute the run command. Returns the exit status of the wrapped
/// command, whether it was replayed or actually run.
pub async fn execute(args: RunArgs, config: &Config) -> RecapResult<ExitStatus> {
    let cwd = resolve_dir(args.dir.as_ref())?;
    let mode = resolve_mode(args.mode, config);
    let store_root = args.store.clone().unwrap_or_else(|| config.store_root());

    debug!("mode: {}", mode);
    debug!("store: {}", store_root.display());
    debug!("cwd: {}", cwd.display());

    let request = RunRequest {
        argv: args.command,
        cwd,
        policy: mode.policy(),
        trace: trace_options(config),
        env_keys: config.identity.env.clone(),
    };

    // The tracee's pid, once it exists, for signal forwarding.
    let root_pid = Arc::new(AtomicI32::new(0));
    let forwarder = spawn_signal_forwarder(Arc::clone(&root_pid));

    let controller = Controller::new(CacheStore::open(store_root));
    let outcome = controller.run(request, root_pid).await;
    forwarder.abort();
    let outcome = outcome?;

    debug!(
        "run finished: {} (replayed: {}, recorded: {})",
        outcome.status, outcome.replayed, outcome.recorded
    );

    Ok(outcome.status)
}

fn resolve_dir(dir: Option<&PathBuf>) -> RecapResult<PathBuf> {
    match dir {
        Some(path) => path
            .canonicalize()
            .map_err(|e| RecapError::io(format!("resolving directory {}", path.display()), e)),
        None => env::current_dir().map_err(|e| RecapError::io("getting current directory", e)),
    }
}

/// Command line flag (or RECAP_MODE) wins over the config file.
fn resolve_mode(flag: Option<CacheMode>, config: &Config) -> CacheMode {
    if let Some(mode) = flag {
        return mode;
    }
    match CacheMode::from_config(&config.run.mode) {
        Some(mode) => mode,
        None => {
            warn!(
                "unrecognized run.mode \"{}\" in config, using read-write",
                config.run.mode
            );
            CacheMode::ReadWrite
        }
    }
}

fn trace_options(config: &Config) -> TraceOptions {
    TraceOptions {
        ignore_prefixes: config.trace.ignore_prefixes.clone(),
        max_stream_bytes: config.trace.max_stream_bytes,
    }
}

/// Forward Ctrl-C to the wrapped command so the pair behaves like the
/// bare command would: first signal interrupts, a second one kills.
fn spawn_signal_forwarder(root_pid: Arc<AtomicI32>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interrupted = false;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let pid = root_pid.load(Ordering::SeqCst);
            if pid <= 0 {
                // No child yet; the run will notice on its own.
                continue;
            }
            let signal = if interrupted {
                libc::SIGKILL
            } else {
                libc::SIGINT
            };
            unsafe {
                libc::kill(pid, signal);
            }
            interrupted = true;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_mode_wins_over_config() {
        let mut config = Config::default();
        config.run.mode = "disabled".to_string();
        assert_eq!(
            resolve_mode(Some(CacheMode::ReadOnly), &config),
            CacheMode::ReadOnly
        );
    }

    #[test]
    fn config_mode_applies_without_flag() {
        let mut config = Config::default();
        config.run.mode = "write-only".to_string();
        assert_eq!(resolve_mode(None, &config), CacheMode::WriteOnly);
    }

    #[test]
    fn bad_config_mode_falls_back_to_read_write() {
        let mut config = Config::default();
        config.run.mode = "sometimes".to_string();
        assert_eq!(resolve_mode(None, &config), CacheMode::ReadWrite);
    }

    #[test]
    fn trace_options_mirror_config() {
        let mut config = Config::default();
        config.trace.max_stream_bytes = 4096;
        let options = trace_options(&config);
        assert_eq!(options.max_stream_bytes, 4096);
        assert!(options.ignore_prefixes.contains(&PathBuf::from("/proc")));
    }
}
