//! Decides, per invocation, whether to replay a recorded result or to
//! execute for real, and whether a fresh run is worth recording.
//!
//! The flow is IDENTIFY, then TRY_REPLAY, then EXECUTE and RECORD.
//! Every cache-side failure downgrades to a plain run of the command;
//! nothing here may change what the command itself produces.

pub mod replay;

use crate::artifact::ExitStatus;
use crate::digest::Digest;
use crate::error::{RecapError, RecapResult};
use crate::extract::Dependencies;
use crate::identity::InvocationIdentity;
use crate::store::recording::Recording;
use crate::store::trie::TrieNode;
use crate::store::CacheStore;
use crate::trace::{trace_command, TraceOptions, TraceReport};
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// What the cache may do for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    pub replay: bool,
    pub record: bool,
}

impl RunPolicy {
    pub const fn disabled() -> Self {
        RunPolicy {
            replay: false,
            record: false,
        }
    }

    pub const fn read_only() -> Self {
        RunPolicy {
            replay: true,
            record: false,
        }
    }

    pub const fn write_only() -> Self {
        RunPolicy {
            replay: false,
            record: true,
        }
    }

    pub const fn read_write() -> Self {
        RunPolicy {
            replay: true,
            record: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub policy: RunPolicy,
    pub trace: TraceOptions,
    /// Environment variables that are part of the identity.
    pub env_keys: Vec<String>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub status: ExitStatus,
    pub identity: InvocationIdentity,
    pub replayed: bool,
    pub recorded: bool,
}

pub struct Controller {
    store: CacheStore,
}

impl Controller {
    pub fn new(store: CacheStore) -> Self {
        Controller { store }
    }

    /// Run one command under the given policy. `root_pid` is filled in
    /// as soon as a real child exists, for signal forwarding.
    pub async fn run(
        &self,
        request: RunRequest,
        root_pid: Arc<AtomicI32>,
    ) -> RecapResult<RunOutcome> {
        let identity =
            InvocationIdentity::capture(&request.argv, &request.cwd, &request.env_keys)?;

        if request.policy.replay {
            info!("replay attempted for {}", identity.short());
            match self.try_replay(&identity).await {
                Ok(Some(status)) => {
                    info!("replay succeeded for {}", identity.short());
                    return Ok(RunOutcome {
                        status,
                        identity,
                        replayed: true,
                        recorded: false,
                    });
                }
                Ok(None) => info!("replay failed for {}", identity.short()),
                Err(e) => {
                    warn!("replay error for {}: {}", identity.short(), e);
                    info!("replay failed for {}", identity.short());
                }
            }
        }

        if !request.policy.record {
            // Nothing to observe; run the command untouched.
            let status = self.execute_plain(&request, root_pid).await?;
            return Ok(RunOutcome {
                status,
                identity,
                replayed: false,
                recorded: false,
            });
        }

        let started = Instant::now();
        let (report, deps) = self.execute_traced(&request, root_pid).await?;
        let wall_ms = started.elapsed().as_millis() as u64;

        info!("record attempted for {}", identity.short());
        let mut recorded = false;
        if report.recordable() {
            match self.persist(&identity, deps, &report, wall_ms).await {
                Ok(()) => {
                    info!("record succeeded for {}", identity.short());
                    recorded = true;
                }
                Err(e) => {
                    warn!("recording error for {}: {}", identity.short(), e);
                    info!("record failed for {}", identity.short());
                }
            }
        } else {
            info!("record failed for {}", identity.short());
        }

        Ok(RunOutcome {
            status: report.status,
            identity,
            replayed: false,
            recorded,
        })
    }

    async fn try_replay(&self, identity: &InvocationIdentity) -> RecapResult<Option<ExitStatus>> {
        let store = self.store.clone();
        let identity = identity.clone();
        tokio::task::spawn_blocking(move || replay_lookup(&store, &identity))
            .await
            .map_err(|e| RecapError::Internal(format!("replay task failed: {e}")))?
    }

    async fn execute_traced(
        &self,
        request: &RunRequest,
        root_pid: Arc<AtomicI32>,
    ) -> RecapResult<(TraceReport, Dependencies)> {
        let argv = request.argv.clone();
        let cwd = request.cwd.clone();
        let options = request.trace.clone();
        tokio::task::spawn_blocking(move || {
            let mut deps = Dependencies::new();
            let report = trace_command(&argv, &cwd, &options, &mut deps, &root_pid)?;
            Ok((report, deps))
        })
        .await
        .map_err(|e| RecapError::Internal(format!("trace task failed: {e}")))?
    }

    async fn execute_plain(
        &self,
        request: &RunRequest,
        root_pid: Arc<AtomicI32>,
    ) -> RecapResult<ExitStatus> {
        let argv = request.argv.clone();
        let cwd = request.cwd.clone();
        tokio::task::spawn_blocking(move || run_untraced(&argv, &cwd, &root_pid))
            .await
            .map_err(|e| RecapError::Internal(format!("run task failed: {e}")))?
    }

    async fn persist(
        &self,
        identity: &InvocationIdentity,
        deps: Dependencies,
        report: &TraceReport,
        wall_ms: u64,
    ) -> RecapResult<()> {
        let store = self.store.clone();
        let identity = identity.clone();
        let status = report.status;
        let processes = report.processes;
        tokio::task::spawn_blocking(move || {
            store.record(&identity, &deps, status, processes, wall_ms)
        })
        .await
        .map_err(|e| RecapError::Internal(format!("record task failed: {e}")))?
    }
}

/// Walk the identity's trie against the current filesystem and replay
/// the first recording whose branch fully validates. `Ok(None)` is a
/// miss; errors are reserved for broken replay machinery.
fn replay_lookup(
    store: &CacheStore,
    identity: &InvocationIdentity,
) -> RecapResult<Option<ExitStatus>> {
    let Some(root) = store.identity_root(identity) else {
        return Ok(None);
    };
    let mut seen = HashMap::new();
    let Some(recording) = descend(&root, &mut seen) else {
        return Ok(None);
    };
    match replay::materialize(store, &recording) {
        Ok(status) => Ok(Some(status)),
        Err(e) => {
            // A half-restored tree is fine: the real execution that
            // follows overwrites every output it touches.
            warn!("replay could not materialize: {}", e);
            Ok(None)
        }
    }
}

/// Depth-first validation. A recording at the node wins over deeper
/// edges, so the shortest recorded dependency chain is preferred. Each
/// path is digested at most once per walk; `None` marks a file that
/// exists but cannot be read right now.
fn descend(node: &TrieNode, seen: &mut HashMap<PathBuf, Option<Digest>>) -> Option<Recording> {
    if let Some(recording) = node.recording() {
        return Some(recording);
    }
    for edge in node.children() {
        let current = match seen.get(&edge.path) {
            Some(cached) => *cached,
            None => {
                let digest = Digest::of_file(&edge.path).ok();
                seen.insert(edge.path.clone(), digest);
                digest
            }
        };
        let Some(current) = current else { continue };
        if current == edge.digest {
            if let Some(recording) = descend(&edge.node, seen) {
                return Some(recording);
            }
            // Dead branch; siblings matching other paths may still
            // apply.
        }
    }
    None
}

fn run_untraced(argv: &[String], cwd: &Path, root_pid: &AtomicI32) -> RecapResult<ExitStatus> {
    let Some((program, rest)) = argv.split_first() else {
        return Err(RecapError::EmptyCommand);
    };
    let mut child = Command::new(program)
        .args(rest)
        .current_dir(cwd)
        .spawn()
        .map_err(|e| RecapError::launch(argv.join(" "), e))?;
    root_pid.store(child.id() as i32, Ordering::SeqCst);
    let status = child
        .wait()
        .map_err(|e| RecapError::io("waiting for the command", e))?;
    Ok(match status.code() {
        Some(code) => ExitStatus::Exited(code),
        None => ExitStatus::Signaled(status.signal().unwrap_or(libc::SIGKILL)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{AccessMode, EventSink, TraceEvent};
    use serial_test::serial;
    use tempfile::TempDir;

    fn identity_for(work: &Path) -> InvocationIdentity {
        InvocationIdentity {
            exe: PathBuf::from("/usr/bin/tool"),
            argv: vec!["tool".into()],
            cwd: work.to_path_buf(),
            env: Vec::new(),
        }
    }

    fn record_run(
        store: &CacheStore,
        identity: &InvocationIdentity,
        reads: &[&Path],
        missing: &[&Path],
        output: Option<(&Path, &[u8])>,
        status: ExitStatus,
    ) {
        let mut deps = Dependencies::new();
        for path in reads {
            deps.on_event(&TraceEvent::FileOpened {
                pid: 1,
                path: path.to_path_buf(),
                mode: AccessMode::Read,
            });
        }
        for path in missing {
            deps.on_event(&TraceEvent::FileMissing {
                pid: 1,
                path: path.to_path_buf(),
            });
        }
        if let Some((path, bytes)) = output {
            std::fs::write(path, bytes).unwrap();
            deps.on_event(&TraceEvent::FileOpened {
                pid: 1,
                path: path.to_path_buf(),
                mode: AccessMode::Write,
            });
        }
        store.record(identity, &deps, status, 1, 1).unwrap();
    }

    #[test]
    fn lookup_replays_when_inputs_still_match() {
        let cache = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::open(cache.path().join("store"));
        let id = identity_for(work.path());
        let input = work.path().join("in");
        let output = work.path().join("out");
        std::fs::write(&input, b"v1").unwrap();
        record_run(
            &store,
            &id,
            &[&input],
            &[],
            Some((&output, b"result")),
            ExitStatus::Exited(0),
        );

        std::fs::remove_file(&output).unwrap();
        let status = replay_lookup(&store, &id).unwrap();
        assert_eq!(status, Some(ExitStatus::Exited(0)));
        assert_eq!(std::fs::read(&output).unwrap(), b"result");
    }

    #[test]
    fn lookup_misses_when_an_input_changed() {
        let cache = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::open(cache.path().join("store"));
        let id = identity_for(work.path());
        let input = work.path().join("in");
        std::fs::write(&input, b"v1").unwrap();
        record_run(&store, &id, &[&input], &[], None, ExitStatus::Exited(0));

        std::fs::write(&input, b"v2").unwrap();
        assert_eq!(replay_lookup(&store, &id).unwrap(), None);
    }

    #[test]
    fn lookup_follows_the_branch_matching_current_content() {
        let cache = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::open(cache.path().join("store"));
        let id = identity_for(work.path());
        let input = work.path().join("in");

        std::fs::write(&input, b"v1").unwrap();
        record_run(&store, &id, &[&input], &[], None, ExitStatus::Exited(10));
        std::fs::write(&input, b"v2").unwrap();
        record_run(&store, &id, &[&input], &[], None, ExitStatus::Exited(20));

        assert_eq!(
            replay_lookup(&store, &id).unwrap(),
            Some(ExitStatus::Exited(20))
        );
        std::fs::write(&input, b"v1").unwrap();
        assert_eq!(
            replay_lookup(&store, &id).unwrap(),
            Some(ExitStatus::Exited(10))
        );
    }

    #[test]
    fn recorded_absence_must_still_be_absent() {
        let cache = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::open(cache.path().join("store"));
        let id = identity_for(work.path());
        let ghost = work.path().join("optional.cfg");
        record_run(&store, &id, &[], &[&ghost], None, ExitStatus::Exited(0));

        assert_eq!(
            replay_lookup(&store, &id).unwrap(),
            Some(ExitStatus::Exited(0))
        );
        // The file appearing invalidates the recording.
        std::fs::write(&ghost, b"now present").unwrap();
        assert_eq!(replay_lookup(&store, &id).unwrap(), None);
    }

    #[test]
    fn nonzero_exits_replay_like_successes() {
        let cache = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::open(cache.path().join("store"));
        let id = identity_for(work.path());
        let input = work.path().join("in");
        std::fs::write(&input, b"bad").unwrap();
        record_run(&store, &id, &[&input], &[], None, ExitStatus::Exited(3));

        assert_eq!(
            replay_lookup(&store, &id).unwrap(),
            Some(ExitStatus::Exited(3))
        );
    }

    #[test]
    fn policy_constructors_cover_the_grid() {
        assert!(!RunPolicy::disabled().replay && !RunPolicy::disabled().record);
        assert!(RunPolicy::read_only().replay && !RunPolicy::read_only().record);
        assert!(!RunPolicy::write_only().replay && RunPolicy::write_only().record);
        assert!(RunPolicy::read_write().replay && RunPolicy::read_write().record);
    }

    #[tokio::test]
    #[serial]
    async fn disabled_policy_runs_the_command_untouched() {
        let cache = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let controller = Controller::new(CacheStore::open(cache.path().join("store")));
        let request = RunRequest {
            argv: vec!["sh".into(), "-c".into(), "exit 9".into()],
            cwd: work.path().to_path_buf(),
            policy: RunPolicy::disabled(),
            trace: TraceOptions::default(),
            env_keys: Vec::new(),
        };
        let outcome = controller
            .run(request, Arc::new(AtomicI32::new(0)))
            .await
            .unwrap();
        assert_eq!(outcome.status, ExitStatus::Exited(9));
        assert!(!outcome.replayed);
        assert!(!outcome.recorded);
        assert!(store_is_empty(cache.path().join("store")));
    }

    fn store_is_empty(root: PathBuf) -> bool {
        !root.exists()
    }
}
