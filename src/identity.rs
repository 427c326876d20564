//! Invocation identity: the cache key for one command invocation.
//!
//! Two invocations with equal identities are candidates for replay
//! from the same cache subtree; invocations differing in identity
//! never share one.

use crate::digest::{Digest, DigestBuilder};
use crate::error::{RecapError, RecapResult};
use std::env;
use std::path::{Path, PathBuf};

/// The replay-independent key identifying a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationIdentity {
    /// Resolved path of the executable. Falls back to the name as given
    /// when resolution fails, so an unlaunchable command still has a
    /// stable (if useless) identity.
    pub exe: PathBuf,
    /// Full argument vector, including argv[0] as typed.
    pub argv: Vec<String>,
    /// Directory the command starts in.
    pub cwd: PathBuf,
    /// Participating environment variables, sorted by name. Which names
    /// participate is explicit configuration; unset names are omitted.
    pub env: Vec<(String, String)>,
}

impl InvocationIdentity {
    /// Capture the identity of `argv` run from `cwd`, folding in the
    /// environment variables named by `env_keys`.
    pub fn capture(argv: &[String], cwd: &Path, env_keys: &[String]) -> RecapResult<Self> {
        let first = argv.first().ok_or(RecapError::EmptyCommand)?;
        let exe = resolve_executable(first, cwd).unwrap_or_else(|| PathBuf::from(first));

        let mut env: Vec<(String, String)> = env_keys
            .iter()
            .filter_map(|key| env::var(key).ok().map(|value| (key.clone(), value)))
            .collect();
        env.sort();
        env.dedup_by(|a, b| a.0 == b.0);

        Ok(Self {
            exe,
            argv: argv.to_vec(),
            cwd: cwd.to_path_buf(),
            env,
        })
    }

    /// Digest over all identity fields. Fields are length-prefixed and
    /// collections are count-prefixed, so no two distinct identities
    /// can serialize to the same byte stream.
    pub fn digest(&self) -> Digest {
        let mut builder = DigestBuilder::new();
        builder.field(self.exe.as_os_str().as_encoded_bytes());
        builder.field(&(self.argv.len() as u64).to_le_bytes());
        for arg in &self.argv {
            builder.field(arg.as_bytes());
        }
        builder.field(self.cwd.as_os_str().as_encoded_bytes());
        builder.field(&(self.env.len() as u64).to_le_bytes());
        for (key, value) in &self.env {
            builder.field(key.as_bytes());
            builder.field(value.as_bytes());
        }
        builder.finish()
    }

    /// Hex digest, used as the store directory name for this identity.
    pub fn hex(&self) -> String {
        self.digest().to_hex()
    }

    /// Short digest prefix for log lines.
    pub fn short(&self) -> String {
        self.digest().short()
    }
}

/// Resolve a command name the way execvp would: names containing a
/// separator resolve against `cwd`, bare names walk PATH.
fn resolve_executable(name: &str, cwd: &Path) -> Option<PathBuf> {
    if name.contains('/') {
        let candidate = if Path::new(name).is_absolute() {
            PathBuf::from(name)
        } else {
            cwd.join(name)
        };
        return candidate.canonicalize().ok();
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
