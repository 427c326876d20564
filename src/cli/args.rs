//! CLI argument definitions using clap derive

use crate::controller::RunPolicy;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

/// Recap - Transparent Execution Cache
///
/// Runs any command while recording the files it reads and writes;
/// an identical later invocation replays the recorded outputs and
/// exit status without running the command at all.
#[derive(Parser, Debug)]
#[command(name = "recap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "RECAP_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command through the cache
    Run(RunArgs),

    /// Trace a command and print every observed file access
    Trace(TraceArgs),

    /// Inspect or clear the cache store
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Cache mode for this run (overrides configuration)
    #[arg(short, long, env = "RECAP_MODE")]
    pub mode: Option<CacheMode>,

    /// Working directory for the command (defaults to current directory)
    #[arg(short = 'C', long)]
    pub dir: Option<PathBuf>,

    /// Store directory (overrides configuration)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the trace command
#[derive(Parser, Debug)]
pub struct TraceArgs {
    /// Working directory for the command (defaults to current directory)
    #[arg(short = 'C', long)]
    pub dir: Option<PathBuf>,

    /// Command and arguments to trace
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Store directory (overrides configuration)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show store location, entry counts and size
    Stats,

    /// List cached invocations
    Ls {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Delete the entire store
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// When the cache may replay and when it may record
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheMode {
    /// Run commands untouched
    Disabled,
    /// Replay when possible, never record
    ReadOnly,
    /// Record fresh runs, never replay
    WriteOnly,
    /// Replay when possible, record otherwise
    ReadWrite,
}

impl CacheMode {
    pub fn policy(self) -> RunPolicy {
        match self {
            CacheMode::Disabled => RunPolicy::disabled(),
            CacheMode::ReadOnly => RunPolicy::read_only(),
            CacheMode::WriteOnly => RunPolicy::write_only(),
            CacheMode::ReadWrite => RunPolicy::read_write(),
        }
    }

    /// Parse the `run.mode` configuration value, accepting the same
    /// spellings as the command line flag.
    pub fn from_config(value: &str) -> Option<Self> {
        <CacheMode as ValueEnum>::from_str(value, true).ok()
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheMode::Disabled => "disabled",
            CacheMode::ReadOnly => "read-only",
            CacheMode::WriteOnly => "write-only",
            CacheMode::ReadWrite => "read-write",
        };
        write!(f, "{name}")
    }
}
