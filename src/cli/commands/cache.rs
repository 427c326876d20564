//! Cache command - inspect or clear the store

use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::{RecapError, RecapResult};
use crate::store::{CacheStore, IdentitySummary};
use console::style;
use std::io::{self, Write};

/// Format bytes as human-readable size (e.g., "1.5 GB")
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> RecapResult<()> {
    let root = args.store.clone().unwrap_or_else(|| config.store_root());
    let store = CacheStore::open(root);

    match args.action {
        CacheAction::Stats => show_stats(store).await,
        CacheAction::Ls { format } => list_identities(store, format).await,
        CacheAction::Clear { yes } => clear_store(store, yes).await,
    }
}

async fn show_stats(store: CacheStore) -> RecapResult<()> {
    let root = store.root().to_path_buf();
    let stats = tokio::task::spawn_blocking(move || store.stats())
        .await
        .map_err(|e| RecapError::Internal(format!("stats task failed: {e}")))??;

    println!("Store:      {}", root.display());
    println!("Commands:   {}", stats.identities);
    println!("Recordings: {}", stats.recordings);
    println!(
        "Objects:    {} ({})",
        stats.objects,
        format_bytes(stats.object_bytes)
    );

    Ok(())
}

async fn list_identities(store: CacheStore, format: OutputFormat) -> RecapResult<()> {
    let summaries = tokio::task::spawn_blocking(move || store.identities())
        .await
        .map_err(|e| RecapError::Internal(format!("listing task failed: {e}")))??;

    if summaries.is_empty() {
        println!("No cached invocations.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_identity_table(&summaries),
        OutputFormat::Json => print_identity_json(&summaries)?,
        OutputFormat::Plain => print_identity_plain(&summaries),
    }

    Ok(())
}

fn print_identity_table(summaries: &[IdentitySummary]) {
    println!(
        "{:<14} {:<44} {:<11} {:<16}",
        "IDENTITY", "COMMAND", "RECORDINGS", "CREATED"
    );
    println!("{}", "-".repeat(88));

    for summary in summaries {
        let command = shorten(&summary.argv.join(" "), 44);
        let created = summary
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<14} {:<44} {:<11} {:<16}",
            short_hex(&summary.hex),
            command,
            summary.recordings,
            created
        );
    }

    println!();
    println!("Total: {} command(s)", summaries.len());
}

fn print_identity_json(summaries: &[IdentitySummary]) -> RecapResult<()> {
    #[derive(serde::Serialize)]
    struct IdentityJson {
        identity: String,
        command: Vec<String>,
        cwd: String,
        recordings: u64,
        created_at: Option<String>,
    }

    let items: Vec<IdentityJson> = summaries
        .iter()
        .map(|s| IdentityJson {
            identity: s.hex.clone(),
            command: s.argv.clone(),
            cwd: s.cwd.display().to_string(),
            recordings: s.recordings,
            created_at: s.created_at.map(|t| t.to_rfc3339()),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

fn print_identity_plain(summaries: &[IdentitySummary]) {
    for summary in summaries {
        println!("{}", summary.hex);
    }
}

async fn clear_store(store: CacheStore, skip_confirm: bool) -> RecapResult<()> {
    let root = store.root().to_path_buf();
    if !root.exists() {
        println!("Nothing to clear.");
        return Ok(());
    }

    if !skip_confirm {
        print!("Delete the entire store at {}? [y/N] ", root.display());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    tokio::task::spawn_blocking(move || store.clear())
        .await
        .map_err(|e| RecapError::Internal(format!("clear task failed: {e}")))??;

    println!("{} store cleared", style("✓").green());
    Ok(())
}

fn short_hex(hex: &str) -> &str {
    &hex[..hex.len().min(12)]
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max - 3).collect();
    format!("{prefix}...")
}
