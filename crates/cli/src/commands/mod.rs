//! CLI command definitions and execution
//!
//! This module contains all CLI commands and their implementations, plus
//! the shared plumbing for resolving aliases, building the transfer engine
//! and following a task to completion.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use stow_core::{
    AliasManager, ConfigManager, Defaults, FileKeyStore, KeyStore, ParsedPath, RemotePath, TaskId,
    TaskStatus, TransferEngine, parse_path,
};
use stow_s3::S3Client;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, TaskProgress};

mod acl;
mod alias;
mod completions;
mod cp;
mod key;
mod legal_hold;
mod ls;
mod mv;
mod rm;
mod share;
mod stat;
mod versioning;
mod versions;

/// stow - client for S3-compatible object storage
///
/// Lists, copies, moves and removes objects with resumable multipart
/// transfers and optional client-side encryption.
#[derive(Parser, Debug)]
#[command(name = "stow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bar
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage storage service aliases
    #[command(subcommand)]
    Alias(alias::AliasCommands),

    /// List buckets and objects
    Ls(ls::LsArgs),

    /// Show object metadata or prefix totals
    Stat(stat::StatArgs),

    /// Copy files and objects (local<->S3, within a bucket)
    Cp(cp::CpArgs),

    /// Rename an object or a whole prefix
    Mv(mv::MvArgs),

    /// Remove objects
    Rm(rm::RmArgs),

    /// Generate a presigned URL
    Share(share::ShareArgs),

    /// List the versions of an object
    Versions(versions::VersionsArgs),

    /// Manage bucket versioning
    #[command(subcommand)]
    Versioning(versioning::VersioningCommands),

    /// Apply a canned ACL to a bucket or object
    Acl(acl::AclArgs),

    /// Turn an object's legal hold on or off
    LegalHold(legal_hold::LegalHoldArgs),

    /// Manage local encryption keys
    #[command(subcommand)]
    Key(key::KeyCommands),

    /// Generate shell completion scripts
    Completions(completions::CompletionsArgs),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let defaults = match ConfigManager::new().and_then(|manager| manager.load()) {
        Ok(config) => config.defaults,
        Err(e) => {
            // Commands that need the file report the error themselves
            tracing::debug!(error = %e, "using built-in output defaults");
            Defaults::default()
        }
    };
    let output_config = output_config(&cli, &defaults);

    match cli.command {
        Commands::Alias(cmd) => alias::execute(cmd, output_config).await,
        Commands::Ls(args) => ls::execute(args, output_config).await,
        Commands::Stat(args) => stat::execute(args, output_config).await,
        Commands::Cp(args) => cp::execute(args, output_config).await,
        Commands::Mv(args) => mv::execute(args, output_config).await,
        Commands::Rm(args) => rm::execute(args, output_config).await,
        Commands::Share(args) => share::execute(args, output_config).await,
        Commands::Versions(args) => versions::execute(args, output_config).await,
        Commands::Versioning(cmd) => versioning::execute(cmd, output_config).await,
        Commands::Acl(args) => acl::execute(args, output_config).await,
        Commands::LegalHold(args) => legal_hold::execute(args, output_config).await,
        Commands::Key(cmd) => key::execute(cmd, output_config),
        Commands::Completions(args) => completions::execute(args),
    }
}

/// Command-line flags layered over the `[defaults]` table
fn output_config(cli: &Cli, defaults: &Defaults) -> OutputConfig {
    OutputConfig {
        json: cli.json || defaults.output.eq_ignore_ascii_case("json"),
        no_color: cli.no_color || defaults.color.eq_ignore_ascii_case("never"),
        no_progress: cli.no_progress || !defaults.progress,
        quiet: cli.quiet,
    }
}

/// Parse an argument that must name a remote location
pub(crate) fn remote_path(raw: &str, formatter: &Formatter) -> Result<RemotePath, ExitCode> {
    match parse_path(raw) {
        Ok(ParsedPath::Remote(path)) => Ok(path),
        Ok(ParsedPath::Local(_)) => {
            formatter.error(&format!("'{raw}' is not a remote path. Use alias/bucket[/key]"));
            Err(ExitCode::UsageError)
        }
        Err(e) => Err(formatter.fail("Invalid path", &e)),
    }
}

/// Build an S3 client for a configured alias
pub(crate) fn connect(alias_name: &str, formatter: &Formatter) -> Result<Arc<S3Client>, ExitCode> {
    let alias_manager = AliasManager::new().map_err(|e| formatter.fail("Failed to load aliases", &e))?;
    let alias = alias_manager
        .get(alias_name)
        .map_err(|e| formatter.fail("Failed to resolve alias", &e))?;

    tracing::debug!(alias = %alias.name, endpoint = %alias.endpoint, "connecting");
    S3Client::new(&alias)
        .map(Arc::new)
        .map_err(|e| formatter.fail("Failed to create S3 client", &e))
}

/// Build a transfer engine over `client` using the configured transfer settings
pub(crate) fn engine(client: Arc<S3Client>, formatter: &Formatter) -> Result<TransferEngine, ExitCode> {
    let config = ConfigManager::new()
        .and_then(|manager| manager.load())
        .and_then(|config| config.transfer.to_transfer_config())
        .map_err(|e| formatter.fail("Failed to load configuration", &e))?;
    let keys: Arc<dyn KeyStore> = Arc::new(
        FileKeyStore::open_default().map_err(|e| formatter.fail("Failed to open key store", &e))?,
    );
    TransferEngine::new(client, keys, config)
        .map_err(|e| formatter.fail("Invalid transfer settings", &e))
}

/// Follow a task until it is terminal, cancelling it on Ctrl+C
pub(crate) async fn run_task(engine: &TransferEngine, id: TaskId, formatter: &Formatter) -> ExitCode {
    let mut updates = engine.subscribe();
    let mut progress = TaskProgress::new(formatter.config());
    let mut interrupted = false;

    let finished = loop {
        let snapshot = updates.borrow_and_update().clone();
        progress.update(&snapshot);
        if let Some(task) = snapshot.iter().find(|t| t.id == id) {
            if task.status.is_terminal() {
                break Some(task.clone());
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break engine.task(id).await;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                tracing::debug!(task = %id, "interrupt received, cancelling");
                engine.cancel(id);
            }
        }
    };
    progress.finish();

    match finished {
        Some(task) => match task.status {
            TaskStatus::Completed => ExitCode::Success,
            TaskStatus::Cancelled => ExitCode::Interrupted,
            _ => {
                let message = task.error_message.unwrap_or_else(|| "unknown error".into());
                formatter.error(&format!("{} failed: {message}", task.name));
                ExitCode::GeneralError
            }
        },
        None => {
            formatter.error(&format!("Task {id} disappeared"));
            ExitCode::GeneralError
        }
    }
}
