//! Alias management commands
//!
//! Aliases are named references to S3-compatible storage endpoints,
//! including connection details and credentials.

use clap::Subcommand;
use serde::Serialize;
use stow_core::{Alias, AliasManager, BucketLookup, Error, TimeoutConfig};

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Alias subcommands for managing storage service connections
#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add or update an alias
    Set(SetArgs),

    /// List all configured aliases
    List(ListArgs),

    /// Remove an alias
    Remove(RemoveArgs),
}

/// Arguments for the `alias set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Alias name (e.g., "local", "s3", "minio")
    pub name: String,

    /// S3 endpoint URL (e.g., "http://localhost:9000", "https://s3.amazonaws.com")
    pub endpoint: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Signing region
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Bucket lookup style: auto, path, or dns
    #[arg(long, default_value = "auto")]
    pub bucket_lookup: String,

    /// Allow insecure TLS connections
    #[arg(long, default_value = "false")]
    pub insecure: bool,

    /// Connect timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Request timeout in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,
}

/// Arguments for the `alias list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show full details including region and lookup style
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `alias remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the alias to remove
    pub name: String,
}

/// JSON output for alias list
#[derive(Serialize)]
struct AliasListOutput {
    aliases: Vec<AliasInfo>,
}

/// Alias information for JSON output (without credentials)
#[derive(Serialize)]
struct AliasInfo {
    name: String,
    endpoint: String,
    region: String,
    bucket_lookup: BucketLookup,
    insecure: bool,
}

impl From<&Alias> for AliasInfo {
    fn from(alias: &Alias) -> Self {
        Self {
            name: alias.name.clone(),
            endpoint: alias.endpoint.clone(),
            region: alias.region.clone(),
            bucket_lookup: alias.bucket_lookup,
            insecure: alias.insecure,
        }
    }
}

/// JSON output for alias set/remove operations
#[derive(Serialize)]
struct AliasOperationOutput {
    success: bool,
    alias: String,
    message: String,
}

/// Execute an alias subcommand
pub async fn execute(cmd: AliasCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let alias_manager = match AliasManager::new() {
        Ok(am) => am,
        Err(e) => return formatter.fail("Failed to load aliases", &e),
    };

    match cmd {
        AliasCommands::Set(args) => execute_set(args, &alias_manager, &formatter),
        AliasCommands::List(args) => execute_list(args, &alias_manager, &formatter),
        AliasCommands::Remove(args) => execute_remove(args, &alias_manager, &formatter),
    }
}

fn build_alias(args: &SetArgs) -> Result<Alias, String> {
    if !stow_core::path::is_valid_alias_name(&args.name) {
        return Err(format!(
            "Invalid alias name '{}'. Use letters, digits, '-' and '_'",
            args.name
        ));
    }
    if args.endpoint.is_empty() {
        return Err("Endpoint URL cannot be empty".into());
    }
    let endpoint = url::Url::parse(&args.endpoint)
        .map_err(|e| format!("Invalid endpoint URL '{}': {e}", args.endpoint))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err("Endpoint must use http or https".into());
    }
    let bucket_lookup: BucketLookup = args.bucket_lookup.parse().map_err(|e: Error| e.to_string())?;

    let mut alias = Alias::new(&args.name, &args.endpoint, &args.access_key, &args.secret_key);
    alias.region = args.region.clone();
    alias.bucket_lookup = bucket_lookup;
    alias.insecure = args.insecure;
    if args.connect_timeout_ms.is_some() || args.read_timeout_ms.is_some() {
        let defaults = TimeoutConfig::default();
        alias.timeout = Some(TimeoutConfig {
            connect_ms: args.connect_timeout_ms.unwrap_or(defaults.connect_ms),
            read_ms: args.read_timeout_ms.unwrap_or(defaults.read_ms),
        });
    }
    Ok(alias)
}

fn execute_set(args: SetArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    let alias = match build_alias(&args) {
        Ok(alias) => alias,
        Err(msg) => {
            formatter.error(&msg);
            return ExitCode::UsageError;
        }
    };

    match manager.set(alias) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Alias '{}' configured successfully", args.name),
                });
            } else {
                formatter.success(&format!("Alias '{}' configured successfully.", args.name));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail("Failed to save alias", &e),
    }
}

fn execute_list(args: ListArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    let aliases = match manager.list() {
        Ok(aliases) => aliases,
        Err(e) => return formatter.fail("Failed to list aliases", &e),
    };

    if formatter.is_json() {
        formatter.json(&AliasListOutput {
            aliases: aliases.iter().map(AliasInfo::from).collect(),
        });
    } else if aliases.is_empty() {
        formatter.println("No aliases configured.");
    } else if args.long {
        let rows = aliases
            .iter()
            .map(|a| {
                vec![
                    a.name.clone(),
                    a.endpoint.clone(),
                    a.region.clone(),
                    a.bucket_lookup.to_string(),
                    if a.insecure { "insecure".into() } else { String::new() },
                ]
            })
            .collect();
        formatter.print_table(&["NAME", "ENDPOINT", "REGION", "LOOKUP", ""], rows);
    } else {
        for alias in &aliases {
            formatter.println(&format!("{:<12} {}", alias.name, alias.endpoint));
        }
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    match manager.remove(&args.name) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Alias '{}' removed successfully", args.name),
                });
            } else {
                formatter.success(&format!("Alias '{}' removed successfully.", args.name));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail("Failed to remove alias", &e),
    }
}
