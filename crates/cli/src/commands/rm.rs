//! rm command - Remove objects
//!
//! Removes single objects, or with `--recursive` every object under a prefix
//! (children first, the prefix placeholder last).

use clap::Args;
use serde::Serialize;
use stow_core::path::as_prefix;
use stow_core::{ObjectStore as _, RemotePath};

use super::{connect, engine, remote_path, run_task};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Remove objects
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Object path(s) to remove (alias/bucket/key or alias/bucket/prefix/)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove recursively (remove all objects with the given prefix)
    #[arg(short, long)]
    pub recursive: bool,

    /// Only show what would be deleted (dry run)
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    status: &'static str,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<String>,
}

/// Execute the rm command
pub async fn execute(args: RmArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let mut targets = Vec::with_capacity(args.paths.len());
    for raw in &args.paths {
        let path = match remote_path(raw, &formatter) {
            Ok(path) => path,
            Err(code) => return code,
        };
        if let Err(message) = check_target(&path, args.recursive) {
            formatter.error(&message);
            return ExitCode::UsageError;
        }
        targets.push(path);
    }

    if args.dry_run {
        for path in &targets {
            formatter.println(&format!("Would remove: {path}"));
        }
        return ExitCode::Success;
    }

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    let mut code = ExitCode::Success;

    for path in &targets {
        let outcome = remove(path, args.recursive, &formatter).await;
        if outcome == ExitCode::Success {
            deleted.push(path.to_string());
            continue;
        }
        failed.push(path.to_string());
        code = outcome;
        // Interruption and auth failures stop the whole command
        if matches!(outcome, ExitCode::Interrupted | ExitCode::AuthError) {
            break;
        }
    }

    if formatter.is_json() {
        formatter.json(&RmOutput {
            status: if failed.is_empty() { "success" } else { "partial" },
            deleted,
            failed,
        });
    } else if !deleted.is_empty() {
        formatter.success(&format!("Removed {}.", deleted.join(", ")));
    }
    code
}

fn check_target(path: &RemotePath, recursive: bool) -> Result<(), String> {
    if path.key.is_empty() && !recursive {
        return Err(format!("'{path}' is a bucket. Use -r/--recursive to empty it."));
    }
    if path.is_prefix() && !recursive {
        return Err(format!("'{path}' is a prefix. Use -r/--recursive to remove it."));
    }
    Ok(())
}

async fn remove(path: &RemotePath, recursive: bool, formatter: &Formatter) -> ExitCode {
    let client = match connect(&path.alias, formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    if !recursive {
        return match client.delete_object(&path.bucket, &path.key).await {
            Ok(()) => ExitCode::Success,
            Err(e) => formatter.fail(&format!("Failed to remove {path}"), &e),
        };
    }

    let engine = match engine(client, formatter) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    let id = engine.delete_tree(path.bucket.clone(), as_prefix(&path.key));
    run_task(&engine, id, formatter).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_requires_recursive() {
        let prefix = RemotePath::new("local", "bucket", "docs/");
        assert!(check_target(&prefix, false).is_err());
        assert!(check_target(&prefix, true).is_ok());

        let bucket = RemotePath::new("local", "bucket", "");
        assert!(check_target(&bucket, false).is_err());
    }

    #[test]
    fn test_object_removal_allowed() {
        let object = RemotePath::new("local", "bucket", "docs/a.txt");
        assert!(check_target(&object, false).is_ok());
    }
}
