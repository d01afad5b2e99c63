//! versioning command - Manage bucket versioning

use clap::Subcommand;
use serde::Serialize;
use stow_core::{ObjectStore as _, VersioningStatus};

use super::{connect, remote_path};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

#[derive(Subcommand, Debug)]
pub enum VersioningCommands {
    /// Enable versioning on a bucket
    Enable(BucketArg),

    /// Suspend versioning on a bucket
    Suspend(BucketArg),

    /// Show the versioning state of a bucket
    Status(BucketArg),
}

#[derive(clap::Args, Debug)]
pub struct BucketArg {
    /// Bucket path (alias/bucket)
    pub path: String,
}

#[derive(Debug, Serialize)]
struct VersioningOutput {
    bucket: String,
    status: VersioningStatus,
}

fn status_label(status: VersioningStatus) -> &'static str {
    match status {
        VersioningStatus::Unversioned => "unversioned",
        VersioningStatus::Enabled => "enabled",
        VersioningStatus::Suspended => "suspended",
    }
}

/// Execute a versioning subcommand
pub async fn execute(cmd: VersioningCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (raw, change) = match &cmd {
        VersioningCommands::Enable(arg) => (&arg.path, Some(true)),
        VersioningCommands::Suspend(arg) => (&arg.path, Some(false)),
        VersioningCommands::Status(arg) => (&arg.path, None),
    };
    let path = match remote_path(raw, &formatter) {
        Ok(path) => path,
        Err(code) => return code,
    };
    let client = match connect(&path.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    if let Some(enabled) = change {
        if let Err(e) = client.set_versioning(&path.bucket, enabled).await {
            return formatter.fail(&format!("Failed to update versioning on {}", path.bucket), &e);
        }
    }

    let status = match client.get_versioning(&path.bucket).await {
        Ok(status) => status,
        Err(e) => return formatter.fail(&format!("Failed to read versioning of {}", path.bucket), &e),
    };

    if formatter.is_json() {
        formatter.json(&VersioningOutput {
            bucket: path.bucket,
            status,
        });
    } else {
        formatter.println(&format!("{}: versioning {}", path.bucket, status_label(status)));
    }
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_matches_label() {
        for status in [
            VersioningStatus::Unversioned,
            VersioningStatus::Enabled,
            VersioningStatus::Suspended,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status_label(status)));
        }
    }
}
