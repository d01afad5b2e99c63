//! versions command - List object versions

use clap::Args;
use serde::Serialize;
use stow_core::{ObjectStore as _, ObjectVersion};

use super::{connect, remote_path};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// List every version and delete marker of one key
#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// Object path (alias/bucket/key)
    pub path: String,
}

#[derive(Debug, Serialize)]
struct VersionsOutput {
    key: String,
    versions: Vec<ObjectVersion>,
}

fn version_row(version: &ObjectVersion) -> Vec<String> {
    vec![
        version.last_modified.strftime("%Y-%m-%d %H:%M:%S").to_string(),
        if version.is_delete_marker {
            "DEL".to_string()
        } else {
            humansize::format_size(version.size, humansize::BINARY)
        },
        version.version_id.clone(),
        if version.is_latest { "latest".into() } else { String::new() },
    ]
}

/// Execute the versions command
pub async fn execute(args: VersionsArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_path(&args.path, &formatter) {
        Ok(path) => path,
        Err(code) => return code,
    };
    if path.key.is_empty() {
        formatter.error("versions needs an object key");
        return ExitCode::UsageError;
    }
    let client = match connect(&path.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    let mut versions = match client.list_versions(&path.bucket, &path.key).await {
        Ok(versions) => versions,
        Err(e) => return formatter.fail(&format!("Failed to list versions of {path}"), &e),
    };
    versions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    if formatter.is_json() {
        formatter.json(&VersionsOutput {
            key: path.key,
            versions,
        });
    } else if versions.is_empty() {
        formatter.println(&format!("No versions found for {path}"));
    } else {
        formatter.print_table(
            &["MODIFIED", "SIZE", "VERSION", ""],
            versions.iter().map(version_row).collect(),
        );
    }
    ExitCode::Success
}
