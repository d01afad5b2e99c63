//! stat command - Show object metadata
//!
//! For an object key, shows its HEAD metadata. For a prefix (a key ending in
//! "/" or no key at all), shows the object count and total size beneath it.

use std::collections::BTreeMap;

use clap::Args;
use serde::Serialize;
use stow_core::crypto::{META_ENCRYPTED, META_KEY_ALIAS};
use stow_core::{ObjectMeta, ObjectStore, lister};

use super::{connect, remote_path};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Show object metadata or prefix totals
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object or prefix path (alias/bucket/key or alias/bucket/prefix/)
    pub path: String,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    size_bytes: u64,
    size_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    encrypted: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl From<ObjectMeta> for StatOutput {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            encrypted: meta
                .metadata
                .get(META_ENCRYPTED)
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            size_human: humansize::format_size(meta.size, humansize::BINARY),
            last_modified: meta.last_modified.map(|d| d.to_string()),
            name: meta.key,
            size_bytes: meta.size,
            etag: meta.etag,
            content_type: meta.content_type,
            metadata: meta.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
struct PrefixStatOutput {
    prefix: String,
    objects: u64,
    size_bytes: u64,
    size_human: String,
}

/// Execute the stat command
pub async fn execute(args: StatArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_path(&args.path, &formatter) {
        Ok(path) => path,
        Err(code) => return code,
    };
    let client = match connect(&path.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    if path.is_prefix() {
        stat_prefix(client.as_ref(), &path.bucket, &path.key, &formatter).await
    } else {
        stat_object(client.as_ref(), &path.bucket, &path.key, &formatter).await
    }
}

async fn stat_object(store: &dyn ObjectStore, bucket: &str, key: &str, formatter: &Formatter) -> ExitCode {
    let output = match store.head_object(bucket, key).await {
        Ok(meta) => StatOutput::from(meta),
        Err(e) => return formatter.fail(&format!("Failed to stat {bucket}/{key}"), &e),
    };

    if formatter.is_json() {
        formatter.json(&output);
        return ExitCode::Success;
    }

    formatter.println(&format!("Name      : {}", output.name));
    if let Some(modified) = &output.last_modified {
        formatter.println(&format!("Date      : {modified}"));
    }
    formatter.println(&format!(
        "Size      : {} ({} bytes)",
        output.size_human, output.size_bytes
    ));
    if let Some(etag) = &output.etag {
        formatter.println(&format!("ETag      : {etag}"));
    }
    if let Some(ct) = &output.content_type {
        formatter.println(&format!("Type      : {ct}"));
    }
    if output.encrypted {
        let alias = output
            .metadata
            .get(META_KEY_ALIAS)
            .map(String::as_str)
            .unwrap_or("?");
        formatter.println(&format!("Encrypted : yes (key '{alias}')"));
    }
    if !output.metadata.is_empty() {
        formatter.println("Metadata  :");
        for (name, value) in &output.metadata {
            formatter.println(&format!("  {name}: {value}"));
        }
    }
    ExitCode::Success
}

async fn stat_prefix(store: &dyn ObjectStore, bucket: &str, prefix: &str, formatter: &Formatter) -> ExitCode {
    let stats = match lister::calculate_stats(store, bucket, prefix).await {
        Ok(stats) => stats,
        Err(e) => return formatter.fail(&format!("Failed to stat {bucket}/{prefix}"), &e),
    };
    let output = PrefixStatOutput {
        prefix: format!("{bucket}/{prefix}"),
        objects: stats.objects,
        size_bytes: stats.total_size,
        size_human: humansize::format_size(stats.total_size, humansize::BINARY),
    };

    if formatter.is_json() {
        formatter.json(&output);
    } else {
        formatter.println(&format!("Prefix    : {}", output.prefix));
        formatter.println(&format!("Objects   : {}", output.objects));
        formatter.println(&format!(
            "Size      : {} ({} bytes)",
            output.size_human, output.size_bytes
        ));
    }
    ExitCode::Success
}
