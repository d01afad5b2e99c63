//! ls command - List buckets and objects
//!
//! Lists buckets when given an alias only, or one "directory" of a bucket
//! when given a bucket path. `--all` follows continuation tokens and
//! `--recursive` flattens the listing.

use clap::Args;
use futures::TryStreamExt;
use serde::Serialize;
use stow_core::path::as_prefix;
use stow_core::{BucketInfo, ListRequest, ObjectRecord, ObjectStore, lister};

use super::connect;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// List buckets or objects
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Remote path (alias or alias/bucket[/prefix])
    pub path: String,

    /// List every key under the prefix without grouping by "/"
    #[arg(short, long)]
    pub recursive: bool,

    /// Follow continuation tokens and list every page
    #[arg(short, long)]
    pub all: bool,

    /// Continue from a token printed by a previous truncated listing
    #[arg(long, conflicts_with_all = ["all", "recursive"])]
    pub continuation_token: Option<String>,

    /// Summarize output (show totals)
    #[arg(long)]
    pub summarize: bool,
}

/// Output structure for ls command (JSON format)
#[derive(Debug, Serialize)]
struct LsOutput {
    items: Vec<ObjectRecord>,
    truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

#[derive(Debug, Serialize)]
struct BucketsOutput {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_objects: usize,
    total_size_bytes: u64,
    total_size_human: String,
}

/// Execute the ls command
pub async fn execute(args: LsArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (alias_name, bucket, prefix) = match parse_ls_path(&args.path) {
        Ok(parsed) => parsed,
        Err(e) => {
            formatter.error(&e);
            return ExitCode::UsageError;
        }
    };

    let client = match connect(&alias_name, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    match bucket {
        None => list_buckets(client.as_ref(), &formatter, args.summarize).await,
        Some(bucket) => list_objects(client.as_ref(), &bucket, &prefix, &args, &formatter).await,
    }
}

async fn list_buckets(store: &dyn ObjectStore, formatter: &Formatter, summarize: bool) -> ExitCode {
    let buckets = match store.list_buckets().await {
        Ok(buckets) => buckets,
        Err(e) => return formatter.fail("Failed to list buckets", &e),
    };

    if formatter.is_json() {
        formatter.json(&BucketsOutput { buckets });
        return ExitCode::Success;
    }

    let rows = buckets
        .iter()
        .map(|b| {
            vec![
                b.created
                    .map(|d| d.strftime("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
                format!("{}/", b.name),
            ]
        })
        .collect();
    formatter.print_table(&[], rows);
    if summarize {
        formatter.println(&format!("\nTotal: {} buckets", buckets.len()));
    }
    ExitCode::Success
}

/// Fetch the records the flags ask for, with the final truncation state
async fn collect(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    args: &LsArgs,
) -> stow_core::Result<(Vec<ObjectRecord>, bool, Option<String>)> {
    if args.recursive {
        let items: Vec<ObjectRecord> = lister::list_all(store, bucket, prefix)
            .try_filter(|r| futures::future::ready(r.key != prefix))
            .try_collect()
            .await?;
        return Ok((items, false, None));
    }

    let mut items = Vec::new();
    let mut token = args.continuation_token.clone();
    loop {
        let request = ListRequest {
            continuation_token: token,
            ..ListRequest::browse(prefix)
        };
        let page = store.list_page(bucket, &request).await?;
        items.extend(page.entries);

        if !(args.all && page.is_truncated) {
            return Ok((items, page.is_truncated, page.continuation_token));
        }
        token = page.continuation_token;
    }
}

async fn list_objects(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    args: &LsArgs,
    formatter: &Formatter,
) -> ExitCode {
    let (items, truncated, continuation_token) = match collect(store, bucket, prefix, args).await {
        Ok(listing) => listing,
        Err(e) => return formatter.fail(&format!("Failed to list {bucket}/{prefix}"), &e),
    };

    let total_objects = items.iter().filter(|i| !i.is_folder).count();
    let total_size: u64 = items.iter().filter(|i| !i.is_folder).map(|i| i.size).sum();
    let summary = args.summarize.then(|| Summary {
        total_objects,
        total_size_bytes: total_size,
        total_size_human: humansize::format_size(total_size, humansize::BINARY),
    });

    if formatter.is_json() {
        formatter.json(&LsOutput {
            items,
            truncated,
            continuation_token,
            summary,
        });
        return ExitCode::Success;
    }

    let rows = items
        .iter()
        .map(|item| {
            if item.is_folder {
                vec![String::new(), "DIR".into(), display_key(&item.key, prefix, args.recursive)]
            } else {
                vec![
                    item.last_modified.strftime("%Y-%m-%d %H:%M:%S").to_string(),
                    item.size_human(),
                    display_key(&item.key, prefix, args.recursive),
                ]
            }
        })
        .collect();
    formatter.print_table(&[], rows);

    if truncated {
        if let Some(token) = &continuation_token {
            formatter.warning(&format!(
                "Listing truncated. Use --all, or --continuation-token '{token}' for the next page"
            ));
        }
    }
    if let Some(summary) = summary {
        formatter.println(&format!(
            "\nTotal: {} objects, {}",
            summary.total_objects, summary.total_size_human
        ));
    }

    ExitCode::Success
}

/// Keys shown relative to the listed prefix when browsing
fn display_key(key: &str, prefix: &str, recursive: bool) -> String {
    if recursive {
        return key.to_string();
    }
    key.strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
        .unwrap_or(key)
        .to_string()
}

/// Parse ls path into (alias, bucket, prefix)
fn parse_ls_path(path: &str) -> Result<(String, Option<String>, String), String> {
    if path.trim_end_matches('/').is_empty() {
        return Err("Path cannot be empty".to_string());
    }

    let mut parts = path.splitn(3, '/');
    let alias = parts.next().unwrap_or_default().to_string();
    let bucket = parts.next().filter(|b| !b.is_empty()).map(str::to_string);
    let prefix = parts.next().map(as_prefix).unwrap_or_default();

    if !stow_core::path::is_valid_alias_name(&alias) {
        return Err(format!("Invalid alias name in '{path}'"));
    }
    Ok((alias, bucket, prefix))
}
