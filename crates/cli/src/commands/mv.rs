//! mv command - Rename objects
//!
//! Renames one object, or every object under a prefix, within a bucket by
//! server-side copy followed by delete. A failed prefix move stops at the
//! first error and leaves already-moved objects at the destination.

use clap::Args;
use serde::Serialize;
use stow_core::path::as_prefix;
use stow_core::{ObjectStore as _, RemotePath};

use super::{connect, engine, remote_path, run_task};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Rename an object or prefix
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Source path (alias/bucket/key or alias/bucket/prefix/)
    pub source: String,

    /// Destination path in the same bucket
    pub target: String,

    /// Move every object under the source prefix
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Debug, Serialize)]
struct MvOutput {
    status: &'static str,
    source: String,
    target: String,
}

/// What a move resolves to
#[derive(Debug, PartialEq, Eq)]
enum Move {
    Object { from: String, to: String },
    Prefix { from: String, to: String },
}

fn plan_move(src: &RemotePath, dst: &RemotePath, recursive: bool) -> Result<Move, (ExitCode, String)> {
    if src.alias != dst.alias || src.bucket != dst.bucket {
        return Err((
            ExitCode::UnsupportedFeature,
            "mv only renames within one bucket".into(),
        ));
    }
    if src.key.is_empty() {
        return Err((ExitCode::UsageError, "Cannot move a whole bucket".into()));
    }

    if recursive || src.is_prefix() {
        let from = as_prefix(&src.key);
        let to = as_prefix(&dst.key);
        if to.starts_with(&from) {
            return Err((
                ExitCode::UsageError,
                format!("Cannot move '{from}' into itself"),
            ));
        }
        return Ok(Move::Prefix { from, to });
    }

    let to = if dst.is_prefix() {
        format!("{}{}", dst.key, src.file_name().unwrap_or_default())
    } else {
        dst.key.clone()
    };
    if to == src.key {
        return Err((ExitCode::UsageError, "Source and target are the same".into()));
    }
    Ok(Move::Object {
        from: src.key.clone(),
        to,
    })
}

/// Execute the mv command
pub async fn execute(args: MvArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (src, dst) = match (
        remote_path(&args.source, &formatter),
        remote_path(&args.target, &formatter),
    ) {
        (Ok(src), Ok(dst)) => (src, dst),
        (Err(code), _) | (_, Err(code)) => return code,
    };
    let planned = match plan_move(&src, &dst, args.recursive) {
        Ok(planned) => planned,
        Err((code, message)) => {
            formatter.error(&message);
            return code;
        }
    };

    let client = match connect(&src.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    let code = match planned {
        Move::Object { from, to } => {
            let moved = async {
                client.copy_object(&src.bucket, &from, &to).await?;
                client.delete_object(&src.bucket, &from).await
            };
            match moved.await {
                Ok(()) => ExitCode::Success,
                Err(e) => formatter.fail(&format!("Failed to move {from}"), &e),
            }
        }
        Move::Prefix { from, to } => {
            let engine = match engine(client, &formatter) {
                Ok(engine) => engine,
                Err(code) => return code,
            };
            let id = engine.rename_tree(src.bucket.clone(), from, to);
            run_task(&engine, id, &formatter).await
        }
    };

    if code == ExitCode::Success {
        if formatter.is_json() {
            formatter.json(&MvOutput {
                status: "success",
                source: args.source,
                target: args.target,
            });
        } else {
            formatter.success(&format!("{} -> {}", args.source, args.target));
        }
    }
    code
}
