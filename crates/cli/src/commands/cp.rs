//! cp command - Copy objects
//!
//! Uploads local files and directory trees, downloads objects and prefixes,
//! and copies objects server-side within a bucket. Transfers run on the
//! transfer engine, so large files use resumable multipart uploads and
//! ranged downloads.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use stow_core::path::as_prefix;
use stow_core::{
    CannedAcl, DirectorySink, FileSink as _, ObjectStore as _, ParsedPath, RemotePath,
    TransferOptions, parse_path,
};

use super::{connect, engine, run_task};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Copy objects
#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source path (local path or alias/bucket/key)
    pub source: String,

    /// Destination path (local path or alias/bucket/key)
    pub target: String,

    /// Copy directories and prefixes recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Encrypt uploads client-side with this key from the local key store
    #[arg(long, value_name = "ALIAS")]
    pub encrypt_key: Option<String>,

    /// Content type for uploaded files (guessed from the file name otherwise)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Canned ACL for uploaded objects
    #[arg(long, value_parser = parse_acl)]
    pub acl: Option<CannedAcl>,

    /// Only show what would be copied (dry run)
    #[arg(long)]
    pub dry_run: bool,
}

pub(crate) fn parse_acl(raw: &str) -> Result<CannedAcl, String> {
    raw.parse().map_err(|e: stow_core::Error| e.to_string())
}

#[derive(Debug, Serialize)]
struct CpOutput {
    status: &'static str,
    source: String,
    target: String,
}

/// Work handed to the transfer engine
#[derive(Debug, PartialEq, Eq)]
enum Transfer {
    UploadFile { source: PathBuf, key: String },
    UploadTree { root: PathBuf, prefix: String },
    DownloadFile { key: String, destination: PathBuf },
    DownloadTree { prefix: String, root: PathBuf },
}

impl Transfer {
    fn is_upload(&self) -> bool {
        matches!(self, Self::UploadFile { .. } | Self::UploadTree { .. })
    }
}

/// A resolved copy plan
#[derive(Debug, PartialEq, Eq)]
enum Plan {
    Transfer(Transfer),
    ServerCopy { from: String, to: String },
}

/// Execute the cp command
pub async fn execute(args: CpArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let source = match parse_path(&args.source) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid source path", &e),
    };
    let target = match parse_path(&args.target) {
        Ok(p) => p,
        Err(e) => return formatter.fail("Invalid target path", &e),
    };

    let (remote, plan) = match plan_copy(&source, &target, args.recursive) {
        Ok(planned) => planned,
        Err((code, message)) => {
            formatter.error(&message);
            return code;
        }
    };
    if args.encrypt_key.is_some() && !matches!(&plan, Plan::Transfer(t) if t.is_upload()) {
        formatter.warning("--encrypt-key only applies to uploads; downloads decrypt automatically");
    }

    if args.dry_run {
        formatter.println(&format!("Would copy: {} -> {}", args.source, args.target));
        return ExitCode::Success;
    }

    let client = match connect(&remote.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };
    let bucket = remote.bucket.clone();

    let transfer = match plan {
        Plan::Transfer(transfer) => transfer,
        Plan::ServerCopy { from, to } => {
            return match client.copy_object(&bucket, &from, &to).await {
                Ok(()) => report(&formatter, &args),
                Err(e) => formatter.fail("Copy failed", &e),
            };
        }
    };

    let engine = match engine(client, &formatter) {
        Ok(engine) => engine,
        Err(code) => return code,
    };
    let options = TransferOptions {
        encryption_key: args.encrypt_key.clone(),
        content_type: args.content_type.clone(),
        acl: args.acl,
    };

    let id = match transfer {
        Transfer::UploadFile { source, key } => {
            let options = TransferOptions {
                content_type: options.content_type.clone().or_else(|| {
                    mime_guess::from_path(&source)
                        .first()
                        .map(|m| m.essence_str().to_string())
                }),
                ..options
            };
            engine.upload_file(source, bucket, key, options)
        }
        Transfer::UploadTree { root, prefix } => engine.upload_tree(root, bucket, prefix, options),
        Transfer::DownloadFile { key, destination } => engine.download_file(bucket, key, destination),
        Transfer::DownloadTree { prefix, root } => engine.download_tree(bucket, prefix, root),
    };

    match run_task(&engine, id, &formatter).await {
        ExitCode::Success => report(&formatter, &args),
        code => code,
    }
}

fn report(formatter: &Formatter, args: &CpArgs) -> ExitCode {
    if formatter.is_json() {
        formatter.json(&CpOutput {
            status: "success",
            source: args.source.clone(),
            target: args.target.clone(),
        });
    } else {
        formatter.success(&format!("{} -> {}", args.source, args.target));
    }
    ExitCode::Success
}

type PlanError = (ExitCode, String);

/// Decide what to transfer, validating local paths and flags
fn plan_copy(source: &ParsedPath, target: &ParsedPath, recursive: bool) -> Result<(RemotePath, Plan), PlanError> {
    match (source, target) {
        (ParsedPath::Local(src), ParsedPath::Remote(dst)) => {
            plan_upload(src, dst, recursive).map(|t| (dst.clone(), Plan::Transfer(t)))
        }
        (ParsedPath::Remote(src), ParsedPath::Local(dst)) => {
            plan_download(src, dst, recursive).map(|t| (src.clone(), Plan::Transfer(t)))
        }
        (ParsedPath::Remote(src), ParsedPath::Remote(dst)) => {
            if src.alias != dst.alias || src.bucket != dst.bucket {
                return Err((
                    ExitCode::UnsupportedFeature,
                    "Server-side copy is only supported within one bucket".into(),
                ));
            }
            if src.is_prefix() {
                return Err((
                    ExitCode::UsageError,
                    "Copying a prefix within a bucket is not supported; use mv to rename it".into(),
                ));
            }
            let to = if dst.is_prefix() {
                format!("{}{}", dst.key, src.file_name().unwrap_or_default())
            } else {
                dst.key.clone()
            };
            Ok((
                src.clone(),
                Plan::ServerCopy {
                    from: src.key.clone(),
                    to,
                },
            ))
        }
        (ParsedPath::Local(_), ParsedPath::Local(_)) => Err((
            ExitCode::UsageError,
            "Cannot copy between two local paths. Use system cp command.".into(),
        )),
    }
}

fn plan_upload(src: &Path, dst: &RemotePath, recursive: bool) -> Result<Transfer, PlanError> {
    if !src.exists() {
        return Err((ExitCode::NotFound, format!("Source not found: {}", src.display())));
    }

    if src.is_dir() {
        if !recursive {
            return Err((
                ExitCode::UsageError,
                "Source is a directory. Use -r/--recursive to copy directories.".into(),
            ));
        }
        return Ok(Transfer::UploadTree {
            root: src.to_path_buf(),
            prefix: as_prefix(&dst.key),
        });
    }

    let key = if dst.is_prefix() {
        let filename = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| (ExitCode::UsageError, format!("Cannot upload {}", src.display())))?;
        format!("{}{filename}", dst.key)
    } else {
        dst.key.clone()
    };
    Ok(Transfer::UploadFile {
        source: src.to_path_buf(),
        key,
    })
}

fn plan_download(src: &RemotePath, dst: &Path, recursive: bool) -> Result<Transfer, PlanError> {
    if src.is_prefix() {
        if !recursive {
            return Err((
                ExitCode::UsageError,
                format!("'{src}' is a prefix. Use -r/--recursive to download it."),
            ));
        }
        return Ok(Transfer::DownloadTree {
            prefix: src.key.clone(),
            root: dst.to_path_buf(),
        });
    }

    let destination = if dst.is_dir() {
        DirectorySink::new(dst)
            .choose_destination(src.file_name().unwrap_or(src.key.as_str()))
            .map_err(|e| (ExitCode::UsageError, e.to_string()))?
    } else {
        dst.to_path_buf()
    };
    Ok(Transfer::DownloadFile {
        key: src.key.clone(),
        destination,
    })
}
