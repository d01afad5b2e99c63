//! share command - Generate presigned URLs
//!
//! Presigned URLs are signed locally; no request reaches the service.

use std::time::Duration;

use clap::Args;
use serde::Serialize;
use stow_core::{ObjectStore as _, PresignMethod};

use super::{connect, remote_path};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Generate a presigned URL for an object
#[derive(Args, Debug)]
pub struct ShareArgs {
    /// Object path (alias/bucket/key)
    pub path: String,

    /// Validity period: seconds, or a number with an s, m, h or d suffix (max 7d)
    #[arg(long, short, default_value = "7d", value_parser = parse_expiry)]
    pub expire: Duration,

    /// Presign a PUT (upload) instead of a GET (download)
    #[arg(long)]
    pub upload: bool,
}

#[derive(Debug, Serialize)]
struct ShareOutput {
    url: String,
    method: &'static str,
    expires_in_secs: u64,
}

fn parse_expiry(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last() {
        Some((at, c)) if c.is_ascii_alphabetic() => (&raw[..at], c.to_ascii_lowercase()),
        _ => (raw, 's'),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{raw}'"))?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{raw}' is too large"))
}

/// Execute the share command
pub async fn execute(args: ShareArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_path(&args.path, &formatter) {
        Ok(path) => path,
        Err(code) => return code,
    };
    if path.is_prefix() {
        formatter.error("share needs an object key, not a prefix");
        return ExitCode::UsageError;
    }
    let client = match connect(&path.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    let method = if args.upload {
        PresignMethod::Put
    } else {
        PresignMethod::Get
    };
    let url = match client.presign(method, &path.bucket, &path.key, args.expire) {
        Ok(url) => url,
        Err(e) => {
            formatter.fail("Failed to presign", &e);
            return ExitCode::UsageError;
        }
    };

    if formatter.is_json() {
        formatter.json(&ShareOutput {
            url,
            method: if args.upload { "PUT" } else { "GET" },
            expires_in_secs: args.expire.as_secs(),
        });
    } else {
        // Bare URL on stdout so it can be piped
        println!("{url}");
    }
    ExitCode::Success
}
