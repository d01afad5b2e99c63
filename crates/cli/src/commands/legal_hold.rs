//! legal-hold command - Toggle the legal hold of an object
//!
//! Only buckets created with object lock accept legal holds, so the bucket
//! configuration is checked before the hold is written.

use clap::{Args, ValueEnum};
use serde::Serialize;
use stow_core::ObjectStore as _;

use super::{connect, remote_path};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HoldState {
    On,
    Off,
}

/// Turn an object's legal hold on or off
#[derive(Args, Debug)]
pub struct LegalHoldArgs {
    /// New hold state
    #[arg(value_enum)]
    pub state: HoldState,

    /// Object path (alias/bucket/key)
    pub path: String,
}

#[derive(Debug, Serialize)]
struct LegalHoldOutput {
    status: &'static str,
    path: String,
    legal_hold: bool,
}

/// Execute the legal-hold command
pub async fn execute(args: LegalHoldArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_path(&args.path, &formatter) {
        Ok(path) => path,
        Err(code) => return code,
    };
    if path.is_prefix() {
        formatter.error("legal-hold needs an object key");
        return ExitCode::UsageError;
    }
    let client = match connect(&path.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    match client.object_lock_enabled(&path.bucket).await {
        Ok(true) => {}
        Ok(false) => {
            formatter.error(&format!(
                "Bucket '{}' does not have object lock enabled",
                path.bucket
            ));
            return ExitCode::UnsupportedFeature;
        }
        Err(e) => return formatter.fail(&format!("Failed to inspect bucket {}", path.bucket), &e),
    }

    let on = args.state == HoldState::On;
    if let Err(e) = client.set_legal_hold(&path.bucket, &path.key, on).await {
        return formatter.fail(&format!("Failed to set legal hold on {path}"), &e);
    }

    if formatter.is_json() {
        formatter.json(&LegalHoldOutput {
            status: "success",
            path: path.to_string(),
            legal_hold: on,
        });
    } else {
        let state = if on { "on" } else { "off" };
        formatter.success(&format!("Legal hold {state} for {path}"));
    }
    ExitCode::Success
}
