//! acl command - Apply canned ACLs to buckets and objects

use clap::Args;
use serde::Serialize;
use stow_core::{CannedAcl, ObjectStore as _};

use super::cp::parse_acl;
use super::{connect, remote_path};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Set a canned ACL on a bucket or object
#[derive(Args, Debug)]
pub struct AclArgs {
    /// Bucket (alias/bucket) or object (alias/bucket/key) path
    pub path: String,

    /// Canned ACL, e.g. private or public-read
    #[arg(value_parser = parse_acl)]
    pub acl: CannedAcl,
}

#[derive(Debug, Serialize)]
struct AclOutput {
    status: &'static str,
    path: String,
    acl: &'static str,
}

/// Execute the acl command
pub async fn execute(args: AclArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match remote_path(&args.path, &formatter) {
        Ok(path) => path,
        Err(code) => return code,
    };
    let client = match connect(&path.alias, &formatter) {
        Ok(client) => client,
        Err(code) => return code,
    };

    let key = (!path.key.is_empty()).then_some(path.key.as_str());
    if let Err(e) = client.set_acl(&path.bucket, key, args.acl).await {
        return formatter.fail(&format!("Failed to set ACL on {path}"), &e);
    }

    if formatter.is_json() {
        formatter.json(&AclOutput {
            status: "success",
            path: path.to_string(),
            acl: args.acl.as_str(),
        });
    } else {
        formatter.success(&format!("{path}: {}", args.acl.as_str()));
    }
    ExitCode::Success
}
