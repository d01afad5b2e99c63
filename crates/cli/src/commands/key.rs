//! key command - Manage local encryption keys
//!
//! Keys live in `keys.toml` next to the configuration and are referenced
//! by alias from `cp --encrypt-key`.

use clap::Subcommand;
use serde::Serialize;
use stow_core::FileKeyStore;
use stow_core::crypto::generate_key;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Generate a new random key
    Generate {
        /// Key alias
        name: String,

        /// Replace an existing key with the same alias
        #[arg(long)]
        force: bool,

        /// Print the generated key as hex
        #[arg(long)]
        show: bool,
    },

    /// List stored key aliases
    List,

    /// Remove a key
    Remove {
        /// Key alias
        name: String,
    },
}

#[derive(Debug, Serialize)]
struct KeyOutput {
    status: &'static str,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

/// Execute a key subcommand
pub fn execute(cmd: KeyCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let mut store = match FileKeyStore::open_default() {
        Ok(store) => store,
        Err(e) => return formatter.fail("Failed to open key store", &e),
    };

    match cmd {
        KeyCommands::Generate { name, force, show } => {
            if name.trim().is_empty() {
                formatter.error("Key alias must not be empty");
                return ExitCode::UsageError;
            }
            if !force && store.aliases().any(|alias| alias == name) {
                formatter.error(&format!("Key '{name}' already exists. Use --force to replace it."));
                return ExitCode::Conflict;
            }

            let key = generate_key();
            let encoded = show.then(|| hex::encode(key));
            if let Err(e) = store.insert(name.clone(), key.to_vec()) {
                return formatter.fail("Failed to store key", &e);
            }
            if let Err(e) = store.close() {
                return formatter.fail("Failed to save key store", &e);
            }

            if formatter.is_json() {
                formatter.json(&KeyOutput {
                    status: "success",
                    name,
                    key: encoded,
                });
            } else {
                formatter.success(&format!("Key '{name}' generated."));
                if let Some(encoded) = encoded {
                    formatter.println(&encoded);
                }
            }
            ExitCode::Success
        }
        KeyCommands::List => {
            let names: Vec<String> = store.aliases().map(str::to_string).collect();
            if formatter.is_json() {
                formatter.json(&names);
            } else if names.is_empty() {
                formatter.println("No keys stored.");
            } else {
                for name in names {
                    formatter.println(&name);
                }
            }
            ExitCode::Success
        }
        KeyCommands::Remove { name } => {
            if !store.remove(&name) {
                formatter.error(&format!("Key '{name}' not found"));
                return ExitCode::NotFound;
            }
            if let Err(e) = store.close() {
                return formatter.fail("Failed to save key store", &e);
            }

            if formatter.is_json() {
                formatter.json(&KeyOutput {
                    status: "success",
                    name,
                    key: None,
                });
            } else {
                formatter.success(&format!("Key '{name}' removed."));
            }
            ExitCode::Success
        }
    }
}
