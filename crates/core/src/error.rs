//! Error types for stow-core
//!
//! Provides a unified error type shared by the core, the S3 adapter and the
//! CLI. Every variant maps onto a CLI exit code.

use thiserror::Error;

/// Result type alias for stow-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for stowage operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Alias not found
    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    /// Alias already exists
    #[error("Alias already exists: {0}")]
    AliasExists(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Connectivity or timeout failure reported by the HTTP transport
    #[error("Network error: {0}")]
    Transport(String),

    /// Non-2xx response from the service
    #[error("HTTP {status}{}: {message}", code_suffix(.code))]
    Http {
        status: u16,
        /// S3 error code from an `<Error>` document, when the body had one
        code: Option<String>,
        message: String,
    },

    /// The response body was not a decodable document
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request descriptor could not be signed
    #[error("Signing error: {0}")]
    Signing(String),

    /// No key is registered for the alias an object was encrypted with
    #[error("Encryption key not found: {0}")]
    KeyNotFound(String),

    /// Encryption or decryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A resumable multipart session was recorded with a different part size
    #[error("Multipart part size mismatch: session uses {remote} bytes, configured {local} bytes")]
    PartSizeMismatch { remote: u64, local: u64 },

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict error
    #[error("Conflict: {0}")]
    Conflict(String),

    /// General error
    #[error("{0}")]
    General(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" {c}")).unwrap_or_default()
}

impl Error {
    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) => 2,                        // UsageError
            Error::Config(_) => 2,                             // UsageError
            Error::Transport(_) => 3,                          // NetworkError
            Error::Http { status, .. } => match *status {
                401 | 403 => 4,
                404 => 5,
                409 | 412 => 6,
                _ => 3,
            },
            Error::NotFound(_) | Error::AliasNotFound(_) => 5, // NotFound
            Error::KeyNotFound(_) => 5,
            Error::Conflict(_) | Error::AliasExists(_) => 6,   // Conflict
            Error::Cancelled => 130,                           // Interrupted
            _ => 1,                                            // GeneralError
        }
    }

    /// Whether this error means the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Http { status, code, .. } => {
                *status == 404 || matches!(code.as_deref(), Some("NoSuchKey"))
            }
            _ => false,
        }
    }

    /// Whether this is the cancellation terminal state rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
