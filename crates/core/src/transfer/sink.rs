//! Download destinations
//!
//! Front ends decide where a downloaded object lands by implementing
//! [`FileSink`]; the engine only suggests a file name.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Chooses the local file a download is written to
pub trait FileSink: Send + Sync {
    /// Writable target for an object whose suggested file name is `suggested_name`
    fn choose_destination(&self, suggested_name: &str) -> Result<PathBuf>;
}

/// Places every download inside one directory under its suggested name
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSink for DirectorySink {
    fn choose_destination(&self, suggested_name: &str) -> Result<PathBuf> {
        let name = suggested_name.trim_matches('/');
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(Error::InvalidPath(format!(
                "'{suggested_name}' is not a usable file name"
            )));
        }
        Ok(self.root.join(name))
    }
}
