//! Encryption key storage
//!
//! The transfer engine resolves key aliases through the [`KeyStore`] trait.
//! [`FileKeyStore`] keeps hex-encoded keys in a private TOML file next to
//! the configuration; [`MemoryKeyStore`] serves tests and embedders.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::config::{config_dir, write_private};
use crate::crypto::KEY_LEN;
use crate::error::{Error, Result};

/// Source of raw key bytes for named aliases
pub trait KeyStore: Send + Sync {
    /// Raw key bytes for `alias`, or `None` when the alias is unknown
    fn key(&self, alias: &str) -> Result<Option<Vec<u8>>>;

    /// Resolve an alias, failing when it is unknown
    fn require(&self, alias: &str) -> Result<Vec<u8>> {
        self.key(alias)?
            .ok_or_else(|| Error::KeyNotFound(alias.to_string()))
    }
}

/// In-memory key store
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, alias: impl Into<String>, key: impl Into<Vec<u8>>) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(alias.into(), key.into());
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn key(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| Error::General("key store lock poisoned".into()))?;
        Ok(keys.get(alias).cloned())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyFile {
    #[serde(default)]
    keys: BTreeMap<String, String>,
}

/// Key store persisted as `keys.toml`
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    keys: BTreeMap<String, Vec<u8>>,
}

impl FileKeyStore {
    /// Open the key store at the default location
    pub fn open_default() -> Result<Self> {
        Self::open(config_dir()?.join("keys.toml"))
    }

    /// Open a key store file, creating an empty store if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut keys = BTreeMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let file: KeyFile = toml::from_str(&content)?;
            for (alias, encoded) in file.keys {
                let key = hex::decode(encoded.trim()).map_err(|e| {
                    Error::Config(format!("key '{alias}' in {} is not hex: {e}", path.display()))
                })?;
                keys.insert(alias, key);
            }
        }

        Ok(Self { path, keys })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Aliases of all stored keys
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Add or replace a key
    pub fn insert(&mut self, alias: impl Into<String>, key: Vec<u8>) -> Result<()> {
        if key.len() != KEY_LEN {
            return Err(Error::Encryption(format!(
                "key must be {KEY_LEN} bytes, got {} bytes",
                key.len()
            )));
        }
        self.keys.insert(alias.into(), key);
        Ok(())
    }

    /// Remove a key, returning whether it existed
    pub fn remove(&mut self, alias: &str) -> bool {
        self.keys.remove(alias).is_some()
    }

    /// Write the store back to disk and close it
    pub fn close(self) -> Result<()> {
        let file = KeyFile {
            keys: self
                .keys
                .iter()
                .map(|(alias, key)| (alias.clone(), hex::encode(key)))
                .collect(),
        };
        let content = toml::to_string_pretty(&file)?;
        write_private(&self.path, &content)
    }
}

impl KeyStore for FileKeyStore {
    fn key(&self, alias: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.keys.get(alias).cloned())
    }
}
