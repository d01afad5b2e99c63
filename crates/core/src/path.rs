//! Path parsing and resolution
//!
//! Remote locations are written `alias/bucket[/key]`. Anything that looks
//! like a filesystem path is passed through as a local path.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Object key delimiter
pub const DELIMITER: char = '/';

/// A parsed remote path pointing to an S3 location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    /// Alias name
    pub alias: String,
    /// Bucket name
    pub bucket: String,
    /// Object key or key prefix, kept byte-for-byte (trailing slash included)
    pub key: String,
}

impl RemotePath {
    /// Create a new RemotePath
    pub fn new(
        alias: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether the key addresses a prefix rather than a single object
    pub fn is_prefix(&self) -> bool {
        self.key.is_empty() || self.key.ends_with(DELIMITER)
    }

    /// The key as a prefix: empty, or terminated by the delimiter
    pub fn prefix(&self) -> String {
        as_prefix(&self.key)
    }

    /// Last path segment of the key, ignoring a trailing delimiter
    pub fn file_name(&self) -> Option<&str> {
        self.key
            .trim_end_matches(DELIMITER)
            .rsplit(DELIMITER)
            .next()
            .filter(|s| !s.is_empty())
    }

    /// A sibling location in the same bucket
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self::new(self.alias.clone(), self.bucket.clone(), key)
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}/{}", self.alias, self.bucket)
        } else {
            write!(f, "{}/{}/{}", self.alias, self.bucket, self.key)
        }
    }
}

/// Normalize a key into a prefix: empty stays empty, otherwise ends in `/`
pub fn as_prefix(key: &str) -> String {
    if key.is_empty() || key.ends_with(DELIMITER) {
        key.to_string()
    } else {
        format!("{key}{DELIMITER}")
    }
}

/// Parsed path that can be either local or remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPath {
    /// Local filesystem path
    Local(PathBuf),
    /// Remote S3 path
    Remote(RemotePath),
}

impl ParsedPath {
    /// Check if this is a remote path
    pub fn is_remote(&self) -> bool {
        matches!(self, ParsedPath::Remote(_))
    }

    /// Check if this is a local path
    pub fn is_local(&self) -> bool {
        matches!(self, ParsedPath::Local(_))
    }

    /// Get the remote path if this is a remote path
    pub fn as_remote(&self) -> Option<&RemotePath> {
        match self {
            ParsedPath::Remote(p) => Some(p),
            ParsedPath::Local(_) => None,
        }
    }

    /// Get the local path if this is a local path
    pub fn as_local(&self) -> Option<&PathBuf> {
        match self {
            ParsedPath::Local(p) => Some(p),
            ParsedPath::Remote(_) => None,
        }
    }
}

/// Parse a path string into a ParsedPath
///
/// Absolute paths, `./` and `../` paths and bare file names containing a dot
/// are local. `alias/bucket[/key]` is remote when `alias` is a valid alias
/// name; otherwise the string is treated as a local relative path.
pub fn parse_path(path: &str) -> Result<ParsedPath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }

    let looks_local = path.starts_with('/')
        || path.starts_with("./")
        || path.starts_with("../")
        || path == "."
        || path == "..";
    if looks_local {
        return Ok(ParsedPath::Local(PathBuf::from(path)));
    }

    #[cfg(windows)]
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Ok(ParsedPath::Local(PathBuf::from(path)));
    }

    let mut parts = path.splitn(3, '/');
    let alias = parts.next().unwrap_or_default();
    let bucket = parts.next();
    let key = parts.next().unwrap_or_default();

    let Some(bucket) = bucket else {
        if alias.contains('.') || alias.contains('\\') {
            return Ok(ParsedPath::Local(PathBuf::from(path)));
        }
        return Err(Error::InvalidPath(format!(
            "Path '{path}' is incomplete. Use format: alias/bucket[/key]"
        )));
    };

    if !is_valid_alias_name(alias) {
        return Ok(ParsedPath::Local(PathBuf::from(path)));
    }

    if bucket.is_empty() {
        return Err(Error::InvalidPath("Bucket name cannot be empty".into()));
    }

    Ok(ParsedPath::Remote(RemotePath::new(alias, bucket, key)))
}

/// Check if a string is a valid alias name
pub fn is_valid_alias_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_path() {
        let path = parse_path("minio/bucket/file.txt").unwrap();
        let remote = path.as_remote().unwrap();
        assert_eq!(remote.alias, "minio");
        assert_eq!(remote.bucket, "bucket");
        assert_eq!(remote.key, "file.txt");
        assert!(!remote.is_prefix());
    }

    #[test]
    fn test_parse_keeps_trailing_slash() {
        let path = parse_path("minio/bucket/docs/").unwrap();
        let remote = path.as_remote().unwrap();
        assert_eq!(remote.key, "docs/");
        assert!(remote.is_prefix());
    }

    #[test]
    fn test_parse_bucket_only() {
        let remote = parse_path("minio/bucket").unwrap().as_remote().cloned().unwrap();
        assert_eq!(remote.key, "");
        assert!(remote.is_prefix());
        assert_eq!(remote.to_string(), "minio/bucket");
    }

    #[test]
    fn test_parse_local_paths() {
        assert!(parse_path("/home/user/file.txt").unwrap().is_local());
        assert!(parse_path("./file.txt").unwrap().is_local());
        assert!(parse_path("../file.txt").unwrap().is_local());
        assert!(parse_path(".").unwrap().is_local());
        assert!(parse_path("some.file.txt").unwrap().is_local());
        assert!(parse_path("my.dir/file").unwrap().is_local());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_path("").is_err());
        assert!(parse_path("minio").is_err());
        assert!(parse_path("minio//key").is_err());
    }

    #[test]
    fn test_file_name_and_prefix() {
        let path = RemotePath::new("a", "b", "docs/report.pdf");
        assert_eq!(path.file_name(), Some("report.pdf"));
        assert_eq!(path.prefix(), "docs/report.pdf/");

        let dir = path.with_key("docs/");
        assert_eq!(dir.file_name(), Some("docs"));
        assert_eq!(dir.prefix(), "docs/");

        assert_eq!(path.with_key("").file_name(), None);
        assert_eq!(as_prefix(""), "");
    }

    #[test]
    fn test_remote_path_display() {
        let path = RemotePath::new("minio", "bucket", "key/file.txt");
        assert_eq!(path.to_string(), "minio/bucket/key/file.txt");
    }
}
