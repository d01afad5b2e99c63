//! ObjectStore trait definition
//!
//! This trait defines the interface for S3-compatible storage operations.
//! The lister, the recursive operations and the transfer engine are written
//! against it, so they can run on the S3 adapter or on an in-memory fake.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One entry of a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Full object key (unique within a page)
    pub key: String,

    /// Size in bytes
    pub size: u64,

    /// Last modified timestamp
    pub last_modified: Timestamp,

    /// ETag without surrounding quotes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Storage class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// True iff the key is a delimiter-terminated placeholder or common prefix
    pub is_folder: bool,
}

impl ObjectRecord {
    /// Create a record for a stored object
    pub fn object(key: impl Into<String>, size: u64, last_modified: Timestamp) -> Self {
        let key = key.into();
        let is_folder = key.ends_with('/');
        Self {
            key,
            size,
            last_modified,
            etag: None,
            storage_class: None,
            is_folder,
        }
    }

    /// Create a synthesized folder record for a common prefix
    pub fn folder(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: Timestamp::now(),
            etag: None,
            storage_class: None,
            is_folder: true,
        }
    }

    /// Human-readable size
    pub fn size_human(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

/// One version (or delete marker) of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub last_modified: Timestamp,
    pub size: u64,
    pub is_delete_marker: bool,
}

/// Result of a single listing request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPage {
    /// Objects in service order, followed by synthesized folder records
    pub entries: Vec<ObjectRecord>,

    /// Whether more entries are available
    pub is_truncated: bool,

    /// Opaque cursor for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

/// Parameters of a listing request
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Key prefix to enumerate
    pub prefix: String,

    /// Delimiter for grouping (usually "/"); `None` lists recursively
    pub delimiter: Option<String>,

    /// Continuation token from the previous page
    pub continuation_token: Option<String>,

    /// Maximum number of keys to return per request
    pub max_keys: Option<u32>,

    /// Drop the record for the prefix itself (its placeholder object or
    /// common prefix)
    pub exclude_self: bool,
}

impl ListRequest {
    /// A delimiter-aware browse of one "directory", excluding the directory itself
    pub fn browse(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: Some("/".to_string()),
            exclude_self: true,
            ..Default::default()
        }
    }

    /// A flat listing of every key under the prefix, including the prefix's own placeholder
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

/// Bucket summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Timestamp>,
}

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    /// User metadata with the `x-amz-meta-` prefix stripped, names lower-cased
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Inclusive byte range for ranged GET requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering `len` bytes starting at `start`
    pub fn from_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start + len.saturating_sub(1),
        }
    }

    /// `Range` header value
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Canned ACLs accepted by `x-amz-acl`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
            Self::BucketOwnerRead => "bucket-owner-read",
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl std::str::FromStr for CannedAcl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "private" => Ok(Self::Private),
            "public-read" => Ok(Self::PublicRead),
            "public-read-write" => Ok(Self::PublicReadWrite),
            "authenticated-read" => Ok(Self::AuthenticatedRead),
            "bucket-owner-read" => Ok(Self::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(Self::BucketOwnerFullControl),
            other => Err(Error::General(format!("Unknown canned ACL: {other}"))),
        }
    }
}

/// Options attached to PUT and multipart-initiation requests
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    /// User metadata names without the `x-amz-meta-` prefix
    pub metadata: BTreeMap<String, String>,
    pub acl: Option<CannedAcl>,
}

/// An open multipart session reported by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<Timestamp>,
}

/// A part already committed to a multipart session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Bucket versioning state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningStatus {
    Unversioned,
    Enabled,
    Suspended,
}

/// HTTP method a presigned URL is valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

/// Trait for S3-compatible storage operations
///
/// Keys are passed through untouched: a trailing slash addresses the
/// placeholder object of a "directory".
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List buckets
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// Fetch one listing page
    async fn list_page(&self, bucket: &str, request: &ListRequest) -> Result<ListPage>;

    /// List every version and delete marker of exactly `key`
    async fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectVersion>>;

    /// Get object metadata
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta>;

    /// Get object content, optionally a byte range of it
    async fn get_object(&self, bucket: &str, key: &str, range: Option<ByteRange>)
    -> Result<Bytes>;

    /// Store an object in one request, returning its ETag
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<Option<String>>;

    /// Delete one object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Server-side copy within a bucket
    async fn copy_object(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<()>;

    /// Open a multipart session, returning its upload ID
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<String>;

    /// List open multipart sessions whose key starts with `prefix`
    async fn list_multipart_uploads(&self, bucket: &str, prefix: &str)
    -> Result<Vec<MultipartUpload>>;

    /// List the parts committed to a session
    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<Vec<UploadedPart>>;

    /// Upload one part, returning its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String>;

    /// Finalize a session from its part-number to ETag map
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &BTreeMap<u32, String>,
    ) -> Result<()>;

    /// Abort a session and discard its parts
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<()>;

    /// Apply a canned ACL to a bucket (`key == None`) or an object
    async fn set_acl(&self, bucket: &str, key: Option<&str>, acl: CannedAcl) -> Result<()>;

    /// Get the bucket versioning state
    async fn get_versioning(&self, bucket: &str) -> Result<VersioningStatus>;

    /// Enable or suspend bucket versioning
    async fn set_versioning(&self, bucket: &str, enabled: bool) -> Result<()>;

    /// Whether object lock is enabled on the bucket
    async fn object_lock_enabled(&self, bucket: &str) -> Result<bool>;

    /// Turn the legal hold of an object on or off
    async fn set_legal_hold(&self, bucket: &str, key: &str, on: bool) -> Result<()>;

    /// Build a presigned URL valid for `expires`
    fn presign(
        &self,
        method: PresignMethod,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String>;
}
