//! stow-core: Core library for the stowage S3 client
//!
//! This crate provides the backend-independent parts of the client:
//! - Configuration, alias and key management
//! - Path parsing and resolution
//! - ObjectStore trait for S3 operations
//! - Paginated listing and recursive delete/rename
//! - The transfer engine (multipart resume, ranged downloads, cancellation)
//! - Client-side payload encryption
//!
//! Nothing here speaks HTTP; the `stow-s3` crate implements [`ObjectStore`]
//! on top of a signed transport.

pub mod alias;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod lister;
pub mod path;
pub mod traits;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use alias::{Alias, AliasManager, BucketLookup, TimeoutConfig};
pub use config::{Config, ConfigManager, Defaults};
pub use error::{Error, Result};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use path::{ParsedPath, RemotePath, parse_path};
pub use traits::{
    BucketInfo, ByteRange, CannedAcl, ListPage, ListRequest, MultipartUpload, ObjectMeta,
    ObjectRecord, ObjectStore, ObjectVersion, PresignMethod, PutOptions, UploadedPart,
    VersioningStatus,
};
pub use transfer::{
    DirectorySink, FileSink, ProgressUnit, TaskId, TaskKind, TaskSink, TaskStatus, TransferConfig,
    TransferEngine, TransferOptions, TransferTask,
};
