//! stow-s3: S3 wire adapter for the stowage client
//!
//! This crate implements the ObjectStore trait from stow-core by speaking
//! the S3 REST protocol directly: requests are signed with SigV4, sent over
//! an [`HttpTransport`] and their XML bodies decoded into core types.

pub mod client;
pub mod signer;
pub mod transport;
pub mod xml;

pub use client::S3Client;
pub use signer::{Signer, SignedRequest};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
