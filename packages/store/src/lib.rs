#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Object store client for S3-compatible storage.
//!
//! [`ObjectStoreClient`] wraps an [`ObjectStoreTransport`] and a bucket, and
//! offers uploads, downloads, metadata, listings, deletions, public-read ACL
//! management, presigned URLs and local verification against remote `ETag`s.
//! Two transports ship with the crate: [`S3Transport`] (`aws-sdk-s3`) and
//! [`MemoryTransport`] for tests.
//!
//! Uploads larger than the configured part size go through the S3 multipart
//! API; an upload that fails part-way is aborted. Nothing is retried.
//!
//! # Environment Variables
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `OBJ_STORE_HOST` | Yes | Endpoint host, `https://` assumed without a scheme |
//! | `OBJ_STORE_USER` | Yes | Access key ID |
//! | `OBJ_STORE_SECRET` | Yes | Secret access key |
//! | `OBJ_STORE_BUCKET` | Yes | Default bucket |
//! | `OBJ_STORE_REGION` | No | Signing region (default `us-east-1`) |
//! | `OBJ_STORE_PART_SIZE` | No | Upload part size in bytes (default 15 MiB) |

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod s3;
pub mod transport;

pub use client::{ObjectStoreClient, public_permission};
pub use config::StoreConfig;
pub use error::{AmbiguousPublicGrants, StoreError};
pub use memory::MemoryTransport;
pub use s3::S3Transport;
pub use transport::ObjectStoreTransport;
