//! Errors returned by the object store client and its transports.

use std::path::{Path, PathBuf};

use ostore_etag::EtagError;

/// Boxed error from the underlying SDK.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An ACL with more than one grant to the all-users group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{count} grants target the AllUsers group, expected at most one")]
pub struct AmbiguousPublicGrants {
    /// Number of all-users grants found.
    pub count: usize,
}

/// Errors that can occur during object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// Configuration value that cannot be used.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// Caller supplied an argument the store cannot act on.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What is wrong.
        message: String,
    },

    /// `PutObject` or a multipart upload step failed.
    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Upload {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `GetObject` failed.
    #[error("Failed to download s3://{bucket}/{key}: {source}")]
    Download {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `HeadObject` failed for a reason other than the object not existing.
    #[error("Failed to head s3://{bucket}/{key}: {source}")]
    Head {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `ListObjectsV2` failed.
    #[error("Failed to list s3://{bucket}/{prefix}: {source}")]
    List {
        /// Bucket name.
        bucket: String,
        /// Key prefix.
        prefix: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `DeleteObject` failed.
    #[error("Failed to delete s3://{bucket}/{key}: {source}")]
    Delete {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `GetObjectAcl` failed.
    #[error("Failed to read ACL of s3://{bucket}/{key}: {source}")]
    GetAcl {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// `PutObjectAcl` failed.
    #[error("Failed to set ACL of s3://{bucket}/{key}: {source}")]
    PutAcl {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// Presigning a request failed.
    #[error("Failed to presign s3://{bucket}/{key}: {source}")]
    Presign {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: BoxError,
    },

    /// The object does not exist.
    #[error("Object s3://{bucket}/{key} not found")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// The store returned data that breaks an assumption we rely on.
    #[error("Inconsistent state for s3://{bucket}/{key}: {message}")]
    Consistency {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// What was found.
        message: String,
    },

    /// I/O error reading or writing a local file.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Local path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Local verification against an `ETag` failed.
    #[error(transparent)]
    Etag(#[from] EtagError),
}

impl StoreError {
    /// Returns a closure that wraps an I/O error with `path`.
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error came from the store rather than from local input,
    /// configuration or files.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Upload { .. }
                | Self::Download { .. }
                | Self::Head { .. }
                | Self::List { .. }
                | Self::Delete { .. }
                | Self::GetAcl { .. }
                | Self::PutAcl { .. }
                | Self::Presign { .. }
                | Self::NotFound { .. }
        )
    }
}
