#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! One-way sync of a local directory tree into object storage.
//!
//! A sync session runs in two steps:
//!
//! 1. [`DirectorySync::index`] lists the destination prefix once into a
//!    [`RemoteListingCache`].
//! 2. [`IndexedSync::run`] walks the source tree depth-first (siblings in
//!    name order) and uploads each file whose key is not in the snapshot.
//!
//! With [`ChangeDetection::Fingerprint`], files whose key already exists are
//! compared against the remote `ETag` and re-uploaded when they differ.
//! Local deletion, when requested, happens per file and only once that
//! file is known to be in the store.

use std::path::{Path, PathBuf};

use ostore_etag::EtagError;
use ostore_paths::PathError;
use ostore_store::StoreError;

mod cache;
mod engine;
mod stats;

pub use cache::RemoteListingCache;
pub use engine::{ChangeDetection, DirectorySync, IndexedSync, SyncOptions};
pub use stats::SyncStats;

/// Errors that stop a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// An object store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A local path could not be turned into a key.
    #[error(transparent)]
    Path(#[from] PathError),

    /// A local file could not be hashed.
    #[error(transparent)]
    Etag(#[from] EtagError),

    /// The source root is missing or not a directory.
    #[error("Source {} is not a directory", path.display())]
    NotADirectory {
        /// The configured source root.
        path: PathBuf,
    },

    /// Walking or deleting local files failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Local path involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl SyncError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
