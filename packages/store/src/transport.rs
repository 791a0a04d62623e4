//! The seam between the client and a concrete object store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ostore_store_models::{
    AclGrant, CannedAcl, ListEntry, ObjectStat, PutOptions, PutReceipt, ResponseOverrides,
};

use crate::error::StoreError;

/// Raw object store operations, one per S3 API call (or call sequence for
/// multipart uploads).
///
/// Implementations carry no bucket of their own; [`crate::ObjectStoreClient`]
/// supplies it on every call.
#[async_trait]
pub trait ObjectStoreTransport: Send + Sync {
    /// Uploads `local_path` to `key`, returning the new object's `ETag`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        options: &PutOptions,
    ) -> Result<PutReceipt, StoreError>;

    /// Streams `key` into `local_path`, returning the number of bytes
    /// written. The parent directory must already exist.
    async fn get_object(&self, bucket: &str, key: &str, local_path: &Path)
    -> Result<u64, StoreError>;

    /// Object metadata, or `None` if the key does not exist.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectStat>, StoreError>;

    /// Every entry under `prefix`, following continuation tokens to the end.
    ///
    /// Non-recursive listings group keys at the next `/` into prefix
    /// entries.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ListEntry>, StoreError>;

    /// Deletes `key`. Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// The object's ACL grants.
    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Vec<AclGrant>, StoreError>;

    /// Replaces the object's ACL with a canned one.
    async fn put_object_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: CannedAcl,
    ) -> Result<(), StoreError>;

    /// Presigned `GET` URL for `key`, valid for `expires_in`.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        overrides: &ResponseOverrides,
    ) -> Result<String, StoreError>;
}
