//! Bucket-scoped object store client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ostore_etag::{EtagVerifier, Verification};
use ostore_store_models::{
    AclGrant, CannedAcl, HeaderMap, ListEntry, ObjectStat, Permission, PutOptions, PutReceipt,
    ResponseOverrides,
};

use crate::config::StoreConfig;
use crate::error::{AmbiguousPublicGrants, StoreError};
use crate::s3::S3Transport;
use crate::transport::ObjectStoreTransport;

/// Client for one bucket of an object store.
///
/// Cheap to clone: the transport is shared.
#[derive(Clone)]
pub struct ObjectStoreClient {
    transport: Arc<dyn ObjectStoreTransport>,
    bucket: String,
    verifier: EtagVerifier,
}

impl std::fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreClient")
            .field("bucket", &self.bucket)
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreClient {
    /// Wraps `transport`, targeting `bucket`.
    #[must_use]
    pub fn new(transport: Arc<dyn ObjectStoreTransport>, bucket: impl Into<String>) -> Self {
        Self {
            transport,
            bucket: bucket.into(),
            verifier: EtagVerifier::default(),
        }
    }

    /// Builds an S3 client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the configuration is unusable.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let transport = S3Transport::new(config)?;
        Ok(Self::new(Arc::new(transport), config.bucket.clone())
            .with_verifier(EtagVerifier::new(config.upload_part_size)))
    }

    /// Replaces the `ETag` verifier used by [`Self::verify_local`].
    #[must_use]
    pub const fn with_verifier(mut self, verifier: EtagVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// A client sharing this one's transport but targeting `bucket`.
    #[must_use]
    pub fn with_bucket(&self, bucket: impl Into<String>) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            bucket: bucket.into(),
            verifier: self.verifier,
        }
    }

    /// The bucket every call targets.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The verifier used for local/remote comparisons.
    #[must_use]
    pub const fn verifier(&self) -> &EtagVerifier {
        &self.verifier
    }

    /// Uploads `local_path` to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Upload`] on store failures, [`StoreError::Io`]
    /// if the local file cannot be read.
    pub async fn put(
        &self,
        key: &str,
        local_path: &Path,
        options: &PutOptions,
    ) -> Result<PutReceipt, StoreError> {
        self.transport
            .put_object(&self.bucket, key, local_path, options)
            .await
    }

    /// Downloads `key` to `local_path`, creating parent directories.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Download`] or [`StoreError::NotFound`] on store
    /// failures, [`StoreError::Io`] on local filesystem errors.
    pub async fn get(&self, key: &str, local_path: &Path) -> Result<u64, StoreError> {
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::io(parent))?;
        }
        self.transport
            .get_object(&self.bucket, key, local_path)
            .await
    }

    /// Metadata of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist.
    pub async fn stat(&self, key: &str) -> Result<ObjectStat, StoreError> {
        self.try_stat(key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })
    }

    /// Metadata of `key`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Head`] on store failures.
    pub async fn try_stat(&self, key: &str) -> Result<Option<ObjectStat>, StoreError> {
        self.transport.head_object(&self.bucket, key).await
    }

    /// Entries under `prefix`. A non-recursive listing stops at the next
    /// `/` and reports what lies below as prefix entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::List`] on store failures.
    pub async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ListEntry>, StoreError> {
        self.transport
            .list_objects(&self.bucket, prefix, recursive)
            .await
    }

    /// Keys of every object under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::List`] on store failures.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list(prefix, true)
            .await?
            .into_iter()
            .filter(|e| !e.is_prefix)
            .map(|e| e.key)
            .collect())
    }

    /// Deletes `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Delete`] on store failures.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.transport.delete_object(&self.bucket, key).await
    }

    /// Deletes every object under `prefix`, returning how many were deleted.
    ///
    /// Lists first, then deletes one key at a time. Objects written under
    /// the prefix after the listing survive; a failure part-way leaves the
    /// earlier deletions in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::List`] or [`StoreError::Delete`] on store
    /// failures.
    pub async fn delete_all(&self, prefix: &str) -> Result<usize, StoreError> {
        let keys = self.list_keys(prefix).await?;
        log::info!(
            "Deleting {} objects under s3://{}/{prefix}",
            keys.len(),
            self.bucket
        );

        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }

    /// The permission granted to anonymous users on `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Consistency`] if more than one grant targets
    /// the all-users group, or [`StoreError::GetAcl`] on store failures.
    pub async fn public_permission(&self, key: &str) -> Result<Option<Permission>, StoreError> {
        let grants = self.transport.get_object_acl(&self.bucket, key).await?;
        public_permission(&grants).map_err(|e| StoreError::Consistency {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Applies the `public-read` canned ACL to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PutAcl`] on store failures.
    pub async fn set_public_read(&self, key: &str) -> Result<(), StoreError> {
        self.transport
            .put_object_acl(&self.bucket, key, CannedAcl::PublicRead)
            .await
    }

    /// Presigned `GET` URL for `key`, valid for `ttl_secs` seconds.
    ///
    /// `overrides` are response headers the store should send back (see
    /// [`ResponseOverrides::from_headers`]).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidInput`] for an unsupported header name,
    /// [`StoreError::Presign`] if the transport cannot sign the request.
    pub async fn presign(
        &self,
        key: &str,
        ttl_secs: u64,
        overrides: Option<&HeaderMap>,
    ) -> Result<String, StoreError> {
        let overrides = match overrides {
            Some(headers) => {
                ResponseOverrides::from_headers(headers).map_err(|e| StoreError::InvalidInput {
                    message: e.to_string(),
                })?
            }
            None => ResponseOverrides::default(),
        };

        self.transport
            .presign_get(
                &self.bucket,
                key,
                Duration::from_secs(ttl_secs),
                &overrides,
            )
            .await
    }

    /// Headers that make a browser save `key` instead of rendering it.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn force_download_headers(&self, key: &str) -> HeaderMap {
        ostore_store_models::force_download_headers(key)
    }

    /// Compares `local_path` against the `ETag` of `key` without
    /// downloading it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist,
    /// [`StoreError::Etag`] if the `ETag` is malformed or the file cannot be
    /// read.
    pub async fn verify_local(
        &self,
        key: &str,
        local_path: &Path,
    ) -> Result<Verification, StoreError> {
        let stat = self.stat(key).await?;
        let etag = stat.etag.ok_or_else(|| StoreError::Consistency {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            message: "object has no ETag".to_string(),
        })?;

        let verifier = self.verifier;
        let path = local_path.to_path_buf();
        let verification = tokio::task::spawn_blocking(move || verifier.verify(&path, &etag))
            .await
            .map_err(|e| StoreError::Io {
                path: local_path.to_path_buf(),
                source: std::io::Error::other(e),
            })??;

        Ok(verification)
    }
}

/// Permission of the single all-users grant in `grants`.
///
/// # Errors
///
/// Returns [`AmbiguousPublicGrants`] when more than one grant targets the
/// all-users group.
pub fn public_permission(
    grants: &[AclGrant],
) -> Result<Option<Permission>, AmbiguousPublicGrants> {
    let public: Vec<_> = grants.iter().filter(|g| g.grantee.is_all_users()).collect();
    match public.as_slice() {
        [] => Ok(None),
        [grant] => Ok(grant.permission),
        many => Err(AmbiguousPublicGrants { count: many.len() }),
    }
}
