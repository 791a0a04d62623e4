//! In-process [`ObjectStoreTransport`] for tests.
//!
//! Objects live in a map keyed by `(bucket, key)`. `ETag`s follow the S3
//! rules: the MD5 of the body, or `md5(concat(part md5s))-N` for bodies
//! larger than the configured part size, so local verification behaves the
//! same as against a real store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ostore_etag::DEFAULT_UPLOAD_PART_SIZE;
use ostore_store_models::{
    ALL_USERS_URI, AclGrant, CannedAcl, Grantee, ListEntry, OCTET_STREAM, ObjectStat, Permission,
    PutOptions, PutReceipt, ResponseOverrides,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::StoreError;
use crate::transport::ObjectStoreTransport;

/// Canonical ID reported as the owner of every stored object.
pub const MEMORY_OWNER: &str = "memory-owner";

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    content_type: String,
    last_modified: DateTime<Utc>,
    grants: Vec<AclGrant>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    failing_puts: BTreeSet<String>,
    put_count: u64,
}

/// Object store held entirely in memory.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<State>,
    part_size: u64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Empty store that splits uploads at the default upload part size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_part_size(DEFAULT_UPLOAD_PART_SIZE)
    }

    /// Empty store that splits uploads larger than `part_size` into parts
    /// when computing `ETag`s.
    #[must_use]
    pub fn with_part_size(part_size: u64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            part_size: part_size.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `data` under `key` directly, as a private object.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        let object = self.stored(data.into(), None, false);
        self.state()
            .objects
            .insert((bucket.to_string(), key.to_string()), object);
    }

    /// Body of `key`, if stored.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    /// All keys stored in `bucket`, sorted.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Removes `key` without going through the transport API, simulating a
    /// deletion by another client.
    pub fn remove(&self, bucket: &str, key: &str) {
        self.state()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
    }

    /// Replaces the grants of `key`. Returns `false` if the key is absent.
    pub fn set_grants(&self, bucket: &str, key: &str, grants: Vec<AclGrant>) -> bool {
        match self
            .state()
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            Some(object) => {
                object.grants = grants;
                true
            }
            None => false,
        }
    }

    /// Makes every later upload to `key` fail.
    pub fn fail_puts_for(&self, key: &str) {
        self.state().failing_puts.insert(key.to_string());
    }

    /// Number of successful uploads so far.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.state().put_count
    }

    fn stored(&self, data: Vec<u8>, content_type: Option<&str>, public: bool) -> StoredObject {
        StoredObject {
            etag: s3_etag(&data, self.part_size),
            data,
            content_type: content_type.unwrap_or(OCTET_STREAM).to_string(),
            last_modified: Utc::now(),
            grants: grants_for(if public {
                CannedAcl::PublicRead
            } else {
                CannedAcl::Private
            }),
        }
    }
}

#[async_trait]
impl ObjectStoreTransport for MemoryTransport {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        options: &PutOptions,
    ) -> Result<PutReceipt, StoreError> {
        if self.state().failing_puts.contains(key) {
            return Err(StoreError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: "injected upload failure".into(),
            });
        }

        let data = tokio::fs::read(local_path)
            .await
            .map_err(StoreError::io(local_path))?;
        let object = self.stored(data, options.content_type.as_deref(), options.public);
        let etag = object.etag.clone();

        let mut state = self.state();
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), object);
        state.put_count += 1;

        Ok(PutReceipt {
            key: key.to_string(),
            etag: Some(etag),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<u64, StoreError> {
        let data = self.object(bucket, key).ok_or_else(|| not_found(bucket, key))?;
        tokio::fs::write(local_path, &data)
            .await
            .map_err(StoreError::io(local_path))?;
        Ok(data.len() as u64)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectStat>, StoreError> {
        Ok(self
            .state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| ObjectStat {
                key: key.to_string(),
                etag: Some(o.etag.clone()),
                size: o.data.len() as u64,
                content_type: Some(o.content_type.clone()),
                last_modified: Some(o.last_modified),
            }))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ListEntry>, StoreError> {
        let state = self.state();
        let mut prefixes = BTreeSet::new();
        let mut entries = Vec::new();

        for ((b, key), object) in &state.objects {
            if b != bucket {
                continue;
            }
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            if !recursive && let Some(idx) = rest.find('/') {
                prefixes.insert(format!("{prefix}{}", &rest[..=idx]));
                continue;
            }
            entries.push(ListEntry {
                key: key.clone(),
                is_prefix: false,
                size: Some(object.data.len() as u64),
                etag: Some(object.etag.clone()),
                last_modified: Some(object.last_modified),
            });
        }

        let mut listing: Vec<ListEntry> = prefixes.into_iter().map(ListEntry::prefix).collect();
        listing.extend(entries);
        Ok(listing)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.remove(bucket, key);
        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Vec<AclGrant>, StoreError> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.grants.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn put_object_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: CannedAcl,
    ) -> Result<(), StoreError> {
        if self.set_grants(bucket, key, grants_for(acl)) {
            Ok(())
        } else {
            Err(not_found(bucket, key))
        }
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        overrides: &ResponseOverrides,
    ) -> Result<String, StoreError> {
        let mut url = format!(
            "memory://{bucket}/{key}?X-Amz-Expires={}",
            expires_in.as_secs()
        );

        let params = [
            ("response-content-type", &overrides.content_type),
            ("response-content-disposition", &overrides.content_disposition),
            ("response-cache-control", &overrides.cache_control),
            ("response-content-encoding", &overrides.content_encoding),
            ("response-content-language", &overrides.content_language),
            ("response-expires", &overrides.expires),
        ];
        for (name, value) in params {
            if let Some(value) = value {
                url.push('&');
                url.push_str(name);
                url.push('=');
                url.push_str(&encode_query_value(value));
            }
        }

        Ok(url)
    }
}

fn not_found(bucket: &str, key: &str) -> StoreError {
    StoreError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

fn grants_for(acl: CannedAcl) -> Vec<AclGrant> {
    let mut grants = vec![AclGrant {
        grantee: Grantee::canonical_user(MEMORY_OWNER),
        permission: Some(Permission::FullControl),
    }];
    if acl == CannedAcl::PublicRead {
        grants.push(AclGrant {
            grantee: Grantee::group(ALL_USERS_URI),
            permission: Some(Permission::Read),
        });
    }
    grants
}

/// `ETag` S3 would report for `data` uploaded with `part_size` parts.
fn s3_etag(data: &[u8], part_size: u64) -> String {
    let part_size = usize::try_from(part_size).unwrap_or(usize::MAX);
    if data.len() <= part_size {
        return format!("{:x}", md5::compute(data));
    }

    let mut concat = Vec::new();
    let mut parts = 0;
    for chunk in data.chunks(part_size) {
        concat.extend_from_slice(&md5::compute(chunk).0);
        parts += 1;
    }
    format!("{:x}-{parts}", md5::compute(&concat))
}

/// Unreserved characters stay literal; everything else is escaped.
const QUERY_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE_SET).to_string()
}
