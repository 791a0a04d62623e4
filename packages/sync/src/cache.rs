//! Snapshot of the keys already present under a destination prefix.

use ostore_store::{ObjectStoreClient, StoreError};
use ostore_store_models::ObjectKey;

/// Sorted, immutable set of remote keys taken once per sync session.
///
/// Objects written or deleted after the snapshot are not reflected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteListingCache {
    prefix: String,
    keys: Vec<ObjectKey>,
}

impl RemoteListingCache {
    /// Lists every object under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::List`] if the listing fails.
    pub async fn load(client: &ObjectStoreClient, prefix: &str) -> Result<Self, StoreError> {
        let keys = client.list_keys(prefix).await?;
        log::info!(
            "Indexed {} existing objects under s3://{}/{prefix}",
            keys.len(),
            client.bucket()
        );
        Ok(Self::from_keys(prefix, keys))
    }

    /// Builds a cache from keys already in hand.
    #[must_use]
    pub fn from_keys<K: Into<ObjectKey>>(
        prefix: impl Into<String>,
        keys: impl IntoIterator<Item = K>,
    ) -> Self {
        let mut keys: Vec<ObjectKey> = keys.into_iter().map(Into::into).collect();
        keys.sort_unstable();
        keys.dedup();
        Self {
            prefix: prefix.into(),
            keys,
        }
    }

    /// Whether `key` existed when the snapshot was taken.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .binary_search_by(|k| k.as_str().cmp(key))
            .is_ok()
    }

    /// Prefix the snapshot was taken under.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the prefix held no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(ObjectKey::as_str)
    }
}
