//! Directory sync: index the destination once, then walk and upload.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ostore_etag::Verification;
use ostore_paths::{EntryKind, KeyOptions};
use ostore_store::{ObjectStoreClient, StoreError};
use ostore_store_models::PutOptions;

use crate::SyncError;
use crate::cache::RemoteListingCache;
use crate::stats::SyncStats;

/// How an existing remote key is judged to match the local file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeDetection {
    /// A key present in the listing counts as synced.
    #[default]
    Presence,
    /// Compare the local file against the remote `ETag` and re-upload on a
    /// mismatch.
    Fingerprint,
}

/// Options for a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Remove each local file once it is safely in the store: after its
    /// upload, or after a verified match in fingerprint mode.
    pub delete_local: bool,
    /// Upload with the `public-read` canned ACL.
    pub public: bool,
    /// How existing keys are compared.
    pub change_detection: ChangeDetection,
}

/// A configured sync that has not looked at the remote yet.
#[derive(Debug, Clone)]
pub struct DirectorySync {
    client: ObjectStoreClient,
    src_root: PathBuf,
    dest_prefix: String,
    options: SyncOptions,
}

impl DirectorySync {
    /// Mirrors `src_root` into `dest_prefix` of the client's bucket.
    #[must_use]
    pub fn new(
        client: ObjectStoreClient,
        src_root: impl Into<PathBuf>,
        dest_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            src_root: src_root.into(),
            dest_prefix: dest_prefix.into(),
            options: SyncOptions::default(),
        }
    }

    /// Sets the run options.
    #[must_use]
    pub const fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Lists the destination prefix once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotADirectory`] if the source root is not a
    /// directory, or [`SyncError::Store`] if the listing fails.
    pub async fn index(self) -> Result<IndexedSync, SyncError> {
        let is_dir = tokio::fs::metadata(&self.src_root)
            .await
            .is_ok_and(|m| m.is_dir());
        if !is_dir {
            return Err(SyncError::NotADirectory {
                path: self.src_root,
            });
        }

        let cache = RemoteListingCache::load(&self.client, &self.dest_prefix).await?;
        Ok(IndexedSync { sync: self, cache })
    }
}

/// A sync holding its remote snapshot, ready to run.
///
/// The snapshot is never refreshed: running twice re-uploads whatever the
/// first run uploaded.
#[derive(Debug, Clone)]
pub struct IndexedSync {
    sync: DirectorySync,
    cache: RemoteListingCache,
}

enum Outcome {
    Uploaded,
    Skipped,
    Verified,
    Unverified,
}

impl IndexedSync {
    /// The remote snapshot taken by [`DirectorySync::index`].
    #[must_use]
    pub const fn cache(&self) -> &RemoteListingCache {
        &self.cache
    }

    /// Walks the source tree and uploads every file missing from the
    /// snapshot, one at a time.
    ///
    /// # Errors
    ///
    /// Stops at the first failure. Files handled before it keep their
    /// outcome; the failing file is never deleted locally.
    pub async fn run(&self) -> Result<SyncStats, SyncError> {
        let DirectorySync {
            src_root,
            dest_prefix,
            options,
            ..
        } = &self.sync;

        log::info!(
            "Syncing {} -> s3://{}/{dest_prefix}",
            src_root.display(),
            self.sync.client.bucket()
        );

        let key_options = KeyOptions::default();
        let mut stats = SyncStats::default();

        for (path, kind) in walk(src_root).await? {
            let key =
                ostore_paths::to_object_key_for(&path, kind, dest_prefix, src_root, &key_options)?;
            if kind == EntryKind::Directory {
                continue;
            }

            let outcome = self.sync_file(&path, key.as_str()).await?;
            let safe_to_delete = match outcome {
                Outcome::Uploaded => {
                    stats.uploaded += 1;
                    true
                }
                Outcome::Verified => {
                    stats.skipped += 1;
                    true
                }
                Outcome::Skipped => {
                    stats.skipped += 1;
                    false
                }
                Outcome::Unverified => {
                    stats.unverified += 1;
                    false
                }
            };

            if options.delete_local && safe_to_delete {
                log::debug!("  removing local file {}", path.display());
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(SyncError::io(&path))?;
                stats.deleted_local += 1;
            }
        }

        log::info!("Sync complete: {stats}");
        Ok(stats)
    }

    async fn sync_file(&self, path: &Path, key: &str) -> Result<Outcome, SyncError> {
        if self.cache.contains(key) {
            let settled = match self.sync.options.change_detection {
                ChangeDetection::Presence => {
                    log::debug!("  {key} already exists, skipping");
                    Some(Outcome::Skipped)
                }
                ChangeDetection::Fingerprint => self.compare(path, key).await?,
            };
            if let Some(outcome) = settled {
                return Ok(outcome);
            }
        }

        log::info!("  uploading {} -> {key}", path.display());
        let put_options = PutOptions {
            public: self.sync.options.public,
            content_type: None,
        };
        self.sync.client.put(key, path, &put_options).await?;
        Ok(Outcome::Uploaded)
    }

    /// Checks `path` against the remote `ETag` of `key`. `None` means the
    /// file needs uploading.
    async fn compare(&self, path: &Path, key: &str) -> Result<Option<Outcome>, SyncError> {
        match self.sync.client.verify_local(key, path).await {
            Ok(Verification::Match { .. }) => {
                log::debug!("  {key} verified unchanged");
                Ok(Some(Outcome::Verified))
            }
            Ok(Verification::Mismatch) => {
                log::info!("  {key} differs from {}, re-uploading", path.display());
                Ok(None)
            }
            Ok(Verification::Inconclusive { tried }) => {
                log::warn!(
                    "  could not verify {} against {key} (tried part sizes {tried:?}), leaving it in place",
                    path.display()
                );
                Ok(Some(Outcome::Unverified))
            }
            Err(StoreError::NotFound { .. }) => {
                log::info!("  {key} was removed since indexing, uploading");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Every entry under `root`, depth-first, siblings sorted by name.
///
/// Symlinks are followed, but a directory whose canonical path was already
/// walked is skipped so links back to an ancestor cannot loop.
async fn walk(root: &Path) -> Result<Vec<(PathBuf, EntryKind)>, SyncError> {
    let mut visited = BTreeSet::new();
    visited.insert(
        tokio::fs::canonicalize(root)
            .await
            .map_err(SyncError::io(root))?,
    );

    let mut entries = Vec::new();
    let mut stack = sorted_children(root).await?;
    stack.reverse();

    while let Some(path) = stack.pop() {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(SyncError::io(&path))?;

        if metadata.is_dir() {
            let canonical = tokio::fs::canonicalize(&path)
                .await
                .map_err(SyncError::io(&path))?;
            if !visited.insert(canonical) {
                log::warn!("Skipping {}: directory already walked", path.display());
                continue;
            }
            let mut children = sorted_children(&path).await?;
            children.reverse();
            stack.extend(children);
            entries.push((path, EntryKind::Directory));
        } else {
            entries.push((path, EntryKind::File));
        }
    }

    Ok(entries)
}

async fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(SyncError::io(dir))?;

    let mut children = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(SyncError::io(dir))? {
        children.push(entry.path());
    }
    children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(children)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ostore_etag::MIB;
    use ostore_store::MemoryTransport;
    use tempfile::TempDir;

    use super::*;

    const BUCKET: &str = "habs";

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();
        std::fs::write(root.join("sub/b.txt"), "bravo").unwrap();
        std::fs::write(root.join("sub/deeper/c.txt"), "charlie").unwrap();
        dir
    }

    fn store() -> (Arc<MemoryTransport>, ObjectStoreClient) {
        let transport = Arc::new(MemoryTransport::new());
        let client = ObjectStoreClient::new(transport.clone(), BUCKET);
        (transport, client)
    }

    async fn run(
        client: &ObjectStoreClient,
        root: &Path,
        options: SyncOptions,
    ) -> Result<SyncStats, SyncError> {
        DirectorySync::new(client.clone(), root, "backup")
            .with_options(options)
            .index()
            .await?
            .run()
            .await
    }

    #[tokio::test]
    async fn walk_is_sorted_depth_first() {
        let dir = tree();
        std::fs::write(dir.path().join("z.txt"), "zulu").unwrap();

        let names: Vec<_> = walk(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|(p, kind)| {
                let rel = p
                    .strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                (rel, kind)
            })
            .collect();

        assert_eq!(
            names,
            vec![
                ("a.txt".to_string(), EntryKind::File),
                ("sub".to_string(), EntryKind::Directory),
                ("sub/b.txt".to_string(), EntryKind::File),
                ("sub/deeper".to_string(), EntryKind::Directory),
                ("sub/deeper/c.txt".to_string(), EntryKind::File),
                ("z.txt".to_string(), EntryKind::File),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn walk_skips_links_back_to_an_ancestor() {
        let dir = tree();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();

        let names: Vec<_> = walk(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("sub"),
                PathBuf::from("sub/b.txt"),
                PathBuf::from("sub/deeper"),
                PathBuf::from("sub/deeper/c.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn second_session_uploads_nothing() {
        let dir = tree();
        let (transport, client) = store();

        let first = run(&client, dir.path(), SyncOptions::default()).await.unwrap();
        assert_eq!(first.uploaded, 3);
        assert_eq!(
            transport.keys(BUCKET),
            vec!["backup/a.txt", "backup/sub/b.txt", "backup/sub/deeper/c.txt"]
        );

        let second = run(&client, dir.path(), SyncOptions::default()).await.unwrap();
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(transport.put_count(), 3);
    }

    #[tokio::test]
    async fn rerunning_one_session_reuses_the_stale_snapshot() {
        let dir = tree();
        let (transport, client) = store();

        let indexed = DirectorySync::new(client, dir.path(), "backup")
            .index()
            .await
            .unwrap();
        assert!(indexed.cache().is_empty());

        assert_eq!(indexed.run().await.unwrap().uploaded, 3);
        assert_eq!(indexed.run().await.unwrap().uploaded, 3);
        assert_eq!(transport.put_count(), 6);
    }

    #[tokio::test]
    async fn delete_local_only_removes_uploaded_files() {
        let dir = tree();
        let (transport, client) = store();
        transport.insert(BUCKET, "backup/a.txt", "already there");

        let options = SyncOptions {
            delete_local: true,
            ..SyncOptions::default()
        };
        let stats = run(&client, dir.path(), options).await.unwrap();

        assert_eq!(stats.uploaded, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.deleted_local, 2);
        assert!(dir.path().join("a.txt").exists());
        assert!(!dir.path().join("sub/b.txt").exists());
        assert!(!dir.path().join("sub/deeper/c.txt").exists());
    }

    #[tokio::test]
    async fn failed_upload_keeps_the_local_file() {
        let dir = tree();
        let (transport, client) = store();
        transport.fail_puts_for("backup/sub/b.txt");

        let options = SyncOptions {
            delete_local: true,
            ..SyncOptions::default()
        };
        let err = run(&client, dir.path(), options).await.unwrap_err();

        assert!(matches!(err, SyncError::Store(StoreError::Upload { .. })), "{err}");
        assert!(!dir.path().join("a.txt").exists());
        assert!(dir.path().join("sub/b.txt").exists());
        assert!(dir.path().join("sub/deeper/c.txt").exists());
        assert_eq!(transport.keys(BUCKET), vec!["backup/a.txt"]);
    }

    #[tokio::test]
    async fn public_option_uploads_public_objects() {
        let dir = tree();
        let (_, client) = store();
        let options = SyncOptions {
            public: true,
            ..SyncOptions::default()
        };
        run(&client, dir.path(), options).await.unwrap();

        assert!(client.public_permission("backup/a.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fingerprint_reuploads_changed_files() {
        let dir = tree();
        let (transport, client) = store();
        run(&client, dir.path(), SyncOptions::default()).await.unwrap();

        std::fs::write(dir.path().join("a.txt"), "alpha, edited").unwrap();

        let presence = run(&client, dir.path(), SyncOptions::default()).await.unwrap();
        assert_eq!(presence.uploaded, 0);

        let options = SyncOptions {
            change_detection: ChangeDetection::Fingerprint,
            ..SyncOptions::default()
        };
        let stats = run(&client, dir.path(), options).await.unwrap();
        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(
            transport.object(BUCKET, "backup/a.txt").unwrap(),
            b"alpha, edited"
        );
    }

    #[tokio::test]
    async fn fingerprint_delete_local_removes_verified_files() {
        let dir = tree();
        let (_, client) = store();
        run(&client, dir.path(), SyncOptions::default()).await.unwrap();

        let options = SyncOptions {
            delete_local: true,
            change_detection: ChangeDetection::Fingerprint,
            ..SyncOptions::default()
        };
        let stats = run(&client, dir.path(), options).await.unwrap();
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.deleted_local, 3);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    #[allow(clippy::cast_possible_truncation)]
    async fn fingerprint_leaves_unverifiable_files_in_place() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..3 * MIB).map(|i| (i % 241) as u8).collect();
        std::fs::write(dir.path().join("big.bin"), &data).unwrap();

        // 1.5 MiB parts: not a candidate the verifier tries.
        let transport = Arc::new(MemoryTransport::with_part_size(3 * MIB / 2));
        transport.insert(BUCKET, "backup/big.bin", data);
        let client = ObjectStoreClient::new(transport.clone(), BUCKET);

        let options = SyncOptions {
            delete_local: true,
            change_detection: ChangeDetection::Fingerprint,
            ..SyncOptions::default()
        };
        let stats = run(&client, dir.path(), options).await.unwrap();

        assert_eq!(stats.unverified, 1);
        assert_eq!(stats.uploaded, 0);
        assert_eq!(stats.deleted_local, 0);
        assert!(dir.path().join("big.bin").exists());
        assert_eq!(transport.put_count(), 0);
    }

    #[tokio::test]
    async fn source_must_be_a_directory() {
        let dir = tree();
        let (_, client) = store();
        let err = DirectorySync::new(client, dir.path().join("a.txt"), "backup")
            .index()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotADirectory { .. }));
    }
}
