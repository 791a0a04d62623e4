//! [`ObjectStoreTransport`] backed by `aws-sdk-s3`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SdkDateTime, DateTimeFormat};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Grant, ObjectCannedAcl};
use chrono::{DateTime, Utc};
use ostore_store_models::{
    AclGrant, CannedAcl, Grantee, GranteeKind, ListEntry, OCTET_STREAM, ObjectStat, Permission,
    PutOptions, PutReceipt, ResponseOverrides,
};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::transport::ObjectStoreTransport;

/// Talks to an S3-compatible endpoint with path-style addressing.
#[derive(Debug, Clone)]
pub struct S3Transport {
    client: aws_sdk_s3::Client,
    upload_part_size: u64,
}

impl S3Transport {
    /// Builds an SDK client for the configured endpoint and credentials.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the configuration fails
    /// [`StoreConfig::validate`].
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;

        let creds = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "ostore-config",
        );

        let sdk_config = aws_sdk_s3::Config::builder()
            .endpoint_url(config.endpoint_url())
            .region(Region::new(config.region.clone()))
            .credentials_provider(creds)
            .force_path_style(true)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .build();

        Ok(Self::from_client(
            aws_sdk_s3::Client::from_conf(sdk_config),
            config.upload_part_size,
        ))
    }

    /// Wraps an existing SDK client.
    #[must_use]
    pub const fn from_client(client: aws_sdk_s3::Client, upload_part_size: u64) -> Self {
        Self {
            client,
            upload_part_size,
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        options: &PutOptions,
    ) -> Result<Option<String>, StoreError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(upload_err(bucket, key))?;

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type(options));
        if options.public {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        let output = request.send().await.map_err(upload_err(bucket, key))?;
        Ok(output.e_tag().map(clean_etag))
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        options: &PutOptions,
    ) -> Result<Option<String>, StoreError> {
        let mut create = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type(options));
        if options.public {
            create = create.acl(ObjectCannedAcl::PublicRead);
        }

        let created = create.send().await.map_err(upload_err(bucket, key))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StoreError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: "no upload ID returned".into(),
            })?
            .to_string();

        let parts = match self.upload_parts(bucket, key, &upload_id, local_path).await {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                return Err(e);
            }
        };

        log::debug!("  completing {} parts for {key}", parts.len());

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.e_tag().map(clean_etag)),
            Err(e) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                Err(upload_err(bucket, key)(e))
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        local_path: &Path,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let chunk_size =
            usize::try_from(self.upload_part_size).map_err(|_| StoreError::InvalidConfig {
                message: format!("part size {} does not fit in memory", self.upload_part_size),
            })?;

        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(StoreError::io(local_path))?;
        let mut buffer = vec![0u8; chunk_size];
        let mut part_number = 1;
        let mut parts = Vec::new();

        loop {
            let mut n = 0;
            while n < chunk_size {
                let read = file
                    .read(&mut buffer[n..])
                    .await
                    .map_err(StoreError::io(local_path))?;
                if read == 0 {
                    break;
                }
                n += read;
            }

            if n == 0 {
                break;
            }

            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .body(ByteStream::from(buffer[..n].to_vec()))
                .part_number(part_number)
                .send()
                .await
                .map_err(upload_err(bucket, key))?;

            parts.push(
                CompletedPart::builder()
                    .e_tag(output.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            part_number += 1;
        }

        Ok(parts)
    }

    /// Best-effort cleanup of a failed multipart upload. The upload error is
    /// what the caller sees, so a failed abort is only logged.
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            log::warn!("Failed to abort multipart upload {upload_id} for s3://{bucket}/{key}: {e}");
        }
    }
}

#[async_trait]
impl ObjectStoreTransport for S3Transport {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        options: &PutOptions,
    ) -> Result<PutReceipt, StoreError> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(StoreError::io(local_path))?
            .len();

        #[allow(clippy::cast_precision_loss)] // display-only MB value
        let mb = size as f64 / 1_048_576.0;
        log::info!(
            "Pushing {} -> s3://{bucket}/{key} ({mb:.1} MB)",
            local_path.display(),
        );

        let etag = if size > self.upload_part_size {
            self.put_multipart(bucket, key, local_path, options).await?
        } else {
            self.put_single(bucket, key, local_path, options).await?
        };

        log::info!("  uploaded {key}");
        Ok(PutReceipt {
            key: key.to_string(),
            etag,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<u64, StoreError> {
        log::info!("Pulling s3://{bucket}/{key} -> {}", local_path.display());

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(download_err(bucket, key))?;

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(StoreError::io(local_path))?;
        let mut reader = output.body.into_async_read();
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(download_err(bucket, key))?;
        file.flush().await.map_err(StoreError::io(local_path))?;

        #[allow(clippy::cast_precision_loss)] // display-only MB value
        let mb = written as f64 / 1_048_576.0;
        log::info!("  downloaded {} ({mb:.1} MB)", local_path.display());

        Ok(written)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectStat>, StoreError> {
        let result = self.client.head_object().bucket(bucket).key(key).send().await;

        match result {
            Ok(output) => Ok(Some(ObjectStat {
                key: key.to_string(),
                etag: output.e_tag().map(clean_etag),
                size: content_length(output.content_length()),
                content_type: output.content_type().map(str::to_string),
                last_modified: output.last_modified().and_then(to_chrono),
            })),
            Err(err) => {
                if err.as_service_error().is_some_and(HeadObjectError::is_not_found) {
                    return Ok(None);
                }
                Err(StoreError::Head {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ListEntry>, StoreError> {
        log::debug!("Listing s3://{bucket}/{prefix}* (recursive: {recursive})");

        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if !recursive {
                request = request.delimiter("/");
            }
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(|e| StoreError::List {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                source: Box::new(e),
            })?;

            for common in output.common_prefixes() {
                if let Some(p) = common.prefix() {
                    entries.push(ListEntry::prefix(p));
                }
            }

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    entries.push(ListEntry {
                        key: key.to_string(),
                        is_prefix: false,
                        size: Some(content_length(obj.size())),
                        etag: obj.e_tag().map(clean_etag),
                        last_modified: obj.last_modified().and_then(to_chrono),
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        log::debug!("  found {} entries", entries.len());
        Ok(entries)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        log::info!("Deleting s3://{bucket}/{key}");

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::Delete {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Vec<AclGrant>, StoreError> {
        let output = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::GetAcl {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        Ok(output.grants().iter().filter_map(convert_grant).collect())
    }

    async fn put_object_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: CannedAcl,
    ) -> Result<(), StoreError> {
        log::info!("Setting s3://{bucket}/{key} ACL to {acl}");

        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(acl.as_ref()))
            .send()
            .await
            .map_err(|e| StoreError::PutAcl {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        overrides: &ResponseOverrides,
    ) -> Result<String, StoreError> {
        let presign_err = |source: Box<dyn std::error::Error + Send + Sync>| StoreError::Presign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        };

        let presigning =
            PresigningConfig::expires_in(expires_in).map_err(|e| presign_err(Box::new(e)))?;

        let mut request = self.client.get_object().bucket(bucket).key(key);
        if let Some(v) = &overrides.content_type {
            request = request.response_content_type(v);
        }
        if let Some(v) = &overrides.content_disposition {
            request = request.response_content_disposition(v);
        }
        if let Some(v) = &overrides.cache_control {
            request = request.response_cache_control(v);
        }
        if let Some(v) = &overrides.content_encoding {
            request = request.response_content_encoding(v);
        }
        if let Some(v) = &overrides.content_language {
            request = request.response_content_language(v);
        }
        if let Some(v) = &overrides.expires {
            let expires = SdkDateTime::from_str(v, DateTimeFormat::HttpDate).map_err(|_| {
                StoreError::InvalidInput {
                    message: format!("Expires override {v:?} is not an HTTP date"),
                }
            })?;
            request = request.response_expires(expires);
        }

        let presigned = request
            .presigned(presigning)
            .await
            .map_err(|e| presign_err(Box::new(e)))?;

        Ok(presigned.uri().to_string())
    }
}

fn content_type(options: &PutOptions) -> &str {
    options.content_type.as_deref().unwrap_or(OCTET_STREAM)
}

fn clean_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn content_length(length: Option<i64>) -> u64 {
    length.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

fn to_chrono(dt: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn convert_grant(grant: &Grant) -> Option<AclGrant> {
    let grantee = grant.grantee()?;
    let kind_str = grantee.r#type().as_str();
    let kind = kind_str
        .parse()
        .unwrap_or_else(|_| GranteeKind::Other(kind_str.to_string()));

    Some(AclGrant {
        grantee: Grantee {
            kind,
            uri: grantee.uri().map(str::to_string),
            id: grantee.id().map(str::to_string),
            display_name: grantee.display_name().map(str::to_string),
        },
        permission: grant
            .permission()
            .and_then(|p| p.as_str().parse::<Permission>().ok()),
    })
}

fn upload_err<E>(bucket: &str, key: &str) -> impl FnOnce(E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let (bucket, key) = (bucket.to_string(), key.to_string());
    move |e| StoreError::Upload {
        bucket,
        key,
        source: Box::new(e),
    }
}

fn download_err<E>(bucket: &str, key: &str) -> impl FnOnce(E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let (bucket, key) = (bucket.to_string(), key.to_string());
    move |e| StoreError::Download {
        bucket,
        key,
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::types::{Grantee as SdkGrantee, Permission as SdkPermission, Type};
    use ostore_store_models::ALL_USERS_URI;

    use super::*;
    use crate::client::public_permission;

    fn grant(grantee: Option<SdkGrantee>, permission: SdkPermission) -> Grant {
        Grant::builder()
            .set_grantee(grantee)
            .permission(permission)
            .build()
    }

    #[test]
    fn grants_convert_to_acl_entries() {
        let public = grant(
            Some(
                SdkGrantee::builder()
                    .r#type(Type::Group)
                    .uri(ALL_USERS_URI)
                    .build()
                    .unwrap(),
            ),
            SdkPermission::Read,
        );
        let owner = grant(
            Some(
                SdkGrantee::builder()
                    .r#type(Type::CanonicalUser)
                    .id("abc123")
                    .display_name("owner")
                    .build()
                    .unwrap(),
            ),
            SdkPermission::FullControl,
        );
        let anonymous = grant(None, SdkPermission::Read);

        let grants: Vec<AclGrant> = [&public, &owner, &anonymous]
            .into_iter()
            .filter_map(convert_grant)
            .collect();

        assert_eq!(
            grants,
            vec![
                AclGrant {
                    grantee: Grantee::group(ALL_USERS_URI),
                    permission: Some(Permission::Read),
                },
                AclGrant {
                    grantee: Grantee {
                        kind: GranteeKind::CanonicalUser,
                        uri: None,
                        id: Some("abc123".to_string()),
                        display_name: Some("owner".to_string()),
                    },
                    permission: Some(Permission::FullControl),
                },
            ]
        );
        assert_eq!(public_permission(&grants), Ok(Some(Permission::Read)));
    }

    #[test]
    fn etags_lose_their_quotes() {
        assert_eq!(clean_etag("\"abc-2\""), "abc-2");
        assert_eq!(clean_etag("abc"), "abc");
    }

    #[test]
    fn missing_or_negative_lengths_are_zero() {
        assert_eq!(content_length(Some(42)), 42);
        assert_eq!(content_length(Some(-1)), 0);
        assert_eq!(content_length(None), 0);
    }

    #[test]
    fn sdk_timestamps_convert_to_chrono() {
        let dt = SdkDateTime::from_secs_and_nanos(1_700_000_000, 500);
        let converted = to_chrono(&dt).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_subsec_nanos(), 500);
    }
}
