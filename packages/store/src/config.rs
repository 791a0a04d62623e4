//! Connection settings for an S3-compatible endpoint.

use std::fmt;

use ostore_etag::{DEFAULT_UPLOAD_PART_SIZE, MIB};

use crate::error::StoreError;

/// Object store host, with or without a scheme.
pub const ENV_HOST: &str = "OBJ_STORE_HOST";
/// Access key ID.
pub const ENV_USER: &str = "OBJ_STORE_USER";
/// Secret access key.
pub const ENV_SECRET: &str = "OBJ_STORE_SECRET";
/// Default bucket.
pub const ENV_BUCKET: &str = "OBJ_STORE_BUCKET";
/// Signing region (optional).
pub const ENV_REGION: &str = "OBJ_STORE_REGION";
/// Upload part size in bytes (optional).
pub const ENV_PART_SIZE: &str = "OBJ_STORE_PART_SIZE";

/// Region used when none is configured. S3-compatible stores generally
/// accept any region in the signature.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Smallest part size S3 accepts for all but the last part.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Everything needed to reach a bucket.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Host name (`objects.example.com`) or full endpoint URL.
    pub host: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Bucket used when a call does not name one.
    pub bucket: String,
    /// Signing region.
    pub region: String,
    /// Part size for uploads larger than one part, and the part size the
    /// `ETag` verifier tries after the client default.
    pub upload_part_size: u64,
}

impl StoreConfig {
    /// Creates a configuration with the default region and part size.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            upload_part_size: DEFAULT_UPLOAD_PART_SIZE,
        }
    }

    /// Sets the signing region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Sets the upload part size.
    #[must_use]
    pub const fn with_upload_part_size(mut self, part_size: u64) -> Self {
        self.upload_part_size = part_size;
        self
    }

    /// Reads the configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingEnv`] if a required variable is unset,
    /// or [`StoreError::InvalidConfig`] if the part size is not a number.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// See [`StoreConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let require = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| StoreError::MissingEnv {
                    name: name.to_string(),
                })
        };

        let mut config = Self::new(
            require(ENV_HOST)?,
            require(ENV_USER)?,
            require(ENV_SECRET)?,
            require(ENV_BUCKET)?,
        );

        if let Some(region) = lookup(ENV_REGION).filter(|v| !v.is_empty()) {
            config.region = region;
        }

        if let Some(part_size) = lookup(ENV_PART_SIZE).filter(|v| !v.is_empty()) {
            config.upload_part_size =
                part_size
                    .trim()
                    .parse()
                    .map_err(|_| StoreError::InvalidConfig {
                        message: format!("{ENV_PART_SIZE} must be a byte count, got {part_size:?}"),
                    })?;
        }

        Ok(config)
    }

    /// Endpoint URL for the SDK. Bare hosts are assumed to speak HTTPS.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.host.trim_end_matches('/'))
        }
    }

    /// Checks the values a real S3 endpoint would reject.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] for an empty host or bucket, or
    /// a part size below [`MIN_PART_SIZE`].
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.host.trim().is_empty() {
            return Err(StoreError::InvalidConfig {
                message: "host is empty".to_string(),
            });
        }
        if self.bucket.trim().is_empty() {
            return Err(StoreError::InvalidConfig {
                message: "bucket is empty".to_string(),
            });
        }
        if self.upload_part_size < MIN_PART_SIZE {
            return Err(StoreError::InvalidConfig {
                message: format!(
                    "upload part size {} is below the S3 minimum of {MIN_PART_SIZE}",
                    self.upload_part_size
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("upload_part_size", &self.upload_part_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        (ENV_HOST, "objects.example.com"),
        (ENV_USER, "nr-user"),
        (ENV_SECRET, "hunter2"),
        (ENV_BUCKET, "habs"),
    ];

    #[test]
    fn reads_required_variables_with_defaults() {
        let config = StoreConfig::from_lookup(lookup_from(REQUIRED)).unwrap();
        assert_eq!(config.host, "objects.example.com");
        assert_eq!(config.bucket, "habs");
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.upload_part_size, DEFAULT_UPLOAD_PART_SIZE);
        assert_eq!(config.endpoint_url(), "https://objects.example.com");
    }

    #[test]
    fn reports_the_missing_variable() {
        let err = StoreConfig::from_lookup(lookup_from(&REQUIRED[..3])).unwrap_err();
        match err {
            StoreError::MissingEnv { name } => assert_eq!(name, ENV_BUCKET),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn optional_variables_override_defaults() {
        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_REGION, "ca-central-1"));
        vars.push((ENV_PART_SIZE, "8388608"));
        let config = StoreConfig::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(config.region, "ca-central-1");
        assert_eq!(config.upload_part_size, 8 * MIB);

        let mut vars = REQUIRED.to_vec();
        vars.push((ENV_PART_SIZE, "lots"));
        assert!(matches!(
            StoreConfig::from_lookup(lookup_from(&vars)),
            Err(StoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn endpoint_keeps_explicit_scheme() {
        let config = StoreConfig::new("http://localhost:9000/", "a", "b", "c");
        assert_eq!(config.endpoint_url(), "http://localhost:9000");
    }

    #[test]
    fn validate_rejects_small_parts() {
        let config = StoreConfig::new("h", "a", "b", "c").with_upload_part_size(MIB);
        assert!(config.validate().is_err());
        assert!(config.with_upload_part_size(MIN_PART_SIZE).validate().is_ok());
    }

    #[test]
    fn debug_redacts_secret() {
        let config = StoreConfig::new("h", "a", "hunter2", "c");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
