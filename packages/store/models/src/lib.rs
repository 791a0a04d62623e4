#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for talking to an S3-compatible object store.
//!
//! These are the fixed result shapes returned by every transport: object
//! keys, `HeadObject` metadata, listing entries and access-control grants.
//! Transports convert their SDK responses into these types so callers never
//! depend on a particular client library.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Key of an object within a bucket.
///
/// Always `/`-separated. A key ending in `/` denotes a directory-like
/// prefix rather than an object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Wraps a raw key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key denotes a directory-like prefix.
    #[must_use]
    pub fn is_prefix(&self) -> bool {
        self.0.ends_with('/')
    }

    /// Returns the last non-empty path segment of the key.
    #[must_use]
    pub fn basename(&self) -> &str {
        basename(&self.0)
    }

    /// Consumes the key, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for ObjectKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ObjectKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Returns the last non-empty `/`-separated segment of `key`.
#[must_use]
pub fn basename(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

/// Object metadata as reported by `HeadObject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    /// Object key.
    pub key: String,
    /// `ETag` exactly as reported by the store (quotes stripped).
    pub etag: Option<String>,
    /// Content length in bytes.
    pub size: u64,
    /// Stored `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Object key, or the common prefix for directory-like entries.
    pub key: String,
    /// `true` for common prefixes returned by a non-recursive listing.
    pub is_prefix: bool,
    /// Object size (absent for prefixes).
    pub size: Option<u64>,
    /// Object `ETag` (absent for prefixes).
    pub etag: Option<String>,
    /// Last modification time (absent for prefixes).
    pub last_modified: Option<DateTime<Utc>>,
}

impl ListEntry {
    /// Builds a directory-like prefix entry.
    #[must_use]
    pub fn prefix(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_prefix: true,
            size: None,
            etag: None,
            last_modified: None,
        }
    }
}

/// S3 grant permission.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Read, write, read ACP and write ACP.
    FullControl,
    /// Read the object.
    Read,
    /// Write the object.
    Write,
    /// Read the object's ACL.
    ReadAcp,
    /// Write the object's ACL.
    WriteAcp,
}

/// Kind of grantee in an ACL grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumString)]
pub enum GranteeKind {
    /// A specific account, identified by canonical ID.
    CanonicalUser,
    /// A predefined group such as `AllUsers`.
    Group,
    /// An account identified by email address.
    AmazonCustomerByEmail,
    /// Anything the store reports that we do not model.
    #[strum(default)]
    Other(String),
}

/// URI fragment identifying the anonymous "all users" group.
pub const ALL_USERS_GROUP: &str = "AllUsers";

/// The grantee of an ACL grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grantee {
    /// Grantee type.
    pub kind: GranteeKind,
    /// Group URI (set for [`GranteeKind::Group`]).
    pub uri: Option<String>,
    /// Canonical user ID.
    pub id: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
}

impl Grantee {
    /// Builds a group grantee for `uri`.
    #[must_use]
    pub fn group(uri: impl Into<String>) -> Self {
        Self {
            kind: GranteeKind::Group,
            uri: Some(uri.into()),
            id: None,
            display_name: None,
        }
    }

    /// Builds a canonical-user grantee.
    #[must_use]
    pub fn canonical_user(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind: GranteeKind::CanonicalUser,
            uri: None,
            display_name: Some(id.clone()),
            id: Some(id),
        }
    }

    /// Whether this grantee is the anonymous "all users" group.
    ///
    /// Matches a `Group` grantee whose URI contains `AllUsers`, ignoring
    /// case.
    #[must_use]
    pub fn is_all_users(&self) -> bool {
        self.kind == GranteeKind::Group
            && self.uri.as_deref().is_some_and(|uri| {
                uri.to_ascii_lowercase()
                    .contains(&ALL_USERS_GROUP.to_ascii_lowercase())
            })
    }
}

/// One entry of an object's access-control list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGrant {
    /// Who the grant applies to.
    pub grantee: Grantee,
    /// What the grant allows. `None` if the store reported a permission we
    /// do not recognise.
    pub permission: Option<Permission>,
}

/// Group URI S3 uses for anonymous access.
pub const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// Canned ACLs this crate applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CannedAcl {
    /// Owner-only access.
    Private,
    /// Anyone may read.
    PublicRead,
}

/// Options for a single upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Upload with the `public-read` canned ACL.
    pub public: bool,
    /// Explicit `Content-Type`. Defaults to `application/octet-stream`.
    pub content_type: Option<String>,
}

/// What the store acknowledged for a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    /// Key written.
    pub key: String,
    /// `ETag` of the new object, quotes stripped.
    pub etag: Option<String>,
}

/// Header map passed to presigning, e.g. from [`force_download_headers`].
pub type HeaderMap = BTreeMap<String, String>;

/// Content type used to force browsers to download rather than display.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Headers that make a presigned GET download the object as a file named
/// after the key's basename.
#[must_use]
pub fn force_download_headers(key: &str) -> HeaderMap {
    let filename = basename(key);
    BTreeMap::from([
        ("Content-Type".to_string(), OCTET_STREAM.to_string()),
        (
            "Content-Disposition".to_string(),
            format!("attachment; filename={filename}"),
        ),
    ])
}

/// `response-*` overrides applied to a presigned GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseOverrides {
    /// `response-content-type`.
    pub content_type: Option<String>,
    /// `response-content-disposition`.
    pub content_disposition: Option<String>,
    /// `response-cache-control`.
    pub cache_control: Option<String>,
    /// `response-content-encoding`.
    pub content_encoding: Option<String>,
    /// `response-content-language`.
    pub content_language: Option<String>,
    /// `response-expires`.
    pub expires: Option<String>,
}

/// Error returned when a header cannot be expressed as a response override.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("header {name:?} cannot be overridden on a presigned GET")]
pub struct UnsupportedHeaderError {
    /// The header name that was rejected.
    pub name: String,
}

impl ResponseOverrides {
    /// Maps a header map onto response overrides.
    ///
    /// Names are matched case-insensitively, with or without the
    /// `response-` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedHeaderError`] for any header S3 cannot override.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, UnsupportedHeaderError> {
        let mut overrides = Self::default();
        for (name, value) in headers {
            let lower = name.to_ascii_lowercase();
            let bare = lower.strip_prefix("response-").unwrap_or(&lower);
            let slot = match bare {
                "content-type" => &mut overrides.content_type,
                "content-disposition" => &mut overrides.content_disposition,
                "cache-control" => &mut overrides.cache_control,
                "content-encoding" => &mut overrides.content_encoding,
                "content-language" => &mut overrides.content_language,
                "expires" => &mut overrides.expires,
                _ => return Err(UnsupportedHeaderError { name: name.clone() }),
            };
            *slot = Some(value.clone());
        }
        Ok(overrides)
    }

    /// Whether no override is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.content_type.is_none()
            && self.content_disposition.is_none()
            && self.cache_control.is_none()
            && self.content_encoding.is_none()
            && self.content_language.is_none()
            && self.expires.is_none()
    }
}
