#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Translates local filesystem paths into object keys.
//!
//! Given a source root and a destination prefix, a local path such as
//! `/home/u/players/roster/x.txt` (root `/home/u/players`, prefix
//! `/backup/guy`) becomes the key `/backup/guy/roster/x.txt`. Keys always
//! use `/` regardless of the host's separator.

use std::path::{Component, Path, PathBuf};

use ostore_store_models::ObjectKey;

/// Errors from path translation.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// The root is not a proper ancestor of the path.
    #[error("Expecting the root path {} to be an ancestor of {}", root.display(), path.display())]
    NotAncestor {
        /// Path being translated.
        path: PathBuf,
        /// Root that was supposed to contain it.
        root: PathBuf,
    },

    /// A path component is not valid UTF-8 and cannot become a key.
    #[error("Path is not valid UTF-8: {}", path.display())]
    NonUtf8 {
        /// Offending path.
        path: PathBuf,
    },
}

/// Whether a local entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file (or anything that is not a directory).
    File,
    /// Directory; its key gets a trailing `/`.
    Directory,
}

/// Policy for the first character of a generated key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeadingSlash {
    /// Keep whatever the destination prefix yields.
    #[default]
    Preserve,
    /// Always start with `/`.
    Force,
    /// Never start with `/`.
    Strip,
}

/// Options for [`to_object_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOptions {
    /// Bucket name to use as the first key segment.
    pub prepend_bucket: Option<String>,
    /// Leading separator policy.
    pub leading_slash: LeadingSlash,
}

/// Components that matter for ancestry; `.` carries no meaning.
fn significant_components(path: &Path) -> Vec<Component<'_>> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Removes `root` from the front of `path`.
///
/// The comparison is component-wise (`/a/bc` is not under `/a/b`) and
/// `root` must be a proper ancestor, so `path == root` is rejected.
///
/// # Errors
///
/// Returns [`PathError::NotAncestor`] if `root` is not a proper ancestor of
/// `path`.
pub fn strip_root(path: &Path, root: &Path) -> Result<PathBuf, PathError> {
    let path_parts = significant_components(path);
    let root_parts = significant_components(root);

    if root_parts.len() >= path_parts.len() || !path_parts.starts_with(&root_parts) {
        log::error!(
            "root {} is not an ancestor of {}",
            root.display(),
            path.display()
        );
        return Err(PathError::NotAncestor {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        });
    }

    let relative: PathBuf = path_parts[root_parts.len()..].iter().collect();
    log::debug!("relative path: {}", relative.display());
    Ok(relative)
}

/// Builds the object key for `local_path`, checking the filesystem to see
/// whether it is a directory.
///
/// # Errors
///
/// Returns [`PathError`] if `root` is not an ancestor of `local_path` or a
/// component is not UTF-8.
pub fn to_object_key(
    local_path: &Path,
    dest_prefix: &str,
    root: &Path,
    options: &KeyOptions,
) -> Result<ObjectKey, PathError> {
    let kind = if local_path.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    to_object_key_for(local_path, kind, dest_prefix, root, options)
}

/// Builds the object key for `local_path` without touching the filesystem.
///
/// The key is `[bucket/]dest_prefix/relative` where `relative` is
/// `local_path` with `root` stripped. Directories get a trailing `/`.
///
/// # Errors
///
/// Returns [`PathError`] if `root` is not an ancestor of `local_path` or a
/// component is not UTF-8.
pub fn to_object_key_for(
    local_path: &Path,
    kind: EntryKind,
    dest_prefix: &str,
    root: &Path,
    options: &KeyOptions,
) -> Result<ObjectKey, PathError> {
    let relative = strip_root(local_path, root)?;

    let mut segments: Vec<String> = Vec::new();
    if let Some(bucket) = &options.prepend_bucket {
        segments.push(bucket.clone());
    }
    segments.push(normalize_separators(dest_prefix));
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| PathError::NonUtf8 {
                path: local_path.to_path_buf(),
            })?;
        segments.push(part.to_string());
    }

    let mut key = join_segments(&segments);

    if kind == EntryKind::Directory && !key.ends_with('/') {
        key.push('/');
    }

    match options.leading_slash {
        LeadingSlash::Preserve => {}
        LeadingSlash::Force => {
            if !key.starts_with('/') {
                key.insert(0, '/');
            }
        }
        LeadingSlash::Strip => {
            key = key.trim_start_matches('/').to_string();
        }
    }

    log::debug!("object key for {}: {key}", local_path.display());
    Ok(ObjectKey::new(key))
}

/// Joins key segments with single `/` separators.
///
/// A leading `/` on the first non-empty segment is kept; empty segments and
/// redundant separators between segments are dropped.
fn join_segments(segments: &[String]) -> String {
    let mut key = String::new();
    for segment in segments {
        if segment.is_empty() || (segment == "/" && !key.is_empty()) {
            continue;
        }
        if key.is_empty() {
            key.push_str(segment.trim_end_matches('/'));
            if key.is_empty() {
                // segment was all slashes
                key.push('/');
            }
            continue;
        }
        if !key.ends_with('/') {
            key.push('/');
        }
        key.push_str(segment.trim_matches('/'));
    }
    key
}

/// Converts host separators to `/`.
fn normalize_separators(value: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        value.to_string()
    } else {
        value.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_key(path: &str, prefix: &str, root: &str, options: &KeyOptions) -> String {
        to_object_key_for(
            Path::new(path),
            EntryKind::File,
            prefix,
            Path::new(root),
            options,
        )
        .unwrap()
        .into_string()
    }

    #[test]
    fn strips_component_wise_root() {
        let relative = strip_root(
            Path::new("/habs/guy/lafleur/points"),
            Path::new("/habs/guy"),
        )
        .unwrap();
        assert_eq!(relative, Path::new("lafleur/points"));
    }

    #[test]
    fn strip_root_rejects_unrelated_root() {
        let err = strip_root(Path::new("/a/b/c"), Path::new("/x/y")).unwrap_err();
        assert!(matches!(err, PathError::NotAncestor { .. }));
    }

    #[test]
    fn strip_root_rejects_string_prefix_that_is_not_a_component() {
        assert!(strip_root(Path::new("/a/bc/d"), Path::new("/a/b")).is_err());
    }

    #[test]
    fn strip_root_requires_proper_ancestor() {
        assert!(strip_root(Path::new("/a/b"), Path::new("/a/b")).is_err());
        assert!(strip_root(Path::new("/a"), Path::new("/a/b")).is_err());
    }

    #[test]
    fn strip_root_ignores_leading_dot() {
        let relative = strip_root(
            Path::new("./data/modis-terra/MOD10A1.061/file.hdf"),
            Path::new("data"),
        )
        .unwrap();
        assert_eq!(relative, Path::new("modis-terra/MOD10A1.061/file.hdf"));
    }

    #[test]
    fn relative_segments_join_with_forward_slash() {
        let path: PathBuf = ["data", "sub", "f.txt"].iter().collect();
        let root: PathBuf = ["data"].iter().collect();
        let key = to_object_key_for(
            &path,
            EntryKind::File,
            "out",
            &root,
            &KeyOptions::default(),
        )
        .unwrap();
        assert_eq!(key.as_str(), "out/sub/f.txt");
    }

    #[test]
    fn absolute_prefix_is_preserved() {
        assert_eq!(
            file_key(
                "/home/u/players/roster/x.txt",
                "/backup/guy",
                "/home/u/players",
                &KeyOptions::default(),
            ),
            "/backup/guy/roster/x.txt"
        );
    }

    #[test]
    fn prefix_with_trailing_slash_does_not_double_up() {
        assert_eq!(
            file_key("/src/a/b.txt", "dest/", "/src", &KeyOptions::default()),
            "dest/a/b.txt"
        );
        assert_eq!(
            file_key("/src/a/b.txt", "", "/src", &KeyOptions::default()),
            "a/b.txt"
        );
    }

    #[test]
    fn bucket_is_prepended_as_first_segment() {
        let options = KeyOptions {
            prepend_bucket: Some("habs".to_string()),
            ..KeyOptions::default()
        };
        assert_eq!(
            file_key("/src/a/b.txt", "/backup", "/src", &options),
            "habs/backup/a/b.txt"
        );
    }

    #[test]
    fn leading_slash_policies() {
        let force = KeyOptions {
            leading_slash: LeadingSlash::Force,
            ..KeyOptions::default()
        };
        assert_eq!(
            file_key("/src/a/b.txt", "backup", "/src", &force),
            "/backup/a/b.txt"
        );

        let strip = KeyOptions {
            leading_slash: LeadingSlash::Strip,
            ..KeyOptions::default()
        };
        assert_eq!(
            file_key("/src/a/b.txt", "/backup", "/src", &strip),
            "backup/a/b.txt"
        );
    }

    #[test]
    fn directories_get_trailing_slash() {
        let key = to_object_key_for(
            Path::new("/src/a/sub"),
            EntryKind::Directory,
            "backup",
            Path::new("/src"),
            &KeyOptions::default(),
        )
        .unwrap();
        assert_eq!(key.as_str(), "backup/a/sub/");
        assert!(key.is_prefix());
    }

    #[test]
    fn to_object_key_checks_filesystem_for_directories() {
        let tmp = std::env::temp_dir().join("ostore_paths_dir_test");
        let _ = std::fs::remove_dir_all(&tmp);
        std::fs::create_dir_all(tmp.join("nested")).unwrap();
        std::fs::write(tmp.join("nested").join("f.txt"), b"x").unwrap();

        let options = KeyOptions::default();
        let dir_key = to_object_key(&tmp.join("nested"), "out", &tmp, &options).unwrap();
        assert_eq!(dir_key.as_str(), "out/nested/");

        let file_key =
            to_object_key(&tmp.join("nested").join("f.txt"), "out", &tmp, &options).unwrap();
        assert_eq!(file_key.as_str(), "out/nested/f.txt");

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
