#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Verifies local files against S3 `ETag`s without downloading anything.
//!
//! ## Single-part uploads
//!
//! The `ETag` is the MD5 hex digest of the whole object, so the local file's
//! MD5 settles the question either way.
//!
//! ## Multipart uploads
//!
//! The `ETag` has the shape `<md5>-<N>` where `<md5>` is the MD5 of the
//! concatenated raw MD5 digests of the `N` parts. The part size the
//! uploading client used is not recorded anywhere, so [`EtagVerifier`]
//! re-chunks the local file with a few plausible part sizes, in order:
//!
//! 1. 8 MiB, the default of `aws-cli`/`boto3` and `s3cmd`,
//! 2. the upload part size this workspace uses itself (15 MiB by default),
//! 3. the file size divided by `N`, rounded up to a whole MiB.
//!
//! A match proves the file is identical. No match is
//! [`Verification::Inconclusive`], not proof of difference: the object may
//! have been uploaded with a part size we did not try.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One mebibyte.
pub const MIB: u64 = 1_048_576;

/// Part size used by `aws-cli`, `boto3` and `s3cmd` unless configured.
pub const DEFAULT_CLIENT_PART_SIZE: u64 = 8 * MIB;

/// Part size this workspace's uploader uses unless configured.
pub const DEFAULT_UPLOAD_PART_SIZE: u64 = 15 * MIB;

/// Read buffer for hashing.
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Length of an MD5 hex digest.
const MD5_HEX_LEN: usize = 32;

/// Errors from `ETag` parsing and local hashing.
#[derive(Debug, thiserror::Error)]
pub enum EtagError {
    /// The `ETag` has neither the single-part nor the multipart shape.
    #[error("Invalid ETag {etag:?}: {reason}")]
    InvalidEtag {
        /// The literal `ETag` that was rejected.
        etag: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A part size of zero cannot chunk anything.
    #[error("Part size must be positive")]
    InvalidPartSize,

    /// Reading the local file failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// File being hashed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl EtagError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A parsed S3 `ETag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ETag {
    /// MD5 of the whole object.
    Whole {
        /// Lowercase hex digest.
        digest: String,
    },
    /// MD5 of the concatenated part digests, with the part count.
    Multipart {
        /// Lowercase hex digest.
        digest: String,
        /// Declared number of parts.
        parts: u64,
    },
}

impl ETag {
    /// Parses an `ETag`, stripping the double quotes S3 puts around it.
    ///
    /// # Errors
    ///
    /// Returns [`EtagError::InvalidEtag`] if the value is neither a 32
    /// character hex digest nor `<digest>-<N>` with `N` a positive integer.
    pub fn parse(raw: &str) -> Result<Self, EtagError> {
        let invalid = |reason| EtagError::InvalidEtag {
            etag: raw.to_string(),
            reason,
        };

        let clean = raw.trim().trim_matches('"');

        if let Some((digest, count)) = clean.split_once('-') {
            if !is_md5_hex(digest) {
                return Err(invalid("digest is not 32 hex characters"));
            }
            let parts: u64 = count
                .parse()
                .map_err(|_| invalid("part count is not an integer"))?;
            if parts == 0 {
                return Err(invalid("part count must be positive"));
            }
            return Ok(Self::Multipart {
                digest: digest.to_ascii_lowercase(),
                parts,
            });
        }

        if !is_md5_hex(clean) {
            return Err(invalid("expected an MD5 hex digest or <digest>-<parts>"));
        }
        Ok(Self::Whole {
            digest: clean.to_ascii_lowercase(),
        })
    }

    /// Declared part count, if this is a multipart `ETag`.
    #[must_use]
    pub const fn parts(&self) -> Option<u64> {
        match self {
            Self::Whole { .. } => None,
            Self::Multipart { parts, .. } => Some(*parts),
        }
    }
}

impl FromStr for ETag {
    type Err = EtagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole { digest } => f.write_str(digest),
            Self::Multipart { digest, parts } => write!(f, "{digest}-{parts}"),
        }
    }
}

fn is_md5_hex(value: &str) -> bool {
    value.len() == MD5_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Rounds `x` up to the next whole MiB. Multiples of a MiB are unchanged.
#[must_use]
pub const fn ceil_to_mib(x: u64) -> u64 {
    let rem = x % MIB;
    if rem == 0 { x } else { x + (MIB - rem) }
}

/// Part size a client would pick to split `file_size` into `parts` parts
/// on MiB boundaries: `file_size / parts` rounded up to a whole MiB.
///
/// `parts` must be positive.
#[must_use]
pub const fn synthesized_part_size(file_size: u64, parts: u64) -> u64 {
    ceil_to_mib(file_size.div_ceil(parts))
}

/// Whether splitting `file_size` bytes at `part_size` could have produced
/// the declared `parts`.
///
/// Requires `part_size < file_size` and `file_size / part_size <= parts`,
/// the division being exact rather than rounded.
#[must_use]
pub const fn is_plausible_part_size(file_size: u64, parts: u64, part_size: u64) -> bool {
    part_size < file_size && (file_size as u128) <= (parts as u128) * (part_size as u128)
}

/// MD5 hex digest of a whole file.
///
/// # Errors
///
/// Returns [`EtagError::Io`] if the file cannot be read.
pub fn file_md5(path: &Path) -> Result<String, EtagError> {
    let mut file = File::open(path).map_err(EtagError::io(path))?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).map_err(EtagError::io(path))?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.finalize()))
}

/// Multipart `ETag` S3 would report for `path` uploaded in `part_size`
/// chunks.
///
/// # Errors
///
/// Returns [`EtagError::InvalidPartSize`] for a zero part size and
/// [`EtagError::Io`] if the file cannot be read.
pub fn multipart_etag(path: &Path, part_size: u64) -> Result<String, EtagError> {
    if part_size == 0 {
        return Err(EtagError::InvalidPartSize);
    }

    let mut file = File::open(path).map_err(EtagError::io(path))?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut digests: Vec<u8> = Vec::new();
    let mut part = md5::Context::new();
    let mut part_len = 0u64;
    let mut parts = 0u64;

    loop {
        // Never read across a part boundary.
        let want = usize::try_from((part_size - part_len).min(READ_BUFFER_SIZE as u64))
            .unwrap_or(READ_BUFFER_SIZE);
        let n = file
            .read(&mut buffer[..want])
            .map_err(EtagError::io(path))?;
        if n == 0 {
            break;
        }
        part.consume(&buffer[..n]);
        part_len += n as u64;

        if part_len == part_size {
            let finished = std::mem::replace(&mut part, md5::Context::new());
            digests.extend_from_slice(&finished.finalize().0);
            parts += 1;
            part_len = 0;
        }
    }

    if part_len > 0 {
        digests.extend_from_slice(&part.finalize().0);
        parts += 1;
    }

    Ok(format!("{:x}-{parts}", md5::compute(&digests)))
}

/// Outcome of verifying a local file against a remote `ETag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The local file is byte-identical to the remote object.
    Match {
        /// Part size that reproduced a multipart `ETag`; `None` for
        /// single-part `ETag`s.
        part_size: Option<u64>,
    },
    /// Single-part `ETag` whose MD5 differs from the local file.
    Mismatch,
    /// Multipart `ETag` that no tried part size reproduced. The files may
    /// still be identical.
    Inconclusive {
        /// Part sizes that were tried, in order.
        tried: Vec<u64>,
    },
}

impl Verification {
    /// Whether the file was verified as identical.
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

/// Matches local files against remote `ETag`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtagVerifier {
    upload_part_size: u64,
    max_candidates: Option<usize>,
}

impl Default for EtagVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_PART_SIZE)
    }
}

impl EtagVerifier {
    /// Creates a verifier that also tries `upload_part_size`, the part size
    /// our own uploads use.
    #[must_use]
    pub const fn new(upload_part_size: u64) -> Self {
        Self {
            upload_part_size,
            max_candidates: None,
        }
    }

    /// Tries at most `max` part sizes per multipart `ETag`.
    ///
    /// Each candidate re-reads the whole file.
    #[must_use]
    pub const fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = Some(max);
        self
    }

    /// The configured upload part size.
    #[must_use]
    pub const fn upload_part_size(&self) -> u64 {
        self.upload_part_size
    }

    /// Part sizes to try for a `parts`-part `ETag` on a `file_size`-byte
    /// file, in order, duplicates and implausible sizes removed.
    #[must_use]
    pub fn candidate_part_sizes(&self, file_size: u64, parts: u64) -> Vec<u64> {
        if parts == 0 {
            return Vec::new();
        }
        let mut candidates: Vec<u64> = Vec::with_capacity(3);
        for size in [
            DEFAULT_CLIENT_PART_SIZE,
            self.upload_part_size,
            synthesized_part_size(file_size, parts),
        ] {
            if !candidates.contains(&size) && is_plausible_part_size(file_size, parts, size) {
                candidates.push(size);
            }
        }
        if let Some(max) = self.max_candidates {
            candidates.truncate(max);
        }
        candidates
    }

    /// Verifies `path` against the raw `etag` string reported by the store.
    ///
    /// # Errors
    ///
    /// Returns [`EtagError::InvalidEtag`] for a malformed `ETag` and
    /// [`EtagError::Io`] if the local file is missing or unreadable.
    pub fn verify(&self, path: &Path, etag: &str) -> Result<Verification, EtagError> {
        let parsed = ETag::parse(etag)?;
        self.verify_parsed(path, &parsed)
    }

    /// Verifies `path` against an already parsed `ETag`.
    ///
    /// # Errors
    ///
    /// Returns [`EtagError::Io`] if the local file is missing or
    /// unreadable.
    pub fn verify_parsed(&self, path: &Path, etag: &ETag) -> Result<Verification, EtagError> {
        log::debug!("verifying {} against ETag {etag}", path.display());

        match etag {
            ETag::Whole { digest } => {
                let local = file_md5(path)?;
                if local.eq_ignore_ascii_case(digest) {
                    Ok(Verification::Match { part_size: None })
                } else {
                    log::debug!("  local MD5 {local} differs from {digest}");
                    Ok(Verification::Mismatch)
                }
            }
            ETag::Multipart { parts, .. } => {
                let file_size = std::fs::metadata(path).map_err(EtagError::io(path))?.len();
                let expected = etag.to_string();
                let candidates = self.candidate_part_sizes(file_size, *parts);

                for &part_size in &candidates {
                    let computed = multipart_etag(path, part_size)?;
                    log::debug!(
                        "  ETag from store: {expected}, computed: {computed}, part size: {part_size}"
                    );
                    if computed.eq_ignore_ascii_case(&expected) {
                        return Ok(Verification::Match {
                            part_size: Some(part_size),
                        });
                    }
                }

                Ok(Verification::Inconclusive { tried: candidates })
            }
        }
    }

    /// Whether `path` is verified identical to the object with `etag`.
    ///
    /// `false` for a multipart `ETag` only means no tried part size matched.
    ///
    /// # Errors
    ///
    /// See [`EtagVerifier::verify`].
    pub fn etag_is_valid(&self, path: &Path, etag: &str) -> Result<bool, EtagError> {
        Ok(self.verify(path, etag)?.is_match())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ostore_etag_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[allow(clippy::cast_possible_truncation)]
    fn pattern(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Multipart `ETag` computed in memory, independently of the file reader.
    fn expected_multipart(data: &[u8], part_size: u64) -> String {
        let chunks: Vec<&[u8]> = data
            .chunks(usize::try_from(part_size).unwrap())
            .collect();
        let mut concat = Vec::new();
        for chunk in &chunks {
            concat.extend_from_slice(&md5::compute(chunk).0);
        }
        format!("{:x}-{}", md5::compute(&concat), chunks.len())
    }

    #[test]
    fn ceil_to_mib_rounds_up_only_partial_mebibytes() {
        assert_eq!(ceil_to_mib(0), 0);
        assert_eq!(ceil_to_mib(1), MIB);
        assert_eq!(ceil_to_mib(MIB), MIB);
        assert_eq!(ceil_to_mib(MIB + 1), 2 * MIB);
        assert_eq!(ceil_to_mib(5 * MIB - 1), 5 * MIB);
    }

    #[test]
    fn ceil_to_mib_is_idempotent() {
        for x in [0, 1, 17, MIB - 1, MIB, MIB + 1, 15 * MIB + 12_345, u64::from(u32::MAX)] {
            let once = ceil_to_mib(x);
            assert_eq!(ceil_to_mib(once), once, "x = {x}");
        }
    }

    #[test]
    fn synthesized_part_size_uses_exact_quotient() {
        assert_eq!(synthesized_part_size(10 * MIB, 2), 5 * MIB);
        // 5 MiB + half a byte per part still needs a sixth MiB.
        assert_eq!(synthesized_part_size(10 * MIB + 1, 2), 6 * MIB);
        assert_eq!(synthesized_part_size(100 * MIB, 7), 15 * MIB);
    }

    #[test]
    fn parses_single_and_multipart_etags() {
        assert_eq!(
            ETag::parse("\"5EB63BBBE01EEED093CB22BB8F5ACDC3\"").unwrap(),
            ETag::Whole {
                digest: "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string()
            }
        );

        let multipart: ETag = "d41d8cd98f00b204e9800998ecf8427e-12".parse().unwrap();
        assert_eq!(multipart.parts(), Some(12));
        assert_eq!(multipart.to_string(), "d41d8cd98f00b204e9800998ecf8427e-12");
    }

    #[test]
    fn rejects_malformed_etags() {
        for bad in [
            "",
            "not-an-etag",
            "5eb63bbbe01eeed093cb22bb8f5acdc",
            "d41d8cd98f00b204e9800998ecf8427e-x",
            "d41d8cd98f00b204e9800998ecf8427e-0",
            "d41d8cd98f00b204e9800998ecf8427e-",
            "d41d8cd98f00b204e9800998ecf8427e-2-3",
            "zzzz8cd98f00b204e9800998ecf8427e",
        ] {
            let err = ETag::parse(bad).unwrap_err();
            match err {
                EtagError::InvalidEtag { etag, .. } => assert_eq!(etag, bad),
                other => panic!("unexpected error for {bad:?}: {other}"),
            }
        }
    }

    #[test]
    fn candidates_follow_order_and_filter() {
        let verifier = EtagVerifier::default();

        // 15 MiB is not smaller than the file, the synthesized size is 5 MiB.
        assert_eq!(
            verifier.candidate_part_sizes(10 * MIB, 2),
            vec![8 * MIB, 5 * MIB]
        );

        // 8 MiB would need 13 parts; the synthesized size duplicates 15 MiB.
        assert_eq!(verifier.candidate_part_sizes(100 * MIB, 7), vec![15 * MIB]);

        // Nothing is smaller than an empty file.
        assert!(verifier.candidate_part_sizes(0, 1).is_empty());
    }

    #[test]
    fn max_candidates_bounds_the_search() {
        let verifier = EtagVerifier::default().with_max_candidates(1);
        assert_eq!(verifier.candidate_part_sizes(10 * MIB, 2), vec![8 * MIB]);
    }

    #[test]
    fn whole_file_md5_matches_hello_world() {
        let dir = scratch_dir("hello");
        let path = dir.join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        assert_eq!(
            file_md5(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );

        let verifier = EtagVerifier::default();
        assert_eq!(
            verifier
                .verify(&path, "5eb63bbbe01eeed093cb22bb8f5acdc3")
                .unwrap(),
            Verification::Match { part_size: None }
        );
        assert!(
            verifier
                .etag_is_valid(&path, "\"5EB63BBBE01EEED093CB22BB8F5ACDC3\"")
                .unwrap()
        );
        assert_eq!(
            verifier
                .verify(&path, "d41d8cd98f00b204e9800998ecf8427e")
                .unwrap(),
            Verification::Mismatch
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn multipart_etag_matches_in_memory_computation() {
        let dir = scratch_dir("multipart_formula");
        let data = pattern(3 * MIB + 4321);
        let path = dir.join("data.bin");
        std::fs::write(&path, &data).unwrap();

        assert_eq!(
            multipart_etag(&path, MIB).unwrap(),
            expected_multipart(&data, MIB)
        );
        assert!(multipart_etag(&path, MIB).unwrap().ends_with("-4"));
        assert!(matches!(
            multipart_etag(&path, 0),
            Err(EtagError::InvalidPartSize)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn ten_mib_file_verifies_with_eight_mib_parts_first() {
        let dir = scratch_dir("ten_mib");
        let data = pattern(10 * MIB);
        let path = dir.join("ten.bin");
        std::fs::write(&path, &data).unwrap();

        let etag = expected_multipart(&data, 8 * MIB);
        assert!(etag.ends_with("-2"));

        let verifier = EtagVerifier::default();
        assert_eq!(verifier.candidate_part_sizes(10 * MIB, 2)[0], 8 * MIB);
        assert_eq!(
            verifier.verify(&path, &etag).unwrap(),
            Verification::Match {
                part_size: Some(8 * MIB)
            }
        );

        // Uploaded in 5 MiB parts: only the synthesized candidate matches.
        let etag = expected_multipart(&data, 5 * MIB);
        assert_eq!(
            verifier.verify(&path, &etag).unwrap(),
            Verification::Match {
                part_size: Some(5 * MIB)
            }
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn configured_upload_part_size_is_tried() {
        let dir = scratch_dir("upload_part_size");
        let data = pattern(7 * MIB);
        let path = dir.join("seven.bin");
        std::fs::write(&path, &data).unwrap();

        let etag = expected_multipart(&data, 3 * MIB);
        let verifier = EtagVerifier::new(3 * MIB);
        assert_eq!(
            verifier.verify(&path, &etag).unwrap(),
            Verification::Match {
                part_size: Some(3 * MIB)
            }
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unmatched_multipart_etag_is_inconclusive() {
        let dir = scratch_dir("inconclusive");
        let data = pattern(10 * MIB);
        let path = dir.join("ten.bin");
        std::fs::write(&path, &data).unwrap();

        // Uploaded with 6 MiB parts, which no candidate reproduces.
        let etag = expected_multipart(&data, 6 * MIB);
        let verifier = EtagVerifier::default();
        assert_eq!(
            verifier.verify(&path, &etag).unwrap(),
            Verification::Inconclusive {
                tried: vec![8 * MIB, 5 * MIB]
            }
        );
        assert!(!verifier.etag_is_valid(&path, &etag).unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join("ostore_etag_missing").join("nope.bin");
        let verifier = EtagVerifier::default();

        let err = verifier
            .verify(&path, "5eb63bbbe01eeed093cb22bb8f5acdc3")
            .unwrap_err();
        assert!(matches!(err, EtagError::Io { .. }));

        let err = verifier
            .verify(&path, "5eb63bbbe01eeed093cb22bb8f5acdc3-2")
            .unwrap_err();
        assert!(matches!(err, EtagError::Io { .. }));
    }
}
