/// Result of a sync run: what happened to each local file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Files uploaded.
    pub uploaded: u64,
    /// Files left alone because the remote already had them.
    pub skipped: u64,
    /// Files whose remote copy could not be confirmed or refuted (multipart
    /// `ETag` with an unknown part size). Left in place.
    pub unverified: u64,
    /// Local files removed after upload or verification.
    pub deleted_local: u64,
}

impl SyncStats {
    /// Merge another stats into this one.
    pub const fn merge(&mut self, other: Self) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.unverified += other.unverified;
        self.deleted_local += other.deleted_local;
    }

    /// Total number of files considered.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.uploaded + self.skipped + self.unverified
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} uploaded, {} skipped (unchanged), {} unverified, {} deleted locally",
            self.uploaded, self.skipped, self.unverified, self.deleted_local
        )
    }
}
