//! Error types for manifest handling, retrieval and building.

/// Hashsig errors.
///
/// Manifest-level integrity failures are always returned as errors. Per-file
/// fetch failures during retrieval are not: they are collected in
/// [`crate::RetrievalResult`].
#[derive(Debug, thiserror::Error)]
pub enum HashsigError {
    /// Header or body is structurally invalid.
    #[error("malformed manifest: {reason}")]
    MalformedManifest { reason: String },

    /// Manifest body digest does not match the signed digest.
    #[error("manifest hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Signing key is not in the allowed set.
    #[error("key not trusted: {key}")]
    UntrustedKey { key: String },

    /// Signature verification failed.
    #[error("signature verification failed: {reason}")]
    InvalidSignature { reason: String },

    /// Hash or signature algorithm is not available.
    #[error("unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Scan found more files than allowed.
    #[error("too many files: {count} (max {max})")]
    TooManyFiles { count: usize, max: usize },

    /// Provided entries disagree with the files on disk.
    #[error("files do not match the provided entries: {}", changed.join(", "))]
    ManifestDrift { changed: Vec<String> },

    /// Archive mode was required but the reference is not a zip.
    #[error("zip archive required: {reference}")]
    ZipRequired { reference: String },

    /// Manifest reference could not be parsed.
    #[error("invalid manifest reference: {reference} - {reason}")]
    InvalidReference { reference: String, reason: String },

    /// A file name contains the reserved `:` separator.
    #[error("illegal character ':' in file name {name}")]
    ReservedCharacter { name: String },

    /// Signing was requested without a capable signer.
    #[error("signer unavailable: {reason}")]
    SignerUnavailable { reason: String },

    /// Zip archive could not be read or written.
    #[error("archive error: {message}")]
    Archive { message: String },

    /// Filesystem error.
    #[error("io error: {message}")]
    Io { message: String },

    /// Network error.
    #[error("network error: {message}")]
    Network { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl HashsigError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 1,
            Self::InvalidReference { .. } => 1,
            Self::ZipRequired { .. } => 1,
            Self::SignerUnavailable { .. } => 1,

            Self::MalformedManifest { .. } => 4,
            Self::HashMismatch { .. } => 4,
            Self::UntrustedKey { .. } => 4,
            Self::InvalidSignature { .. } => 4,
            Self::ManifestDrift { .. } => 4,
            Self::UnsupportedAlgorithm { .. } => 4,

            Self::Io { .. } => 5,
            Self::Network { .. } => 5,

            Self::Archive { .. } => 6,

            Self::TooManyFiles { .. } => 7,
            Self::ReservedCharacter { .. } => 7,
        }
    }

    /// Whether the error is a trust or integrity failure.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::HashMismatch { .. }
                | Self::UntrustedKey { .. }
                | Self::InvalidSignature { .. }
                | Self::ManifestDrift { .. }
        )
    }

    pub(crate) fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{}: {}", context, err),
        }
    }
}

impl From<std::io::Error> for HashsigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for HashsigError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for HashsigError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive {
            message: err.to_string(),
        }
    }
}

/// Result type for hashsig operations.
pub type HashsigResult<T> = Result<T, HashsigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_failures_share_exit_code() {
        let errors = [
            HashsigError::HashMismatch {
                expected: "a".into(),
                actual: "b".into(),
            },
            HashsigError::UntrustedKey { key: "k".into() },
            HashsigError::InvalidSignature {
                reason: "bad".into(),
            },
            HashsigError::ManifestDrift {
                changed: vec!["a.txt".into()],
            },
        ];
        for err in &errors {
            assert!(err.is_integrity_failure());
            assert_eq!(err.exit_code(), 4);
        }
    }

    #[test]
    fn test_drift_message_lists_files() {
        let err = HashsigError::ManifestDrift {
            changed: vec!["a.txt".into(), "dir/b.txt".into()],
        };
        assert_eq!(
            err.to_string(),
            "files do not match the provided entries: a.txt, dir/b.txt"
        );
    }
}
