//! Environment-driven configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::digest::{EolPolicy, HashAlgorithm, DEFAULT_BINARY_EXTENSIONS};
use crate::error::HashsigResult;

/// Hashsig configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashsigConfig {
    /// PKCS#8 PEM signing key.
    #[serde(default)]
    pub keyfile: Option<PathBuf>,

    /// Password of an encrypted signing key.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Algorithm for new manifests.
    #[serde(default)]
    pub hash_alg: HashAlgorithm,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// File-count ceiling for directory scans.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Files larger than this are left out of a scan.
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,

    /// Extensions hashed byte-exact.
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_files() -> usize {
    100
}

fn default_max_size() -> u64 {
    1024 * 1024
}

fn default_binary_extensions() -> Vec<String> {
    DEFAULT_BINARY_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for HashsigConfig {
    fn default() -> Self {
        Self {
            keyfile: None,
            password: None,
            hash_alg: HashAlgorithm::default(),
            timeout_secs: default_timeout(),
            max_files: default_max_files(),
            max_size_bytes: default_max_size(),
            binary_extensions: default_binary_extensions(),
        }
    }
}

impl HashsigConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `HASHSIG_KEYFILE` | PKCS#8 PEM signing key |
    /// | `HASHSIG_PASSWORD` | Password of an encrypted signing key |
    /// | `HASHSIG_HASH_ALG` | Hash algorithm (default: `sha256`) |
    /// | `HASHSIG_TIMEOUT` | HTTP timeout in seconds (default: 30) |
    /// | `HASHSIG_MAX_FILES` | Scan file-count ceiling (default: 100) |
    /// | `HASHSIG_MAX_SIZE` | Scan file-size ceiling in bytes (default: 1 MiB) |
    pub fn from_env() -> HashsigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> HashsigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let hash_alg = match lookup("HASHSIG_HASH_ALG").filter(|v| !v.trim().is_empty()) {
            Some(name) => name.parse()?,
            None => defaults.hash_alg,
        };

        Ok(Self {
            keyfile: lookup("HASHSIG_KEYFILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            password: lookup("HASHSIG_PASSWORD").filter(|v| !v.is_empty()),
            hash_alg,
            timeout_secs: lookup("HASHSIG_TIMEOUT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_files: lookup("HASHSIG_MAX_FILES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_files),
            max_size_bytes: lookup("HASHSIG_MAX_SIZE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_size_bytes),
            binary_extensions: defaults.binary_extensions,
        })
    }

    /// Set the signing key password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the signing key file.
    pub fn with_keyfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.keyfile = Some(path.into());
        self
    }

    /// Set the hash algorithm.
    pub fn with_hash_alg(mut self, hash_alg: HashAlgorithm) -> Self {
        self.hash_alg = hash_alg;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Line-ending policy for this configuration.
    pub fn eol_policy(&self) -> EolPolicy {
        EolPolicy::with_binary_extensions(self.binary_extensions.iter().cloned())
    }
}
