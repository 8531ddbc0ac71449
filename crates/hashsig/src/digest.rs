//! Content hashing and line-ending canonicalization.
//!
//! Text files checked out on different platforms differ only by `\r` bytes.
//! Stripping them before hashing gives every checkout the same digest. Files
//! whose extension is in the [`EolPolicy`] deny-list are hashed byte-exact.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::{HashsigError, HashsigResult};

/// Hash algorithm used for file and body digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Name as written in the manifest `hashalg` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha224 => 56,
            Self::Sha256 => 64,
            Self::Sha384 => 96,
            Self::Sha512 => 128,
        }
    }

    /// Hex digest of in-memory bytes.
    pub fn hash_hex(&self, bytes: &[u8]) -> String {
        match self {
            Self::Sha224 => hex::encode(Sha224::digest(bytes)),
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
            Self::Sha384 => hex::encode(Sha384::digest(bytes)),
            Self::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashsigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(HashsigError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compute the hex digest of `bytes` with the named algorithm.
pub fn compute_hash(bytes: &[u8], algorithm: &str) -> HashsigResult<String> {
    let alg: HashAlgorithm = algorithm.parse()?;
    Ok(alg.hash_hex(bytes))
}

/// Extensions hashed byte-exact by default. The empty string stands for
/// files without an extension.
pub const DEFAULT_BINARY_EXTENSIONS: &[&str] =
    &["exe", "jpg", "jpeg", "png", "gif", "ico", "bin", ""];

/// Which files get their `\r` bytes stripped before hashing and writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EolPolicy {
    binary_extensions: Vec<String>,
}

impl Default for EolPolicy {
    fn default() -> Self {
        Self {
            binary_extensions: DEFAULT_BINARY_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl EolPolicy {
    /// Policy with a custom deny-list (extensions without the dot).
    pub fn with_binary_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            binary_extensions: extensions
                .into_iter()
                .map(|e| e.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether files with this extension are hashed byte-exact.
    pub fn is_binary(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.binary_extensions.iter().any(|b| *b == ext)
    }

    /// Canonicalize `bytes` for a file with the given extension.
    pub fn canonicalize<'a>(&self, bytes: &'a [u8], extension: &str) -> Cow<'a, [u8]> {
        if self.is_binary(extension) {
            return Cow::Borrowed(bytes);
        }
        strip_carriage_returns(bytes)
    }

    /// Canonicalize using the extension of a `/`-separated file name.
    pub fn canonicalize_for<'a>(&self, bytes: &'a [u8], file_name: &str) -> Cow<'a, [u8]> {
        self.canonicalize(bytes, file_extension(file_name))
    }
}

/// Remove every `\r` byte. Borrows when there is none.
pub fn strip_carriage_returns(bytes: &[u8]) -> Cow<'_, [u8]> {
    if bytes.contains(&b'\r') {
        Cow::Owned(bytes.iter().copied().filter(|b| *b != b'\r').collect())
    } else {
        Cow::Borrowed(bytes)
    }
}

/// Extension of the last path component, without the dot. Empty when there
/// is none (dotfiles like `.hidden` have no extension).
pub fn file_extension(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(i) => &base[i + 1..],
    }
}
