//! Signed manifest format.
//!
//! ```text
//! hashsig: <hexdigest> ~ filescnt: <n> ~ hashalg: <name> ~ signalg: ed25519 ~ pubkey: <base64> ~ signature: <base64>
//! <relpath1>: <hexhash1> <size1>
//! <relpath2>: <hexhash2> <size2>
//! ```
//!
//! The digest is computed over the body (all lines after the header, joined
//! with `\n`, without the trailing newline). The signature covers the hex
//! digest string, not the raw digest bytes.
//!
//! The unsigned form starts with the literal header `hashsig: list` and lists
//! bare relative names. It carries no trust guarantee.

use std::path::{Path, PathBuf};

use crate::digest::HashAlgorithm;

mod line;
mod parse;
mod write;

pub use line::{decode_line, encode_line};
pub use parse::VerifyOptions;
pub use write::ManifestBuilder;

/// Extension of manifest files.
pub const MANIFEST_EXT: &str = ".hashsig";

/// Literal header of unsigned list manifests.
pub const LIST_HEADER: &str = "hashsig: list";

/// The only supported signature algorithm.
pub const SIGN_ALG: &str = "ed25519";

/// Signed manifest header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHeader {
    /// Hex digest of the body.
    pub hashsig: String,

    /// Informational file count.
    pub filescnt: Option<u64>,

    /// Algorithm used for body and file digests.
    pub hashalg: HashAlgorithm,

    /// Raw public key bytes of the signer.
    pub pubkey: Vec<u8>,

    /// Raw signature bytes over `hashsig`.
    pub signature: Vec<u8>,

    /// All `key: value` pairs in header order, including unknown keys.
    pub fields: Vec<(String, String)>,
}

/// One listed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the package root, `/`-separated, never containing `:`.
    pub short_name: String,

    /// Expected hex digest. Empty for list manifests.
    pub hash_hex: String,

    /// Expected size in bytes.
    pub size: u64,
}

impl ManifestEntry {
    pub fn new(short_name: impl Into<String>, hash_hex: impl Into<String>, size: u64) -> Self {
        Self {
            short_name: short_name.into(),
            hash_hex: hash_hex.into(),
            size,
        }
    }

    /// Entry of an unsigned list manifest.
    pub fn unhashed(short_name: impl Into<String>) -> Self {
        Self::new(short_name, String::new(), 0)
    }

    /// Whether the entry carries a hash to check against.
    pub fn has_hash(&self) -> bool {
        !self.hash_hex.is_empty()
    }

    /// Manifest line for this entry.
    pub fn to_line(&self) -> String {
        encode_line(&self.short_name, &self.hash_hex, self.size)
    }

    /// Location of the described file under `root`.
    pub fn absolute_path(&self, root: &Path) -> PathBuf {
        self.short_name
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(root.to_path_buf(), |path, part| path.join(part))
    }
}

/// Signed or unsigned manifest form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestKind {
    /// `hashsig: list` header; no hashes, no signature.
    List,

    /// Signed header.
    Signed(ManifestHeader),
}

/// A parsed manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub kind: ManifestKind,

    /// Entries in manifest order.
    pub entries: Vec<ManifestEntry>,

    /// Body text the digest was computed over.
    pub body: String,

    /// Public key whose signature was verified. `None` for list manifests or
    /// when signature checking was skipped.
    pub verified_key: Option<Vec<u8>>,
}

impl Manifest {
    /// Whether this is an unsigned list manifest.
    pub fn is_list(&self) -> bool {
        matches!(self.kind, ManifestKind::List)
    }

    /// Signed header, if any.
    pub fn header(&self) -> Option<&ManifestHeader> {
        match &self.kind {
            ManifestKind::Signed(header) => Some(header),
            ManifestKind::List => None,
        }
    }

    /// Hash algorithm of the manifest (default for list manifests).
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.header().map(|h| h.hashalg).unwrap_or_default()
    }

    /// Look up an entry by short name.
    pub fn entry(&self, short_name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.short_name == short_name)
    }

    /// Build an unsigned list manifest from names.
    pub fn list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<ManifestEntry> = names.into_iter().map(ManifestEntry::unhashed).collect();
        let body = entries
            .iter()
            .map(|e| e.short_name.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            kind: ManifestKind::List,
            entries,
            body,
            verified_key: None,
        }
    }

    /// Text form of an unsigned list manifest.
    pub fn to_list_text(&self) -> String {
        let mut out = String::from(LIST_HEADER);
        for entry in &self.entries {
            out.push('\n');
            out.push_str(&entry.short_name);
        }
        out.push('\n');
        out
    }
}
