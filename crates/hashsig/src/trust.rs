//! Trusted signing keys.
//!
//! A [`TrustedKeySet`] is supplied by the caller at retrieval time. When it is
//! enforcing, a manifest whose signing key matches none of its keys, and is
//! not approved by the attached [`TrustStore`], is rejected before any file is
//! fetched.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{HashsigError, HashsigResult};

/// Raw Ed25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// External trust decision, consulted when no supplied key matches.
pub trait TrustStore: Send + Sync {
    fn is_trusted(&self, public_key: &[u8]) -> bool;
}

/// Caller-supplied allow-list of public keys.
#[derive(Clone, Default)]
pub struct TrustedKeySet {
    keys: Vec<Vec<u8>>,
    store: Option<Arc<dyn TrustStore>>,
}

impl fmt::Debug for TrustedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedKeySet")
            .field(
                "keys",
                &self.keys.iter().map(|k| encode_public_key(k)).collect::<Vec<_>>(),
            )
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl TrustedKeySet {
    /// Empty, non-enforcing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set from hex (64 chars) or base64 encoded keys.
    pub fn from_encoded<I, S>(keys: I) -> HashsigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for key in keys {
            set.add_encoded(key.as_ref())?;
        }
        Ok(set)
    }

    /// Add a raw key.
    pub fn add_raw(&mut self, key: impl Into<Vec<u8>>) {
        let key = key.into();
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    /// Add an encoded key.
    pub fn add_encoded(&mut self, key: &str) -> HashsigResult<()> {
        let raw = decode_public_key(key)?;
        self.add_raw(raw);
        Ok(())
    }

    /// Attach an external trust store.
    pub fn with_store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add the keys of `other`. Its store is taken when this set has none.
    pub fn merge(mut self, other: &TrustedKeySet) -> Self {
        for key in &other.keys {
            self.add_raw(key.clone());
        }
        if self.store.is_none() {
            self.store = other.store.clone();
        }
        self
    }

    /// Number of explicitly supplied keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether trust is enforced at all. A set without keys and without a
    /// store accepts any correctly signed manifest.
    pub fn is_enforcing(&self) -> bool {
        !self.keys.is_empty() || self.store.is_some()
    }

    /// Whether `public_key` is allowed.
    pub fn allows(&self, public_key: &[u8]) -> bool {
        if !self.is_enforcing() {
            return true;
        }
        if self.keys.iter().any(|k| k.as_slice() == public_key) {
            return true;
        }
        self.store
            .as_ref()
            .map(|store| store.is_trusted(public_key))
            .unwrap_or(false)
    }

    /// Fail closed when `public_key` is not allowed.
    pub fn check(&self, public_key: &[u8]) -> HashsigResult<()> {
        if self.allows(public_key) {
            Ok(())
        } else {
            Err(HashsigError::UntrustedKey {
                key: encode_public_key(public_key),
            })
        }
    }
}

/// In-memory trust store.
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: RwLock<HashSet<Vec<u8>>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a key ring file: one hex or base64 key per line, `#` comments.
    pub fn from_file(path: &Path) -> HashsigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HashsigError::io(format!("failed to read key ring {}", path.display()), e)
        })?;
        Self::parse(&content)
    }

    /// Parse key ring text.
    pub fn parse(content: &str) -> HashsigResult<Self> {
        let ring = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            ring.add(decode_public_key(line)?);
        }
        Ok(ring)
    }

    pub fn add(&self, key: Vec<u8>) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key);
        }
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        match self.keys.write() {
            Ok(mut keys) => keys.remove(key),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrustStore for KeyRing {
    fn is_trusted(&self, public_key: &[u8]) -> bool {
        // A poisoned lock trusts nothing.
        self.keys
            .read()
            .map(|keys| keys.contains(public_key))
            .unwrap_or(false)
    }
}

/// Decode a public key given as 64 hex chars or base64 of 32 raw bytes.
pub fn decode_public_key(encoded: &str) -> HashsigResult<Vec<u8>> {
    let encoded = encoded.trim();

    let is_hex =
        encoded.len() == PUBLIC_KEY_LEN * 2 && encoded.bytes().all(|b| b.is_ascii_hexdigit());

    let raw = if is_hex {
        hex::decode(encoded).map_err(|e| HashsigError::Config {
            message: format!("invalid hex public key: {}", e),
        })?
    } else {
        BASE64.decode(encoded).map_err(|e| HashsigError::Config {
            message: format!("invalid base64 public key: {}", e),
        })?
    };

    if raw.len() != PUBLIC_KEY_LEN {
        return Err(HashsigError::Config {
            message: format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LEN,
                raw.len()
            ),
        });
    }
    Ok(raw)
}

/// Base64 form of a raw public key (as written in manifests).
pub fn encode_public_key(public_key: &[u8]) -> String {
    BASE64.encode(public_key)
}
