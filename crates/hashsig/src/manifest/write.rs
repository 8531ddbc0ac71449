//! Manifest serialization and signing.

use crate::digest::HashAlgorithm;
use crate::error::{HashsigError, HashsigResult};
use crate::signer::{Signer, MIN_SIGNATURE_LEN};
use crate::trust::{encode_public_key, PUBLIC_KEY_LEN};

use super::{ManifestEntry, SIGN_ALG};

/// Accumulates body lines in order and emits the signed manifest text.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    hash_alg: HashAlgorithm,
    lines: Vec<String>,
}

impl ManifestBuilder {
    pub fn new(hash_alg: HashAlgorithm) -> Self {
        Self {
            hash_alg,
            lines: Vec::new(),
        }
    }

    /// Builder pre-filled with `entries`.
    pub fn from_entries<'a, I>(hash_alg: HashAlgorithm, entries: I) -> Self
    where
        I: IntoIterator<Item = &'a ManifestEntry>,
    {
        let mut builder = Self::new(hash_alg);
        for entry in entries {
            builder.push(entry.clone());
        }
        builder
    }

    /// Append an entry.
    pub fn push(&mut self, entry: ManifestEntry) -> &mut Self {
        self.lines.push(entry.to_line());
        self
    }

    /// Append an already encoded line.
    pub fn push_line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Body text (lines joined by `\n`, no trailing newline).
    pub fn body(&self) -> String {
        self.lines.join("\n")
    }

    /// Hex digest of the body.
    pub fn digest(&self) -> String {
        self.hash_alg.hash_hex(self.body().as_bytes())
    }

    /// Sign the body digest and return the full manifest text.
    ///
    /// The header key order and the ` ~ ` separator are part of the format.
    pub fn sign(&self, signer: &dyn Signer) -> HashsigResult<String> {
        if !signer.can_sign() {
            return Err(HashsigError::SignerUnavailable {
                reason: "key object with signing capability required".to_string(),
            });
        }

        let pubkey = signer.public_key_bytes();
        if pubkey.len() < PUBLIC_KEY_LEN {
            return Err(HashsigError::SignerUnavailable {
                reason: format!("bad public key length {}", pubkey.len()),
            });
        }

        let body = self.body();
        let digest = self.hash_alg.hash_hex(body.as_bytes());

        let signature = signer.sign(&digest)?;
        if signature.len() < MIN_SIGNATURE_LEN {
            return Err(HashsigError::InvalidSignature {
                reason: format!("signer returned {} bytes", signature.len()),
            });
        }

        let header = format!(
            "hashsig: {} ~ filescnt: {} ~ hashalg: {} ~ signalg: {} ~ pubkey: {} ~ signature: {}",
            digest,
            self.lines.len(),
            self.hash_alg.name(),
            SIGN_ALG,
            encode_public_key(pubkey),
            encode_public_key(&signature),
        );

        Ok(format!("{}\n{}\n", header, body))
    }
}
