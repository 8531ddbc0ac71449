//! Manifest parsing and verification.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::debug;

use crate::digest::HashAlgorithm;
use crate::error::{HashsigError, HashsigResult};
use crate::signer::{verify_ed25519, Signer, MIN_SIGNATURE_LEN};
use crate::trust::{encode_public_key, TrustedKeySet, PUBLIC_KEY_LEN};

use super::{
    decode_line, Manifest, ManifestEntry, ManifestHeader, ManifestKind, LIST_HEADER, SIGN_ALG,
};

/// Minimum number of `~`-separated header segments.
const MIN_HEADER_SEGMENTS: usize = 5;

/// Verification options.
#[derive(Clone, Default)]
pub struct VerifyOptions {
    /// Skip the body digest check.
    pub skip_hash: bool,

    /// Skip signature verification.
    pub skip_signature: bool,

    /// Key object used for verification instead of the built-in verifier.
    pub verifier: Option<Arc<dyn Signer>>,
}

impl std::fmt::Debug for VerifyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyOptions")
            .field("skip_hash", &self.skip_hash)
            .field("skip_signature", &self.skip_signature)
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

impl VerifyOptions {
    /// Skip the body digest check.
    pub fn skip_hash(mut self) -> Self {
        self.skip_hash = true;
        self
    }

    /// Skip signature verification.
    pub fn skip_signature(mut self) -> Self {
        self.skip_signature = true;
        self
    }

    /// Verify with this key object.
    pub fn with_verifier(mut self, verifier: Arc<dyn Signer>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// No integrity checks at all; used when diffing a manifest that is about
    /// to be rewritten.
    pub fn unchecked() -> Self {
        Self::default().skip_hash().skip_signature()
    }
}

impl Manifest {
    /// Parse and verify manifest text.
    ///
    /// # Verification Steps
    ///
    /// 1. Canonicalize line endings, split header from body
    /// 2. Unsigned `hashsig: list` is rejected when `trusted` is enforcing
    /// 3. Recompute the body digest with `hashalg`
    /// 4. Decode public key and signature
    /// 5. Check the key against `trusted`
    /// 6. Verify the Ed25519 signature over the hex digest
    pub fn parse(
        text: &str,
        trusted: &TrustedKeySet,
        options: &VerifyOptions,
    ) -> HashsigResult<Self> {
        let text = canonical_newlines(text);
        let (header_line, rest) = match text.find('\n') {
            Some(pos) => (&text[..pos], &text[pos + 1..]),
            None => (text.as_str(), ""),
        };

        if header_line.trim() == LIST_HEADER {
            if trusted.is_enforcing() {
                return Err(HashsigError::UntrustedKey {
                    key: "unsigned list manifest".to_string(),
                });
            }
            return Ok(parse_list_body(rest));
        }

        let fields = parse_header_fields(header_line)?;
        let body = rest.trim();

        let mut hashsig = None;
        let mut filescnt = None;
        let mut hashalg = HashAlgorithm::default();
        let mut pubkey_b64 = None;
        let mut signature_b64 = None;

        for (key, value) in &fields {
            match key.as_str() {
                "hashsig" => hashsig = Some(value.clone()),
                "filescnt" => filescnt = value.parse().ok(),
                "hashalg" => hashalg = value.parse()?,
                "signalg" => {
                    if value != SIGN_ALG {
                        return Err(HashsigError::UnsupportedAlgorithm {
                            algorithm: value.clone(),
                        });
                    }
                }
                "pubkey" => pubkey_b64 = Some(value.clone()),
                "signature" => signature_b64 = Some(value.clone()),
                _ => {}
            }
        }

        let hashsig = hashsig
            .filter(|h| !h.is_empty())
            .ok_or_else(|| HashsigError::MalformedManifest {
                reason: "missing hashsig".to_string(),
            })?;

        if !options.skip_hash {
            let actual = hashalg.hash_hex(body.as_bytes());
            if actual != hashsig {
                return Err(HashsigError::HashMismatch {
                    expected: hashsig,
                    actual,
                });
            }
        }

        let pubkey = decode_field("pubkey", pubkey_b64.as_deref(), PUBLIC_KEY_LEN)?;
        let signature = decode_field("signature", signature_b64.as_deref(), MIN_SIGNATURE_LEN)?;

        trusted.check(&pubkey)?;

        let mut verified_key = None;
        if !options.skip_signature {
            let ok = match &options.verifier {
                Some(verifier) => verifier.verify(&signature, &hashsig, &pubkey),
                None => verify_ed25519(&signature, &hashsig, &pubkey),
            };
            if !ok {
                return Err(HashsigError::InvalidSignature {
                    reason: format!(
                        "ed25519 verification failed for key {}",
                        encode_public_key(&pubkey)
                    ),
                });
            }
            verified_key = Some(pubkey.clone());
        }

        let entries = parse_signed_body(body);
        debug!(entries = entries.len(), hashalg = %hashalg, "parsed signed manifest");

        Ok(Self {
            kind: ManifestKind::Signed(ManifestHeader {
                hashsig,
                filescnt,
                hashalg,
                pubkey,
                signature,
                fields,
            }),
            entries,
            body: body.to_string(),
            verified_key,
        })
    }

    /// Parse without trust or integrity checks.
    pub fn parse_unchecked(text: &str) -> HashsigResult<Self> {
        Self::parse(text, &TrustedKeySet::new(), &VerifyOptions::unchecked())
    }
}

/// `\r\n` and lone `\r` become `\n`.
fn canonical_newlines(text: &str) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text.to_string()
    }
}

fn parse_header_fields(header_line: &str) -> HashsigResult<Vec<(String, String)>> {
    let segments: Vec<&str> = header_line.split('~').collect();
    if segments.len() < MIN_HEADER_SEGMENTS {
        return Err(HashsigError::MalformedManifest {
            reason: format!(
                "header has {} segments, expected at least {}",
                segments.len(),
                MIN_HEADER_SEGMENTS
            ),
        });
    }

    let fields = segments
        .iter()
        .filter_map(|segment| match segment.find(':') {
            Some(i) if i > 0 => Some((
                segment[..i].trim().to_string(),
                segment[i + 1..].trim().to_string(),
            )),
            _ => None,
        })
        .collect();
    Ok(fields)
}

fn decode_field(name: &str, value: Option<&str>, min_len: usize) -> HashsigResult<Vec<u8>> {
    let value = value.ok_or_else(|| HashsigError::MalformedManifest {
        reason: format!("missing {}", name),
    })?;
    let bytes = BASE64
        .decode(value)
        .map_err(|e| HashsigError::MalformedManifest {
            reason: format!("invalid base64 {}: {}", name, e),
        })?;
    if bytes.len() < min_len {
        return Err(HashsigError::MalformedManifest {
            reason: format!(
                "{} too short: {} bytes, expected at least {}",
                name,
                bytes.len(),
                min_len
            ),
        });
    }
    Ok(bytes)
}

fn parse_signed_body(body: &str) -> Vec<ManifestEntry> {
    let entries = body.split('\n').filter_map(|line| {
        let (name, hash, size) = decode_line(line)?;
        let size = size.split_whitespace().next()?.parse().ok()?;
        Some(ManifestEntry::new(name, hash, size))
    });
    last_line_wins(entries)
}

/// One entry per short name. A repeated name keeps its first position and
/// takes the values of its last line.
fn last_line_wins(entries: impl Iterator<Item = ManifestEntry>) -> Vec<ManifestEntry> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<ManifestEntry> = Vec::new();
    for entry in entries {
        match positions.get(&entry.short_name) {
            Some(&i) => out[i] = entry,
            None => {
                positions.insert(entry.short_name.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out
}

fn parse_list_body(body: &str) -> Manifest {
    let mut seen = HashSet::new();
    let names = body.split('\n').filter_map(|line| {
        let name = match line.find(':') {
            Some(i) => &line[..i],
            None => line,
        };
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    });
    Manifest::list(names.filter(|name| seen.insert(name.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;
    use crate::signer::Ed25519Signer;

    fn signed_text(signer: &Ed25519Signer) -> String {
        let mut builder = ManifestBuilder::new(HashAlgorithm::Sha256);
        builder.push(ManifestEntry::new(
            "a.txt",
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            0,
        ));
        builder.push(ManifestEntry::new("dir/b.txt", "abcd", 4));
        builder.sign(signer).unwrap()
    }

    #[test]
    fn test_parse_signed_manifest() {
        let signer = Ed25519Signer::generate();
        let text = signed_text(&signer);

        let manifest =
            Manifest::parse(&text, &TrustedKeySet::new(), &VerifyOptions::default()).unwrap();

        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[1].short_name, "dir/b.txt");
        assert_eq!(manifest.entries[1].size, 4);
        assert_eq!(manifest.verified_key.as_deref(), Some(signer.public_key_bytes()));
        assert_eq!(manifest.header().unwrap().filescnt, Some(2));
    }

    #[test]
    fn test_crlf_manifest_still_verifies() {
        let signer = Ed25519Signer::generate();
        let text = signed_text(&signer).replace('\n', "\r\n");

        let manifest =
            Manifest::parse(&text, &TrustedKeySet::new(), &VerifyOptions::default()).unwrap();
        assert_eq!(manifest.entries.len(), 2);
    }

    #[test]
    fn test_body_tamper_is_hash_mismatch() {
        let signer = Ed25519Signer::generate();
        let text = signed_text(&signer).replace("abcd 4", "abce 4");

        let result = Manifest::parse(&text, &TrustedKeySet::new(), &VerifyOptions::default());
        assert!(matches!(result, Err(HashsigError::HashMismatch { .. })));

        // The signature covers the header digest, not the body.
        let options = VerifyOptions::default().skip_hash();
        let manifest = Manifest::parse(&text, &TrustedKeySet::new(), &options).unwrap();
        assert_eq!(manifest.entries[1].hash_hex, "abce");
    }

    #[test]
    fn test_signature_tamper_is_invalid_signature() {
        let signer = Ed25519Signer::generate();
        let text = signed_text(&signer);

        let header = text.lines().next().unwrap();
        let sig_b64 = header.rsplit("signature: ").next().unwrap();
        let mut sig = BASE64.decode(sig_b64).unwrap();
        sig[10] ^= 0x01;
        let tampered = text.replace(sig_b64, &BASE64.encode(&sig));

        let result = Manifest::parse(&tampered, &TrustedKeySet::new(), &VerifyOptions::default());
        assert!(matches!(result, Err(HashsigError::InvalidSignature { .. })));
    }

    #[test]
    fn test_untrusted_key_checked_before_signature() {
        let signer = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let text = signed_text(&signer);

        let mut trusted = TrustedKeySet::new();
        trusted.add_raw(other.public_key_bytes().to_vec());

        let result = Manifest::parse(&text, &trusted, &VerifyOptions::default());
        assert!(matches!(result, Err(HashsigError::UntrustedKey { .. })));

        let mut trusted = TrustedKeySet::new();
        trusted.add_raw(signer.public_key_bytes().to_vec());
        assert!(Manifest::parse(&text, &trusted, &VerifyOptions::default()).is_ok());
    }

    #[test]
    fn test_short_header_is_malformed() {
        let text = "hashsig: abc ~ filescnt: 1\na: b 1\n";
        let result = Manifest::parse(text, &TrustedKeySet::new(), &VerifyOptions::default());
        assert!(matches!(result, Err(HashsigError::MalformedManifest { .. })));
    }

    #[test]
    fn test_foreign_signalg_rejected() {
        let text = concat!(
            "hashsig: abc ~ filescnt: 0 ~ hashalg: sha256 ~ ",
            "signalg: rsa ~ pubkey: x ~ signature: y\n"
        );
        let result = Manifest::parse(text, &TrustedKeySet::new(), &VerifyOptions::default());
        assert!(matches!(
            result,
            Err(HashsigError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn test_list_manifest() {
        let text = "hashsig: list\na.txt\ndir/b.txt: ignored\n\n";
        let manifest =
            Manifest::parse(text, &TrustedKeySet::new(), &VerifyOptions::default()).unwrap();
        assert!(manifest.is_list());
        let names: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| e.short_name.as_str())
            .collect();
        assert_eq!(names, ["a.txt", "dir/b.txt"]);
        assert!(manifest.verified_key.is_none());
    }

    #[test]
    fn test_list_manifest_rejected_with_trusted_keys() {
        let mut trusted = TrustedKeySet::new();
        trusted.add_raw(vec![1u8; 32]);
        let result =
            Manifest::parse("hashsig: list\na.txt\n", &trusted, &VerifyOptions::default());
        assert!(matches!(result, Err(HashsigError::UntrustedKey { .. })));
    }

    #[test]
    fn test_malformed_body_lines_skipped() {
        let signer = Ed25519Signer::generate();
        let mut builder = ManifestBuilder::new(HashAlgorithm::Sha256);
        builder.push_line("garbage line without separator");
        builder.push(ManifestEntry::new("ok.txt", "ab", 1));
        builder.push_line("bad.txt: ab notanumber");
        let text = builder.sign(&signer).unwrap();

        let manifest =
            Manifest::parse(&text, &TrustedKeySet::new(), &VerifyOptions::default()).unwrap();
        assert_eq!(manifest.entries, vec![ManifestEntry::new("ok.txt", "ab", 1)]);
    }

    #[test]
    fn test_repeated_name_takes_last_line() {
        let signer = Ed25519Signer::generate();
        let mut builder = ManifestBuilder::new(HashAlgorithm::Sha256);
        builder.push(ManifestEntry::new("a.txt", "aa", 1));
        builder.push(ManifestEntry::new("b.txt", "bb", 2));
        builder.push(ManifestEntry::new("a.txt", "cc", 3));
        let text = builder.sign(&signer).unwrap();

        let manifest =
            Manifest::parse(&text, &TrustedKeySet::new(), &VerifyOptions::default()).unwrap();
        assert_eq!(
            manifest.entries,
            vec![ManifestEntry::new("a.txt", "cc", 3), ManifestEntry::new("b.txt", "bb", 2)]
        );

        let list = Manifest::parse(
            "hashsig: list\na.txt\nb.txt\na.txt: again\n",
            &TrustedKeySet::new(),
            &VerifyOptions::default(),
        )
        .unwrap();
        assert_eq!(list.entries.len(), 2);
    }
}
