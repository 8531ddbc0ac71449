//! Signing keys.
//!
//! Manifests are signed with Ed25519 over the hex digest string of the body.
//! [`Signer`] is the seam for key material; [`Ed25519Signer`] is the
//! `ed25519-dalek` implementation with PKCS#8 PEM key files.

use std::fmt;
use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};

use crate::error::{HashsigError, HashsigResult};
use crate::trust::encode_public_key;

/// Minimum raw signature length accepted in manifests.
pub const MIN_SIGNATURE_LEN: usize = 64;

const ENCRYPTED_PEM_LABEL: &str = "BEGIN ENCRYPTED PRIVATE KEY";

/// Key object used to sign and verify manifests.
pub trait Signer: Send + Sync {
    /// Raw public key bytes.
    fn public_key_bytes(&self) -> &[u8];

    /// Whether this object holds a private key.
    fn can_sign(&self) -> bool;

    /// Sign the hex digest string.
    fn sign(&self, digest_hex: &str) -> HashsigResult<Vec<u8>>;

    /// Verify `signature` over `digest_hex` made by `public_key`.
    fn verify(&self, signature: &[u8], digest_hex: &str, public_key: &[u8]) -> bool;
}

/// Ed25519 signer backed by `ed25519-dalek`.
#[derive(Clone)]
pub struct Ed25519Signer {
    public: [u8; 32],
    signing: Option<SigningKey>,
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &encode_public_key(&self.public))
            .field("can_sign", &self.signing.is_some())
            .finish()
    }
}

impl Ed25519Signer {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut rand::thread_rng()))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self {
            public: signing_key.verifying_key().to_bytes(),
            signing: Some(signing_key),
        }
    }

    /// Verify-only signer.
    pub fn from_verifying_key(verifying_key: &VerifyingKey) -> Self {
        Self {
            public: verifying_key.to_bytes(),
            signing: None,
        }
    }

    /// Verify-only signer from raw public key bytes.
    pub fn from_public_key_bytes(public_key: &[u8]) -> HashsigResult<Self> {
        let key = verifying_key_from_bytes(public_key).map_err(|reason| HashsigError::Config {
            message: format!("invalid public key: {}", reason),
        })?;
        Ok(Self::from_verifying_key(&key))
    }

    /// Load a PKCS#8 PEM private key file.
    ///
    /// Encrypted keys (`ENCRYPTED PRIVATE KEY`) need `password`; it is
    /// ignored for plain keys.
    pub fn load_pem(path: &Path, password: Option<&str>) -> HashsigResult<Self> {
        use pkcs8::DecodePrivateKey;

        let pem = fs::read_to_string(path).map_err(|e| {
            HashsigError::io(format!("failed to read private key {}", path.display()), e)
        })?;

        let signing_key = if pem.contains(ENCRYPTED_PEM_LABEL) {
            let password = password.ok_or_else(|| HashsigError::Config {
                message: format!("private key {} is encrypted, password required", path.display()),
            })?;
            SigningKey::from_pkcs8_encrypted_pem(&pem, password)
        } else {
            SigningKey::from_pkcs8_pem(&pem)
        }
        .map_err(|e| HashsigError::Config {
            message: format!("failed to parse private key PEM {}: {}", path.display(), e),
        })?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Write the private key as PKCS#8 PEM (mode 0600 on unix), encrypted
    /// when `password` is set.
    pub fn save_pem(&self, path: &Path, password: Option<&str>) -> HashsigResult<()> {
        use pkcs8::{EncodePrivateKey, LineEnding};

        let signing_key = self.signing.as_ref().ok_or_else(|| HashsigError::SignerUnavailable {
            reason: "no private key to save".to_string(),
        })?;

        let pem = match password {
            Some(password) => signing_key.to_pkcs8_encrypted_pem(
                &mut rand::thread_rng(),
                password,
                LineEnding::LF,
            ),
            None => signing_key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| HashsigError::Config {
            message: format!("failed to encode private key as PKCS#8 PEM: {}", e),
        })?;

        fs::write(path, pem.as_bytes()).map_err(|e| {
            HashsigError::io(format!("failed to write private key {}", path.display()), e)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
                HashsigError::io(format!("failed to set permissions on {}", path.display()), e)
            })?;
        }

        Ok(())
    }

    /// Base64 form of the public key.
    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.public)
    }
}

impl Signer for Ed25519Signer {
    fn public_key_bytes(&self) -> &[u8] {
        &self.public
    }

    fn can_sign(&self) -> bool {
        self.signing.is_some()
    }

    fn sign(&self, digest_hex: &str) -> HashsigResult<Vec<u8>> {
        let signing_key = self.signing.as_ref().ok_or_else(|| HashsigError::SignerUnavailable {
            reason: "key object cannot sign (public key only)".to_string(),
        })?;
        Ok(signing_key.sign(digest_hex.as_bytes()).to_bytes().to_vec())
    }

    fn verify(&self, signature: &[u8], digest_hex: &str, public_key: &[u8]) -> bool {
        verify_ed25519(signature, digest_hex, public_key)
    }
}

/// Verify an Ed25519 signature over `digest_hex` without a key object.
pub fn verify_ed25519(signature: &[u8], digest_hex: &str, public_key: &[u8]) -> bool {
    let Ok(key) = verifying_key_from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(digest_hex.as_bytes(), &signature).is_ok()
}

fn verifying_key_from_bytes(public_key: &[u8]) -> Result<VerifyingKey, String> {
    let bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| format!("expected 32 bytes, got {}", public_key.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sign_and_verify_digest_string() {
        let signer = Ed25519Signer::generate();
        let digest = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

        let sig = signer.sign(digest).unwrap();
        assert_eq!(sig.len(), MIN_SIGNATURE_LEN);
        assert!(signer.verify(&sig, digest, signer.public_key_bytes()));
        assert!(!signer.verify(&sig, "00", signer.public_key_bytes()));
    }

    #[test]
    fn test_verify_only_signer_cannot_sign() {
        let full = Ed25519Signer::generate();
        let public = Ed25519Signer::from_public_key_bytes(full.public_key_bytes()).unwrap();

        assert!(!public.can_sign());
        assert!(matches!(
            public.sign("abc"),
            Err(HashsigError::SignerUnavailable { .. })
        ));

        let sig = full.sign("abc").unwrap();
        assert!(public.verify(&sig, "abc", full.public_key_bytes()));
    }

    #[test]
    fn test_pem_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key.pem");

        let signer = Ed25519Signer::generate();
        signer.save_pem(&path, None).unwrap();
        let loaded = Ed25519Signer::load_pem(&path, None).unwrap();

        assert_eq!(loaded.public_key_bytes(), signer.public_key_bytes());
        assert!(loaded.can_sign());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let signer = Ed25519Signer::generate();
        assert!(!verify_ed25519(&[0u8; 10], "abc", signer.public_key_bytes()));
        assert!(!verify_ed25519(&[0u8; 64], "abc", &[1u8; 5]));
    }

    #[test]
    fn test_encrypted_pem_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key.pem");

        let signer = Ed25519Signer::generate();
        signer.save_pem(&path, Some("hunter2")).unwrap();
        let pem = fs::read_to_string(&path).unwrap();
        assert!(pem.contains(ENCRYPTED_PEM_LABEL));

        let loaded = Ed25519Signer::load_pem(&path, Some("hunter2")).unwrap();
        assert_eq!(loaded.public_key_bytes(), signer.public_key_bytes());

        assert!(matches!(
            Ed25519Signer::load_pem(&path, None),
            Err(HashsigError::Config { .. })
        ));
        assert!(matches!(
            Ed25519Signer::load_pem(&path, Some("wrong")),
            Err(HashsigError::Config { .. })
        ));
    }
}
