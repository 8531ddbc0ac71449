//! Subcommands.

pub mod check;
pub mod diff;
pub mod fetch;
pub mod keygen;
pub mod write;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use hashsig::trust::encode_public_key;
use hashsig::{
    Ed25519Signer, HashsigConfig, HashsigError, KeyRing, ManifestTarget, RetrievalResult, Signer,
    TrustedKeySet,
};

use super::args::{Cli, Command};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Some files could not be retrieved.
pub const EXIT_INCOMPLETE: i32 = 3;

pub async fn dispatch(cli: Cli) -> i32 {
    match cli.cmd {
        Command::Keygen(args) => keygen::cmd_keygen(args),
        Command::Write(args) => write::cmd_write(args),
        Command::Check(args) => check::cmd_check(args).await,
        Command::Fetch(args) => fetch::cmd_fetch(args).await,
        Command::Diff(args) => diff::cmd_diff(args),
    }
}

/// Print the error and map it to an exit code.
pub(crate) fn report(err: &anyhow::Error) -> i32 {
    eprintln!("error: {err:#}");
    err.downcast_ref::<HashsigError>()
        .map(HashsigError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}

/// `--key` or `HASHSIG_KEYFILE`.
pub(crate) fn key_path(arg: Option<PathBuf>, config: &HashsigConfig) -> Option<PathBuf> {
    arg.or_else(|| config.keyfile.clone())
}

/// `--password` or `HASHSIG_PASSWORD`.
pub(crate) fn key_password(arg: Option<String>, config: &HashsigConfig) -> Option<String> {
    arg.or_else(|| config.password.clone())
}

pub(crate) fn load_signer(path: &Path, password: Option<&str>) -> Result<Arc<Ed25519Signer>> {
    let signer = Ed25519Signer::load_pem(path, password)
        .with_context(|| format!("failed to load signing key {}", path.display()))?;
    Ok(Arc::new(signer))
}

/// `--trusted-key` values plus an optional key ring file.
pub(crate) fn trusted_keys(keys: &[String], keyring: Option<&Path>) -> Result<TrustedKeySet> {
    let mut trusted = TrustedKeySet::from_encoded(keys)?;
    if let Some(path) = keyring {
        let ring = KeyRing::from_file(path)?;
        trusted = trusted.with_store(Arc::new(ring));
    }
    Ok(trusted)
}

/// Resolve the manifest in `dir`, picking the name from the options sidecar
/// when none is given.
pub(crate) fn resolve_target(dir: &Path, name: Option<&str>) -> Result<ManifestTarget> {
    let detected = match name {
        Some(name) => Some(name.to_string()),
        None => ManifestTarget::detect_name(dir)?,
    };
    Ok(ManifestTarget::resolve(dir, detected.as_deref())?)
}

pub(crate) fn print_signer(result: &RetrievalResult, own: Option<&Ed25519Signer>) {
    match &result.signer_key {
        Some(key) => {
            println!("Public key: {}", encode_public_key(key));
            if own.is_some_and(|own| result.is_own_key(own.public_key_bytes())) {
                println!("it is my own pubkey");
            } else {
                println!("FOREIGN PUBLIC KEY");
            }
        }
        None => println!("unsigned list manifest, no public key"),
    }
}
