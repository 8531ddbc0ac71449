//! `hashsig keygen` - Generate an ed25519 signing key.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use hashsig::{Ed25519Signer, HashsigConfig};

use super::{key_password, key_path, report, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Private key file to create (PKCS#8 PEM); defaults to HASHSIG_KEYFILE
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Encrypt the key file with this password; defaults to HASHSIG_PASSWORD
    #[arg(long)]
    pub password: Option<String>,

    /// Force overwrite existing file
    #[arg(long, short)]
    pub force: bool,
}

pub fn cmd_keygen(args: KeygenArgs) -> i32 {
    match run_keygen(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => report(&e),
    }
}

fn run_keygen(args: KeygenArgs) -> Result<()> {
    let config = HashsigConfig::from_env()?;
    let password = key_password(args.password, &config);
    let Some(path) = key_path(args.key, &config) else {
        anyhow::bail!("no key file given, use --key or set HASHSIG_KEYFILE");
    };

    if path.exists() && !args.force {
        anyhow::bail!(
            "private key already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let signer = Ed25519Signer::generate();
    signer.save_pem(&path, password.as_deref())?;

    let form = if password.is_some() { "encrypted PKCS#8 PEM" } else { "PKCS#8 PEM" };
    println!("Generated ed25519 key:");
    println!("  Private key: {} ({}, mode 0600)", path.display(), form);
    println!();
    println!("Public key: {}", signer.public_key_base64());
    println!();
    println!("Pass this key after '|' in a manifest reference to trust it.");

    Ok(())
}
