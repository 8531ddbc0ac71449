//! `hashsig check` - Verify a manifest without fetching its files.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use hashsig::trust::encode_public_key;
use hashsig::{HashsigConfig, ManifestKind, RetrievalEngine};

use super::{report, trusted_keys, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Manifest reference: `<path-or-url>[.zip][|key...][#file...]`
    pub manifest: String,

    /// Trusted public key (hex or base64), repeatable
    #[arg(long = "trusted-key")]
    pub trusted_keys: Vec<String>,

    /// Key ring file: one trusted key per line, `#` comments
    #[arg(long)]
    pub keyring: Option<PathBuf>,
}

pub async fn cmd_check(args: CheckArgs) -> i32 {
    match run_check(args).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => report(&e),
    }
}

async fn run_check(args: CheckArgs) -> Result<()> {
    let config = HashsigConfig::from_env()?;
    let trusted = trusted_keys(&args.trusted_keys, args.keyring.as_deref())?;
    let engine = RetrievalEngine::from_config(&config)?.with_trusted_keys(trusted);

    let manifest = engine.load_manifest(&args.manifest).await?;

    match &manifest.kind {
        ManifestKind::Signed(header) => {
            println!("Manifest OK: {}", args.manifest);
            println!("Hash algorithm: {}", header.hashalg);
            println!("Public key: {}", encode_public_key(&header.pubkey));
        }
        ManifestKind::List => println!("Unsigned list: {}", args.manifest),
    }
    println!("Files: {}", manifest.entries.len());
    for entry in &manifest.entries {
        println!("  {}", entry.short_name);
    }

    Ok(())
}
