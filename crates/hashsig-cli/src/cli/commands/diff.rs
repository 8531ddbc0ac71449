//! `hashsig diff` - Compare a manifest with the directory it describes.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use hashsig::{BuildEngine, Ed25519Signer, EntryChange, HashsigConfig};

use super::{
    key_password, key_path, load_signer, report, resolve_target, EXIT_FAILURE, EXIT_SUCCESS,
};

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Directory the manifest describes
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Manifest name (default: the index `.hashsig`, or the only sidecar found)
    #[arg(long)]
    pub name: Option<String>,

    /// Re-sign and rewrite the manifest with the changes applied
    #[arg(long)]
    pub update: bool,

    /// Add a file to the manifest, repeatable
    #[arg(long = "add")]
    pub add: Vec<String>,

    /// Remove a file from the manifest, repeatable
    #[arg(long = "remove")]
    pub remove: Vec<String>,

    /// Signing key (PKCS#8 PEM), needed with --update; defaults to HASHSIG_KEYFILE
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Password of an encrypted signing key; defaults to HASHSIG_PASSWORD
    #[arg(long)]
    pub password: Option<String>,
}

pub fn cmd_diff(args: DiffArgs) -> i32 {
    match run_diff(args) {
        Ok(code) => code,
        Err(e) => report(&e),
    }
}

fn run_diff(args: DiffArgs) -> Result<i32> {
    let config = HashsigConfig::from_env()?;
    let signer = match key_path(args.key.clone(), &config) {
        Some(path) => {
            let password = key_password(args.password.clone(), &config);
            load_signer(&path, password.as_deref())?
        }
        None if args.update => {
            anyhow::bail!("--update needs a signing key, use --key or set HASHSIG_KEYFILE")
        }
        // Nothing is signed without --update.
        None => Arc::new(Ed25519Signer::generate()),
    };

    let target = resolve_target(&args.dir, args.name.as_deref())?;
    let engine = BuildEngine::from_config(signer, &config);

    let Some(diff) =
        engine.compare_to_disk(&target, None, args.update, &args.add, &args.remove)?
    else {
        eprintln!("error: manifest {} not found", target.manifest_path().display());
        return Ok(EXIT_FAILURE);
    };

    if diff.is_empty() {
        println!("No changes: {}", target.manifest_path().display());
        return Ok(EXIT_SUCCESS);
    }

    for (name, change) in &diff.changed {
        match change {
            EntryChange::Updated(entry) => println!("updated  {} ({} bytes)", name, entry.size),
            EntryChange::Removed => println!("removed  {}", name),
        }
    }
    if args.update {
        println!("Rewrote {} ({} files)", target.manifest_path().display(), diff.merged.len());
    }

    Ok(EXIT_SUCCESS)
}
