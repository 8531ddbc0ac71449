//! `hashsig write` - Scan a directory and write its signed manifest.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use hashsig::{BuildEngine, BuildOptions, HashAlgorithm, HashsigConfig};

use super::{key_password, key_path, load_signer, report, resolve_target, EXIT_SUCCESS};

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Directory to sign
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Manifest name (default: the index `.hashsig`, or the only sidecar found)
    #[arg(long)]
    pub name: Option<String>,

    /// Include mask, repeatable
    #[arg(long = "pattern")]
    pub patterns: Vec<String>,

    /// Exclude mask, repeatable
    #[arg(long = "exclude")]
    pub excludes: Vec<String>,

    /// Fail when more files than this are found
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Leave out files larger than this (bytes)
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Include dot files and directories
    #[arg(long)]
    pub hidden: bool,

    /// Discard the existing manifest and scan from scratch
    #[arg(long)]
    pub rewrite: bool,

    /// Also package files and manifest into `<manifest>.zip`
    #[arg(long)]
    pub zip: bool,

    /// Hash algorithm for the manifest (sha224, sha256, sha384, sha512)
    #[arg(long = "hash-alg", alias = "hash", env = "HASHSIG_HASH_ALG")]
    pub hash_alg: Option<HashAlgorithm>,

    /// Signing key (PKCS#8 PEM); defaults to HASHSIG_KEYFILE
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Password of an encrypted signing key; defaults to HASHSIG_PASSWORD
    #[arg(long)]
    pub password: Option<String>,
}

pub fn cmd_write(args: WriteArgs) -> i32 {
    match run_write(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => report(&e),
    }
}

fn run_write(args: WriteArgs) -> Result<()> {
    let config = HashsigConfig::from_env()?;
    let Some(key) = key_path(args.key.clone(), &config) else {
        anyhow::bail!("no signing key, use --key or set HASHSIG_KEYFILE");
    };
    let password = key_password(args.password.clone(), &config);
    let signer = load_signer(&key, password.as_deref())?;

    let target = resolve_target(&args.dir, args.name.as_deref())?;
    if args.rewrite && target.manifest_path().exists() {
        std::fs::remove_file(target.manifest_path()).with_context(|| {
            format!("failed to remove {}", target.manifest_path().display())
        })?;
    }

    let overrides = BuildOptions {
        file_patterns: (!args.patterns.is_empty()).then_some(args.patterns),
        exclude_patterns: (!args.excludes.is_empty()).then_some(args.excludes),
        max_files_cnt: args.max_files,
        get_hidden: args.hidden.then_some(true),
        max_size_bytes: args.max_size,
    };

    let hash_alg = args.hash_alg.unwrap_or(config.hash_alg);
    let engine = BuildEngine::from_config(signer.clone(), &config).with_hash_algorithm(hash_alg);
    let outcome = engine.build(&target, &overrides, args.zip)?;

    println!("Manifest: {}", target.manifest_path().display());
    println!("Hash algorithm: {}", hash_alg);
    println!("Files: {}", outcome.entries.len());
    for entry in &outcome.entries {
        println!("  {} ({} bytes)", entry.short_name, entry.size);
    }
    if let Some(zip_path) = &outcome.zip_path {
        println!("Package: {}", zip_path.display());
    }
    println!("Public key: {}", signer.public_key_base64());

    Ok(())
}
