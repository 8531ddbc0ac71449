//! `hashsig fetch` - Retrieve and verify the files of a manifest.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use hashsig::{HashsigConfig, RetrievalEngine, RetrieveOptions};

use super::{
    key_path, load_signer, print_signer, report, trusted_keys, EXIT_INCOMPLETE, EXIT_SUCCESS,
};

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Manifest reference: `<path-or-url>[.zip][|key...][#file...]`
    pub manifest: String,

    /// Directory to write files into
    #[arg(long, default_value = ".")]
    pub target: PathBuf,

    /// Fetch files from this prefix instead of the manifest's directory, repeatable
    #[arg(long = "base-url")]
    pub base_urls: Vec<String>,

    /// Keep existing files
    #[arg(long)]
    pub no_overwrite: bool,

    /// Require a zip archive reference
    #[arg(long)]
    pub zip_only: bool,

    /// Only fetch these names or masks, repeatable
    #[arg(long = "only")]
    pub only: Vec<String>,

    /// Trusted public key (hex or base64), repeatable
    #[arg(long = "trusted-key")]
    pub trusted_keys: Vec<String>,

    /// Key ring file: one trusted key per line, `#` comments
    #[arg(long)]
    pub keyring: Option<PathBuf>,

    /// Own signing key, for telling own manifests from foreign ones
    #[arg(long)]
    pub key: Option<PathBuf>,
}

pub async fn cmd_fetch(args: FetchArgs) -> i32 {
    match run_fetch(args).await {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => EXIT_INCOMPLETE,
        Err(e) => report(&e),
    }
}

async fn run_fetch(args: FetchArgs) -> Result<bool> {
    let config = HashsigConfig::from_env()?;
    let own = match key_path(args.key, &config) {
        Some(path) if path.exists() => Some(load_signer(&path, config.password.as_deref())?),
        _ => None,
    };

    let trusted = trusted_keys(&args.trusted_keys, args.keyring.as_deref())?;
    let engine = RetrievalEngine::from_config(&config)?.with_trusted_keys(trusted);

    let options = RetrieveOptions {
        save_to: Some(args.target),
        base_urls: args.base_urls,
        in_memory_only: false,
        no_overwrite: args.no_overwrite,
        zip_only: args.zip_only,
        only_files: args.only,
    };
    let result = engine.retrieve(&args.manifest, &options).await?;

    println!("Success: {}", result.success.len());
    for (name, file) in &result.success {
        match file.path() {
            Some(path) => println!("  {} -> {}", name, path.display()),
            None => println!("  {}", name),
        }
    }
    if !result.errors.is_empty() {
        println!("Errors: {}", result.errors.len());
        for name in &result.errors {
            println!("  {}", name);
        }
    }
    for message in &result.error_messages {
        eprintln!("{}", message);
    }
    print_signer(&result, own.as_deref());

    Ok(result.is_complete())
}
