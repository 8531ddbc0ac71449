use clap::{Parser, Subcommand};

use super::commands::{check, diff, fetch, keygen, write};

#[derive(Parser)]
#[command(
    name = "hashsig",
    version,
    about = "Signed hash manifests for distributing directory trees"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate an ed25519 signing key
    Keygen(keygen::KeygenArgs),

    /// Scan a directory and write its signed manifest
    Write(write::WriteArgs),

    /// Verify a manifest without fetching its files
    Check(check::CheckArgs),

    /// Retrieve and verify the files of a manifest
    Fetch(fetch::FetchArgs),

    /// Compare a manifest with the directory it describes
    Diff(diff::DiffArgs),
}
