//! Signed hash manifests for distributing directory trees.
//!
//! A `.hashsig` manifest lists relative file names with their hash and size,
//! and is signed with Ed25519. This crate provides:
//!
//! - Manifest parsing, verification and signing
//! - Retrieval of the listed files from HTTP(S), the filesystem or a zip
//!   archive, with per-file hash checks and fallback between sources
//! - Trusted-key enforcement, with an optional external trust store
//! - Manifest building from a directory scan, incremental diff against the
//!   live tree and zip packaging
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use hashsig::{
//!     BuildEngine, BuildOptions, Ed25519Signer, ManifestTarget, RetrievalEngine,
//!     RetrieveOptions,
//! };
//!
//! # async fn example() -> hashsig::HashsigResult<()> {
//! // Sign a directory
//! let signer = Arc::new(Ed25519Signer::generate());
//! let target = ManifestTarget::resolve(Path::new("./pkg"), Some("app"))?;
//! BuildEngine::new(signer.clone()).build(&target, &BuildOptions::default(), false)?;
//!
//! // Fetch it elsewhere, trusting only our key
//! let engine = RetrievalEngine::from_config(&hashsig::HashsigConfig::default())?;
//! let reference = format!("./pkg/app.hashsig|{}", signer.public_key_base64());
//! let result = engine
//!     .retrieve(&reference, &RetrieveOptions::new().save_to("./out"))
//!     .await?;
//! assert!(result.is_complete());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `HASHSIG_KEYFILE` | PKCS#8 PEM signing key |
//! | `HASHSIG_PASSWORD` | Password of an encrypted signing key |
//! | `HASHSIG_HASH_ALG` | Hash algorithm for new manifests (default: `sha256`) |
//! | `HASHSIG_TIMEOUT` | HTTP timeout in seconds (default: 30) |
//! | `HASHSIG_MAX_FILES` | Scan limit (default: 100) |
//! | `HASHSIG_MAX_SIZE` | Largest file included by a scan, in bytes (default: 1 MiB) |

pub mod archive;
pub mod build;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod options;
pub mod reference;
pub mod retrieve;
pub mod signer;
pub mod target;
pub mod trust;
pub mod walker;

// Re-export main types
pub use archive::{ArchiveManifest, TempArchive};
pub use build::{BuildEngine, BuildOutcome, EntryChange, ManifestDiff};
pub use config::HashsigConfig;
pub use digest::{compute_hash, EolPolicy, HashAlgorithm};
pub use error::{HashsigError, HashsigResult};
pub use fetch::Fetcher;
pub use manifest::{
    Manifest, ManifestBuilder, ManifestEntry, ManifestHeader, ManifestKind, VerifyOptions,
};
pub use options::{BuildOptions, ScanOptions};
pub use reference::{FileSelection, ManifestRef};
pub use retrieve::{RetrievalEngine, RetrievalResult, RetrieveOptions, RetrievedFile};
pub use signer::{Ed25519Signer, Signer};
pub use target::ManifestTarget;
pub use trust::{KeyRing, TrustStore, TrustedKeySet};
pub use walker::{FsWalker, WalkEntry, Walker};
