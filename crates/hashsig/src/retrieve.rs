//! Manifest retrieval.
//!
//! A retrieval resolves a manifest reference, verifies the manifest and then
//! fetches every listed file from the base prefixes in order until one copy
//! matches its hash:
//!
//! ```text
//! reference → (archive → temp file → member | list) or manifest location
//!           → parse + verify → per file: base₁, base₂, ... → write / keep
//! ```
//!
//! Manifest-level failures are returned as errors and no file is written.
//! Per-file failures end up in [`RetrievalResult`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive::{ArchiveManifest, TempArchive};
use crate::config::HashsigConfig;
use crate::digest::{EolPolicy, HashAlgorithm};
use crate::error::{HashsigError, HashsigResult};
use crate::fetch::Fetcher;
use crate::manifest::{Manifest, ManifestEntry, VerifyOptions};
use crate::reference::{FileSelection, ManifestRef};
use crate::signer::Signer;
use crate::trust::TrustedKeySet;

/// Options of one retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Target directory; the engine's default directory when unset.
    pub save_to: Option<PathBuf>,

    /// Prefixes tried in order instead of the manifest's own directory.
    /// Ignored in archive mode.
    pub base_urls: Vec<String>,

    /// Keep verified bytes in the result instead of writing them.
    pub in_memory_only: bool,

    /// Leave existing target files untouched.
    pub no_overwrite: bool,

    /// Fail unless the reference names a zip archive.
    pub zip_only: bool,

    /// Names or masks restricting which entries are fetched.
    pub only_files: Vec<String>,
}

impl RetrieveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_to = Some(dir.into());
        self
    }

    pub fn base_url(mut self, base: impl Into<String>) -> Self {
        self.base_urls.push(base.into());
        self
    }

    pub fn in_memory_only(mut self) -> Self {
        self.in_memory_only = true;
        self
    }

    pub fn no_overwrite(mut self) -> Self {
        self.no_overwrite = true;
        self
    }

    pub fn zip_only(mut self) -> Self {
        self.zip_only = true;
        self
    }

    pub fn only_file(mut self, name: impl Into<String>) -> Self {
        self.only_files.push(name.into());
        self
    }
}

/// Where a verified file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievedFile {
    Saved(PathBuf),
    InMemory(Vec<u8>),
}

impl RetrievedFile {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Saved(path) => Some(path),
            Self::InMemory(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::InMemory(bytes) => Some(bytes),
            Self::Saved(_) => None,
        }
    }
}

/// Outcome of a retrieval. A name is in either `success` or `errors`.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub success: BTreeMap<String, RetrievedFile>,

    /// Names no source produced a matching copy for, in manifest order.
    pub errors: Vec<String>,

    /// Diagnostics, in the order they occurred.
    pub error_messages: Vec<String>,

    /// Public key the manifest was verified with; `None` for unsigned lists.
    pub signer_key: Option<Vec<u8>>,
}

impl RetrievalResult {
    /// Whether the manifest was signed by `own_key`.
    pub fn is_own_key(&self, own_key: &[u8]) -> bool {
        self.signer_key.as_deref() == Some(own_key)
    }

    /// Whether every selected file was retrieved.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    fn fail(&mut self, name: &str, message: String) {
        self.errors.push(name.to_string());
        self.error_messages.push(message);
    }
}

/// A verified manifest and the prefixes its files are fetched from.
struct Resolved {
    manifest: Manifest,
    bases: Vec<String>,

    // Deleted when the retrieval is done.
    _archive: Option<TempArchive>,
}

/// Fetches and verifies manifests and their files.
pub struct RetrievalEngine {
    fetcher: Fetcher,
    default_dir: PathBuf,
    verifier: Option<Arc<dyn Signer>>,
    trusted: TrustedKeySet,
    eol: EolPolicy,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("default_dir", &self.default_dir)
            .field("verifier", &self.verifier.is_some())
            .field("trusted", &self.trusted)
            .field("eol", &self.eol)
            .finish()
    }
}

impl RetrievalEngine {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            default_dir: PathBuf::from("."),
            verifier: None,
            trusted: TrustedKeySet::new(),
            eol: EolPolicy::default(),
        }
    }

    pub fn from_config(config: &HashsigConfig) -> HashsigResult<Self> {
        Ok(Self::new(Fetcher::from_config(config)?).with_eol_policy(config.eol_policy()))
    }

    /// Line-ending policy for copies whose raw bytes do not match.
    pub fn with_eol_policy(mut self, eol: EolPolicy) -> Self {
        self.eol = eol;
        self
    }

    /// Directory used when a retrieval does not name one.
    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = dir.into();
        self
    }

    /// Verify signatures with `verifier` instead of the built-in Ed25519 check.
    pub fn with_verifier(mut self, verifier: Arc<dyn Signer>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Keys trusted for every retrieval, on top of those in the reference.
    pub fn with_trusted_keys(mut self, trusted: TrustedKeySet) -> Self {
        self.trusted = trusted;
        self
    }

    /// Resolve and verify a manifest without fetching its files.
    pub async fn load_manifest(&self, manifest_ref: &str) -> HashsigResult<Manifest> {
        let reference = ManifestRef::parse(manifest_ref)?;
        let resolved = self.resolve(&reference, &[]).await?;
        Ok(resolved.manifest)
    }

    /// Retrieve the files of a manifest.
    pub async fn retrieve(
        &self,
        manifest_ref: &str,
        options: &RetrieveOptions,
    ) -> HashsigResult<RetrievalResult> {
        let reference = ManifestRef::parse(manifest_ref)?;
        if options.zip_only && !reference.is_archive() {
            return Err(HashsigError::ZipRequired {
                reference: reference.location.clone(),
            });
        }

        let save_dir = options
            .save_to
            .clone()
            .unwrap_or_else(|| self.default_dir.clone());
        if !options.in_memory_only {
            tokio::fs::create_dir_all(&save_dir).await.map_err(|e| {
                HashsigError::io(format!("can't create directory {}", save_dir.display()), e)
            })?;
        }

        let resolved = self.resolve(&reference, &options.base_urls).await?;
        let manifest = &resolved.manifest;
        let hash_alg = manifest.hash_algorithm();

        let selection = FileSelection::new(options.only_files.iter().chain(&reference.only_files))?;

        let mut result = RetrievalResult {
            signer_key: manifest.verified_key.clone(),
            ..Default::default()
        };

        for entry in &manifest.entries {
            if !selection.is_empty() && !selection.matches(&entry.short_name) {
                continue;
            }

            let Some(path) = safe_join(&save_dir, &entry.short_name) else {
                warn!(file = %entry.short_name, "file name leaves the target directory");
                result.fail(&entry.short_name, format!("Unsafe file name {}", entry.short_name));
                continue;
            };

            let Some(data) = self
                .fetch_verified(entry, &resolved.bases, hash_alg, &mut result.error_messages)
                .await
            else {
                result.errors.push(entry.short_name.clone());
                continue;
            };

            if options.in_memory_only {
                result
                    .success
                    .insert(entry.short_name.clone(), RetrievedFile::InMemory(data));
                continue;
            }

            match store_file(&path, &data, options.no_overwrite).await {
                Ok(()) => {
                    result
                        .success
                        .insert(entry.short_name.clone(), RetrievedFile::Saved(path));
                }
                Err(e) => {
                    warn!(file = %entry.short_name, error = %e, "can't write file");
                    let message = format!("Can't write {}: {}", path.display(), e);
                    result.fail(&entry.short_name, message);
                }
            }
        }

        info!(
            manifest = %reference.location,
            success = result.success.len(),
            errors = result.errors.len(),
            "retrieval finished"
        );
        Ok(result)
    }

    async fn resolve(
        &self,
        reference: &ManifestRef,
        base_urls: &[String],
    ) -> HashsigResult<Resolved> {
        let trusted = reference.trusted_key_set()?.merge(&self.trusted);
        let mut verify = VerifyOptions::default();
        if let Some(verifier) = &self.verifier {
            verify = verify.with_verifier(verifier.clone());
        }

        if reference.is_archive() {
            return self.resolve_archive(reference, base_urls, &trusted, &verify).await;
        }

        let bytes = self
            .fetcher
            .peek(&reference.location, None, 0)
            .await
            .ok_or_else(|| HashsigError::Io {
                message: format!("can't load manifest {}", reference.location),
            })?;
        let text = manifest_text(&reference.location, bytes)?;
        let manifest = Manifest::parse(&text, &trusted, &verify)?;

        let bases = if base_urls.is_empty() {
            vec![reference.base_prefix()?]
        } else {
            base_urls.iter().map(|b| with_trailing_slash(b)).collect()
        };

        Ok(Resolved {
            manifest,
            bases,
            _archive: None,
        })
    }

    async fn resolve_archive(
        &self,
        reference: &ManifestRef,
        base_urls: &[String],
        trusted: &TrustedKeySet,
        verify: &VerifyOptions,
    ) -> HashsigResult<Resolved> {
        if !base_urls.is_empty() {
            debug!(archive = %reference.location, "base urls ignored in archive mode");
        }

        let blob = self
            .fetcher
            .peek(&reference.location, None, 0)
            .await
            .ok_or_else(|| HashsigError::Io {
                message: format!("can't load archive {}", reference.location),
            })?;

        let archive = TempArchive::create(reference.manifest_name(), &blob)?;
        let prefix = archive.prefix();

        let (manifest, base) = match archive.locate_manifest(reference.manifest_name())? {
            ArchiveManifest::Member(name) => {
                let location = format!("{}{}", prefix, name);
                let bytes = self.fetcher.peek(&location, None, 0).await.ok_or_else(|| {
                    HashsigError::Archive {
                        message: format!("can't read {} from {}", name, reference.location),
                    }
                })?;
                let text = manifest_text(&location, bytes)?;
                (Manifest::parse(&text, trusted, verify)?, String::new())
            }
            ArchiveManifest::Synthesized { base, manifest } => {
                let manifest = Manifest::parse(&manifest.to_list_text(), trusted, verify)?;
                (manifest, base)
            }
        };

        Ok(Resolved {
            manifest,
            bases: vec![format!("{}{}", prefix, base)],
            _archive: Some(archive),
        })
    }

    /// First copy of `entry` across `bases` that matches its hash.
    async fn fetch_verified(
        &self,
        entry: &ManifestEntry,
        bases: &[String],
        hash_alg: HashAlgorithm,
        messages: &mut Vec<String>,
    ) -> Option<Vec<u8>> {
        for base in bases {
            let url = format!("{}{}", base, entry.short_name);
            debug!(file = %entry.short_name, url = %url, "fetching");

            let Some(data) = self.fetcher.peek(&url, Some(entry.size), 0).await else {
                continue;
            };

            if !entry.has_hash() || hash_alg.hash_hex(&data) == entry.hash_hex {
                return Some(data);
            }

            // Text copies checked out with CRLF line endings.
            if data.contains(&b'\r') {
                let canonical = self.eol.canonicalize_for(&data, &entry.short_name);
                if canonical.len() != data.len() && hash_alg.hash_hex(&canonical) == entry.hash_hex
                {
                    return Some(canonical.into_owned());
                }
            }

            warn!(file = %entry.short_name, url = %url, "hash mismatch");
            messages.push(format!("Different hash in {}", url));
        }
        None
    }
}

fn manifest_text(location: &str, bytes: Vec<u8>) -> HashsigResult<String> {
    String::from_utf8(bytes).map_err(|e| HashsigError::MalformedManifest {
        reason: format!("{} is not UTF-8: {}", location, e),
    })
}

fn with_trailing_slash(base: &str) -> String {
    let base = base.replace('\\', "/");
    if base.ends_with('/') {
        base
    } else {
        format!("{}/", base)
    }
}

/// `root` joined with a `/`-separated short name, or `None` when the name
/// would leave `root`.
fn safe_join(root: &Path, short_name: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut depth = 0;
    for part in short_name.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            part if part.contains(':') || part.contains('\\') => return None,
            part => {
                path.push(part);
                depth += 1;
            }
        }
    }
    (depth > 0).then_some(path)
}

async fn store_file(path: &Path, data: &[u8], no_overwrite: bool) -> std::io::Result<()> {
    let existed = tokio::fs::try_exists(path).await?;
    if existed && no_overwrite {
        debug!(path = %path.display(), existed, "kept existing file");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    debug!(path = %path.display(), existed, size = data.len(), "wrote file");
    Ok(())
}
