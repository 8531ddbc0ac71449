//! Manifest building.
//!
//! ```text
//! scan (walker) → size filter → count check → hash → sign → write → zip
//! ```
//!
//! Rebuilding a named (non-index) manifest that already exists re-hashes
//! only its listed files instead of scanning. Every write is preceded by a
//! drift check: the entries being signed must agree with the files on disk.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive;
use crate::config::HashsigConfig;
use crate::digest::{EolPolicy, HashAlgorithm};
use crate::error::{HashsigError, HashsigResult};
use crate::manifest::{Manifest, ManifestBuilder, ManifestEntry, MANIFEST_EXT};
use crate::options::{BuildOptions, ScanOptions};
use crate::signer::Signer;
use crate::target::{ManifestTarget, OPTIONS_EXT};
use crate::walker::{FsWalker, Walker};

mod diff;

pub use diff::{EntryChange, ManifestDiff};

/// Result of a build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Entries written to the manifest.
    pub entries: Vec<ManifestEntry>,

    /// Signed manifest text.
    pub manifest_text: String,

    /// Package archive, when requested.
    pub zip_path: Option<PathBuf>,

    /// Options the scan ran with.
    pub options: ScanOptions,
}

/// Builds, diffs and signs manifests.
pub struct BuildEngine {
    signer: Arc<dyn Signer>,
    hash_alg: HashAlgorithm,
    eol: EolPolicy,
    walker: Arc<dyn Walker>,
    defaults: ScanOptions,
}

impl std::fmt::Debug for BuildEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEngine")
            .field("hash_alg", &self.hash_alg)
            .field("eol", &self.eol)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl BuildEngine {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            hash_alg: HashAlgorithm::default(),
            eol: EolPolicy::default(),
            walker: Arc::new(FsWalker),
            defaults: ScanOptions::default(),
        }
    }

    pub fn from_config(signer: Arc<dyn Signer>, config: &HashsigConfig) -> Self {
        Self::new(signer)
            .with_hash_algorithm(config.hash_alg)
            .with_eol_policy(config.eol_policy())
            .with_scan_defaults(ScanOptions::from_config(config))
    }

    pub fn with_hash_algorithm(mut self, hash_alg: HashAlgorithm) -> Self {
        self.hash_alg = hash_alg;
        self
    }

    pub fn with_eol_policy(mut self, eol: EolPolicy) -> Self {
        self.eol = eol;
        self
    }

    pub fn with_walker(mut self, walker: Arc<dyn Walker>) -> Self {
        self.walker = walker;
        self
    }

    /// Scan options used where neither the sidecar nor the caller set a value.
    pub fn with_scan_defaults(mut self, defaults: ScanOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_alg
    }

    /// Merge `overrides` into the target's sidecar, persist the result and
    /// return the effective scan options.
    pub fn resolve_options(
        &self,
        target: &ManifestTarget,
        overrides: &BuildOptions,
    ) -> HashsigResult<ScanOptions> {
        let path = target.options_path();
        let stored = BuildOptions::load(&path)?;
        let merged = stored.clone().unwrap_or_default().merge(overrides);

        if stored.as_ref() != Some(&merged) {
            merged.save(&path)?;
            debug!(options = %path.display(), "saved build options");
        }

        Ok(self.defaults.clone().apply(&merged))
    }

    /// Hash every file of `target`'s directory selected by `options`.
    ///
    /// The manifest's own files are always excluded. Fails with
    /// `TooManyFiles` before hashing anything when more than `max_files`
    /// files are at or under the size ceiling.
    pub fn scan(
        &self,
        target: &ManifestTarget,
        options: &ScanOptions,
    ) -> HashsigResult<Vec<ManifestEntry>> {
        let mut options = options.clone();
        options.exclude_patterns.extend(own_file_patterns());

        let candidates: Vec<_> = self
            .walker
            .enumerate(target.src_dir(), &options)?
            .into_iter()
            .filter(|f| f.size <= options.max_size_bytes)
            .collect();

        if candidates.len() > options.max_files {
            return Err(HashsigError::TooManyFiles {
                count: candidates.len(),
                max: options.max_files,
            });
        }

        let mut entries = Vec::with_capacity(candidates.len());
        for file in candidates {
            if file.short_name.contains(':') {
                return Err(HashsigError::ReservedCharacter {
                    name: file.short_name,
                });
            }

            let content = match std::fs::read(&file.path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %file.short_name, error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let canonical = self.eol.canonicalize_for(&content, &file.short_name);
            let hash_hex = self.hash_alg.hash_hex(&canonical);
            entries.push(ManifestEntry::new(
                file.short_name,
                hash_hex,
                canonical.len() as u64,
            ));
        }

        debug!(root = %target.src_dir().display(), files = entries.len(), "scanned directory");
        Ok(entries)
    }

    /// Build the index manifest (`.hashsig`) of a directory.
    pub fn make_index(
        &self,
        target: &ManifestTarget,
        overrides: &BuildOptions,
        package_zip: bool,
    ) -> HashsigResult<BuildOutcome> {
        if !target.is_index() {
            return Err(HashsigError::Config {
                message: format!(
                    "{} is not an index manifest, expected {}",
                    target.manifest_path().display(),
                    crate::target::INDEX_NAME
                ),
            });
        }
        self.build(target, overrides, package_zip)
    }

    /// Build, sign and write the manifest of `target`.
    pub fn build(
        &self,
        target: &ManifestTarget,
        overrides: &BuildOptions,
        package_zip: bool,
    ) -> HashsigResult<BuildOutcome> {
        let options = self.resolve_options(target, overrides)?;

        let existing = if target.is_index() {
            None
        } else {
            self.load_entries(target)?
        };

        let entries = match existing {
            Some(existing) => {
                let diff = self.diff_entries(target, &existing, &[], &[])?;
                for (name, change) in &diff.changed {
                    info!(file = %name, change = %change_kind(change), "manifest entry changed");
                }
                diff.merged
            }
            None => self.scan(target, &options)?,
        };

        let manifest_text = self.write_manifest(target, &entries)?;

        let zip_path = if package_zip {
            Some(self.package(target, &entries)?)
        } else {
            None
        };

        Ok(BuildOutcome {
            entries,
            manifest_text,
            zip_path,
            options,
        })
    }

    /// Sign `entries` and write them to the manifest file.
    ///
    /// When the manifest file exists, `entries` are first compared with the
    /// files on disk and any disagreement fails with `ManifestDrift`.
    pub fn write_manifest(
        &self,
        target: &ManifestTarget,
        entries: &[ManifestEntry],
    ) -> HashsigResult<String> {
        let path = target.manifest_path();

        if path.exists() {
            let diff = self.diff_entries(target, entries, &[], &[])?;
            if !diff.is_empty() {
                return Err(HashsigError::ManifestDrift {
                    changed: diff.changed_names(),
                });
            }
        }

        self.sign_and_write(target, entries)
    }

    /// Compare manifest entries with the files on disk.
    ///
    /// With `entries` unset, the target's manifest file is loaded; `Ok(None)`
    /// when it does not exist. With `update`, the merged entries are signed
    /// and written back.
    pub fn compare_to_disk(
        &self,
        target: &ManifestTarget,
        entries: Option<&[ManifestEntry]>,
        update: bool,
        add: &[String],
        remove: &[String],
    ) -> HashsigResult<Option<ManifestDiff>> {
        let loaded;
        let entries = match entries {
            Some(entries) => entries,
            None => match self.load_entries(target)? {
                Some(existing) => {
                    loaded = existing;
                    &loaded
                }
                None => return Ok(None),
            },
        };

        let diff = self.diff_entries(target, entries, add, remove)?;
        if update {
            self.sign_and_write(target, &diff.merged)?;
        }
        Ok(Some(diff))
    }

    /// Entries of the target's manifest file, without trust or integrity
    /// checks. `Ok(None)` when the file does not exist.
    pub fn load_entries(
        &self,
        target: &ManifestTarget,
    ) -> HashsigResult<Option<Vec<ManifestEntry>>> {
        let path = target.manifest_path();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HashsigError::io(
                    format!("failed to read manifest {}", path.display()),
                    e,
                ))
            }
        };
        Ok(Some(Manifest::parse_unchecked(&text)?.entries))
    }

    fn diff_entries(
        &self,
        target: &ManifestTarget,
        entries: &[ManifestEntry],
        add: &[String],
        remove: &[String],
    ) -> HashsigResult<ManifestDiff> {
        diff::compare_entries(
            target.src_dir(),
            entries,
            add,
            remove,
            self.hash_alg,
            &self.eol,
        )
    }

    fn sign_and_write(
        &self,
        target: &ManifestTarget,
        entries: &[ManifestEntry],
    ) -> HashsigResult<String> {
        let text =
            ManifestBuilder::from_entries(self.hash_alg, entries).sign(self.signer.as_ref())?;

        let path = target.manifest_path();
        std::fs::write(path, text.as_bytes())
            .map_err(|e| HashsigError::io(format!("can't write manifest {}", path.display()), e))?;

        info!(manifest = %path.display(), files = entries.len(), "wrote manifest");
        Ok(text)
    }

    fn package(
        &self,
        target: &ManifestTarget,
        entries: &[ManifestEntry],
    ) -> HashsigResult<PathBuf> {
        let root = target.src_dir();
        let manifest_name = target
            .manifest_short_name()
            .unwrap_or_else(|| target.file_name());

        let mut files: Vec<(String, PathBuf)> = entries
            .iter()
            .map(|entry| (entry.short_name.clone(), entry.absolute_path(root)))
            .collect();
        files.push((manifest_name, target.manifest_path().to_path_buf()));

        let zip_path = target.zip_path();
        let count = archive::write_package(&zip_path, files)?;
        info!(archive = %zip_path.display(), files = count, "wrote package");
        Ok(zip_path)
    }
}

/// Masks for the manifest's own files.
fn own_file_patterns() -> [String; 3] {
    [
        format!("*{}", MANIFEST_EXT),
        format!("*{}.zip", MANIFEST_EXT),
        format!("*{}{}", MANIFEST_EXT, OPTIONS_EXT),
    ]
}

fn change_kind(change: &EntryChange) -> &'static str {
    match change {
        EntryChange::Updated(_) => "updated",
        EntryChange::Removed => "removed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::VerifyOptions;
    use crate::signer::Ed25519Signer;
    use crate::trust::TrustedKeySet;
    use tempfile::TempDir;

    fn engine() -> (BuildEngine, Arc<Ed25519Signer>) {
        let signer = Arc::new(Ed25519Signer::generate());
        (BuildEngine::new(signer.clone()), signer)
    }

    fn names(entries: &[ManifestEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.short_name.as_str()).collect()
    }

    #[test]
    fn test_index_build_excludes_own_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("old.hashsig"), b"x").unwrap();
        std::fs::write(dir.path().join("old.hashsig.zip"), b"x").unwrap();
        std::fs::write(dir.path().join("old.hashsig.json"), b"{}").unwrap();

        let (engine, signer) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        let outcome = engine.make_index(&target, &BuildOptions::default(), false).unwrap();

        assert_eq!(names(&outcome.entries), ["a.txt"]);
        assert!(target.manifest_path().is_file());
        assert!(target.options_path().is_file());

        let manifest = Manifest::parse(
            &outcome.manifest_text,
            &TrustedKeySet::new(),
            &VerifyOptions::default(),
        )
        .unwrap();
        assert_eq!(manifest.verified_key.as_deref(), Some(signer.public_key_bytes()));
    }

    #[test]
    fn test_make_index_refuses_named_target() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), Some("app")).unwrap();
        let result = engine.make_index(&target, &BuildOptions::default(), false);
        assert!(matches!(result, Err(HashsigError::Config { .. })));
    }

    #[test]
    fn test_too_many_files_before_hashing() {
        let dir = TempDir::new().unwrap();
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("f{}.txt", i)), b"x").unwrap();
        }
        std::fs::write(dir.path().join("big.bin"), vec![0u8; 64]).unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();

        let limited = ScanOptions {
            max_files: 3,
            max_size_bytes: 10,
            ..Default::default()
        };
        assert!(matches!(
            engine.scan(&target, &limited),
            Err(HashsigError::TooManyFiles { count: 4, max: 3 })
        ));

        // Files over the size ceiling do not count.
        let sized = ScanOptions {
            max_files: 4,
            max_size_bytes: 10,
            ..Default::default()
        };
        assert_eq!(engine.scan(&target, &sized).unwrap().len(), 4);
    }

    #[test]
    fn test_reserved_character_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a:b.txt"), b"x").unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        assert!(matches!(
            engine.scan(&target, &ScanOptions::default()),
            Err(HashsigError::ReservedCharacter { .. })
        ));
    }

    /// Lists a file that is gone by the time it is read.
    struct VanishingWalker;

    impl Walker for VanishingWalker {
        fn enumerate(
            &self,
            root: &std::path::Path,
            _options: &ScanOptions,
        ) -> HashsigResult<Vec<crate::walker::WalkEntry>> {
            Ok(["a.txt", "gone.txt"]
                .into_iter()
                .map(|name| crate::walker::WalkEntry {
                    path: root.join(name),
                    short_name: name.to_string(),
                    size: 1,
                })
                .collect())
        }
    }

    #[test]
    fn test_unreadable_file_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let (engine, _) = engine();
        let engine = engine.with_walker(Arc::new(VanishingWalker));
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        let entries = engine.scan(&target, &ScanOptions::default()).unwrap();

        assert_eq!(names(&entries), ["a.txt"]);
    }

    #[test]
    fn test_text_hashed_canonical_binary_exact() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x\r\ny\r\n").unwrap();
        std::fs::write(dir.path().join("b.png"), b"x\r\ny\r\n").unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        let entries = engine.scan(&target, &ScanOptions::default()).unwrap();

        let alg = HashAlgorithm::Sha256;
        assert_eq!(entries[0].hash_hex, alg.hash_hex(b"x\ny\n"));
        assert_eq!(entries[0].size, 4);
        assert_eq!(entries[1].hash_hex, alg.hash_hex(b"x\r\ny\r\n"));
        assert_eq!(entries[1].size, 6);
    }

    #[test]
    fn test_sidecar_merged_and_persisted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.md"), b"b").unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        std::fs::write(target.options_path(), r#"{"filePatterns": ["*.md"], "maxFilesCnt": "5"}"#)
            .unwrap();

        let overrides = BuildOptions {
            max_files_cnt: Some(9),
            ..Default::default()
        };
        let outcome = engine.build(&target, &overrides, false).unwrap();
        assert_eq!(names(&outcome.entries), ["b.md"]);
        assert_eq!(outcome.options.max_files, 9);

        let stored = BuildOptions::load(&target.options_path()).unwrap().unwrap();
        assert_eq!(stored.max_files_cnt, Some(9));
        assert_eq!(stored.file_patterns, Some(vec!["*.md".to_string()]));
    }

    #[test]
    fn test_named_rebuild_rehashes_listed_files_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), Some("app")).unwrap();
        let first = engine.build(&target, &BuildOptions::default(), false).unwrap();
        assert_eq!(names(&first.entries), ["a.txt", "b.txt"]);

        std::fs::write(dir.path().join("a.txt"), b"changed").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"new").unwrap();

        let second = engine.build(&target, &BuildOptions::default(), false).unwrap();
        assert_eq!(names(&second.entries), ["a.txt", "b.txt"]);
        assert_eq!(
            second.entries[0].hash_hex,
            HashAlgorithm::Sha256.hash_hex(b"changed")
        );
    }

    #[test]
    fn test_stale_entries_are_drift() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        let outcome = engine.make_index(&target, &BuildOptions::default(), false).unwrap();

        std::fs::write(dir.path().join("a.txt"), b"edited").unwrap();
        let result = engine.write_manifest(&target, &outcome.entries);
        match result {
            Err(HashsigError::ManifestDrift { changed }) => assert_eq!(changed, ["a.txt"]),
            other => panic!("expected drift, got {:?}", other),
        }
    }

    #[test]
    fn test_compare_to_disk_update_rewrites() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        assert!(engine
            .compare_to_disk(&target, None, false, &[], &[])
            .unwrap()
            .is_none());

        engine.make_index(&target, &BuildOptions::default(), false).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"edited").unwrap();

        let diff = engine
            .compare_to_disk(&target, None, true, &[], &[])
            .unwrap()
            .unwrap();
        assert_eq!(diff.changed_names(), ["a.txt"]);

        let after = engine
            .compare_to_disk(&target, None, false, &[], &[])
            .unwrap()
            .unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn test_package_zip_contains_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), b"a").unwrap();

        let (engine, _) = engine();
        let target = ManifestTarget::resolve(dir.path(), None).unwrap();
        let outcome = engine.make_index(&target, &BuildOptions::default(), true).unwrap();

        let zip_path = outcome.zip_path.unwrap();
        assert_eq!(zip_path, target.zip_path());
        assert_eq!(archive::read_member(&zip_path, "sub/a.txt").unwrap(), b"a");
        assert_eq!(
            archive::read_member(&zip_path, ".hashsig").unwrap(),
            outcome.manifest_text.as_bytes()
        );
    }
}
