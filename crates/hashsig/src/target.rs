//! Manifest name and location resolution.

use std::path::{Path, PathBuf};

use crate::error::{HashsigError, HashsigResult};
use crate::manifest::MANIFEST_EXT;

/// Suffix of options sidecars, appended to the manifest file name.
pub const OPTIONS_EXT: &str = ".json";

/// File name of the index manifest.
pub const INDEX_NAME: &str = ".hashsig";

/// A source directory and the manifest file describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTarget {
    src_dir: PathBuf,
    manifest_path: PathBuf,
}

impl ManifestTarget {
    /// Resolve the manifest for `src_dir`.
    ///
    /// - no name (or empty): `{src_dir}/.hashsig`
    /// - name without `/`: file inside `src_dir`
    /// - file name without `.`: `.hashsig` is appended
    pub fn resolve(src_dir: &Path, name: Option<&str>) -> HashsigResult<Self> {
        let src_dir = std::fs::canonicalize(src_dir).map_err(|e| HashsigError::Config {
            message: format!("directory {} does not exist: {}", src_dir.display(), e),
        })?;
        if !src_dir.is_dir() {
            return Err(HashsigError::Config {
                message: format!("{} is not a directory", src_dir.display()),
            });
        }

        let manifest_path = match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => src_dir.join(INDEX_NAME),
            Some(name) => {
                let mut name = name.replace('\\', "/");
                let base = name.rsplit('/').next().unwrap_or_default();
                if !base.contains('.') {
                    name.push_str(MANIFEST_EXT);
                }
                if name.contains('/') {
                    PathBuf::from(name)
                } else {
                    src_dir.join(name)
                }
            }
        };

        Ok(Self {
            src_dir,
            manifest_path,
        })
    }

    /// Pick the manifest name from the options sidecars in `src_dir`.
    ///
    /// `Ok(None)` when there is no sidecar, `Some("")` for the index sidecar.
    /// More than one sidecar is ambiguous.
    pub fn detect_name(src_dir: &Path) -> HashsigResult<Option<String>> {
        let tail = format!("{}{}", MANIFEST_EXT, OPTIONS_EXT);
        let read_dir = std::fs::read_dir(src_dir).map_err(|e| {
            HashsigError::io(format!("failed to list {}", src_dir.display()), e)
        })?;

        let mut names: Vec<String> = read_dir
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let file_name = entry.file_name().to_string_lossy().to_string();
                file_name.strip_suffix(&tail).map(String::from)
            })
            .collect();
        names.sort();

        match names.len() {
            0 => Ok(None),
            1 => Ok(names.pop()),
            n => Err(HashsigError::Config {
                message: format!(
                    "found {} manifest names, specify one of: {}",
                    n,
                    names.join(", ")
                ),
            }),
        }
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// File name of the manifest.
    pub fn file_name(&self) -> String {
        self.manifest_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Whether this is the index manifest of the directory.
    pub fn is_index(&self) -> bool {
        self.file_name() == INDEX_NAME
    }

    /// `{manifest}.zip`
    pub fn zip_path(&self) -> PathBuf {
        append_ext(&self.manifest_path, ".zip")
    }

    /// `{manifest}.json`
    pub fn options_path(&self) -> PathBuf {
        append_ext(&self.manifest_path, OPTIONS_EXT)
    }

    /// Manifest path relative to the source directory, when it lives inside it.
    pub fn manifest_short_name(&self) -> Option<String> {
        let relative = self.manifest_path.strip_prefix(&self.src_dir).ok()?;
        Some(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

fn append_ext(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(ext);
    PathBuf::from(os)
}
