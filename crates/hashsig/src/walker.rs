//! Directory enumeration.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{HashsigError, HashsigResult};
use crate::options::ScanOptions;

/// One enumerated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,

    /// Path relative to the walk root, `/`-separated.
    pub short_name: String,

    pub size: u64,
}

/// Enumerates files under a root.
pub trait Walker: Send + Sync {
    /// Files under `root` matching the options, sorted by short name. Size
    /// limits are applied by the caller.
    fn enumerate(&self, root: &Path, options: &ScanOptions) -> HashsigResult<Vec<WalkEntry>>;
}

/// Filesystem walker with glob include/exclude masks.
///
/// Masks without `/` match the file name, masks with `/` match the short
/// name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWalker;

struct PatternSet {
    names: GlobSet,
    paths: GlobSet,
    empty: bool,
}

impl PatternSet {
    fn new(patterns: &[String]) -> HashsigResult<Self> {
        let mut names = GlobSetBuilder::new();
        let mut paths = GlobSetBuilder::new();

        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| HashsigError::Config {
                message: format!("invalid file pattern {}: {}", pattern, e),
            })?;
            if pattern.contains('/') {
                paths.add(glob);
            } else {
                names.add(glob);
            }
        }

        let build = |builder: GlobSetBuilder| {
            builder.build().map_err(|e| HashsigError::Config {
                message: format!("invalid file patterns: {}", e),
            })
        };

        Ok(Self {
            names: build(names)?,
            paths: build(paths)?,
            empty: patterns.is_empty(),
        })
    }

    fn matches(&self, file_name: &str, short_name: &str) -> bool {
        self.names.is_match(file_name) || self.paths.is_match(short_name)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

impl Walker for FsWalker {
    fn enumerate(&self, root: &Path, options: &ScanOptions) -> HashsigResult<Vec<WalkEntry>> {
        let include = PatternSet::new(&options.file_patterns)?;
        let exclude = PatternSet::new(&options.exclude_patterns)?;
        let include_hidden = options.include_hidden;

        let walk = WalkDir::new(root)
            .follow_links(false)
            .max_depth(options.max_depth().max(1))
            .into_iter()
            .filter_entry(|entry| include_hidden || !is_hidden(entry));

        let mut entries = Vec::new();
        for item in walk {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let short_name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let file_name = entry.file_name().to_string_lossy();

            if !include.empty && !include.matches(&file_name, &short_name) {
                continue;
            }
            if exclude.matches(&file_name, &short_name) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(file = %short_name, error = %e, "skipping file without metadata");
                    continue;
                }
            };

            entries.push(WalkEntry {
                path: entry.path().to_path_buf(),
                short_name,
                size,
            });
        }

        entries.sort_by(|a, b| a.short_name.cmp(&b.short_name));
        debug!(root = %root.display(), files = entries.len(), "enumerated directory");
        Ok(entries)
    }
}
