//! Manifest reference parsing.
//!
//! Grammar: `<path-or-url>[.zip][|trustedKey1|trustedKey2...][#file1#file2...]`
//!
//! - `./pkg/.hashsig` → local manifest, files fetched next to it
//! - `https://host/pkg/app.hashsig` → remote manifest, files fetched from `https://host/pkg/`
//! - `https://host/app.hashsig.zip` → archive mode
//! - `app.hashsig|<key>#README.md#docs/*.md` → trusted key and file subset

use std::collections::HashSet;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{HashsigError, HashsigResult};
use crate::trust::TrustedKeySet;

/// Suffix that switches retrieval to archive mode.
pub const ZIP_EXT: &str = ".zip";

/// A parsed manifest reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    /// Manifest or archive location, without the key and file suffixes.
    pub location: String,

    /// Encoded trusted keys from the `|` segment.
    pub trusted_keys: Vec<String>,

    /// File subset from the `#` segment.
    pub only_files: Vec<String>,
}

impl ManifestRef {
    /// Parse a reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use hashsig::ManifestRef;
    ///
    /// let r = ManifestRef::parse("https://host/pkg/app.hashsig#a.txt#docs/*.md").unwrap();
    /// assert_eq!(r.location, "https://host/pkg/app.hashsig");
    /// assert_eq!(r.only_files, ["a.txt", "docs/*.md"]);
    /// assert_eq!(r.base_prefix().unwrap(), "https://host/pkg/");
    ///
    /// let zip = ManifestRef::parse("/tmp/app.hashsig.zip").unwrap();
    /// assert!(zip.is_archive());
    /// assert_eq!(zip.manifest_name(), "app.hashsig");
    /// ```
    pub fn parse(reference: &str) -> HashsigResult<Self> {
        let reference = reference.trim();

        if reference.is_empty() {
            return Err(HashsigError::InvalidReference {
                reference: reference.to_string(),
                reason: "empty reference".to_string(),
            });
        }

        // The file segment follows the last key.
        let search_from = reference.rfind('|').map(|i| i + 1).unwrap_or(0);
        let (head, only_files) = match reference[search_from..].find('#') {
            Some(i) => {
                let pos = search_from + i;
                let files = split_nonempty(&reference[pos + 1..], '#');
                (&reference[..pos], files)
            }
            None => (reference, Vec::new()),
        };

        let (location, trusted_keys) = match head.find('|') {
            Some(pos) => (&head[..pos], split_nonempty(&head[pos + 1..], '|')),
            None => (head, Vec::new()),
        };

        let location = location.trim();
        if location.is_empty() {
            return Err(HashsigError::InvalidReference {
                reference: reference.to_string(),
                reason: "missing manifest location".to_string(),
            });
        }

        Ok(Self {
            location: location.replace('\\', "/"),
            trusted_keys,
            only_files,
        })
    }

    /// Whether the location is fetched over HTTP(S).
    pub fn is_url(&self) -> bool {
        self.location.contains("://")
    }

    /// Whether the location names a zip archive.
    pub fn is_archive(&self) -> bool {
        self.location.ends_with(ZIP_EXT)
    }

    /// File name of the manifest (the archive name without `.zip`).
    pub fn manifest_name(&self) -> &str {
        let location = self.location.strip_suffix(ZIP_EXT).unwrap_or(&self.location);
        location.rsplit('/').next().unwrap_or(location)
    }

    /// Prefix that files listed in a directly fetched manifest are fetched from.
    pub fn base_prefix(&self) -> HashsigResult<String> {
        if self.is_url() {
            let url = url::Url::parse(&self.location).map_err(|e| {
                HashsigError::InvalidReference {
                    reference: self.location.clone(),
                    reason: e.to_string(),
                }
            })?;
            let base = url.join("./").map_err(|e| HashsigError::InvalidReference {
                reference: self.location.clone(),
                reason: e.to_string(),
            })?;
            return Ok(base.to_string());
        }

        Ok(match self.location.rfind('/') {
            Some(pos) => self.location[..=pos].to_string(),
            None => "./".to_string(),
        })
    }

    /// Trusted key set built from the `|` segment.
    pub fn trusted_key_set(&self) -> HashsigResult<TrustedKeySet> {
        TrustedKeySet::from_encoded(&self.trusted_keys).map_err(|e| {
            HashsigError::InvalidReference {
                reference: self.location.clone(),
                reason: e.to_string(),
            }
        })
    }
}

fn split_nonempty(segment: &str, sep: char) -> Vec<String> {
    segment
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Restriction of a retrieval to a subset of manifest entries.
///
/// Plain names match exactly; names containing `*` or `?` are glob masks.
/// Masks match across `/`.
#[derive(Debug, Clone, Default)]
pub struct FileSelection {
    exact: HashSet<String>,
    globs: Option<GlobSet>,
}

impl FileSelection {
    pub fn new<I, S>(names: I) -> HashsigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = HashSet::new();
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;

        for name in names {
            let name = name.as_ref().trim().replace('\\', "/");
            if name.is_empty() {
                continue;
            }
            if is_glob(&name) {
                let glob = GlobBuilder::new(&name)
                    .literal_separator(false)
                    .build()
                    .map_err(|e| HashsigError::Config {
                        message: format!("invalid file mask {}: {}", name, e),
                    })?;
                builder.add(glob);
                has_globs = true;
            } else {
                exact.insert(name);
            }
        }

        let globs = if has_globs {
            Some(builder.build().map_err(|e| HashsigError::Config {
                message: format!("invalid file masks: {}", e),
            })?)
        } else {
            None
        };

        Ok(Self { exact, globs })
    }

    /// No restriction.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.globs.is_none()
    }

    pub fn matches(&self, short_name: &str) -> bool {
        self.exact.contains(short_name)
            || self
                .globs
                .as_ref()
                .map(|g| g.is_match(short_name))
                .unwrap_or(false)
    }
}

fn is_glob(name: &str) -> bool {
    name.contains('*') || name.contains('?')
}
