//! Manifest entries against the files they describe.

use std::path::Path;

use tracing::debug;

use crate::digest::{EolPolicy, HashAlgorithm};
use crate::error::{HashsigError, HashsigResult};
use crate::manifest::ManifestEntry;

/// What happened to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryChange {
    /// Content changed (or the file was added); carries the fresh entry.
    Updated(ManifestEntry),

    /// File is gone or was explicitly removed.
    Removed,
}

/// Result of comparing entries to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Changed entries by short name, in entry order.
    pub changed: Vec<(String, EntryChange)>,

    /// Entries with every change applied; removed entries are dropped.
    pub merged: Vec<ManifestEntry>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn changed_names(&self) -> Vec<String> {
        self.changed.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn updated(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.changed.iter().filter_map(|(_, change)| match change {
            EntryChange::Updated(entry) => Some(entry),
            EntryChange::Removed => None,
        })
    }

    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().filter_map(|(name, change)| match change {
            EntryChange::Removed => Some(name.as_str()),
            EntryChange::Updated(_) => None,
        })
    }
}

/// Name relative to `root`, `/`-separated. Absolute paths under `root` are
/// accepted.
fn relative_name(root: &Path, name: &str) -> String {
    let name = name.replace('\\', "/");
    let path = Path::new(&name);
    let relative = if path.is_absolute() {
        path.strip_prefix(root).unwrap_or(path)
    } else {
        path
    };
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Compare `entries` with the files under `root`.
///
/// Added names must exist; they enter as unhashed entries and therefore
/// show up as updated. A file that is missing or unreadable is removed; a
/// file whose canonical hash differs from the stored one is updated with
/// its fresh hash and size. Unchanged entries are left as they are.
pub(crate) fn compare_entries(
    root: &Path,
    entries: &[ManifestEntry],
    add: &[String],
    remove: &[String],
    hash_alg: HashAlgorithm,
    eol: &EolPolicy,
) -> HashsigResult<ManifestDiff> {
    let mut working: Vec<ManifestEntry> = entries.to_vec();
    let mut changed = Vec::new();

    for name in add {
        let short_name = relative_name(root, name);
        if short_name.contains(':') {
            return Err(HashsigError::ReservedCharacter { name: short_name });
        }
        let entry = ManifestEntry::unhashed(short_name.clone());
        if !entry.absolute_path(root).is_file() {
            return Err(HashsigError::Io {
                message: format!("can't add file {}, not found", short_name),
            });
        }
        if !working.iter().any(|e| e.short_name == short_name) {
            working.push(entry);
        }
    }

    for name in remove {
        let short_name = relative_name(root, name);
        let before = working.len();
        working.retain(|e| e.short_name != short_name);
        if working.len() != before {
            changed.push((short_name, EntryChange::Removed));
        }
    }

    let mut merged = Vec::with_capacity(working.len());
    for entry in working {
        let path = entry.absolute_path(root);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!(file = %entry.short_name, error = %e, "tracked file missing");
                changed.push((entry.short_name, EntryChange::Removed));
                continue;
            }
        };

        let canonical = eol.canonicalize_for(&content, &entry.short_name);
        let hash_hex = hash_alg.hash_hex(&canonical);
        if hash_hex == entry.hash_hex {
            merged.push(entry);
            continue;
        }

        let fresh = ManifestEntry::new(entry.short_name.clone(), hash_hex, canonical.len() as u64);
        debug!(file = %fresh.short_name, "tracked file changed");
        changed.push((fresh.short_name.clone(), EntryChange::Updated(fresh.clone())));
        merged.push(fresh);
    }

    Ok(ManifestDiff { changed, merged })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_for(root: &Path, name: &str) -> ManifestEntry {
        let content = std::fs::read(root.join(name)).unwrap();
        ManifestEntry::new(
            name,
            HashAlgorithm::Sha256.hash_hex(&content),
            content.len() as u64,
        )
    }

    fn compare(root: &Path, entries: &[ManifestEntry]) -> ManifestDiff {
        compare_entries(
            root,
            entries,
            &[],
            &[],
            HashAlgorithm::Sha256,
            &EolPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_unchanged_tree_has_no_diff() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let entries = vec![entry_for(dir.path(), "a.txt")];

        let diff = compare(dir.path(), &entries);
        assert!(diff.is_empty());
        assert_eq!(diff.merged, entries);
    }

    #[test]
    fn test_modified_and_missing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"c").unwrap();
        let entries = vec![
            entry_for(dir.path(), "a.txt"),
            entry_for(dir.path(), "sub/b.txt"),
            entry_for(dir.path(), "c.txt"),
        ];

        std::fs::write(dir.path().join("sub/b.txt"), b"changed").unwrap();
        std::fs::remove_file(dir.path().join("c.txt")).unwrap();

        let diff = compare(dir.path(), &entries);
        assert_eq!(diff.changed_names(), ["sub/b.txt", "c.txt"]);
        assert_eq!(diff.removed().collect::<Vec<_>>(), ["c.txt"]);

        let updated: Vec<_> = diff.updated().collect();
        assert_eq!(updated[0].size, 7);
        assert_eq!(updated[0].hash_hex, HashAlgorithm::Sha256.hash_hex(b"changed"));

        let merged: Vec<_> = diff.merged.iter().map(|e| e.short_name.as_str()).collect();
        assert_eq!(merged, ["a.txt", "sub/b.txt"]);
    }

    #[test]
    fn test_crlf_only_change_is_not_a_change() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x\ny\n").unwrap();
        let entries = vec![entry_for(dir.path(), "a.txt")];

        std::fs::write(dir.path().join("a.txt"), b"x\r\ny\r\n").unwrap();
        assert!(compare(dir.path(), &entries).is_empty());
    }

    #[test]
    fn test_explicit_add_and_remove() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("new.txt"), b"new").unwrap();
        let entries = vec![entry_for(dir.path(), "a.txt")];

        let diff = compare_entries(
            dir.path(),
            &entries,
            &["new.txt".to_string()],
            &["a.txt".to_string()],
            HashAlgorithm::Sha256,
            &EolPolicy::default(),
        )
        .unwrap();

        assert_eq!(diff.changed.len(), 2);
        assert_eq!(diff.changed[0], ("a.txt".to_string(), EntryChange::Removed));
        assert_eq!(diff.merged.len(), 1);
        assert_eq!(diff.merged[0].short_name, "new.txt");
        assert_eq!(diff.merged[0].size, 3);
    }

    #[test]
    fn test_adding_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = compare_entries(
            dir.path(),
            &[],
            &["ghost.txt".to_string()],
            &[],
            HashAlgorithm::Sha256,
            &EolPolicy::default(),
        );
        assert!(matches!(result, Err(HashsigError::Io { .. })));
    }
}
