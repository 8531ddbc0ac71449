//! Zip archives as manifest sources and as build output.
//!
//! A fetched archive is persisted to a [`TempArchive`] whose file is removed
//! when the value is dropped. Its members are addressed as
//! `zip://{temp path}#{member}` locations understood by [`crate::Fetcher`].

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::{HashsigError, HashsigResult};
use crate::fetch::ZIP_SCHEME;
use crate::manifest::{Manifest, MANIFEST_EXT};

/// Downloaded archive on disk, deleted on drop.
#[derive(Debug)]
pub struct TempArchive {
    file: NamedTempFile,
}

impl TempArchive {
    /// Persist archive bytes to a fresh temporary file.
    pub fn create(name_hint: &str, bytes: &[u8]) -> HashsigResult<Self> {
        let prefix: String = name_hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-' || *c == '_')
            .collect();

        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".zip")
            .tempfile()
            .map_err(|e| HashsigError::io("failed to create temporary archive", e))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| HashsigError::io("failed to write temporary archive", e))?;

        debug!(path = %file.path().display(), size = bytes.len(), "stored temporary archive");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// `zip://{path}#` prefix for member locations.
    pub fn prefix(&self) -> String {
        format!(
            "{}{}#",
            ZIP_SCHEME,
            self.path().to_string_lossy().replace('\\', "/")
        )
    }

    /// Find or synthesize the manifest inside the archive.
    pub fn locate_manifest(&self, preferred_name: &str) -> HashsigResult<ArchiveManifest> {
        locate_manifest(self.path(), preferred_name)
    }
}

/// Manifest found inside an archive.
#[derive(Debug, Clone)]
pub enum ArchiveManifest {
    /// Root member holding a manifest.
    Member(String),

    /// No manifest member; an unsigned list of every file. `base` is the
    /// common top-level directory (`pkg/`) stripped from the names, or empty.
    Synthesized { base: String, manifest: Manifest },
}

/// Read one member of a zip archive.
pub fn read_member(archive_path: &Path, member: &str) -> HashsigResult<Vec<u8>> {
    let file = File::open(archive_path).map_err(|e| {
        HashsigError::io(format!("failed to open archive {}", archive_path.display()), e)
    })?;
    let mut archive = ZipArchive::new(file)?;
    let mut entry = archive.by_name(member)?;

    let mut buf = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry
        .read_to_end(&mut buf)
        .map_err(|e| HashsigError::Archive {
            message: format!("failed to read member {}: {}", member, e),
        })?;
    Ok(buf)
}

/// Find the manifest member of an archive.
///
/// `preferred_name` wins when present at the root, then any root
/// `*.hashsig` member. Without one, every file member is listed in an
/// unsigned manifest, relative to the common top-level directory if all
/// members share one.
pub fn locate_manifest(
    archive_path: &Path,
    preferred_name: &str,
) -> HashsigResult<ArchiveManifest> {
    let file = File::open(archive_path).map_err(|e| {
        HashsigError::io(format!("failed to open archive {}", archive_path.display()), e)
    })?;
    let mut archive = ZipArchive::new(file)?;

    let mut files = Vec::new();
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if !entry.is_dir() {
            files.push(entry.name().replace('\\', "/"));
        }
    }
    files.sort();

    let root_manifests: Vec<&String> = files
        .iter()
        .filter(|name| !name.contains('/') && name.ends_with(MANIFEST_EXT))
        .collect();

    if let Some(name) = root_manifests.iter().find(|name| name.as_str() == preferred_name) {
        return Ok(ArchiveManifest::Member((*name).clone()));
    }
    if let Some(name) = root_manifests.first() {
        return Ok(ArchiveManifest::Member((*name).clone()));
    }

    let base = common_top_dir(&files).unwrap_or_default();
    let names: Vec<String> = files
        .iter()
        .map(|name| name[base.len()..].to_string())
        .filter(|name| !name.is_empty())
        .collect();

    debug!(
        archive = %archive_path.display(),
        base = %base,
        files = names.len(),
        "no manifest in archive, listing members"
    );

    Ok(ArchiveManifest::Synthesized {
        base,
        manifest: Manifest::list(names),
    })
}

/// `top/` when every name lives under the same top-level directory.
fn common_top_dir(names: &[String]) -> Option<String> {
    let first = names.first()?;
    let (top, _) = first.split_once('/')?;
    let prefix = format!("{}/", top);
    names
        .iter()
        .all(|name| name.starts_with(&prefix))
        .then_some(prefix)
}

/// Write files into a zip at `zip_path`. Each item pairs the `/`-separated
/// archive name with the file it is read from. Directory entries are added
/// once per intermediate folder. Timestamps are fixed so equal inputs give
/// equal archives.
pub fn write_package<I>(zip_path: &Path, files: I) -> HashsigResult<usize>
where
    I: IntoIterator<Item = (String, PathBuf)>,
{
    let file = File::create(zip_path).map_err(|e| {
        HashsigError::io(format!("failed to create archive {}", zip_path.display()), e)
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut dirs = HashSet::new();
    let mut count = 0;

    for (name, source) in files {
        let name = name.replace('\\', "/");

        let mut dir = String::new();
        let parts: Vec<&str> = name.split('/').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            dir.push_str(part);
            dir.push('/');
            if dirs.insert(dir.clone()) {
                zip.add_directory(dir.clone(), options)?;
            }
        }

        let content = std::fs::read(&source)
            .map_err(|e| HashsigError::io(format!("failed to read {}", source.display()), e))?;

        zip.start_file(name.clone(), options)?;
        zip.write_all(&content).map_err(|e| HashsigError::Archive {
            message: format!("failed to write {} into archive: {}", name, e),
        })?;
        count += 1;
    }

    zip.finish()?;
    debug!(archive = %zip_path.display(), files = count, "wrote package archive");
    Ok(count)
}
