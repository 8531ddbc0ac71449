//! Archive-mode retrieval: packaged builds, manifest autodetection and the
//! temporary archive copy.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hashsig::{
    BuildEngine, BuildOptions, Ed25519Signer, Fetcher, HashsigError, ManifestTarget,
    RetrievalEngine, RetrieveOptions,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn engine() -> RetrievalEngine {
    RetrievalEngine::new(Fetcher::new(Duration::from_secs(5)).expect("fetcher"))
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut zip = ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(name.to_string(), options).unwrap();
        } else {
            zip.start_file(name.to_string(), options).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Temp files left behind for an archive named `manifest_name`.
fn leftover_temp_files(manifest_name: &str) -> Vec<String> {
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| name.starts_with(manifest_name))
                .collect()
        })
        .unwrap_or_default()
}

fn unique_name(stem: &str) -> String {
    format!("{}{}", stem, rand::random::<u32>())
}

#[tokio::test]
async fn test_packaged_build_retrieves_from_archive() {
    let src = TempDir::new().unwrap();
    std::fs::create_dir(src.path().join("lib")).unwrap();
    std::fs::write(src.path().join("main.txt"), "main\n").unwrap();
    std::fs::write(src.path().join("lib/util.txt"), "util\n").unwrap();

    let name = unique_name("pack");
    let target = ManifestTarget::resolve(src.path(), Some(&name)).unwrap();
    let outcome = BuildEngine::new(Arc::new(Ed25519Signer::generate()))
        .build(&target, &BuildOptions::default(), true)
        .expect("build");
    let zip_path = outcome.zip_path.expect("zip requested");

    // Files only exist inside the archive.
    let dest = TempDir::new().unwrap();
    let moved = dest.path().join(zip_path.file_name().unwrap());
    std::fs::rename(&zip_path, &moved).unwrap();
    drop(src);

    let out = TempDir::new().unwrap();
    let options = RetrieveOptions::new()
        .save_to(out.path())
        .zip_only()
        .base_url("https://ignored.invalid/");
    let result = engine()
        .retrieve(&moved.display().to_string(), &options)
        .await
        .expect("retrieve");

    assert!(result.is_complete(), "{:?}", result.error_messages);
    assert_eq!(result.success.keys().collect::<Vec<_>>(), ["lib/util.txt", "main.txt"]);
    assert_eq!(std::fs::read_to_string(out.path().join("lib/util.txt")).unwrap(), "util\n");
    assert!(result.signer_key.is_some());
    assert!(leftover_temp_files(&format!("{}.hashsig", name)).is_empty());
}

#[tokio::test]
async fn test_archive_without_manifest_lists_members() {
    let dir = TempDir::new().unwrap();
    let name = unique_name("bare");
    let zip_path = dir.path().join(format!("{}.hashsig.zip", name));
    write_zip(
        &zip_path,
        &[
            ("pkg/", ""),
            ("pkg/a.txt", "a"),
            ("pkg/sub/", ""),
            ("pkg/sub/b.txt", "b"),
        ],
    );

    let out = TempDir::new().unwrap();
    let result = engine()
        .retrieve(
            &zip_path.display().to_string(),
            &RetrieveOptions::new().save_to(out.path()),
        )
        .await
        .expect("retrieve");

    assert_eq!(result.success.keys().collect::<Vec<_>>(), ["a.txt", "sub/b.txt"]);
    assert_eq!(std::fs::read_to_string(out.path().join("sub/b.txt")).unwrap(), "b");
    assert!(!out.path().join("pkg").exists());
    assert_eq!(result.signer_key, None);
}

#[tokio::test]
async fn test_unsigned_archive_rejected_under_trust_and_cleaned_up() {
    let dir = TempDir::new().unwrap();
    let name = unique_name("reject");
    let zip_path = dir.path().join(format!("{}.hashsig.zip", name));
    write_zip(&zip_path, &[("a.txt", "a")]);

    let key = Ed25519Signer::generate().public_key_base64();
    let reference = format!("{}|{}", zip_path.display(), key);
    let result = engine()
        .retrieve(&reference, &RetrieveOptions::new().in_memory_only())
        .await;

    assert!(matches!(result, Err(HashsigError::UntrustedKey { .. })));
    assert!(leftover_temp_files(&format!("{}.hashsig", name)).is_empty());
}

#[tokio::test]
async fn test_corrupt_archive_is_fatal() {
    let dir = TempDir::new().unwrap();
    let zip_path = dir.path().join("broken.hashsig.zip");
    std::fs::write(&zip_path, b"not a zip").unwrap();

    let result = engine()
        .retrieve(
            &zip_path.display().to_string(),
            &RetrieveOptions::new().in_memory_only(),
        )
        .await;
    assert!(matches!(result, Err(HashsigError::Archive { .. })));
}

#[tokio::test]
async fn test_archive_file_subset() {
    let dir = TempDir::new().unwrap();
    let zip_path = dir.path().join("subset.hashsig.zip");
    write_zip(&zip_path, &[("a.txt", "a"), ("b.md", "b"), ("c.md", "c")]);

    let reference = format!("{}#*.md", zip_path.display());
    let result = engine()
        .retrieve(&reference, &RetrieveOptions::new().in_memory_only())
        .await
        .unwrap();
    assert_eq!(result.success.keys().collect::<Vec<_>>(), ["b.md", "c.md"]);
}
