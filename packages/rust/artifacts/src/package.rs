//! Flat printable tree and its deflate archive.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use eva3d_shared::{Eva3dError, Page, Result};

/// Summary of a written package archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageResult {
    /// Number of file entries in the archive.
    pub file_count: usize,
    pub archive_path: PathBuf,
    /// Archive size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the archive file.
    pub sha256: String,
}

/// Gather and archive in one step.
pub fn package(pages: &[Page], tree_root: &Path, archive_path: &Path) -> Result<PackageResult> {
    gather_tree(pages, tree_root)?;
    archive_tree(tree_root, archive_path)
}

/// Recreate `tree_root` and copy every page's `stls/` files into it, flat.
///
/// Pages are copied in order; a file name already present is overwritten.
/// Returns the number of distinct files in the tree.
#[instrument(skip_all, fields(tree = %tree_root.display(), pages = pages.len()))]
pub fn gather_tree(pages: &[Page], tree_root: &Path) -> Result<usize> {
    if tree_root.exists() {
        std::fs::remove_dir_all(tree_root).map_err(|e| Eva3dError::io(tree_root, e))?;
    }
    std::fs::create_dir_all(tree_root).map_err(|e| Eva3dError::io(tree_root, e))?;

    let mut names = BTreeSet::new();
    for page in pages {
        let stls = page.stls_dir();
        if !stls.is_dir() {
            debug!(namespace = %page.namespace, "page has no stls directory");
            continue;
        }

        for source in sorted_files(&stls)? {
            let Some(name) = source.file_name() else {
                continue;
            };
            let name = name.to_string_lossy().into_owned();
            if !names.insert(name.clone()) {
                warn!(namespace = %page.namespace, file = %name, "overwriting file from an earlier page");
            }
            let target = tree_root.join(&name);
            std::fs::copy(&source, &target).map_err(|e| Eva3dError::io(&source, e))?;
        }
    }

    info!(files = names.len(), "printable tree gathered");
    Ok(names.len())
}

/// Zip every file under `tree_root` with deflate, paths relative to the root.
///
/// Entries are written in sorted path order. The archive is written to a
/// temporary sibling and renamed into place.
#[instrument(skip_all, fields(tree = %tree_root.display(), archive = %archive_path.display()))]
pub fn archive_tree(tree_root: &Path, archive_path: &Path) -> Result<PackageResult> {
    if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Eva3dError::io(parent, e))?;
    }
    let temp = archive_path.with_extension("zip.tmp");

    let file = File::create(&temp).map_err(|e| Eva3dError::io(&temp, e))?;
    let mut zip = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut file_count = 0;
    for entry in WalkDir::new(tree_root).sort_by_file_name() {
        let entry = entry.map_err(|e| Eva3dError::Archive(format!("walking {}: {e}", tree_root.display())))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path == temp || path == archive_path {
            continue;
        }

        let relative = path
            .strip_prefix(tree_root)
            .map_err(|e| Eva3dError::Archive(format!("{}: {e}", path.display())))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let data = std::fs::read(path).map_err(|e| Eva3dError::io(path, e))?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| Eva3dError::Archive(format!("{name}: {e}")))?;
        zip.write_all(&data)
            .map_err(|e| Eva3dError::io(&temp, e))?;
        file_count += 1;
    }

    zip.finish()
        .map_err(|e| Eva3dError::Archive(format!("{}: {e}", temp.display())))?;
    std::fs::rename(&temp, archive_path).map_err(|e| Eva3dError::io(archive_path, e))?;

    let bytes = std::fs::read(archive_path).map_err(|e| Eva3dError::io(archive_path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = format!("{:x}", hasher.finalize());

    info!(files = file_count, size = bytes.len(), "archive written");

    Ok(PackageResult {
        file_count,
        archive_path: archive_path.to_path_buf(),
        size: bytes.len() as u64,
        sha256,
    })
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Eva3dError::io(dir, e))? {
        let entry = entry.map_err(|e| Eva3dError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("eva3d-package-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn page(root: &Path, namespace: &str, files: &[(&str, &str)]) -> Page {
        let dir = root.join(namespace);
        std::fs::create_dir_all(dir.join("stls")).unwrap();
        for (name, body) in files {
            std::fs::write(dir.join("stls").join(name), body).unwrap();
        }
        Page {
            namespace: namespace.into(),
            dir,
            cad: None,
            title: None,
        }
    }

    #[test]
    fn gathers_flat_and_last_page_wins() {
        let root = temp_dir();
        let pages = vec![
            page(&root, "a", &[("Bracket.stl", "from a"), ("Mount.stl", "m")]),
            page(&root, "b", &[("Bracket.stl", "from b")]),
        ];
        let tree = root.join("stls");
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("stale.stl"), "old").unwrap();

        let count = gather_tree(&pages, &tree).unwrap();

        assert_eq!(count, 2);
        assert!(!tree.join("stale.stl").exists(), "tree is recreated");
        assert_eq!(std::fs::read_to_string(tree.join("Bracket.stl")).unwrap(), "from b");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn archive_holds_deflated_relative_entries() {
        let root = temp_dir();
        let pages = vec![page(&root, "a", &[("Mount.stl", "m"), ("Bracket.stl", "b")])];
        let tree = root.join("stls");
        let archive_path = root.join("out").join("stls.zip");

        let result = package(&pages, &tree, &archive_path).unwrap();

        assert_eq!(result.file_count, 2);
        assert_eq!(result.sha256.len(), 64);
        assert_eq!(result.size, std::fs::metadata(&archive_path).unwrap().len());
        assert!(!archive_path.with_extension("zip.tmp").exists());

        let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        let names: Vec<_> = archive.file_names().map(String::from).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["Bracket.stl", "Mount.stl"]);

        let mut entry = archive.by_name("Bracket.stl").unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Deflated);
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "b");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn repackaging_unchanged_pages_keeps_the_file_set() {
        let root = temp_dir();
        let pages = vec![page(&root, "a", &[("Bracket.stl", "b")])];
        let tree = root.join("stls");
        let archive_path = root.join("stls.zip");

        let first = package(&pages, &tree, &archive_path).unwrap();
        let second = package(&pages, &tree, &archive_path).unwrap();
        assert_eq!(first.file_count, 1);
        assert_eq!(second.file_count, 1);

        let _ = std::fs::remove_dir_all(&root);
    }
}
