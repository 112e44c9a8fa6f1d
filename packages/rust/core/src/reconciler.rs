//! Archive reconciliation: match a page's required printable files against
//! the CAD export archives in its `downloads/` directory.
//!
//! Archive entries are named `<prefix> - <canonical name>`. The suffix after
//! the last `" - "` is matched against the page BOM's required set and, on a
//! hit, extracted under that name into the page's `stls/` directory.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use zip::ZipArchive;

use eva3d_shared::{
    BillOfMaterials, Eva3dError, Page, ReconciliationResult, Result, is_plain_file_name,
};

/// Separator between the CAD export prefix and the canonical file name.
pub const ENTRY_SEPARATOR: &str = " - ";

/// Archives already consumed in the current run.
///
/// Pages sharing a download directory see each archive once: the first page
/// to discover it owns it.
#[derive(Debug, Default)]
pub struct ArchiveSeen {
    seen: HashSet<PathBuf>,
}

impl ArchiveSeen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as consumed. Returns `false` if it already was.
    pub fn insert(&mut self, path: &Path) -> bool {
        self.seen.insert(normalize(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(&normalize(path))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Canonical name carried by an archive entry, if it follows the
/// `<prefix> - <name>` convention.
///
/// Directory entries and suffixes that still contain a path separator
/// never match.
pub fn canonical_entry_name(entry: &str) -> Option<&str> {
    if entry.ends_with('/') {
        return None;
    }
    let (_, suffix) = entry.rsplit_once(ENTRY_SEPARATOR)?;
    if !is_plain_file_name(suffix) {
        return None;
    }
    Some(suffix)
}

/// Unconsumed `*.zip` files in the page's `downloads/` directory, in file
/// name order. Every returned archive is marked in `seen`.
pub fn discover_archives(page: &Page, seen: &mut ArchiveSeen) -> Result<Vec<PathBuf>> {
    let downloads = page.downloads_dir();
    if !downloads.is_dir() {
        return Ok(Vec::new());
    }

    let mut archives = Vec::new();
    for entry in std::fs::read_dir(&downloads).map_err(|e| Eva3dError::io(&downloads, e))? {
        let path = entry.map_err(|e| Eva3dError::io(&downloads, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "zip") {
            archives.push(path);
        }
    }
    archives.sort();

    Ok(archives
        .into_iter()
        .filter(|path| {
            let fresh = seen.insert(path);
            if !fresh {
                debug!(archive = %path.display(), "archive already consumed this run");
            }
            fresh
        })
        .collect())
}

/// Reconcile one page.
///
/// - Archives present: the page `stls/` directory is recreated and filled
///   from the archives.
/// - No archives: the existing `stls/` directory (e.g. from a CAD download)
///   is verified as-is.
///
/// Fails with [`Eva3dError::IncompleteExtraction`] listing every missing
/// name. A page whose extraction fails is left without an `stls/` directory.
#[instrument(skip_all, fields(namespace = %page.namespace))]
pub fn reconcile_page(
    page: &Page,
    bom: Option<&BillOfMaterials>,
    seen: &mut ArchiveSeen,
) -> Result<ReconciliationResult> {
    let archives = discover_archives(page, seen)?;

    let Some(bom) = bom else {
        if archives.is_empty() {
            debug!("page has neither BOM nor archives");
            return Ok(ReconciliationResult {
                page: page.namespace.clone(),
                ..Default::default()
            });
        }
        return Err(Eva3dError::validation(format!(
            "page {} has archives in {} but no bom directory",
            page.namespace,
            page.downloads_dir().display()
        )));
    };

    let mut result = ReconciliationResult {
        page: page.namespace.clone(),
        required: bom.required_files(),
        archives: archives.clone(),
        ..Default::default()
    };

    let stls = page.stls_dir();
    if archives.is_empty() {
        result.extracted = existing_files(&stls)?;
    } else {
        recreate_dir(&stls)?;
        for archive in &archives {
            if let Err(e) = extract_matching(archive, &stls, &mut result) {
                let _ = std::fs::remove_dir_all(&stls);
                return Err(e);
            }
        }
    }

    let missing = result.missing();
    if !missing.is_empty() {
        if !archives.is_empty() {
            let _ = std::fs::remove_dir_all(&stls);
        }
        warn!(missing = ?missing, "page is missing printable files");
        return Err(Eva3dError::IncompleteExtraction {
            page: page.namespace.clone(),
            missing,
        });
    }

    info!(
        required = result.required.len(),
        archives = result.archives.len(),
        duplicates = result.duplicates.len(),
        "page reconciled"
    );
    Ok(result)
}

fn extract_matching(archive: &Path, stls: &Path, result: &mut ReconciliationResult) -> Result<()> {
    let archive_err = |e: zip::result::ZipError| {
        Eva3dError::Archive(format!("{}: {e}", archive.display()))
    };

    let file = File::open(archive).map_err(|e| Eva3dError::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(archive_err)?;
    debug!(archive = %archive.display(), entries = zip.len(), "extracting");

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(archive_err)?;
        let entry_name = entry.name().to_string();
        let Some(canonical) = canonical_entry_name(&entry_name) else {
            continue;
        };
        if !result.required.contains(canonical) {
            continue;
        }

        let target = stls.join(canonical);
        let mut out = File::create(&target).map_err(|e| Eva3dError::io(&target, e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| Eva3dError::Archive(format!("{}: {entry_name}: {e}", archive.display())))?;

        if !result.extracted.insert(canonical.to_string()) {
            warn!(file = canonical, archive = %archive.display(), "duplicate entry, keeping the later one");
            result.duplicates.insert(canonical.to_string());
        }
    }
    Ok(())
}

fn recreate_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| Eva3dError::io(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| Eva3dError::io(dir, e))
}

fn existing_files(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(dir).map_err(|e| Eva3dError::io(dir, e))? {
        let entry = entry.map_err(|e| Eva3dError::io(dir, e))?;
        if entry.path().is_file() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}
