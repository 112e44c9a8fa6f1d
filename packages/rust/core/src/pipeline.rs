//! End-to-end flows: unpack, download, superbom, vendor.
//!
//! Page processing in the unpack flow is sequential; only the CAD download
//! fans out, and its results are persisted one page at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use eva3d_artifacts::PackageResult;
use eva3d_cad::{Downloader, FetchProgress, FetchRequest, FetchedAssembly};
use eva3d_shared::{
    BillOfMaterials, Eva3dError, Page, PurchaseLine, ReconciliationResult,
    ResolvedSuperbomEntry, Result, SuperbomEntry, VendorMapping,
};
use eva3d_storage::Storage;

use crate::cache::BomCache;
use crate::reconciler::{ArchiveSeen, reconcile_page};
use crate::superbom::rebuild_superbom;
use crate::vendor::{purchasing_list, resolve_superbom};

/// Where the project-wide printable tree and its archive are written.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub tree_root: PathBuf,
    pub archive: PathBuf,
}

/// Result of [`unpack_all`].
#[derive(Debug)]
pub struct UnpackReport {
    /// One result per page, in page order.
    pub pages: Vec<ReconciliationResult>,
    pub package: PackageResult,
    pub elapsed: Duration,
}

/// Result of [`download_pages`].
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// Namespaces fetched and persisted.
    pub fetched: Vec<String>,
    /// Namespaces that failed, with the reason.
    pub failed: Vec<(String, Eva3dError)>,
    pub elapsed: Duration,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Reconcile every page, store page BOMs, then package the printable tree.
///
/// Pages are processed in order and the first failure stops the run: no
/// further page is touched and nothing is packaged.
#[instrument(skip_all, fields(pages = pages.len()))]
pub async fn unpack_all(
    pages: &[Page],
    storage: &Storage,
    cache: &mut BomCache,
    output: &OutputPaths,
) -> Result<UnpackReport> {
    let start = Instant::now();
    let stored = stored_boms_by_namespace(storage).await?;
    let mut seen = ArchiveSeen::new();
    let mut results = Vec::with_capacity(pages.len());

    for page in pages {
        let local = cache.get_or_load(page)?.cloned();
        // Pages without a bom/ directory are checked against the BOM a
        // download stored for them.
        let bom = local
            .clone()
            .or_else(|| stored.get(&page.namespace).cloned());
        let result = reconcile_page(page, bom.as_ref(), &mut seen)?;

        if let Some(local) = &local {
            storage.replace_bom(local).await?;
        }
        results.push(result);
    }

    let package =
        eva3d_artifacts::package(pages, &output.tree_root, &output.archive)?;
    let elapsed = start.elapsed();

    info!(
        pages = results.len(),
        files = package.file_count,
        elapsed_ms = elapsed.as_millis() as u64,
        "unpack complete"
    );

    Ok(UnpackReport {
        pages: results,
        package,
        elapsed,
    })
}

/// Stored BOMs merged per namespace, rows in insertion order.
async fn stored_boms_by_namespace(storage: &Storage) -> Result<HashMap<String, BillOfMaterials>> {
    let mut merged: HashMap<String, BillOfMaterials> = HashMap::new();
    for bom in storage.list_boms().await? {
        match merged.get_mut(&bom.namespace) {
            Some(existing) => existing.items.extend(bom.items),
            None => {
                merged.insert(bom.namespace.clone(), bom);
            }
        }
    }
    Ok(merged)
}

/// Narrow `pages` to one namespace and/or pages whose directory lies under `path`.
pub fn select_pages(pages: &[Page], namespace: Option<&str>, path: Option<&Path>) -> Vec<Page> {
    pages
        .iter()
        .filter(|page| namespace.is_none_or(|ns| page.namespace == ns))
        .filter(|page| path.is_none_or(|p| page.dir.starts_with(p)))
        .cloned()
        .collect()
}

/// Fetch every page that has a CAD reference and persist the results.
///
/// Stored BOMs of each page are deleted before fetching. A failed page is
/// reported and leaves the other pages untouched.
#[instrument(skip_all, fields(pages = pages.len()))]
pub async fn download_pages(
    pages: &[Page],
    storage: &Storage,
    downloader: &Downloader,
    progress: Arc<dyn FetchProgress>,
) -> Result<DownloadReport> {
    let start = Instant::now();
    let by_namespace: HashMap<&str, &Page> =
        pages.iter().map(|p| (p.namespace.as_str(), p)).collect();

    let mut requests = Vec::new();
    for page in pages {
        let Some(reference) = &page.cad else {
            continue;
        };
        let removed = storage.delete_boms_for_namespace(&page.namespace).await?;
        if removed > 0 {
            info!(namespace = %page.namespace, removed, "cleared stored BOMs");
        }
        requests.push(FetchRequest {
            namespace: page.namespace.clone(),
            reference: reference.clone(),
        });
    }

    let mut report = DownloadReport::default();
    for outcome in downloader.fetch_all(requests, progress).await {
        let persisted = match (outcome.result, by_namespace.get(outcome.namespace.as_str())) {
            (Ok(assembly), Some(page)) => persist_assembly(page, &assembly, storage).await,
            (Ok(_), None) => Err(Eva3dError::fetch(&outcome.namespace, "no page for namespace")),
            (Err(e), _) => Err(e),
        };
        match persisted {
            Ok(()) => report.fetched.push(outcome.namespace),
            Err(e) => {
                warn!(namespace = %outcome.namespace, error = %e, "page download failed");
                report.failed.push((outcome.namespace, e));
            }
        }
    }

    report.elapsed = start.elapsed();
    info!(
        fetched = report.fetched.len(),
        failed = report.failed.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "download complete"
    );
    Ok(report)
}

/// Write the preview image and part exports into the page, store its BOM.
async fn persist_assembly(page: &Page, assembly: &FetchedAssembly, storage: &Storage) -> Result<()> {
    let image_path = page.image_path();
    if let Some(parent) = image_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Eva3dError::io(parent, e))?;
    }
    std::fs::write(&image_path, &assembly.image).map_err(|e| Eva3dError::io(&image_path, e))?;

    let stls = page.stls_dir();
    if stls.exists() {
        std::fs::remove_dir_all(&stls).map_err(|e| Eva3dError::io(&stls, e))?;
    }
    std::fs::create_dir_all(&stls).map_err(|e| Eva3dError::io(&stls, e))?;
    for part in &assembly.parts {
        let target = stls.join(&part.file_name);
        std::fs::write(&target, &part.data).map_err(|e| Eva3dError::io(&target, e))?;
    }

    storage.insert_bom(&assembly.bom).await?;
    info!(
        namespace = %page.namespace,
        parts = assembly.parts.len(),
        items = assembly.bom.items.len(),
        "page persisted"
    );
    Ok(())
}

/// The current superbom.
pub async fn superbom(storage: &Storage) -> Result<Vec<SuperbomEntry>> {
    rebuild_superbom(storage).await
}

/// Load a vendor mapping, refreshing storage from `mapping_file` when given.
///
/// Without a file the stored mapping is used; an empty stored mapping is an
/// error.
#[instrument(skip_all, fields(vendor = %vendor))]
pub async fn vendor_mapping(
    storage: &Storage,
    vendor: &str,
    mapping_file: Option<&Path>,
) -> Result<VendorMapping> {
    if let Some(path) = mapping_file {
        let mapping = eva3d_bom::parse_vendor_mapping_file(path, vendor)?;
        storage.replace_vendor_mapping(&mapping).await?;
        info!(rows = mapping.len(), "vendor mapping loaded");
        return Ok(mapping);
    }

    let mapping = storage.load_vendor_mapping(vendor).await?;
    if mapping.is_empty() {
        return Err(Eva3dError::validation(format!(
            "no mapping stored for vendor '{vendor}'; pass a mapping file"
        )));
    }
    Ok(mapping)
}

/// Superbom joined with the vendor's mapping.
pub async fn resolved_superbom(
    storage: &Storage,
    vendor: &str,
    mapping_file: Option<&Path>,
) -> Result<Vec<ResolvedSuperbomEntry>> {
    let mapping = vendor_mapping(storage, vendor, mapping_file).await?;
    let entries = rebuild_superbom(storage).await?;
    resolve_superbom(&entries, &mapping)
}

/// Purchasing list for one vendor.
pub async fn purchasing(
    storage: &Storage,
    vendor: &str,
    mapping_file: Option<&Path>,
) -> Result<Vec<PurchaseLine>> {
    let mapping = vendor_mapping(storage, vendor, mapping_file).await?;
    let entries = rebuild_superbom(storage).await?;
    purchasing_list(&entries, &mapping)
}
