//! Concurrent fetch orchestration over a [`CadService`].
//!
//! Page fetches are bounded by a semaphore. Within one page, the preview image
//! and BOM are requested together, then every printable part is exported
//! concurrently. Any failure abandons the whole page.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use eva3d_shared::{
    BillOfMaterials, CadReference, Eva3dError, FetchConfig, Result, is_plain_file_name,
};

use crate::service::{CadService, PartSource};

/// One page to fetch from the CAD service.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub namespace: String,
    pub reference: CadReference,
}

/// Exported mesh of one printable part.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedPart {
    pub name: String,
    /// Canonical file name (`<name>.stl`).
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Everything fetched for one page.
#[derive(Debug, Clone)]
pub struct FetchedAssembly {
    pub namespace: String,
    pub image: Vec<u8>,
    pub bom: BillOfMaterials,
    /// One entry per distinct printable file, in BOM order.
    pub parts: Vec<ExportedPart>,
}

/// Result of fetching a single page.
#[derive(Debug)]
pub struct PageFetchOutcome {
    pub namespace: String,
    pub result: Result<FetchedAssembly>,
}

/// Progress callbacks for fetch operations.
pub trait FetchProgress: Send + Sync {
    /// Called when a page acquires a fetch slot.
    fn page_started(&self, namespace: &str);
    /// Called after each part export completes.
    fn part_exported(&self, namespace: &str, file_name: &str);
    /// Called once per page, whether it succeeded or not.
    fn page_finished(&self, namespace: &str, ok: bool);
}

/// No-op progress reporter.
pub struct SilentFetchProgress;

impl FetchProgress for SilentFetchProgress {
    fn page_started(&self, _namespace: &str) {}
    fn part_exported(&self, _namespace: &str, _file_name: &str) {}
    fn page_finished(&self, _namespace: &str, _ok: bool) {}
}

/// Fetches page assemblies from a CAD service with bounded concurrency.
#[derive(Clone)]
pub struct Downloader {
    service: Arc<dyn CadService>,
    config: FetchConfig,
}

impl Downloader {
    pub fn new(service: Arc<dyn CadService>, config: FetchConfig) -> Self {
        Self { service, config }
    }

    /// Fetch every request, at most `concurrency` pages at a time.
    ///
    /// Outcomes are returned in request order. A failed page never cancels
    /// its siblings.
    #[instrument(skip_all, fields(pages = requests.len(), concurrency = self.config.concurrency))]
    pub async fn fetch_all(
        &self,
        requests: Vec<FetchRequest>,
        progress: Arc<dyn FetchProgress>,
    ) -> Vec<PageFetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let downloader = self.clone();
            let sem = semaphore.clone();
            let progress = progress.clone();
            let namespace = request.namespace.clone();

            handles.push((
                namespace,
                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.map_err(|_| {
                        Eva3dError::fetch(&request.namespace, "fetch scheduler closed")
                    })?;
                    progress.page_started(&request.namespace);
                    let result = downloader.fetch_page(&request, progress.as_ref()).await;
                    progress.page_finished(&request.namespace, result.is_ok());
                    result
                }),
            ));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (namespace, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Eva3dError::fetch(&namespace, format!("fetch task failed: {e}"))),
            };
            if let Err(e) = &result {
                warn!(namespace = %namespace, error = %e, "page fetch failed");
            }
            outcomes.push(PageFetchOutcome { namespace, result });
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(fetched = outcomes.len() - failed, failed, "fetch complete");
        outcomes
    }

    /// Fetch one page: image and BOM together, then all printable exports.
    #[instrument(skip_all, fields(namespace = %request.namespace, reference = %request.reference))]
    pub async fn fetch_page(
        &self,
        request: &FetchRequest,
        progress: &dyn FetchProgress,
    ) -> Result<FetchedAssembly> {
        let namespace = request.namespace.as_str();
        let reference = &request.reference;
        let limit = self.config.request_timeout;

        let (image, cad_bom) = tokio::try_join!(
            with_timeout(
                format!("preview image for {namespace}"),
                limit,
                self.service.get_shaded_view(reference),
            ),
            with_timeout(
                format!("BOM for {namespace}"),
                limit,
                self.service.get_assembly_bom(reference),
            ),
        )
        .map_err(|e| as_fetch_failure(namespace, e))?;

        debug!(rows = cad_bom.items.len(), "BOM received");

        let mut seen = HashSet::new();
        let mut exports = Vec::new();
        for row in cad_bom.printable() {
            let file_name = row.item.canonical_file_name();
            if !is_plain_file_name(&row.item.name) || !is_plain_file_name(&file_name) {
                return Err(Eva3dError::fetch(
                    namespace,
                    format!("printable part name {:?} is not a plain file name", row.item.name),
                ));
            }
            if !seen.insert(file_name.clone()) {
                continue;
            }
            let source = row.source.clone().ok_or_else(|| {
                Eva3dError::fetch(
                    namespace,
                    format!("printable part {} has no export source", row.item.name),
                )
            })?;
            exports.push((row.item.name.clone(), file_name, source));
        }

        let parts = self
            .export_parts(namespace, exports, progress)
            .await
            .map_err(|e| as_fetch_failure(namespace, e))?;

        Ok(FetchedAssembly {
            namespace: namespace.to_string(),
            image,
            bom: cad_bom.to_bill_of_materials(namespace, &reference.to_string()),
            parts,
        })
    }

    /// Export every part concurrently; the first failure aborts the rest.
    async fn export_parts(
        &self,
        namespace: &str,
        exports: Vec<(String, String, PartSource)>,
        progress: &dyn FetchProgress,
    ) -> Result<Vec<ExportedPart>> {
        let limit = self.config.request_timeout;
        let mut set = JoinSet::new();

        for (index, (name, file_name, source)) in exports.into_iter().enumerate() {
            let service = self.service.clone();
            let what = format!("export of {file_name} for {namespace}");
            set.spawn(async move {
                let data = with_timeout(what, limit, service.export_part(&source)).await?;
                Ok::<_, Eva3dError>((
                    index,
                    ExportedPart {
                        name,
                        file_name,
                        data,
                    },
                ))
            });
        }

        let mut parts = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            let outcome = joined
                .map_err(|e| Eva3dError::fetch(namespace, format!("export task failed: {e}")))
                .and_then(|r| r);
            match outcome {
                Ok((index, part)) => {
                    progress.part_exported(namespace, &part.file_name);
                    parts.push((index, part));
                }
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        parts.sort_by_key(|(index, _)| *index);
        Ok(parts.into_iter().map(|(_, part)| part).collect())
    }
}

/// Run `fut`, mapping an elapsed deadline to [`Eva3dError::Timeout`].
async fn with_timeout<T>(
    what: String,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Eva3dError::Timeout {
            what,
            seconds: limit.as_secs(),
        }),
    }
}

/// Attribute an error to a page; timeouts and fetch failures pass through.
fn as_fetch_failure(namespace: &str, err: Eva3dError) -> Eva3dError {
    match err {
        Eva3dError::Timeout { .. } | Eva3dError::FetchFailure { .. } => err,
        other => Eva3dError::fetch(namespace, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{CadBom, CadBomItem};
    use async_trait::async_trait;
    use eva3d_shared::{LineItem, WvmType};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory CAD service with configurable failures and latency.
    #[derive(Default)]
    struct MockService {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_bom_for: Option<String>,
        fail_export_of: Option<String>,
        hang_image: bool,
        delay: Duration,
    }

    fn source(part_id: &str) -> PartSource {
        PartSource {
            document_id: "d".into(),
            wvm_type: WvmType::Workspace,
            wvm_id: "w".into(),
            element_id: "e".into(),
            part_id: part_id.into(),
            configuration: String::new(),
        }
    }

    fn row(name: &str, material: &str, part_id: Option<&str>) -> CadBomItem {
        CadBomItem {
            item: LineItem {
                name: name.into(),
                quantity: 1.0,
                material: material.into(),
            },
            source: part_id.map(source),
        }
    }

    #[async_trait]
    impl CadService for MockService {
        async fn get_assembly_bom(&self, reference: &CadReference) -> Result<CadBom> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_bom_for.as_deref() == Some(reference.element_id.as_str()) {
                return Err(Eva3dError::Network("HTTP 500".into()));
            }
            Ok(CadBom {
                items: vec![
                    row("Bracket", "PETG", Some("p1")),
                    row("M3x10", "Steel", None),
                    row("Mount", "petg", Some("p2")),
                    row("Bracket", "PETG", Some("p1")),
                ],
            })
        }

        async fn get_shaded_view(&self, _reference: &CadReference) -> Result<Vec<u8>> {
            if self.hang_image {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(b"png".to_vec())
        }

        async fn export_part(&self, source: &PartSource) -> Result<Vec<u8>> {
            if self.fail_export_of.as_deref() == Some(source.part_id.as_str()) {
                return Err(Eva3dError::Network("export refused".into()));
            }
            Ok(source.part_id.as_bytes().to_vec())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        finished: Mutex<Vec<(String, bool)>>,
    }

    impl FetchProgress for RecordingProgress {
        fn page_started(&self, _namespace: &str) {}
        fn part_exported(&self, _namespace: &str, _file_name: &str) {}
        fn page_finished(&self, namespace: &str, ok: bool) {
            self.finished.lock().unwrap().push((namespace.to_string(), ok));
        }
    }

    fn request(n: usize) -> FetchRequest {
        FetchRequest {
            namespace: format!("page-{n}"),
            reference: CadReference::parse(&format!(
                "https://cad.onshape.com/documents/d/w/w/e/el{n}"
            ))
            .unwrap(),
        }
    }

    fn downloader(service: MockService, concurrency: usize, timeout: Duration) -> (Downloader, Arc<MockService>) {
        let service = Arc::new(service);
        let downloader = Downloader::new(
            service.clone(),
            FetchConfig {
                concurrency,
                request_timeout: timeout,
            },
        );
        (downloader, service)
    }

    #[tokio::test]
    async fn fetches_image_bom_and_unique_printables() {
        let (dl, _) = downloader(MockService::default(), 5, Duration::from_secs(5));
        let assembly = dl
            .fetch_page(&request(1), &SilentFetchProgress)
            .await
            .expect("fetch");

        assert_eq!(assembly.image, b"png");
        assert_eq!(assembly.bom.items.len(), 4, "BOM rows are kept unmerged");
        assert_eq!(assembly.bom.source, "documents/d/w/w/e/el1");
        let files: Vec<_> = assembly.parts.iter().map(|p| p.file_name.as_str()).collect();
        assert_eq!(files, vec!["Bracket.stl", "Mount.stl"]);
        assert_eq!(assembly.parts[1].data, b"p2");
    }

    #[tokio::test]
    async fn in_flight_pages_never_exceed_limit() {
        let service = MockService {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (dl, service) = downloader(service, 5, Duration::from_secs(5));
        let requests = (0..12).map(request).collect();

        let outcomes = dl.fetch_all(requests, Arc::new(SilentFetchProgress)).await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        let max = service.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 5, "max in flight was {max}");
        assert!(max >= 2, "pages should overlap, max in flight was {max}");
    }

    #[tokio::test]
    async fn failed_page_does_not_cancel_siblings() {
        let service = MockService {
            fail_bom_for: Some("el1".into()),
            ..Default::default()
        };
        let (dl, _) = downloader(service, 2, Duration::from_secs(5));
        let progress = Arc::new(RecordingProgress::default());

        let outcomes = dl
            .fetch_all((0..3).map(request).collect(), progress.clone())
            .await;

        let names: Vec<_> = outcomes.iter().map(|o| o.namespace.as_str()).collect();
        assert_eq!(names, vec!["page-0", "page-1", "page-2"]);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            outcomes[1].result,
            Err(Eva3dError::FetchFailure { ref namespace, .. }) if namespace == "page-1"
        ));
        assert!(outcomes[2].result.is_ok());
        assert_eq!(progress.finished.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_export_fails_the_page() {
        let service = MockService {
            fail_export_of: Some("p2".into()),
            ..Default::default()
        };
        let (dl, _) = downloader(service, 5, Duration::from_secs(5));
        let err = dl
            .fetch_page(&request(1), &SilentFetchProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("export refused"));
    }

    #[tokio::test]
    async fn slow_request_times_out() {
        let service = MockService {
            hang_image: true,
            ..Default::default()
        };
        let (dl, _) = downloader(service, 5, Duration::from_millis(50));
        let err = dl
            .fetch_page(&request(1), &SilentFetchProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Eva3dError::Timeout { .. }), "{err}");
    }

    #[tokio::test]
    async fn printable_without_source_fails() {
        struct NoSource;

        #[async_trait]
        impl CadService for NoSource {
            async fn get_assembly_bom(&self, _r: &CadReference) -> Result<CadBom> {
                Ok(CadBom {
                    items: vec![row("Bracket", "PETG", None)],
                })
            }
            async fn get_shaded_view(&self, _r: &CadReference) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            async fn export_part(&self, _s: &PartSource) -> Result<Vec<u8>> {
                unreachable!("no exportable parts")
            }
        }

        let dl = Downloader::new(Arc::new(NoSource), FetchConfig::default());
        let err = dl
            .fetch_page(&request(1), &SilentFetchProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Eva3dError::FetchFailure { .. }));
    }

    #[tokio::test]
    async fn part_names_with_path_components_fail_the_page() {
        struct Slashed(&'static str);

        #[async_trait]
        impl CadService for Slashed {
            async fn get_assembly_bom(&self, _r: &CadReference) -> Result<CadBom> {
                Ok(CadBom {
                    items: vec![
                        row("Bracket", "PETG", Some("p1")),
                        row(self.0, "PETG", Some("p2")),
                    ],
                })
            }
            async fn get_shaded_view(&self, _r: &CadReference) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            async fn export_part(&self, _s: &PartSource) -> Result<Vec<u8>> {
                Ok(b"solid".to_vec())
            }
        }

        for name in ["../../escaped", "Frame/Left", "Frame\\Left", ".."] {
            let dl = Downloader::new(Arc::new(Slashed(name)), FetchConfig::default());
            let err = dl
                .fetch_page(&request(1), &SilentFetchProgress)
                .await
                .unwrap_err();
            assert!(
                matches!(err, Eva3dError::FetchFailure { ref message, .. } if message.contains("plain file name")),
                "{name}: {err}"
            );
        }
    }
}
