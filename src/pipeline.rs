use crate::catalog::OutputCatalog;
use crate::images::{self, ImageError, ImageFetcher};
use crate::llm::{DescriptionClient, LlmError};
use crate::models::{
    CandidateImage, FailedProduct, ProductCopy, ProductOutcome, ProductRecord, ProductState,
    RunSummary, StageReport,
};
use crate::progress::{ProgressError, ProgressStore};
use crate::search::{ImageSearchClient, SearchError};
use crate::storage::{StorageClient, StorageError};
use serde_json::{Value, json};
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

// ---- collaborator seams -------------------------------------------------

/// Image-search capability: product name in, ranked candidates out.
pub trait ImageSearch {
    fn search(
        &self,
        product_name: &str,
    ) -> impl Future<Output = Result<Vec<CandidateImage>, SearchError>> + Send;
}

impl ImageSearch for ImageSearchClient {
    fn search(
        &self,
        product_name: &str,
    ) -> impl Future<Output = Result<Vec<CandidateImage>, SearchError>> + Send {
        ImageSearchClient::search(self, product_name)
    }
}

/// Candidate download capability.
pub trait FetchImage {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ImageError>> + Send;
}

impl FetchImage for ImageFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ImageError>> + Send {
        ImageFetcher::fetch(self, url)
    }
}

/// Generative-text capability: product name in, structured copy out.
pub trait GenerateCopy {
    fn describe(
        &self,
        product_name: &str,
    ) -> impl Future<Output = Result<ProductCopy, LlmError>> + Send;
}

impl GenerateCopy for DescriptionClient {
    fn describe(
        &self,
        product_name: &str,
    ) -> impl Future<Output = Result<ProductCopy, LlmError>> + Send {
        DescriptionClient::describe(self, product_name)
    }
}

/// Remote-storage capability: bytes plus key in, public URL out.
pub trait RemoteStore {
    fn object_key(&self, product_name: &str) -> String;
    fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String, StorageError>> + Send;
}

impl RemoteStore for StorageClient {
    fn object_key(&self, product_name: &str) -> String {
        StorageClient::object_key(self, product_name)
    }

    fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String, StorageError>> + Send {
        StorageClient::upload(self, key, bytes)
    }
}

// ---- errors -------------------------------------------------------------

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// The search capability produced zero candidates.
    NotFound,
    /// Every candidate was unusable (empty, unrecognized, undecodable).
    ValidationFailed,
    /// One of the three external services failed.
    ExternalService,
    /// Disk or remote write failure.
    Persistence,
    InvalidInput,
}

impl PipelineError {
    fn new(stage: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::InvalidInput, message)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("image search is not configured (set SEARCH_API_KEYS and SEARCH_ENGINE_ID)")]
    MissingSearch,
    #[error("description generator is not configured (set GENAI_API_KEYS)")]
    MissingGenerator,
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

// ---- pipeline -----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub images_dir: PathBuf,
    pub image_max_kb: usize,
}

/// Sequential per-product orchestrator. One product at a time moves through
/// `Pending -> ImageFetched -> ImagePersisted -> Described -> Done`; a stage
/// failure abandons that product only and the batch moves on. Only `Done`
/// touches the catalog and the progress store, in that order.
pub struct Pipeline<S, F, D, R> {
    search: S,
    fetcher: F,
    writer: D,
    store: Option<R>,
    config: PipelineConfig,
}

pub type DefaultPipeline = Pipeline<ImageSearchClient, ImageFetcher, DescriptionClient, StorageClient>;

impl DefaultPipeline {
    pub fn from_env(config: PipelineConfig) -> Result<Self, ConfigError> {
        let search = ImageSearchClient::from_env().ok_or(ConfigError::MissingSearch)?;
        let writer = DescriptionClient::from_env().ok_or(ConfigError::MissingGenerator)?;
        let store = StorageClient::from_env();
        if store.is_none() {
            info!(
                target = "catalogr.pipeline",
                "remote storage not configured; catalog will reference local files",
            );
        }
        Ok(Self::new(search, ImageFetcher::new(), writer, store, config))
    }
}

impl<S, F, D, R> Pipeline<S, F, D, R>
where
    S: ImageSearch,
    F: FetchImage,
    D: GenerateCopy,
    R: RemoteStore,
{
    pub fn new(search: S, fetcher: F, writer: D, store: Option<R>, config: PipelineConfig) -> Self {
        Self {
            search,
            fetcher,
            writer,
            store,
            config,
        }
    }

    /// Runs the whole batch. Per-product errors are downgraded to summary
    /// entries; only a progress-store failure aborts, because a broken
    /// resume gate cannot guarantee the catalog/progress invariant.
    pub async fn run_batch(
        &self,
        names: &[String],
        progress: &mut ProgressStore,
        catalog: &mut OutputCatalog,
    ) -> Result<RunSummary, ProgressError> {
        let mut summary = RunSummary::default();

        for raw in names {
            let name = raw.trim();
            if name.is_empty() {
                continue;
            }
            if progress.is_done(name) {
                debug!(
                    target = "catalogr.pipeline",
                    product = %name,
                    state = ?ProductState::Skipped,
                    "already done; skipping",
                );
                summary.skipped.push(name.to_string());
                continue;
            }
            // A crash between the catalog append and the progress write
            // leaves the record present but unmarked. Heal instead of
            // appending a duplicate.
            if catalog.contains(name) {
                info!(
                    target = "catalogr.pipeline",
                    product = %name,
                    "already in catalog; marking done",
                );
                progress.mark_done(name)?;
                summary.skipped.push(name.to_string());
                continue;
            }

            let mut stages = Vec::new();
            let mut state = ProductState::Pending;
            match self.process_one(name, &mut stages, &mut state).await {
                Ok(record) => {
                    if let Err(err) = catalog.append(record) {
                        warn!(
                            target = "catalogr.pipeline",
                            product = %name,
                            error = %err,
                            "catalog append failed; product left unmarked",
                        );
                        summary.failed.push(FailedProduct {
                            name: name.to_string(),
                            stage: "append_catalog".to_string(),
                            reason: err.to_string(),
                        });
                        summary.transcripts.push(ProductOutcome {
                            name: name.to_string(),
                            state,
                            stages,
                        });
                        continue;
                    }
                    progress.mark_done(name)?;
                    state = ProductState::Done;
                    info!(
                        target = "catalogr.pipeline",
                        product = %name,
                        state = ?state,
                        stages = stages.len(),
                        "product complete",
                    );
                    summary.completed.push(name.to_string());
                    summary.transcripts.push(ProductOutcome {
                        name: name.to_string(),
                        state,
                        stages,
                    });
                }
                Err(err) => {
                    warn!(
                        target = "catalogr.pipeline",
                        product = %name,
                        stage = err.stage(),
                        kind = ?err.kind(),
                        reached = ?state,
                        error = %err.detail(),
                        "product failed; continuing batch",
                    );
                    summary.failed.push(FailedProduct {
                        name: name.to_string(),
                        stage: err.stage().to_string(),
                        reason: err.detail().to_string(),
                    });
                    summary.transcripts.push(ProductOutcome {
                        name: name.to_string(),
                        state,
                        stages,
                    });
                }
            }
        }

        Ok(summary)
    }

    async fn process_one(
        &self,
        name: &str,
        stages: &mut Vec<StageReport>,
        state: &mut ProductState,
    ) -> Result<ProductRecord, PipelineError> {
        if name.is_empty() {
            return Err(PipelineError::invalid_input(
                "search_images",
                "empty product name",
            ));
        }

        let candidates = self
            .capture_stage("search_images", stages, async {
                let hits = self.search.search(name).await.map_err(|err| {
                    let kind = match err {
                        SearchError::EmptyQuery => PipelineErrorKind::InvalidInput,
                        _ => PipelineErrorKind::ExternalService,
                    };
                    PipelineError::new("search_images", kind, err.to_string())
                })?;
                if hits.is_empty() {
                    return Err(PipelineError::new(
                        "search_images",
                        PipelineErrorKind::NotFound,
                        "no image candidates",
                    ));
                }
                let preview: Vec<String> = hits
                    .iter()
                    .take(3)
                    .map(|hit| hit.source_url.clone())
                    .collect();
                let output = json!({"count": hits.len(), "preview": preview});
                Ok(StageOutcome::new(hits, output))
            })
            .await?;

        let best = self
            .capture_stage("fetch_image", stages, async {
                let mut fetched = 0usize;
                let mut rejected = 0usize;
                let mut best: Option<(f64, CandidateImage)> = None;
                for mut candidate in candidates {
                    match self.fetcher.fetch(&candidate.source_url).await {
                        Ok(bytes) => candidate.bytes = bytes,
                        Err(err) => {
                            debug!(
                                target = "catalogr.pipeline",
                                url = %candidate.source_url,
                                error = %err,
                                "candidate download failed",
                            );
                            continue;
                        }
                    }
                    fetched += 1;
                    if !images::validate(&mut candidate) {
                        rejected += 1;
                        continue;
                    }
                    let score = images::score(&candidate.bytes);
                    if best.as_ref().map(|(top, _)| score > *top).unwrap_or(true) {
                        best = Some((score, candidate));
                    }
                }
                match best {
                    Some((score, candidate)) => {
                        let output = json!({
                            "chosen": candidate.source_url,
                            "score": score,
                            "fetched": fetched,
                            "rejected": rejected,
                        });
                        Ok(StageOutcome::new(candidate, output))
                    }
                    None if fetched == 0 => Err(PipelineError::new(
                        "fetch_image",
                        PipelineErrorKind::ExternalService,
                        "no candidate could be downloaded",
                    )),
                    None => Err(PipelineError::new(
                        "fetch_image",
                        PipelineErrorKind::ValidationFailed,
                        format!("all {fetched} downloaded candidates were unusable"),
                    )),
                }
            })
            .await?;
        *state = ProductState::ImageFetched;

        let image_url = self
            .capture_stage("persist_image", stages, async {
                let jpeg = images::compress_to_budget(&best.bytes, self.config.image_max_kb)
                    .map_err(|err| {
                        PipelineError::new(
                            "persist_image",
                            PipelineErrorKind::ValidationFailed,
                            err.to_string(),
                        )
                    })?;
                let local_path = images::persist_local(&self.config.images_dir, name, &jpeg)
                    .map_err(|err| {
                        PipelineError::new(
                            "persist_image",
                            PipelineErrorKind::Persistence,
                            err.to_string(),
                        )
                    })?;

                let (image_url, remote) = match &self.store {
                    Some(store) => {
                        let key = store.object_key(name);
                        let url = store.upload(&key, jpeg.clone()).await.map_err(|err| {
                            PipelineError::new(
                                "persist_image",
                                PipelineErrorKind::Persistence,
                                err.to_string(),
                            )
                        })?;
                        (url, true)
                    }
                    None => (local_path.display().to_string(), false),
                };

                let output = json!({
                    "source": best.source_url,
                    "local_path": local_path.display().to_string(),
                    "bytes": jpeg.len(),
                    "remote": remote,
                });
                Ok(StageOutcome::new(image_url, output))
            })
            .await?;
        *state = ProductState::ImagePersisted;

        let copy = self
            .capture_stage("write_copy", stages, async {
                let copy = self.writer.describe(name).await.map_err(|err| {
                    PipelineError::new(
                        "write_copy",
                        PipelineErrorKind::ExternalService,
                        err.to_string(),
                    )
                })?;
                let copy = normalize_copy(copy);
                let output = json!({
                    "category": copy.category,
                    "brand": copy.brand,
                    "words": copy.description.split_whitespace().count(),
                });
                Ok(StageOutcome::new(copy, output))
            })
            .await?;
        *state = ProductState::Described;

        Ok(ProductRecord {
            name: name.to_string(),
            description: copy.description,
            image_url,
            category: copy.category,
            price: String::new(),
            brand: copy.brand,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        debug!(
            target = "catalogr.pipeline",
            stage = name,
            elapsed_ms,
            output = %outcome.output,
            "stage complete",
        );
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

/// A record must never carry empty copy fields once the product is done.
/// Description and category are enforced upstream; an absent brand guess
/// becomes an explicit placeholder.
fn normalize_copy(copy: ProductCopy) -> ProductCopy {
    let brand = copy.brand.trim().to_string();
    ProductCopy {
        description: copy.description.trim().to_string(),
        category: copy.category.trim().to_string(),
        brand: if brand.is_empty() {
            "Unbranded".to_string()
        } else {
            brand
        },
    }
}
