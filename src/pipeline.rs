//! # Retrieval pipeline
//!
//! Sequences the full query path — embed (boundary), graph search, similarity
//! threshold filter, optional generation (boundary) — and the index
//! lifecycle: `create → build/load → query* → close`. The pipeline owns the
//! [`VectorStore`] handle explicitly; there is no process-wide singleton.
//!
//! Lock discipline is the borrow checker's: `build_index`, `save_index`,
//! `load_index`, and `close_index` take `&mut self` (exclusive), `query`
//! takes `&self`, so searches may run concurrently with each other but never
//! with a mutation.
//!
//! `query` never lets a stage failure escape: it returns a [`QueryReport`]
//! tagged with the error and whatever timings were collected. The single
//! exception is [`RagError::NotReady`], returned before any timer starts when
//! no index is built.

use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::boundary::{self, Embedder, Generator};
use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::indexer::{self, BuildStats};
use crate::metadata::FieldValue;
use crate::metrics::{MetricsRecorder, StageTimings};
use crate::store::{IndexStatistics, SearchHit, VectorStore};

/// Outcome of one generation attempt for one retrieved item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    /// Id of the retrieved item this generation was for.
    pub id: u64,
    /// Generated text on success.
    pub text: Option<String>,
    /// Error description on failure.
    pub error: Option<String>,
}

impl GenerationOutcome {
    /// True when the generator produced text for this item.
    pub fn succeeded(&self) -> bool {
        self.text.is_some()
    }
}

/// Structured result of one query. Field names are a contract for callers.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub query: String,
    /// Hits that survived the similarity threshold, in rank order.
    pub results: Vec<SearchHit>,
    /// One outcome per surviving hit when generation was requested.
    pub generations: Vec<GenerationOutcome>,
    pub timing: StageTimings,
    /// The stage failure that ended the query early, if any.
    pub error: Option<RagError>,
}

impl QueryReport {
    /// True when every stage completed (per-item generation failures do not
    /// fail the query).
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Snapshot of the pipeline and its index.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub index_built: bool,
    pub num_elements: usize,
    pub index_statistics: Option<IndexStatistics>,
}

/// The retrieval pipeline: embedder + generator boundaries around an owned
/// index handle, with per-query metrics recording.
pub struct RagPipeline<E: Embedder, G: Generator> {
    config: RagConfig,
    embedder: E,
    generator: G,
    store: Option<VectorStore>,
    build_stats: Option<BuildStats>,
    metrics: MetricsRecorder,
}

impl<E: Embedder, G: Generator> RagPipeline<E, G> {
    /// Create a pipeline with no index yet. Queries fail `NotReady` until
    /// [`build_index`](Self::build_index) or [`load_index`](Self::load_index)
    /// succeeds.
    ///
    /// # Errors
    /// `InvalidConfig` when the configuration fails validation.
    pub fn new(config: RagConfig, embedder: E, generator: G) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            embedder,
            generator,
            store: None,
            build_stats: None,
            metrics: MetricsRecorder::new(),
        })
    }

    /// True when the pipeline holds a built or loaded index.
    pub fn is_ready(&self) -> bool {
        self.store.is_some()
    }

    /// The configuration this pipeline was created with.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The metrics recorder accumulating one record per query.
    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Statistics from the most recent build, if one ran.
    pub fn build_stats(&self) -> Option<&BuildStats> {
        self.build_stats.as_ref()
    }

    /// Shape and parameters of the current index, if one is held.
    pub fn index_statistics(&self) -> Option<IndexStatistics> {
        self.store.as_ref().map(VectorStore::statistics)
    }

    /// Snapshot of the pipeline state and index shape.
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            index_built: self.store.is_some(),
            num_elements: self.store.as_ref().map(VectorStore::len).unwrap_or(0),
            index_statistics: self.store.as_ref().map(VectorStore::statistics),
        }
    }

    /// Embed and bulk-index `content_refs`.
    ///
    /// When an index is already built or loaded and `force_rebuild` is false,
    /// no rework happens: the existing build statistics are returned, or for
    /// a loaded index, statistics reflecting its element count with zeroed
    /// timings. A failed build leaves the current index untouched.
    ///
    /// # Errors
    /// `NoContent`, `NoEmbeddings`, or index errors from the bulk insert.
    pub fn build_index(
        &mut self,
        content_refs: &[String],
        force_rebuild: bool,
    ) -> Result<BuildStats> {
        if !force_rebuild {
            if let Some(store) = &self.store {
                info!("index already built, skipping rebuild");
                // A loaded index has no build statistics; report its shape
                // with zeroed timings instead of discarding it.
                return Ok(self.build_stats.clone().unwrap_or(BuildStats {
                    total_candidates: store.len(),
                    successful_embeddings: store.len(),
                    failed_embeddings: 0,
                    embedding_secs: 0.0,
                    indexing_secs: 0.0,
                    total_secs: 0.0,
                    embeddings_per_second: 0.0,
                }));
            }
        }
        let (store, stats) = indexer::build(&self.config, &self.embedder, content_refs)?;
        self.store = Some(store);
        self.build_stats = Some(stats.clone());
        Ok(stats)
    }

    /// Persist the current index as the named unit `<root>/<name>/`.
    ///
    /// # Errors
    /// `NotReady` without a built index; `Io` on persistence failure.
    pub fn save_index(&mut self, root: impl AsRef<Path>, name: &str) -> Result<()> {
        self.store
            .as_ref()
            .ok_or(RagError::NotReady)?
            .save(root, name)
    }

    /// Replace the current index (if any) with a previously saved unit.
    ///
    /// # Errors
    /// `NotFound` or `CorruptState` from [`VectorStore::load`]; the current
    /// index survives a failed load.
    pub fn load_index(&mut self, root: impl AsRef<Path>, name: &str) -> Result<()> {
        let store = VectorStore::load(root, name)?;
        self.build_stats = None;
        self.store = Some(store);
        Ok(())
    }

    /// Drop the in-memory index. Queries fail `NotReady` afterwards; nothing
    /// on disk is touched.
    pub fn close_index(&mut self) {
        self.store = None;
        self.build_stats = None;
    }

    /// Run the full query path.
    ///
    /// 1. Embed `text` via the boundary embedder.
    /// 2. Search the index for the `k` nearest items.
    /// 3. Keep hits with `similarity >= similarity_threshold` (no backfill).
    /// 4. When `want_generation` and something survived: one generator call
    ///    per surviving hit in rank order, at most
    ///    `generation_concurrency_limit` in flight, per-item failures
    ///    recorded but never fatal.
    ///
    /// Every query — successful or not — is recorded to the metrics log.
    /// Dropping the returned future cancels any generation calls not yet
    /// issued; the index is never mutated by a query.
    ///
    /// # Returns
    /// `Ok(QueryReport)` for every in-state query, with `report.error` tagged
    /// when a stage failed.
    ///
    /// # Errors
    /// `NotReady` — the only error that escapes — when no index is built.
    pub async fn query(&self, text: &str, k: usize, want_generation: bool) -> Result<QueryReport> {
        let store = self.store.as_ref().ok_or(RagError::NotReady)?;

        info!(query = text, k, want_generation, "executing query");
        let total_start = Instant::now();
        let mut timing = StageTimings::default();

        let embed_start = Instant::now();
        let embedding = match self
            .embedder
            .encode_one(text)
            .map_err(boundary::as_encoding_failure)
        {
            Ok(embedding) => {
                timing.embed_secs = embed_start.elapsed().as_secs_f64();
                embedding
            }
            Err(e) => {
                timing.embed_secs = embed_start.elapsed().as_secs_f64();
                timing.total_secs = total_start.elapsed().as_secs_f64();
                return Ok(self.conclude(text, Vec::new(), Vec::new(), timing, Some(e)));
            }
        };

        let search_start = Instant::now();
        let hits = match store.search(&embedding, k) {
            Ok(hits) => {
                timing.search_secs = search_start.elapsed().as_secs_f64();
                hits
            }
            Err(e) => {
                timing.search_secs = search_start.elapsed().as_secs_f64();
                timing.total_secs = total_start.elapsed().as_secs_f64();
                return Ok(self.conclude(text, Vec::new(), Vec::new(), timing, Some(e)));
            }
        };

        let threshold = self.config.similarity_threshold;
        let results: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.similarity >= threshold)
            .collect();
        debug!(kept = results.len(), threshold, "similarity filter applied");

        let mut generations = Vec::new();
        if want_generation && !results.is_empty() {
            let generation_start = Instant::now();
            generations = futures::stream::iter(results.iter().map(|hit| {
                let content_ref = match hit.record.get("source") {
                    Some(FieldValue::Str(source)) => source.clone(),
                    _ => String::new(),
                };
                let context = format!("similarity: {:.4}", hit.similarity);
                let id = hit.id;
                async move {
                    match self.generator.generate(&content_ref, text, &context).await {
                        Ok(generated) => GenerationOutcome {
                            id,
                            text: Some(generated),
                            error: None,
                        },
                        Err(e) => {
                            warn!(id, "generation failed: {e}");
                            GenerationOutcome {
                                id,
                                text: None,
                                error: Some(e.to_string()),
                            }
                        }
                    }
                }
            }))
            .buffered(self.config.generation_concurrency_limit)
            .collect()
            .await;
            timing.generation_secs = generation_start.elapsed().as_secs_f64();
        }

        timing.total_secs = total_start.elapsed().as_secs_f64();
        Ok(self.conclude(text, results, generations, timing, None))
    }

    /// Record the query to the metrics log and assemble the report.
    fn conclude(
        &self,
        query: &str,
        results: Vec<SearchHit>,
        generations: Vec<GenerationOutcome>,
        timing: StageTimings,
        error: Option<RagError>,
    ) -> QueryReport {
        let similarities: Vec<f32> = results.iter().map(|hit| hit.similarity).collect();
        let successful = generations.iter().filter(|g| g.succeeded()).count();
        let failed = generations.len() - successful;
        self.metrics
            .record(query, &similarities, successful, failed, &timing);
        QueryReport {
            query: query.to_string(),
            results,
            generations,
            timing,
            error,
        }
    }
}
