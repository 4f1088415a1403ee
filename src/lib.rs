//! # Glimpse (library root)
//!
//! Embedding-based retrieval over a caller's content, built on an in-process
//! **HNSW** (Hierarchical Navigable Small World) approximate-nearest-neighbor
//! graph:
//! - Graph construction and layered search (`hnsw`).
//! - Vectors joined with per-item metadata and persisted atomically as named
//!   index units (`store`, `metadata`).
//! - The retrieval pipeline — embed, search, threshold-filter, optionally
//!   generate — plus index lifecycle management (`pipeline`).
//! - Batch index building from content references (`indexer`).
//! - Per-query observability with session-level aggregation (`metrics`).
//! - YAML configuration with validated tuning parameters (`config`).
//!
//! The embedding and generation models live **outside** this crate: callers
//! supply implementations of the [`Embedder`] and [`Generator`] traits
//! (`boundary`), whether those wrap a local model, a remote API, or a test
//! double.
//!
//! ## Quick start
//! ```no_run
//! use glimpse::{RagConfig, RagPipeline};
//! # use glimpse::{Embedder, Generator, Result};
//! # struct MyEmbedder;
//! # impl Embedder for MyEmbedder {
//! #     fn encode_one(&self, _: &str) -> Result<Vec<f32>> { Ok(vec![0.0; 512]) }
//! # }
//! # struct MyGenerator;
//! # impl Generator for MyGenerator {
//! #     async fn generate(&self, _: &str, _: &str, _: &str) -> Result<String> {
//! #         Ok(String::new())
//! #     }
//! # }
//!
//! # async fn run() -> Result<()> {
//! let config = RagConfig::default();
//! let mut pipeline = RagPipeline::new(config, MyEmbedder, MyGenerator)?;
//!
//! let refs = vec!["images/a.png".to_string(), "images/b.png".to_string()];
//! pipeline.build_index(&refs, false)?;
//! pipeline.save_index("./indexes", "session")?;
//!
//! let report = pipeline.query("a red car", 5, true).await?;
//! for hit in &report.results {
//!     println!("{} (similarity {:.3})", hit.id, hit.similarity);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//! - [`boundary`], [`config`], [`error`], [`hnsw`], [`indexer`],
//!   [`metadata`], [`metrics`], [`pipeline`], [`store`]

pub mod boundary;
pub mod config;
pub mod error;
pub mod hnsw;
pub mod indexer;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use boundary::{Embedder, Generator};
pub use config::{RagConfig, load_config};
pub use error::{RagError, Result};
pub use hnsw::DistanceMetric;
pub use indexer::BuildStats;
pub use metadata::{FieldValue, Record};
pub use metrics::{MetricsRecorder, SessionReport, StageTimings};
pub use pipeline::{PipelineStatus, QueryReport, RagPipeline};
pub use store::{IndexStatistics, SearchHit, VectorStore};
