//! Configuration for the retrieval core.
//!
//! Defines [`RagConfig`], which holds every option the core recognizes, and
//! [`load_config`] to read one from a YAML file. All fields have defaults
//! matching the reference deployment (512-d cosine index, `M = 16`,
//! `ef_construction = 200`, `ef_search = 50`), so a partial YAML file is
//! enough:
//!
//! ```no_run
//! use glimpse::config::load_config;
//!
//! let config = load_config("glimpse.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{RagError, Result};
use crate::hnsw::DistanceMetric;

/// Options consumed by the index, pipeline, and build orchestrator.
///
/// Immutable once an index has been created from it: changing `dimension` or
/// `metric` requires building a new index.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RagConfig {
    /// Dimensionality of every stored and queried embedding.
    pub dimension: usize,

    /// Distance metric used by the index.
    pub metric: DistanceMetric,

    /// Maximum bidirectional links per node on layers above 0 (`2M` at layer 0).
    pub m: usize,

    /// Candidate-list breadth while inserting.
    pub ef_construction: usize,

    /// Candidate-list breadth while querying.
    pub ef_search: usize,

    /// Hard capacity of the index.
    pub max_elements: usize,

    /// Results with similarity below this are discarded after a search.
    pub similarity_threshold: f32,

    /// L2-normalize embeddings on insert and query.
    pub normalize: bool,

    /// Upper bound on concurrent generator calls within one query.
    pub generation_concurrency_limit: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            dimension: 512,
            metric: DistanceMetric::Cosine,
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_elements: 10_000,
            similarity_threshold: 0.2,
            normalize: true,
            generation_concurrency_limit: 4,
        }
    }
}

impl RagConfig {
    /// Reject parameter combinations the index cannot honor.
    ///
    /// # Errors
    /// `InvalidConfig` when `dimension == 0`, `m < 2`, `ef_search < 1`,
    /// `ef_construction < m`, `max_elements == 0`, or
    /// `generation_concurrency_limit == 0`.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RagError::InvalidConfig("dimension must be >= 1".into()));
        }
        if self.m < 2 {
            return Err(RagError::InvalidConfig("M must be >= 2".into()));
        }
        if self.ef_search < 1 {
            return Err(RagError::InvalidConfig("ef_search must be >= 1".into()));
        }
        if self.ef_construction < self.m {
            return Err(RagError::InvalidConfig(format!(
                "ef_construction ({}) must be >= M ({})",
                self.ef_construction, self.m
            )));
        }
        if self.max_elements == 0 {
            return Err(RagError::InvalidConfig("max_elements must be >= 1".into()));
        }
        if self.generation_concurrency_limit == 0 {
            return Err(RagError::InvalidConfig(
                "generation_concurrency_limit must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a [`RagConfig`] from a YAML file.
///
/// Unspecified fields fall back to their defaults.
///
/// # Parameters
/// - `file`: Path to the YAML configuration file.
///
/// # Returns
/// - `Ok(RagConfig)`: The loaded, validated configuration.
/// - `Err(RagError)`: The file could not be read, parsed, or validated.
pub fn load_config(file: impl AsRef<Path>) -> Result<RagConfig> {
    let file = file.as_ref();
    debug!("loading configuration from {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: RagConfig =
        serde_yaml::from_str(&content).map_err(|e| RagError::InvalidConfig(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
