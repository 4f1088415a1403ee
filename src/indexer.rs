//! # Index build orchestration
//!
//! Turns a list of content references into a freshly-loaded [`VectorStore`]:
//! batch-embed everything (skipping and counting per-item failures), then
//! bulk-insert in the order embeddings were produced, one metadata record per
//! successfully-embedded item. The caller decides where the references come
//! from; directory scanning is not this crate's business.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::info;

use crate::boundary::Embedder;
use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::metadata::Record;
use crate::store::VectorStore;

/// Statistics from one index build. Field names are a contract for callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    /// Content references offered to the embedder.
    pub total_candidates: usize,
    /// Items that embedded successfully and were indexed.
    pub successful_embeddings: usize,
    /// Items skipped because their embedding attempt failed.
    pub failed_embeddings: usize,
    /// Seconds spent in the embedding stage.
    pub embedding_secs: f64,
    /// Seconds spent inserting into the graph.
    pub indexing_secs: f64,
    /// Wall-clock seconds for the whole build.
    pub total_secs: f64,
    /// Successful embeddings per second of embedding time.
    pub embeddings_per_second: f64,
}

/// Embed `content_refs` and bulk-load a fresh store.
///
/// Each indexed item gets a record with `source` (the reference as given),
/// `name` (its final path component), and `ordinal` (its position in
/// embedding order).
///
/// # Errors
/// - `NoContent` when `content_refs` is empty.
/// - `NoEmbeddings` when every embedding attempt failed.
/// - Index errors (`DimensionMismatch`, `CapacityExceeded`) propagate; the
///   caller's previous store, if any, is untouched because the new store is
///   only handed over on success.
pub fn build<E: Embedder>(
    config: &RagConfig,
    embedder: &E,
    content_refs: &[String],
) -> Result<(VectorStore, BuildStats)> {
    if content_refs.is_empty() {
        return Err(RagError::NoContent);
    }
    info!(candidates = content_refs.len(), "building index");
    let build_start = Instant::now();

    let embedding_start = Instant::now();
    let (embeddings, valid_indices) = embedder.encode_many(content_refs);
    let embedding_secs = embedding_start.elapsed().as_secs_f64();

    if embeddings.is_empty() {
        return Err(RagError::NoEmbeddings);
    }

    let indexing_start = Instant::now();
    let mut store = VectorStore::new(config)?;
    for (ordinal, (embedding, &source_index)) in
        embeddings.iter().zip(&valid_indices).enumerate()
    {
        let source = &content_refs[source_index];
        let name = Path::new(source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(source);

        let mut record = Record::new();
        record.set("source", source.clone());
        record.set("name", name);
        record.set("ordinal", ordinal as i64);
        store.insert(embedding, record)?;
    }
    let indexing_secs = indexing_start.elapsed().as_secs_f64();

    let stats = BuildStats {
        total_candidates: content_refs.len(),
        successful_embeddings: embeddings.len(),
        failed_embeddings: content_refs.len() - embeddings.len(),
        embedding_secs,
        indexing_secs,
        total_secs: build_start.elapsed().as_secs_f64(),
        embeddings_per_second: if embedding_secs > 0.0 {
            embeddings.len() as f64 / embedding_secs
        } else {
            0.0
        },
    };
    info!(
        indexed = stats.successful_embeddings,
        skipped = stats.failed_embeddings,
        "index built"
    );
    Ok((store, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldValue;

    struct StubEmbedder {
        dimension: usize,
        fail_on: Vec<String>,
    }

    impl Embedder for StubEmbedder {
        fn encode_one(&self, content: &str) -> Result<Vec<f32>> {
            if self.fail_on.iter().any(|f| f == content) {
                return Err(RagError::EncodingFailed(content.to_string()));
            }
            let mut v = vec![0.25; self.dimension];
            v[content.len() % self.dimension] = 1.0;
            Ok(v)
        }
    }

    fn test_config() -> RagConfig {
        RagConfig {
            dimension: 4,
            m: 8,
            ef_construction: 100,
            ef_search: 20,
            max_elements: 100,
            ..RagConfig::default()
        }
    }

    fn refs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_with_no_candidates() {
        let embedder = StubEmbedder {
            dimension: 4,
            fail_on: vec![],
        };
        let err = build(&test_config(), &embedder, &[]).unwrap_err();
        assert_eq!(err, RagError::NoContent);
    }

    #[test]
    fn test_build_with_all_embeddings_failing() {
        let contents = refs(&["a.png", "b.png"]);
        let embedder = StubEmbedder {
            dimension: 4,
            fail_on: contents.clone(),
        };
        let err = build(&test_config(), &embedder, &contents).unwrap_err();
        assert_eq!(err, RagError::NoEmbeddings);
    }

    #[test]
    fn test_build_skips_and_counts_failures() {
        let contents = refs(&["images/a.png", "images/bad.png", "images/long-name.png"]);
        let embedder = StubEmbedder {
            dimension: 4,
            fail_on: refs(&["images/bad.png"]),
        };

        let (store, stats) = build(&test_config(), &embedder, &contents).unwrap();
        assert_eq!(stats.total_candidates, 3);
        assert_eq!(stats.successful_embeddings, 2);
        assert_eq!(stats.failed_embeddings, 1);
        assert!(stats.embeddings_per_second >= 0.0);
        assert!(stats.total_secs >= stats.indexing_secs);
        assert_eq!(store.len(), 2);

        // Records carry source, name, and embedding-order ordinal.
        let record = store.record(1).unwrap();
        assert_eq!(
            record.get("source"),
            Some(&FieldValue::Str("images/long-name.png".into()))
        );
        assert_eq!(
            record.get("name"),
            Some(&FieldValue::Str("long-name.png".into()))
        );
        assert_eq!(record.get("ordinal"), Some(&FieldValue::Int(1)));
    }
}
