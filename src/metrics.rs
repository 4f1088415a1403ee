//! # Metrics recorder
//!
//! Append-only accumulation of per-query observability records: timings,
//! similarity statistics, and generation success/failure counts. Metrics are
//! a side channel — nothing here can fail a query. Recording problems are
//! logged and swallowed; only the explicit [`MetricsRecorder::export`] call
//! surfaces I/O errors to its caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// Wall-clock seconds spent in each pipeline stage of one query.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub embed_secs: f64,
    pub search_secs: f64,
    pub generation_secs: f64,
    pub total_secs: f64,
}

/// Distribution of result similarities within one query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityStats {
    pub min: f32,
    pub max: f32,
    pub avg: f32,
    pub std: f32,
}

impl SimilarityStats {
    /// `None` for an empty slice.
    pub fn from_similarities(similarities: &[f32]) -> Option<Self> {
        if similarities.is_empty() {
            return None;
        }
        let n = similarities.len() as f32;
        let avg = similarities.iter().sum::<f32>() / n;
        let var = similarities.iter().map(|s| (s - avg) * (s - avg)).sum::<f32>() / n;
        Some(Self {
            min: similarities.iter().copied().fold(f32::INFINITY, f32::min),
            max: similarities.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            avg,
            std: var.sqrt(),
        })
    }
}

/// One recorded query. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub result_count: usize,
    pub similarity: Option<SimilarityStats>,
    pub successful_generations: usize,
    pub failed_generations: usize,
    pub timing: StageTimings,
}

/// Aggregate timing statistics across a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAggregates {
    pub avg_total_secs: f64,
    pub max_total_secs: f64,
    pub min_total_secs: f64,
    pub std_total_secs: f64,
    pub avg_results_per_query: f64,
    pub total_results_retrieved: usize,
}

/// Aggregate quality statistics across a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAggregates {
    pub avg_similarity: f32,
    pub max_similarity: f32,
    /// Successful generations over all generation attempts; zero when no
    /// generation was requested.
    pub overall_success_rate: f64,
}

/// Aggregates over every query recorded so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAggregates {
    pub session_start: DateTime<Utc>,
    pub duration_secs: f64,
    pub total_queries: usize,
    pub performance: PerformanceAggregates,
    pub quality: QualityAggregates,
}

/// Result of [`MetricsRecorder::report`]: either the session aggregates or an
/// explicit marker that nothing has been recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionReport {
    Empty,
    Ready(SessionAggregates),
}

/// Append-only log of [`QueryRecord`]s with session-level reporting.
///
/// The internal mutex lets concurrent queries record from `&self`; the
/// recorder owns its log exclusively.
#[derive(Debug)]
pub struct MetricsRecorder {
    session_start: DateTime<Utc>,
    records: Mutex<Vec<QueryRecord>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    /// Start a fresh session.
    pub fn new() -> Self {
        Self {
            session_start: Utc::now(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Append one query record.
    ///
    /// Never fails: a poisoned log is logged at `warn` and the record is
    /// dropped, because metrics must not take a query down with them.
    pub fn record(
        &self,
        query_text: &str,
        similarities: &[f32],
        successful_generations: usize,
        failed_generations: usize,
        timing: &StageTimings,
    ) {
        let record = QueryRecord {
            timestamp: Utc::now(),
            query: query_text.to_string(),
            result_count: similarities.len(),
            similarity: SimilarityStats::from_similarities(similarities),
            successful_generations,
            failed_generations,
            timing: *timing,
        };
        match self.records.lock() {
            Ok(mut records) => {
                debug!(
                    query = query_text,
                    total_secs = timing.total_secs,
                    "query metrics recorded"
                );
                records.push(record);
            }
            Err(e) => warn!("metrics log unavailable, dropping record: {e}"),
        }
    }

    /// Number of queries recorded so far.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate everything recorded so far.
    pub fn report(&self) -> SessionReport {
        match self.records.lock() {
            Ok(records) => aggregate(self.session_start, &records),
            Err(e) => {
                warn!("metrics log unavailable: {e}");
                SessionReport::Empty
            }
        }
    }

    /// Write the raw records plus the session report as JSON to `destination`
    /// and flush to stable storage.
    ///
    /// # Errors
    /// `Io` when the log is unavailable or the file cannot be written.
    pub fn export(&self, destination: impl AsRef<Path>) -> Result<()> {
        let records = self
            .records
            .lock()
            .map_err(|e| RagError::Io(format!("metrics log unavailable: {e}")))?;

        let document = serde_json::json!({
            "records": &*records,
            "session_report": aggregate(self.session_start, &records),
            "exported_at": Utc::now(),
        });
        drop(records);

        let mut file = File::create(destination.as_ref())?;
        serde_json::to_writer_pretty(&mut file, &document)
            .map_err(|e| RagError::Io(e.to_string()))?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }
}

fn aggregate(session_start: DateTime<Utc>, records: &[QueryRecord]) -> SessionReport {
    if records.is_empty() {
        return SessionReport::Empty;
    }

    let n = records.len() as f64;
    let totals: Vec<f64> = records.iter().map(|r| r.timing.total_secs).collect();
    let avg_total = totals.iter().sum::<f64>() / n;
    let var_total = totals.iter().map(|t| (t - avg_total) * (t - avg_total)).sum::<f64>() / n;

    let total_results: usize = records.iter().map(|r| r.result_count).sum();
    let with_similarity: Vec<&SimilarityStats> =
        records.iter().filter_map(|r| r.similarity.as_ref()).collect();
    let avg_similarity = if with_similarity.is_empty() {
        0.0
    } else {
        with_similarity.iter().map(|s| s.avg).sum::<f32>() / with_similarity.len() as f32
    };
    let max_similarity = if with_similarity.is_empty() {
        0.0
    } else {
        with_similarity
            .iter()
            .map(|s| s.max)
            .fold(f32::NEG_INFINITY, f32::max)
    };

    let attempts: usize = records
        .iter()
        .map(|r| r.successful_generations + r.failed_generations)
        .sum();
    let successes: usize = records.iter().map(|r| r.successful_generations).sum();
    let overall_success_rate = if attempts == 0 {
        0.0
    } else {
        successes as f64 / attempts as f64
    };

    SessionReport::Ready(SessionAggregates {
        session_start,
        duration_secs: (Utc::now() - session_start).num_milliseconds() as f64 / 1000.0,
        total_queries: records.len(),
        performance: PerformanceAggregates {
            avg_total_secs: avg_total,
            max_total_secs: totals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min_total_secs: totals.iter().copied().fold(f64::INFINITY, f64::min),
            std_total_secs: var_total.sqrt(),
            avg_results_per_query: total_results as f64 / n,
            total_results_retrieved: total_results,
        },
        quality: QualityAggregates {
            avg_similarity,
            max_similarity,
            overall_success_rate,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn timing(total: f64) -> StageTimings {
        StageTimings {
            embed_secs: total * 0.1,
            search_secs: total * 0.2,
            generation_secs: total * 0.6,
            total_secs: total,
        }
    }

    #[test]
    fn test_report_empty_marker() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.is_empty());
        assert!(matches!(recorder.report(), SessionReport::Empty));
    }

    #[test]
    fn test_similarity_stats() {
        let stats = SimilarityStats::from_similarities(&[0.2, 0.4, 0.6]).unwrap();
        assert!((stats.avg - 0.4).abs() < 1e-6);
        assert_eq!(stats.min, 0.2);
        assert_eq!(stats.max, 0.6);
        assert!((stats.std - 0.1632993).abs() < 1e-4);
        assert!(SimilarityStats::from_similarities(&[]).is_none());
    }

    #[test]
    fn test_aggregates_across_queries() {
        let recorder = MetricsRecorder::new();
        recorder.record("red car", &[0.9, 0.5], 2, 0, &timing(1.0));
        recorder.record("blue sky", &[0.7], 0, 1, &timing(3.0));
        recorder.record("empty", &[], 0, 0, &timing(2.0));

        let SessionReport::Ready(report) = recorder.report() else {
            panic!("expected aggregates");
        };
        assert_eq!(report.total_queries, 3);
        assert!((report.performance.avg_total_secs - 2.0).abs() < 1e-9);
        assert_eq!(report.performance.max_total_secs, 3.0);
        assert_eq!(report.performance.min_total_secs, 1.0);
        assert_eq!(report.performance.total_results_retrieved, 3);
        assert_eq!(report.quality.max_similarity, 0.9);
        // 2 successes over 3 attempts.
        assert!((report.quality.overall_success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_negative_similarities_keep_a_negative_max() {
        // Inner-product similarities can be entirely negative.
        let recorder = MetricsRecorder::new();
        recorder.record("opposite", &[-0.4, -0.2], 0, 0, &timing(0.5));

        let SessionReport::Ready(report) = recorder.report() else {
            panic!("expected aggregates");
        };
        assert_eq!(report.quality.max_similarity, -0.2);
    }

    #[test]
    fn test_export_writes_durable_json() {
        let dir = TempDir::new().unwrap();
        let recorder = MetricsRecorder::new();
        recorder.record("red car", &[0.9], 1, 0, &timing(0.5));

        let path = dir.path().join("metrics.json");
        recorder.export(&path).unwrap();

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(document["records"].as_array().unwrap().len(), 1);
        assert_eq!(document["records"][0]["query"], "red car");
        assert_eq!(document["session_report"]["status"], "ready");
        assert!(document["exported_at"].is_string());
    }

    #[test]
    fn test_records_are_append_only() {
        let recorder = MetricsRecorder::new();
        for i in 0..10 {
            recorder.record(&format!("q{i}"), &[0.5], 0, 0, &timing(0.1));
        }
        assert_eq!(recorder.len(), 10);
    }
}
