//! # VectorStore
//!
//! Bundles the [`HnswIndex`] with its [`MetadataStore`] and owns the durable
//! on-disk representation. The two structures share one id space: every id the
//! index assigns indexes directly into the metadata table, so they can never
//! diverge.
//!
//! ## Serialization layout
//! A saved index is a directory named after the index under a caller-chosen
//! root, holding three artifacts:
//!
//! - `graph.bin` — the full graph, vectors, and index configuration (bincode)
//! - `metadata.bin` — the id → record table (bincode)
//! - `index.yaml` — a human-readable descriptor (dimension, metric, element
//!   count, M, ef parameters)
//!
//! Writes go to a staging directory, every file is fsynced, and the staging
//! directory is renamed into place, so a crash mid-save never leaves a graph
//! paired with mismatched metadata. `load` requires all three artifacts and
//! cross-checks the descriptor against the graph.
//!
//! ## Quick Example
//! ```no_run
//! use glimpse::config::RagConfig;
//! use glimpse::metadata::Record;
//! use glimpse::store::VectorStore;
//!
//! # fn main() -> Result<(), glimpse::error::RagError> {
//! let config = RagConfig { dimension: 4, ..RagConfig::default() };
//! let mut store = VectorStore::new(&config)?;
//! let mut record = Record::new();
//! record.set("name", "first");
//! store.insert(&[1.0, 0.0, 0.0, 0.0], record)?;
//! let hits = store.search(&[1.0, 0.0, 0.0, 0.0], 1)?;
//! println!("top hit: {:?}", hits[0].id);
//! store.save("indexes", "demo")?;
//! # Ok(()) }
//! ```

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::hnsw::{DistanceMetric, HnswIndex};
use crate::metadata::{MetadataStore, Record};

const GRAPH_FILE: &str = "graph.bin";
const METADATA_FILE: &str = "metadata.bin";
const DESCRIPTOR_FILE: &str = "index.yaml";

/// One search result: the assigned id, raw index distance, the presentational
/// similarity, and the item's metadata record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: u64,
    pub distance: f32,
    pub similarity: f32,
    pub record: Record,
}

/// Snapshot of the index shape, mirroring the persisted descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub num_elements: usize,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_elements: usize,
    pub normalize: bool,
}

/// Embedding store: HNSW graph plus metadata, persisted as one named unit.
#[derive(Debug)]
pub struct VectorStore {
    index: HnswIndex,
    metadata: MetadataStore,
    normalize: bool,
}

impl VectorStore {
    /// Create an empty store from the index-shaping options in `config`.
    ///
    /// # Errors
    /// `InvalidConfig` when the configuration fails validation.
    pub fn new(config: &RagConfig) -> Result<Self> {
        config.validate()?;
        let index = HnswIndex::new(
            config.dimension,
            config.metric,
            config.m,
            config.ef_construction,
            config.ef_search,
            config.max_elements,
        )?;
        Ok(Self {
            index,
            metadata: MetadataStore::new(),
            normalize: config.normalize,
        })
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Shape and parameters of the underlying index.
    pub fn statistics(&self) -> IndexStatistics {
        IndexStatistics {
            num_elements: self.index.len(),
            dimension: self.index.dimension(),
            metric: self.index.metric(),
            m: self.index.m(),
            ef_construction: self.index.ef_construction(),
            ef_search: self.index.ef_search(),
            max_elements: self.index.max_elements(),
            normalize: self.normalize,
        }
    }

    /// Metadata for an assigned id. `None` for ids never assigned.
    pub fn record(&self, id: u64) -> Option<&Record> {
        self.metadata.get(id)
    }

    /// Insert an embedding and its record, returning the assigned id.
    ///
    /// The id sequence is strictly increasing and the metadata table grows in
    /// lockstep; a failed insert changes neither.
    ///
    /// # Errors
    /// - `DimensionMismatch` when `embedding.len()` differs from the index
    ///   dimension.
    /// - `CapacityExceeded` at `max_elements`.
    pub fn insert(&mut self, embedding: &[f32], record: Record) -> Result<u64> {
        let id = if self.normalize {
            let mut owned = embedding.to_vec();
            l2_normalize(&mut owned);
            self.index.insert(&owned)?
        } else {
            self.index.insert(embedding)?
        };
        let meta_id = self.metadata.push(record);
        debug_assert_eq!(id, meta_id);
        Ok(id)
    }

    /// Query the index for the `k` nearest items.
    ///
    /// # Returns
    /// At most `k` [`SearchHit`]s sorted ascending by distance (ties broken by
    /// smaller id), each carrying a clone of the item's record.
    ///
    /// # Errors
    /// - `IndexEmpty` when nothing has been inserted.
    /// - `DimensionMismatch` on a bad query length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let raw = if self.normalize {
            let mut owned = query.to_vec();
            l2_normalize(&mut owned);
            self.index.search(&owned, k)?
        } else {
            self.index.search(query, k)?
        };

        let metric = self.index.metric();
        Ok(raw
            .into_iter()
            .map(|(id, distance)| SearchHit {
                id,
                distance,
                similarity: metric.similarity(distance),
                record: self
                    .metadata
                    .get(id)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Persist the store as the named unit `<root>/<name>/`.
    ///
    /// The three artifacts are written to a staging directory, fsynced, and
    /// renamed into place so the named unit is visible all-or-nothing. An
    /// existing unit with the same name is replaced.
    ///
    /// # Errors
    /// `Io` on filesystem or serialization failure; the previous unit (if
    /// any) survives a failed save.
    pub fn save(&self, root: impl AsRef<Path>, name: &str) -> Result<()> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;

        let staging = root.join(format!(".{name}.staging"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let graph = bincode::serde::encode_to_vec(&self.index, bincode::config::standard())
            .map_err(|e| RagError::Io(e.to_string()))?;
        let metadata = bincode::serde::encode_to_vec(&self.metadata, bincode::config::standard())
            .map_err(|e| RagError::Io(e.to_string()))?;
        let descriptor = serde_yaml::to_string(&self.statistics())
            .map_err(|e| RagError::Io(e.to_string()))?;

        write_synced(&staging.join(GRAPH_FILE), &graph)?;
        write_synced(&staging.join(METADATA_FILE), &metadata)?;
        write_synced(&staging.join(DESCRIPTOR_FILE), descriptor.as_bytes())?;

        let target = root.join(name);
        let displaced = root.join(format!(".{name}.old"));
        if displaced.exists() {
            fs::remove_dir_all(&displaced)?;
        }
        if target.exists() {
            fs::rename(&target, &displaced)?;
        }
        fs::rename(&staging, &target)?;
        if displaced.exists() {
            fs::remove_dir_all(&displaced)?;
        }

        info!(name, elements = self.len(), "index saved");
        Ok(())
    }

    /// Load a previously saved unit into a fresh store.
    ///
    /// # Errors
    /// - `NotFound` when the unit or any of its three artifacts is missing.
    /// - `CorruptState` when an artifact fails to decode or the descriptor
    ///   disagrees with the graph (dimension, metric, element count, or a
    ///   metadata table out of lockstep).
    pub fn load(root: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = root.as_ref().join(name);
        let graph_path = dir.join(GRAPH_FILE);
        let metadata_path = dir.join(METADATA_FILE);
        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        if !graph_path.is_file() || !metadata_path.is_file() || !descriptor_path.is_file() {
            return Err(RagError::NotFound(name.to_string()));
        }

        let descriptor: IndexStatistics =
            serde_yaml::from_str(&fs::read_to_string(&descriptor_path)?)
                .map_err(|e| RagError::CorruptState(format!("bad descriptor: {e}")))?;

        let graph_bytes = fs::read(&graph_path)?;
        let (index, _): (HnswIndex, usize) =
            bincode::serde::decode_from_slice(&graph_bytes, bincode::config::standard())
                .map_err(|e| RagError::CorruptState(format!("bad graph blob: {e}")))?;

        let metadata_bytes = fs::read(&metadata_path)?;
        let (metadata, _): (MetadataStore, usize) =
            bincode::serde::decode_from_slice(&metadata_bytes, bincode::config::standard())
                .map_err(|e| RagError::CorruptState(format!("bad metadata blob: {e}")))?;

        if descriptor.dimension != index.dimension() {
            return Err(RagError::CorruptState(format!(
                "descriptor dimension {} != graph dimension {}",
                descriptor.dimension,
                index.dimension()
            )));
        }
        if descriptor.metric != index.metric() {
            return Err(RagError::CorruptState(
                "descriptor metric differs from graph metric".into(),
            ));
        }
        if descriptor.num_elements != index.len() {
            return Err(RagError::CorruptState(format!(
                "descriptor element count {} != graph element count {}",
                descriptor.num_elements,
                index.len()
            )));
        }
        if metadata.len() != index.len() {
            return Err(RagError::CorruptState(format!(
                "metadata table has {} records for {} vectors",
                metadata.len(),
                index.len()
            )));
        }

        info!(name, elements = index.len(), "index loaded");
        Ok(Self {
            index,
            metadata,
            normalize: descriptor.normalize,
        })
    }

    /// Remove the named unit and all three of its artifacts.
    ///
    /// Deleting a unit that does not exist is a no-op.
    pub fn delete(root: impl AsRef<Path>, name: &str) -> Result<()> {
        let dir = root.as_ref().join(name);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
            info!(name, "index deleted");
        }
        Ok(())
    }

    /// Names of the complete units saved under `root`.
    pub fn list_saved(root: impl AsRef<Path>) -> Result<Vec<String>> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && path.join(DESCRIPTOR_FILE).is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Write `bytes` to `path` and flush them to stable storage.
fn write_synced(path: &PathBuf, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Scale a vector to unit L2 norm. Zero vectors are left untouched.
fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
