//! # HNSW vector index
//!
//! A multi-layer navigable small-world graph over embedding vectors, after
//! Malkov & Yashunin (2018). Layer 0 holds every item; each higher layer holds
//! a geometrically-decreasing random subset, so a search can greedily descend
//! from a sparse top layer to a dense bottom layer and only ever examine a
//! small neighborhood of the stored vectors.
//!
//! - **Insertion** descends to the new node's sampled top layer, then runs a
//!   bounded best-first search (breadth `ef_construction`) at each layer down
//!   to 0, linking the node bidirectionally to up to `M` diverse neighbors
//!   (`2M` at layer 0).
//! - **Search** descends one greedy step at a time above layer 0, then runs
//!   the same best-first search at layer 0 with breadth `max(ef_search, k)`.
//!
//! Results are approximate: not guaranteed to be the true k nearest, but
//! empirically close at reasonable `ef_search`. The index is append-only;
//! ids are assigned monotonically and never reused.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

use crate::error::{RagError, Result};

/// Distance metric fixed at index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`. Zero for identical directions.
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Negated dot product, so that ascending distance means descending
    /// similarity like the other metrics.
    InnerProduct,
}

impl DistanceMetric {
    /// Distance between two equal-length vectors.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }

    /// Convert an index distance into a similarity for presentation.
    ///
    /// Purely presentational; the search algorithm orders by distance alone.
    /// For `InnerProduct` this undoes the internal negation, yielding the raw
    /// dot product.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance),
            DistanceMetric::InnerProduct => -distance,
        }
    }
}

/// One stored vector and its per-layer adjacency.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    vector: Vec<f32>,
    /// `neighbors[layer]` holds the node's links at that layer;
    /// `neighbors.len() - 1` is the node's top layer.
    neighbors: Vec<Vec<u32>>,
}

/// f32 ordered by `total_cmp` for use inside binary heaps.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Dist(f32);

impl Eq for Dist {}

impl PartialOrd for Dist {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dist {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// The navigable multi-layer graph.
///
/// Owns the vectors and the adjacency only; metadata lives in
/// [`MetadataStore`](crate::metadata::MetadataStore), kept in lockstep by
/// [`VectorStore`](crate::store::VectorStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    m: usize,
    m0: usize,
    ef_construction: usize,
    ef_search: usize,
    max_elements: usize,
    /// Level-sampling scale, `1 / ln(M)`.
    ml: f64,
    nodes: Vec<Node>,
    entry_point: Option<u32>,
    max_layer: usize,
}

impl HnswIndex {
    /// Create an empty index.
    ///
    /// # Parameters
    /// - `dimension`: Length every inserted and queried vector must have.
    /// - `metric`: Distance metric; immutable afterwards.
    /// - `m`: Max links per node above layer 0 (`2M` at layer 0).
    /// - `ef_construction`: Search breadth during insertion.
    /// - `ef_search`: Search breadth during queries.
    /// - `max_elements`: Hard capacity.
    ///
    /// # Errors
    /// `InvalidConfig` for parameters the graph cannot honor
    /// (`ef_construction < m`, `ef_search < 1`, `m < 2`, zero dimension or
    /// capacity).
    pub fn new(
        dimension: usize,
        metric: DistanceMetric,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
        max_elements: usize,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfig("dimension must be >= 1".into()));
        }
        if m < 2 {
            return Err(RagError::InvalidConfig("M must be >= 2".into()));
        }
        if ef_search < 1 {
            return Err(RagError::InvalidConfig("ef_search must be >= 1".into()));
        }
        if ef_construction < m {
            return Err(RagError::InvalidConfig(format!(
                "ef_construction ({ef_construction}) must be >= M ({m})"
            )));
        }
        if max_elements == 0 {
            return Err(RagError::InvalidConfig("max_elements must be >= 1".into()));
        }
        debug!(
            dimension,
            ?metric,
            m,
            ef_construction,
            ef_search,
            max_elements,
            "creating hnsw index"
        );
        Ok(Self {
            dimension,
            metric,
            m,
            m0: m * 2,
            ef_construction,
            ef_search,
            max_elements,
            ml: 1.0 / (m as f64).ln(),
            nodes: Vec::new(),
            entry_point: None,
            max_layer: 0,
        })
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Vector dimensionality.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Configured distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Configured max links per node above layer 0.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Configured construction breadth.
    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    /// Configured query breadth.
    pub fn ef_search(&self) -> usize {
        self.ef_search
    }

    /// Configured capacity.
    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Insert a vector and return its assigned id.
    ///
    /// Ids are dense and strictly increasing. A failed insert leaves the
    /// graph and the id sequence untouched.
    ///
    /// # Errors
    /// - `DimensionMismatch` when `vector.len() != dimension`.
    /// - `CapacityExceeded` at `max_elements`.
    pub fn insert(&mut self, vector: &[f32]) -> Result<u64> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if self.nodes.len() >= self.max_elements {
            return Err(RagError::CapacityExceeded {
                max_elements: self.max_elements,
            });
        }

        let id = self.nodes.len() as u32;
        let level = self.sample_level();
        self.nodes.push(Node {
            vector: vector.to_vec(),
            neighbors: vec![Vec::new(); level + 1],
        });

        match self.entry_point {
            None => {
                self.entry_point = Some(id);
                self.max_layer = level;
            }
            Some(_) => {
                self.link_node(id, level);
                if level > self.max_layer {
                    self.max_layer = level;
                    self.entry_point = Some(id);
                }
            }
        }

        Ok(id as u64)
    }

    /// Find the `k` stored vectors closest to `query`.
    ///
    /// # Returns
    /// At most `k` `(id, distance)` pairs sorted ascending by distance, ties
    /// broken by smaller id.
    ///
    /// # Errors
    /// - `IndexEmpty` when nothing has been inserted.
    /// - `DimensionMismatch` on a bad query length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let Some(entry) = self.entry_point else {
            return Err(RagError::IndexEmpty);
        };

        let mut current = entry;
        for layer in (1..=self.max_layer).rev() {
            current = self.greedy_closest(query, current, layer);
        }

        let ef = self.ef_search.max(k);
        let mut found = self.search_layer(query, current, ef, 0);
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.truncate(k);

        Ok(found
            .into_iter()
            .map(|(dist, id)| (id as u64, dist))
            .collect())
    }

    /// Sample a top layer from the exponential distribution with scale `ml`.
    fn sample_level(&self) -> usize {
        let u: f64 = rand::rng().random::<f64>().max(f64::MIN_POSITIVE);
        (-u.ln() * self.ml).floor() as usize
    }

    fn distance_to(&self, query: &[f32], node: u32) -> f32 {
        self.metric.distance(query, &self.nodes[node as usize].vector)
    }

    /// Single-step greedy descent within one layer: repeatedly move to the
    /// strictly-closest neighbor until no neighbor improves.
    fn greedy_closest(&self, query: &[f32], start: u32, layer: usize) -> u32 {
        let mut current = start;
        let mut current_dist = self.distance_to(query, current);
        loop {
            let mut improved = false;
            if let Some(links) = self.nodes[current as usize].neighbors.get(layer) {
                for &neighbor in links {
                    let d = self.distance_to(query, neighbor);
                    if d < current_dist {
                        current = neighbor;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded best-first search within one layer.
    ///
    /// Returns up to `ef` `(distance, id)` pairs, unsorted.
    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, layer: usize) -> Vec<(f32, u32)> {
        let entry_dist = self.distance_to(query, entry);
        let mut visited: HashSet<u32> = HashSet::from([entry]);
        // Min-heap of nodes still to expand.
        let mut candidates: BinaryHeap<Reverse<(Dist, u32)>> =
            BinaryHeap::from([Reverse((Dist(entry_dist), entry))]);
        // Max-heap of the best `ef` found so far.
        let mut best: BinaryHeap<(Dist, u32)> = BinaryHeap::from([(Dist(entry_dist), entry)]);

        while let Some(Reverse((dist, node))) = candidates.pop() {
            if best.len() >= ef {
                if let Some(&(furthest, _)) = best.peek() {
                    if dist > furthest {
                        break;
                    }
                }
            }
            if let Some(links) = self.nodes[node as usize].neighbors.get(layer) {
                for &neighbor in links {
                    if !visited.insert(neighbor) {
                        continue;
                    }
                    let d = Dist(self.distance_to(query, neighbor));
                    if best.len() < ef {
                        candidates.push(Reverse((d, neighbor)));
                        best.push((d, neighbor));
                    } else if let Some(&(furthest, _)) = best.peek() {
                        if d < furthest {
                            candidates.push(Reverse((d, neighbor)));
                            best.push((d, neighbor));
                            best.pop();
                        }
                    }
                }
            }
        }

        best.into_iter().map(|(Dist(d), id)| (d, id)).collect()
    }

    /// Wire a freshly-pushed node into every layer up to its top layer.
    fn link_node(&mut self, id: u32, level: usize) {
        let query = self.nodes[id as usize].vector.clone();
        let mut current = self.entry_point.expect("link_node needs an entry point");

        for layer in (level + 1..=self.max_layer).rev() {
            current = self.greedy_closest(&query, current, layer);
        }

        for layer in (0..=level.min(self.max_layer)).rev() {
            let found = self.search_layer(&query, current, self.ef_construction, layer);
            let limit = if layer == 0 { self.m0 } else { self.m };
            let selected = self.select_neighbors(found.clone(), limit);

            for &neighbor in &selected {
                self.nodes[id as usize].neighbors[layer].push(neighbor);
                if layer < self.nodes[neighbor as usize].neighbors.len() {
                    self.nodes[neighbor as usize].neighbors[layer].push(id);
                    self.prune_neighbors(neighbor, layer, limit);
                }
            }

            // Continue the descent from the closest candidate found here.
            if let Some(&(_, closest)) = found
                .iter()
                .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            {
                current = closest;
            }
        }
    }

    /// Diverse neighbor selection (Algorithm 4 of the paper): a candidate is
    /// kept only if it is closer to the query than to every already-kept
    /// neighbor, so the link set spreads out instead of clustering. Pruned
    /// candidates backfill when fewer than `limit` survive.
    fn select_neighbors(&self, mut scored: Vec<(f32, u32)>, limit: usize) -> Vec<u32> {
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut selected: Vec<u32> = Vec::with_capacity(limit);
        let mut pruned: Vec<u32> = Vec::new();

        for (dist_to_query, candidate) in scored {
            if selected.len() >= limit {
                break;
            }
            let candidate_vector = &self.nodes[candidate as usize].vector;
            let diverse = selected.iter().all(|&kept| {
                self.metric
                    .distance(candidate_vector, &self.nodes[kept as usize].vector)
                    >= dist_to_query
            });
            if diverse {
                selected.push(candidate);
            } else {
                pruned.push(candidate);
            }
        }

        for candidate in pruned {
            if selected.len() >= limit {
                break;
            }
            selected.push(candidate);
        }

        selected
    }

    /// Re-select a node's links after a bidirectional insert pushed it past
    /// its limit, evicting the least useful edge.
    fn prune_neighbors(&mut self, node: u32, layer: usize, limit: usize) {
        if self.nodes[node as usize].neighbors[layer].len() <= limit {
            return;
        }
        let vector = self.nodes[node as usize].vector.clone();
        let scored: Vec<(f32, u32)> = self.nodes[node as usize].neighbors[layer]
            .iter()
            .map(|&n| (self.distance_to(&vector, n), n))
            .collect();
        self.nodes[node as usize].neighbors[layer] = self.select_neighbors(scored, limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_index(dimension: usize) -> HnswIndex {
        HnswIndex::new(dimension, DistanceMetric::Cosine, 8, 100, 20, 1000).unwrap()
    }

    fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect()
    }

    #[test]
    fn test_new_rejects_bad_parameters() {
        assert!(HnswIndex::new(0, DistanceMetric::Cosine, 8, 100, 20, 100).is_err());
        assert!(HnswIndex::new(4, DistanceMetric::Cosine, 1, 100, 20, 100).is_err());
        assert!(HnswIndex::new(4, DistanceMetric::Cosine, 8, 4, 20, 100).is_err());
        assert!(HnswIndex::new(4, DistanceMetric::Cosine, 8, 100, 0, 100).is_err());
        assert!(HnswIndex::new(4, DistanceMetric::Cosine, 8, 100, 20, 0).is_err());
    }

    #[test]
    fn test_insert_dimension_mismatch_changes_nothing() {
        let mut index = small_index(4);
        let err = index.insert(&[1.0, 0.0]).unwrap_err();
        assert_eq!(
            err,
            RagError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        );
        assert!(index.is_empty());

        // The next successful insert still gets id 0.
        assert_eq!(index.insert(&[1.0, 0.0, 0.0, 0.0]).unwrap(), 0);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut index = HnswIndex::new(2, DistanceMetric::Euclidean, 4, 8, 4, 3).unwrap();
        for i in 0..3 {
            index.insert(&[i as f32, 0.0]).unwrap();
        }
        let err = index.insert(&[9.0, 0.0]).unwrap_err();
        assert_eq!(err, RagError::CapacityExceeded { max_elements: 3 });
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_search_empty_index() {
        let index = small_index(4);
        assert_eq!(index.search(&[1.0, 0.0, 0.0, 0.0], 3).unwrap_err(), RagError::IndexEmpty);
    }

    #[test]
    fn test_search_query_dimension_mismatch() {
        let mut index = small_index(4);
        index.insert(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut index = small_index(3);
        for i in 0u64..20 {
            let id = index.insert(&[i as f32, 1.0, 0.0]).unwrap();
            assert_eq!(id, i);
        }
    }

    #[test]
    fn test_cosine_ranking_never_swaps_near_and_far() {
        let mut index = small_index(4);
        index.insert(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.insert(&[0.0, 1.0, 0.0, 0.0]).unwrap();
        index.insert(&[0.9, 0.1, 0.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1.abs() < 1e-6);
        assert_eq!(hits[1].0, 2);
        // cos([1,0,0,0], [0.9,0.1,0,0]) = 0.9 / sqrt(0.82), distance ~0.00616.
        assert!(hits[1].1 > 0.0 && hits[1].1 < 0.05);
    }

    #[test]
    fn test_inner_product_prefers_larger_dot() {
        let mut index =
            HnswIndex::new(2, DistanceMetric::InnerProduct, 4, 8, 4, 100).unwrap();
        index.insert(&[0.1, 0.0]).unwrap();
        index.insert(&[0.9, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, 1);
        // Similarity undoes the internal negation.
        let sim = DistanceMetric::InnerProduct.similarity(hits[0].1);
        assert!((sim - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_results_sorted_and_bounded() {
        let mut index = small_index(16);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let v = random_vector(&mut rng, 16);
            index.insert(&v).unwrap();
        }

        let query = random_vector(&mut rng, 16);
        let hits = index.search(&query, 10).unwrap();
        assert_eq!(hits.len(), 10);
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
        for &(id, _) in &hits {
            assert!((id as usize) < index.len());
        }

        // k larger than the index never overflows.
        let mut tiny = small_index(16);
        tiny.insert(&random_vector(&mut rng, 16)).unwrap();
        assert_eq!(tiny.search(&query, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_recall_on_planted_neighbors() {
        let dim = 32;
        let mut index = HnswIndex::new(dim, DistanceMetric::Cosine, 16, 200, 50, 1000).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let query = random_vector(&mut rng, dim);

        // The first ten vectors are pulled close to the query.
        for i in 0..200 {
            let mut v = random_vector(&mut rng, dim);
            if i < 10 {
                for (slot, q) in v.iter_mut().zip(&query) {
                    *slot = q * 0.9 + *slot * 0.1;
                }
            }
            index.insert(&v).unwrap();
        }

        let hits = index.search(&query, 10).unwrap();
        let recalled = hits.iter().filter(|(id, _)| *id < 10).count();
        assert!(recalled >= 7, "recall too low: {recalled}/10");
    }

    #[test]
    fn test_euclidean_similarity_conversion() {
        assert!((DistanceMetric::Euclidean.similarity(0.0) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::Euclidean.similarity(1.0) - 0.5).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.similarity(0.25) - 0.75).abs() < 1e-6);
    }
}
