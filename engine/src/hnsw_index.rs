//! HNSW graph for approximate k-NN search
//!
//! Multi-layer navigable small-world graph over internal ids. The graph holds
//! adjacency only; embeddings are read through [`EmbeddingLookup`] so they live
//! once, in the vector store.
//!
//! Levels are drawn from `floor(-ln(U) * ml)` where `U` is derived from a
//! SplitMix64 hash of `(level_seed, internal_id)`. Inserting the same records in
//! the same order therefore rebuilds the same graph, which is what log replay
//! relies on.
//!
//! Neighbors are chosen with the HNSW selection heuristic: a candidate is kept
//! only when it is closer to the base node than to every neighbor kept before
//! it, which spreads links across directions instead of one dense cluster.
//! Pruning never drops the last in-link of a layer-0 node, so every node stays
//! reachable from the entry point.
//!
//! Deleted records are never unlinked: the caller filters them out of results.

use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tracing::{debug, instrument};

use crate::config::{DistanceMetric, HnswConfig};
use crate::distance::distance;
use crate::error::{Result, VectorDbError};
use crate::vector_store::EmbeddingLookup;

/// Vector search result with internal id and distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub internal_id: u64,
    pub distance: f32,
}

/// Heap entry ordered by distance, then id for deterministic ties.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: u64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    level: usize,
    /// `neighbors[layer]` for `layer in 0..=level`
    neighbors: Vec<Vec<u64>>,
    /// Incoming links per layer
    in_degree: Vec<u32>,
}

/// Hierarchical navigable small-world graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    params: HnswConfig,
    nodes: Vec<Node>,
    entry_point: Option<u64>,
    top_level: usize,
}

impl HnswIndex {
    pub fn new(dimension: usize, metric: DistanceMetric, params: &HnswConfig) -> Self {
        Self {
            dimension,
            metric,
            params: params.clone(),
            nodes: Vec::new(),
            entry_point: None,
            top_level: 0,
        }
    }

    /// Number of nodes, deleted records included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn distance_metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Build parameters the graph was constructed with.
    pub fn params(&self) -> &HnswConfig {
        &self.params
    }

    pub fn entry_point(&self) -> Option<u64> {
        self.entry_point
    }

    pub fn top_level(&self) -> usize {
        self.top_level
    }

    pub fn level_of(&self, internal_id: u64) -> Option<usize> {
        self.nodes.get(internal_id as usize).map(|n| n.level)
    }

    /// Number of nodes linking to `internal_id` on `layer`.
    pub fn in_degree(&self, internal_id: u64, layer: usize) -> u32 {
        self.nodes
            .get(internal_id as usize)
            .and_then(|n| n.in_degree.get(layer))
            .copied()
            .unwrap_or(0)
    }

    pub fn neighbors(&self, internal_id: u64, layer: usize) -> &[u64] {
        self.nodes
            .get(internal_id as usize)
            .and_then(|n| n.neighbors.get(layer))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total directed edges over all layers.
    pub fn edge_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.neighbors.iter())
            .map(Vec::len)
            .sum()
    }

    /// Adjacency memory, excluding embeddings (those live in the store).
    pub fn estimate_memory_bytes(&self) -> usize {
        let edges = self.edge_count() * std::mem::size_of::<u64>();
        let lists: usize = self
            .nodes
            .iter()
            .map(|n| {
                n.neighbors.len() * std::mem::size_of::<Vec<u64>>()
                    + n.in_degree.len() * std::mem::size_of::<u32>()
            })
            .sum();
        edges + lists + self.nodes.len() * std::mem::size_of::<Node>()
    }

    /// Level of `internal_id`, a pure function of the seed and the id.
    pub fn assign_level(&self, internal_id: u64) -> usize {
        let hash = splitmix64(self.params.level_seed ^ splitmix64(internal_id));
        // 53 random bits mapped into the open interval (0, 1)
        let unit = ((hash >> 11) as f64 + 0.5) / (1u64 << 53) as f64;
        let level = (-unit.ln() * self.params.level_multiplier()).floor();
        (level as usize).min(self.params.max_level)
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m_max0
        } else {
            self.params.m
        }
    }

    fn distance_to<V>(&self, query: &[f32], id: u64, vectors: &V) -> f32
    where
        V: EmbeddingLookup + ?Sized,
    {
        // Unknown ids sort last instead of aborting a traversal.
        match vectors.embedding(id) {
            Some(embedding) => distance(self.metric, query, embedding),
            None => f32::INFINITY,
        }
    }

    /// Link `internal_id` into the graph.
    ///
    /// Returns `Ok(false)` when the id is already present, so replaying a
    /// logged insert twice is harmless. Ids must arrive densely in order.
    pub fn insert<V>(&mut self, internal_id: u64, embedding: &[f32], vectors: &V) -> Result<bool>
    where
        V: EmbeddingLookup + ?Sized,
    {
        if embedding.len() != self.dimension {
            return Err(VectorDbError::dimension(
                internal_id.to_string(),
                self.dimension,
                embedding.len(),
            ));
        }
        let next = self.nodes.len() as u64;
        if internal_id < next {
            return Ok(false);
        }
        if internal_id > next {
            return Err(VectorDbError::InvalidArgument(format!(
                "graph insert out of order: expected internal id {}, got {}",
                next, internal_id
            )));
        }

        let level = self.assign_level(internal_id);
        self.nodes.push(Node {
            level,
            neighbors: vec![Vec::new(); level + 1],
            in_degree: vec![0; level + 1],
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(internal_id);
            self.top_level = level;
            return Ok(true);
        };

        let mut nearest = vec![Candidate {
            distance: self.distance_to(embedding, entry, vectors),
            id: entry,
        }];

        // Greedy descent through layers above the new node's level.
        for layer in (level + 1..=self.top_level).rev() {
            nearest = self.search_layer(embedding, &nearest, 1, layer, vectors);
        }

        for layer in (0..=level.min(self.top_level)).rev() {
            let found =
                self.search_layer(embedding, &nearest, self.params.ef_construction, layer, vectors);
            let candidates: Vec<Candidate> =
                found.iter().copied().filter(|c| c.id != internal_id).collect();
            let selected = self.select_neighbors(&candidates, self.params.m, vectors);

            for &neighbor in &selected {
                self.adjust_in_degree(neighbor, layer, true);
            }
            self.nodes[internal_id as usize].neighbors[layer] = selected.clone();
            for neighbor in selected {
                self.link(neighbor, internal_id, layer, vectors);
            }
            nearest = found;
        }

        if level > self.top_level {
            debug!(
                internal_id,
                level,
                previous_top = self.top_level,
                "new HNSW entry point"
            );
            self.entry_point = Some(internal_id);
            self.top_level = level;
        }
        Ok(true)
    }

    /// Neighbor selection heuristic over `candidates`, sorted closest first.
    ///
    /// A candidate is rejected when some already selected neighbor is closer
    /// to it than the base node is.
    fn select_neighbors<V>(&self, candidates: &[Candidate], m: usize, vectors: &V) -> Vec<u64>
    where
        V: EmbeddingLookup + ?Sized,
    {
        if candidates.len() <= m {
            return candidates.iter().map(|c| c.id).collect();
        }

        let mut selected: Vec<u64> = Vec::with_capacity(m);
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let Some(embedding) = vectors.embedding(candidate.id) else {
                continue;
            };
            let diverse = selected
                .iter()
                .all(|&kept| self.distance_to(embedding, kept, vectors) >= candidate.distance);
            if diverse {
                selected.push(candidate.id);
            }
        }
        selected
    }

    fn adjust_in_degree(&mut self, internal_id: u64, layer: usize, added: bool) {
        if let Some(count) = self
            .nodes
            .get_mut(internal_id as usize)
            .and_then(|n| n.in_degree.get_mut(layer))
        {
            *count = if added {
                count.saturating_add(1)
            } else {
                count.saturating_sub(1)
            };
        }
    }

    /// Add the reverse edge `from -> to`, re-selecting the neighbors of
    /// `from` when the layer's degree bound is exceeded.
    ///
    /// On layer 0 an edge that is the only way into its target is kept.
    fn link<V>(&mut self, from: u64, to: u64, layer: usize, vectors: &V)
    where
        V: EmbeddingLookup + ?Sized,
    {
        let max_conn = self.max_connections(layer);
        let current: Vec<u64> = {
            let Some(list) = self
                .nodes
                .get_mut(from as usize)
                .and_then(|n| n.neighbors.get_mut(layer))
            else {
                return;
            };
            if list.contains(&to) {
                return;
            }
            list.push(to);
            list.clone()
        };
        self.adjust_in_degree(to, layer, true);
        if current.len() <= max_conn {
            return;
        }

        let Some(base) = vectors.embedding(from) else {
            return;
        };
        let mut scored: Vec<Candidate> = current
            .iter()
            .map(|&id| Candidate {
                distance: self.distance_to(base, id, vectors),
                id,
            })
            .collect();
        scored.sort_unstable();

        let (pinned, free): (Vec<Candidate>, Vec<Candidate>) = scored
            .into_iter()
            .partition(|c| layer == 0 && self.in_degree(c.id, layer) <= 1);
        let mut kept: Vec<u64> = pinned.iter().take(max_conn).map(|c| c.id).collect();
        let slots = max_conn - kept.len();
        kept.extend(self.select_neighbors(&free, slots, vectors));

        for id in current {
            if !kept.contains(&id) {
                self.adjust_in_degree(id, layer, false);
            }
        }
        self.nodes[from as usize].neighbors[layer] = kept;
    }

    /// Beam search on one layer. Returns up to `ef` candidates, closest first.
    fn search_layer<V>(
        &self,
        query: &[f32],
        entry_points: &[Candidate],
        ef: usize,
        layer: usize,
        vectors: &V,
    ) -> Vec<Candidate>
    where
        V: EmbeddingLookup + ?Sized,
    {
        let ef = ef.max(1);
        let mut visited: HashSet<u64> = HashSet::with_capacity(ef * 4);
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep.id) {
                candidates.push(Reverse(ep));
                results.push(ep);
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if let Some(farthest) = results.peek() {
                if results.len() >= ef && current.distance > farthest.distance {
                    break;
                }
            }
            for &neighbor in self.neighbors(current.id, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let candidate = Candidate {
                    distance: self.distance_to(query, neighbor, vectors),
                    id: neighbor,
                };
                let admit = results.len() < ef
                    || results
                        .peek()
                        .map_or(true, |farthest| candidate.distance < farthest.distance);
                if admit {
                    candidates.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// k-NN search, closest first.
    ///
    /// `ef_search` is raised to `k` when smaller. Tombstoned records are
    /// returned like any other node.
    #[instrument(level = "trace", skip(self, query, vectors), fields(nodes = self.nodes.len()))]
    pub fn search<V>(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        vectors: &V,
    ) -> Result<Vec<SearchResult>>
    where
        V: EmbeddingLookup + ?Sized,
    {
        if query.len() != self.dimension {
            return Err(VectorDbError::dimension("", self.dimension, query.len()));
        }
        let Some(entry) = self.entry_point else {
            return Err(VectorDbError::EmptyIndex);
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut nearest = vec![Candidate {
            distance: self.distance_to(query, entry, vectors),
            id: entry,
        }];
        for layer in (1..=self.top_level).rev() {
            nearest = self.search_layer(query, &nearest, 1, layer, vectors);
        }
        let found = self.search_layer(query, &nearest, ef_search.max(k), 0, vectors);

        Ok(found
            .into_iter()
            .take(k)
            .map(|c| SearchResult {
                internal_id: c.id,
                distance: c.distance,
            })
            .collect())
    }
}

/// SplitMix64 finalizer.
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Plain embedding table standing in for the vector store.
    struct Vectors(Vec<Vec<f32>>);

    impl EmbeddingLookup for Vectors {
        fn embedding(&self, internal_id: u64) -> Option<&[f32]> {
            self.0.get(internal_id as usize).map(Vec::as_slice)
        }
    }

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vectors {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Vectors(
            (0..n)
                .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
                .collect(),
        )
    }

    fn build(vectors: &Vectors, metric: DistanceMetric, params: &HnswConfig) -> HnswIndex {
        let dim = vectors.0[0].len();
        let mut index = HnswIndex::new(dim, metric, params);
        for (id, v) in vectors.0.iter().enumerate() {
            assert!(index.insert(id as u64, v, vectors).unwrap());
        }
        index
    }

    fn brute_force(vectors: &Vectors, metric: DistanceMetric, query: &[f32], k: usize) -> Vec<u64> {
        let mut all: Vec<(f32, u64)> = vectors
            .0
            .iter()
            .enumerate()
            .map(|(id, v)| (distance(metric, query, v), id as u64))
            .collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        all.into_iter().take(k).map(|(_, id)| id).collect()
    }

    #[test]
    fn test_hnsw_basic_operations() {
        let vectors = Vectors(vec![vec![0.1; 16]]);
        let mut index = HnswIndex::new(16, DistanceMetric::Cosine, &HnswConfig::default());
        assert!(index.insert(0, &vectors.0[0], &vectors).unwrap());

        assert_eq!(index.len(), 1);
        assert_eq!(index.entry_point(), Some(0));

        let results = index.search(&vectors.0[0], 1, 50, &vectors).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].internal_id, 0);
        assert!(results[0].distance < 0.01);
    }

    #[test]
    fn test_hnsw_dimension_validation() {
        let vectors = Vectors(vec![vec![0.1; 8]]);
        let mut index = HnswIndex::new(8, DistanceMetric::Cosine, &HnswConfig::default());
        assert!(matches!(
            index.insert(0, &[0.1; 4], &vectors),
            Err(VectorDbError::DimensionMismatch { expected: 8, actual: 4, .. })
        ));
        index.insert(0, &vectors.0[0], &vectors).unwrap();
        assert!(matches!(
            index.search(&[0.1; 9], 1, 10, &vectors),
            Err(VectorDbError::DimensionMismatch { expected: 8, actual: 9, .. })
        ));
    }

    #[test]
    fn test_hnsw_empty_index() {
        let vectors = Vectors(Vec::new());
        let index = HnswIndex::new(4, DistanceMetric::Cosine, &HnswConfig::default());
        assert!(matches!(
            index.search(&[0.0; 4], 10, 50, &vectors),
            Err(VectorDbError::EmptyIndex)
        ));
    }

    #[test]
    fn test_hnsw_multiple_vectors() {
        let vectors = Vectors(vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
        ]);
        let index = build(&vectors, DistanceMetric::Cosine, &HnswConfig::default());

        let results = index.search(&[0.9, 0.1, 0.0, 0.0], 2, 50, &vectors).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].internal_id, 0);
        assert!(results[0].distance <= results[1].distance);
    }

    #[test]
    fn test_duplicate_insert_is_ignored_and_gaps_rejected() {
        let vectors = random_vectors(3, 4, 1);
        let mut index = build(&vectors, DistanceMetric::SquaredEuclidean, &HnswConfig::default());
        assert!(!index.insert(1, &vectors.0[1], &vectors).unwrap());
        assert_eq!(index.len(), 3);
        assert!(matches!(
            index.insert(7, &vectors.0[0], &vectors),
            Err(VectorDbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_levels_are_deterministic_and_bounded() {
        let params = HnswConfig::default();
        let a = HnswIndex::new(4, DistanceMetric::Cosine, &params);
        let b = HnswIndex::new(4, DistanceMetric::Cosine, &params);
        let mut above_zero = 0;
        for id in 0..10_000u64 {
            let level = a.assign_level(id);
            assert_eq!(level, b.assign_level(id));
            assert!(level <= params.max_level);
            if level > 0 {
                above_zero += 1;
            }
        }
        // P(level > 0) = 1/M = 1/16
        assert!((400..900).contains(&above_zero), "got {}", above_zero);
    }

    #[test]
    fn test_degree_bounds_hold() {
        let params = HnswConfig {
            m: 4,
            m_max0: 8,
            ef_construction: 32,
            ..HnswConfig::default()
        };
        let vectors = random_vectors(300, 8, 7);
        let index = build(&vectors, DistanceMetric::SquaredEuclidean, &params);

        for id in 0..index.len() as u64 {
            let level = index.level_of(id).unwrap();
            assert!(!index.neighbors(id, 0).is_empty(), "node {} has no links", id);
            assert!(index.neighbors(id, 0).len() <= 8);
            for layer in 1..=level {
                assert!(index.neighbors(id, layer).len() <= 4);
            }
            assert!(!index.neighbors(id, 0).contains(&id));
        }
        assert!(index.edge_count() > 0);
        assert!(index.estimate_memory_bytes() > 0);
    }

    fn unit_cube_vectors(n: usize, dim: usize, seed: u64) -> Vectors {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Vectors(
            (0..n)
                .map(|_| (0..dim).map(|_| rng.gen_range(0.0f32..1.0)).collect())
                .collect(),
        )
    }

    /// Nodes reachable on layer 0 from the entry point.
    fn reachable_from_entry(index: &HnswIndex) -> usize {
        let mut seen = vec![false; index.len()];
        let mut queue = std::collections::VecDeque::new();
        let entry = index.entry_point().unwrap();
        seen[entry as usize] = true;
        queue.push_back(entry);
        while let Some(id) = queue.pop_front() {
            for &next in index.neighbors(id, 0) {
                if !seen[next as usize] {
                    seen[next as usize] = true;
                    queue.push_back(next);
                }
            }
        }
        seen.into_iter().filter(|&s| s).count()
    }

    #[test]
    fn test_every_node_reachable_from_entry_point() {
        for seed in 0..3 {
            let vectors = unit_cube_vectors(2000, 128, seed);
            let index = build(&vectors, DistanceMetric::Cosine, &HnswConfig::default());
            for id in 0..index.len() as u64 {
                assert!(index.in_degree(id, 0) > 0, "seed {} node {} has no in-links", seed, id);
            }
            assert_eq!(reachable_from_entry(&index), 2000, "seed {}", seed);
        }
    }

    #[test]
    fn test_in_degree_tracks_links() {
        let params = HnswConfig {
            m: 4,
            m_max0: 8,
            ef_construction: 32,
            ..HnswConfig::default()
        };
        let vectors = random_vectors(400, 8, 21);
        let index = build(&vectors, DistanceMetric::SquaredEuclidean, &params);

        let mut counted = vec![0u32; index.len()];
        for id in 0..index.len() as u64 {
            for &next in index.neighbors(id, 0) {
                counted[next as usize] += 1;
            }
        }
        for id in 0..index.len() as u64 {
            assert_eq!(index.in_degree(id, 0), counted[id as usize], "node {}", id);
        }
        let total: u32 = (0..index.len() as u64).map(|id| index.in_degree(id, 0)).sum();
        let out: usize = (0..index.len() as u64).map(|id| index.neighbors(id, 0).len()).sum();
        assert_eq!(total as usize, out);
    }

    #[test]
    fn test_self_match_with_default_params_on_unit_cube_vectors() {
        let params = HnswConfig::default();
        for seed in 0..5 {
            let vectors = unit_cube_vectors(2000, 128, seed);
            let index = build(&vectors, DistanceMetric::Cosine, &params);
            let mut rng = ChaCha8Rng::seed_from_u64(seed + 100);
            for _ in 0..10 {
                let id = rng.gen_range(0..2000u64);
                let results = index
                    .search(&vectors.0[id as usize], 20, params.ef_search, &vectors)
                    .unwrap();
                assert_eq!(results[0].internal_id, id, "seed {}", seed);
                assert!(results[0].distance < 1e-3);
            }
        }
    }

    #[test]
    fn test_replay_builds_identical_graph() {
        let vectors = random_vectors(200, 12, 3);
        let params = HnswConfig::default();
        let a = build(&vectors, DistanceMetric::Cosine, &params);
        let b = build(&vectors, DistanceMetric::Cosine, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn test_recall_against_brute_force() {
        let vectors = random_vectors(1000, 16, 42);
        let params = HnswConfig {
            ef_construction: 100,
            ..HnswConfig::default()
        };
        let index = build(&vectors, DistanceMetric::SquaredEuclidean, &params);

        let queries = random_vectors(50, 16, 4242);
        let k = 10;
        let mut hits = 0;
        for q in &queries.0 {
            let expected = brute_force(&vectors, DistanceMetric::SquaredEuclidean, q, k);
            let got: Vec<u64> = index
                .search(q, k, 100, &vectors)
                .unwrap()
                .into_iter()
                .map(|r| r.internal_id)
                .collect();
            hits += got.iter().filter(|id| expected.contains(id)).count();
        }
        let recall = hits as f64 / (queries.0.len() * k) as f64;
        assert!(recall >= 0.9, "recall@10 was {:.3}", recall);
    }

    #[test]
    fn test_self_match_is_first() {
        let vectors = random_vectors(500, 32, 11);
        let index = build(&vectors, DistanceMetric::Cosine, &HnswConfig::default());
        for id in (0..500u64).step_by(25) {
            let results = index.search(&vectors.0[id as usize], 5, 50, &vectors).unwrap();
            assert_eq!(results[0].internal_id, id);
            assert!(results[0].distance < 1e-3);
            assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }

    #[test]
    fn test_serde_roundtrip_preserves_search() {
        let vectors = random_vectors(100, 8, 5);
        let index = build(&vectors, DistanceMetric::InnerProduct, &HnswConfig::default());
        let bytes = bincode::serialize(&index).unwrap();
        let restored: HnswIndex = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, index);

        let q = &vectors.0[17];
        assert_eq!(
            index.search(q, 5, 50, &vectors).unwrap(),
            restored.search(q, 5, 50, &vectors).unwrap()
        );
    }
}
