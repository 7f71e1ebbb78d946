//! Hierarchical Navigable Small World graph for approximate nearest
//! neighbor search over term vectors.
//!
//! Vectors are L2-normalized on insert and compared by cosine similarity;
//! [`HnswIndex::search`] reports cosine distance (`1 - similarity`).
//!
//! Level assignment uses a fixed seed and a monotonic counter, neighbor sets
//! are ordered, and score ties break toward the lower node id, so the same
//! insert sequence always produces the same graph.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeSet, BinaryHeap},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Connections per node on upper layers; layer 0 allows twice as many.
    pub m: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
    /// Beam width while searching.
    pub ef_search: usize,
    /// Level multiplier, `1 / ln(m)`.
    pub ml: f64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            ef_construction: 200,
            ef_search: 50,
            ml: 1.0 / (m as f64).ln(),
        }
    }
}

impl HnswConfig {
    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }
}

#[derive(Debug, Clone)]
struct Node {
    /// `neighbors[layer]`, one set per layer the node lives on.
    neighbors: Vec<BTreeSet<usize>>,
}

impl Node {
    fn new(level: usize) -> Self {
        Self {
            neighbors: (0..=level).map(|_| BTreeSet::new()).collect(),
        }
    }
}

/// Max-heap by similarity; ties favor the lower id.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredId {
    score: f32,
    id: usize,
}

impl Eq for ScoredId {}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

fn by_score_desc(a: &ScoredId, b: &ScoredId) -> Ordering {
    b.cmp(a)
}

pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    nodes: Vec<Node>,
    entry_point: Option<usize>,
    max_level: usize,
    rng_seed: u64,
    rng_counter: u64,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.dimension)
            .field("len", &self.vectors.len())
            .field("max_level", &self.max_level)
            .finish_non_exhaustive()
    }
}

impl HnswIndex {
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        Self {
            config,
            dimension,
            vectors: Vec::new(),
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng_seed: 42,
            rng_counter: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Add a vector and return its id. Ids are assigned densely from 0.
    pub fn insert(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
            });
        }

        let id = self.vectors.len();
        self.vectors.push(normalized(vector));
        let level = self.assign_level();
        self.nodes.push(Node::new(level));

        let Some(entry_id) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return Ok(id);
        };

        let query = self.vectors[id].clone();
        let mut current_entry = entry_id;
        if self.max_level > level {
            current_entry = self.greedy_search_to_layer(
                &query,
                entry_id,
                self.max_level,
                level + 1,
            );
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(
                &query,
                current_entry,
                self.config.ef_construction,
                layer,
            );

            let selected: Vec<usize> = candidates
                .iter()
                .filter(|s| s.id != id)
                .take(self.config.m)
                .map(|s| s.id)
                .collect();

            self.nodes[id].neighbors[layer].extend(selected.iter().copied());

            let max_conn = self.config.max_connections(layer);
            for &neighbor_id in &selected {
                let neighbors = &mut self.nodes[neighbor_id].neighbors;
                if layer < neighbors.len() {
                    neighbors[layer].insert(id);
                    if neighbors[layer].len() > max_conn {
                        self.prune_neighbors(neighbor_id, layer, max_conn);
                    }
                }
            }

            if let Some(closest) = candidates.first() {
                current_entry = closest.id;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }
        Ok(id)
    }

    /// The `k` nearest ids to `query` with their cosine distances, closest
    /// first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }
        let Some(entry_id) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = normalized(query);
        let mut current_entry = entry_id;
        if self.max_level > 0 {
            current_entry =
                self.greedy_search_to_layer(&query, entry_id, self.max_level, 1);
        }

        let ef = self.config.ef_search.max(k);
        Ok(self
            .search_layer(&query, current_entry, ef, 0)
            .into_iter()
            .take(k)
            .map(|s| (s.id, (1.0 - s.score).max(0.0)))
            .collect())
    }

    /// Exact nearest neighbors by linear scan, same output shape as
    /// [`HnswIndex::search`]. Ties favor the lower id.
    pub fn exhaustive_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }

        let query = normalized(query);
        let mut scored: Vec<ScoredId> = (0..self.vectors.len())
            .map(|id| ScoredId {
                score: self.similarity(&query, id),
                id,
            })
            .collect();
        scored.sort_by(by_score_desc);
        Ok(scored
            .into_iter()
            .take(k)
            .map(|s| (s.id, (1.0 - s.score).max(0.0)))
            .collect())
    }

    fn similarity(&self, query: &[f32], id: usize) -> f32 {
        dot(query, &self.vectors[id])
    }

    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let hash = splitmix64(self.rng_seed.wrapping_add(self.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        (-uniform.ln() * self.config.ml) as usize
    }

    /// Beam search on one layer. Returns up to `ef` nodes, best first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_id: usize,
        ef: usize,
        layer: usize,
    ) -> Vec<ScoredId> {
        let entry = ScoredId {
            score: self.similarity(query, entry_id),
            id: entry_id,
        };

        let mut visited = BTreeSet::from([entry_id]);
        let mut candidates = BinaryHeap::from([entry]);
        let mut results: BinaryHeap<Reverse<ScoredId>> =
            BinaryHeap::from([Reverse(entry)]);

        while let Some(nearest) = candidates.pop() {
            let worst = results.peek().map_or(f32::NEG_INFINITY, |r| r.0.score);
            if nearest.score < worst && results.len() >= ef {
                break;
            }

            let Some(neighbors) = self.nodes[nearest.id].neighbors.get(layer)
            else {
                continue;
            };
            for &neighbor_id in neighbors {
                if !visited.insert(neighbor_id) {
                    continue;
                }

                let score = self.similarity(query, neighbor_id);
                let worst =
                    results.peek().map_or(f32::NEG_INFINITY, |r| r.0.score);
                if results.len() < ef || score > worst {
                    let scored = ScoredId {
                        score,
                        id: neighbor_id,
                    };
                    candidates.push(scored);
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<ScoredId> =
            results.into_iter().map(|r| r.0).collect();
        found.sort_by(by_score_desc);
        found
    }

    /// Walk down from `from_layer` to `to_layer`, moving to the best
    /// neighbor on each layer until no neighbor improves.
    fn greedy_search_to_layer(
        &self,
        query: &[f32],
        entry_id: usize,
        from_layer: usize,
        to_layer: usize,
    ) -> usize {
        let mut current = entry_id;

        for layer in (to_layer..=from_layer).rev() {
            loop {
                let mut best = ScoredId {
                    score: self.similarity(query, current),
                    id: current,
                };
                if let Some(neighbors) = self.nodes[current].neighbors.get(layer)
                {
                    for &neighbor_id in neighbors {
                        let candidate = ScoredId {
                            score: self.similarity(query, neighbor_id),
                            id: neighbor_id,
                        };
                        if candidate > best {
                            best = candidate;
                        }
                    }
                }

                if best.id == current {
                    break;
                }
                current = best.id;
            }
        }

        current
    }

    fn prune_neighbors(&mut self, id: usize, layer: usize, max_conn: usize) {
        let own = &self.vectors[id];
        let mut scored: Vec<ScoredId> = self.nodes[id].neighbors[layer]
            .iter()
            .map(|&nid| ScoredId {
                score: dot(own, &self.vectors[nid]),
                id: nid,
            })
            .collect();
        scored.sort_by(by_score_desc);

        self.nodes[id].neighbors[layer] =
            scored.into_iter().take(max_conn).map(|s| s.id).collect();
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vec![0.0; vector.len()]
    }
}
