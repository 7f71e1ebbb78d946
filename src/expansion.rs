use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, BinaryHeap},
};

use serde::{Deserialize, Serialize};

use crate::tokenizer::Category;

/// Entries per category bucket.
pub const CATEGORY_BUCKET_LIMIT: usize = 10;

/// Categories that get a bucket in [`QueryExpansionResult::category_terms`].
pub const BUCKETED_CATEGORIES: [Category; 3] =
    [Category::Keyword, Category::Identifier, Category::Concept];

/// Outcome of expanding a free-text query against the vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryExpansionResult {
    /// Query tokens after term extraction.
    pub original_terms: Vec<String>,
    /// Vocabulary terms the query expands to, best first.
    pub expanded_terms: Vec<String>,
    /// Co-occurring terms per query token.
    pub similar_terms: BTreeMap<String, Vec<String>>,
    pub category_terms: BTreeMap<Category, Vec<String>>,
    /// Score of each expanded term. Index weight on the lexical path,
    /// `1 / (1 + distance)` for ANN hits, cosine on the fallback path.
    pub weighted_terms: BTreeMap<String, f64>,
}

pub fn empty_buckets() -> BTreeMap<Category, Vec<String>> {
    BUCKETED_CATEGORIES
        .iter()
        .map(|c| (*c, Vec::new()))
        .collect()
}

/// Group terms into the keyword/identifier/concept buckets, keeping input
/// order and at most [`CATEGORY_BUCKET_LIMIT`] per bucket.
pub fn bucket_by_category<'a, I>(terms: I) -> BTreeMap<Category, Vec<String>>
where
    I: IntoIterator<Item = (&'a str, Category)>,
{
    let mut buckets = empty_buckets();
    for (term, category) in terms {
        if let Some(bucket) = buckets.get_mut(&category)
            && bucket.len() < CATEGORY_BUCKET_LIMIT
        {
            bucket.push(term.to_string());
        }
    }
    buckets
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let sim = dot / (na.sqrt() * nb.sqrt());
    if sim.is_finite() { sim } else { 0.0 }
}

/// A candidate expansion term. Orders by score, then index weight, then
/// term ascending, so equal scores resolve the same way whichever search
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTerm {
    pub term: String,
    pub score: f64,
    pub weight: f64,
}

impl ScoredTerm {
    pub fn new(term: impl Into<String>, score: f64, weight: f64) -> Self {
        Self {
            term: term.into(),
            score,
            weight,
        }
    }
}

impl Eq for ScoredTerm {}

impl PartialOrd for ScoredTerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredTerm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.weight.total_cmp(&other.weight))
            .then_with(|| other.term.cmp(&self.term))
    }
}

/// The `k` best candidates as `(term, score)`, best first, keeping at most
/// `k` entries in memory.
pub fn top_k<I>(items: I, k: usize) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = ScoredTerm>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Reverse<ScoredTerm>> =
        BinaryHeap::with_capacity(k + 1);
    for item in items {
        heap.push(Reverse(item));
        if heap.len() > k {
            heap.pop();
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(r)| (r.term, r.score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(t, s)| (t.to_string(), *s)).collect()
    }

    fn candidates(items: &[(&str, f64, f64)]) -> Vec<ScoredTerm> {
        items
            .iter()
            .map(|(t, s, w)| ScoredTerm::new(*t, *s, *w))
            .collect()
    }

    #[test]
    fn top_k_keeps_best_in_order() {
        let got = top_k(
            candidates(&[
                ("a", 0.1, 1.0),
                ("b", 0.9, 1.0),
                ("c", 0.5, 1.0),
                ("d", 0.7, 1.0),
            ]),
            2,
        );
        assert_eq!(got, scored(&[("b", 0.9), ("d", 0.7)]));
    }

    #[test]
    fn top_k_breaks_ties_by_weight_then_term() {
        let got = top_k(
            candidates(&[
                ("zeta", 1.0, 0.5),
                ("beta", 1.0, 0.2),
                ("alpha", 1.0, 0.2),
            ]),
            2,
        );
        assert_eq!(got, scored(&[("zeta", 1.0), ("alpha", 1.0)]));
        assert!(top_k(candidates(&[("x", 1.0, 1.0)]), 0).is_empty());
    }

    #[test]
    fn top_k_agrees_with_full_sort() {
        let items: Vec<ScoredTerm> = (0..200)
            .map(|i| {
                ScoredTerm::new(
                    format!("t{i:03}"),
                    ((i * 37) % 101) as f64,
                    (i % 3) as f64,
                )
            })
            .collect();
        let mut sorted = items.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        let expected: Vec<(String, f64)> = sorted
            .into_iter()
            .take(15)
            .map(|c| (c.term, c.score))
            .collect();
        assert_eq!(top_k(items, 15), expected);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-12);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn buckets_cap_and_skip_general() {
        let many: Vec<String> = (0..15).map(|i| format!("kw{i}")).collect();
        let mut input: Vec<(&str, Category)> = many
            .iter()
            .map(|t| (t.as_str(), Category::Keyword))
            .collect();
        input.push(("plain", Category::General));
        input.push(("parse_config", Category::Identifier));

        let buckets = bucket_by_category(input);
        assert_eq!(buckets[&Category::Keyword].len(), CATEGORY_BUCKET_LIMIT);
        assert_eq!(buckets[&Category::Identifier], vec!["parse_config"]);
        assert!(buckets[&Category::Concept].is_empty());
        assert!(!buckets.contains_key(&Category::General));
    }

    #[test]
    fn result_serializes_category_keys_as_names() {
        let result = QueryExpansionResult {
            original_terms: vec!["q".into()],
            category_terms: empty_buckets(),
            ..QueryExpansionResult::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["category_terms"]["keyword"].is_array());
    }
}
