use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    ops::Bound,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    fingerprint::Fingerprint,
    tokenizer::{Category, categorize, detect_language},
};

/// Bumped whenever the persisted layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

/// One vocabulary entry: a term and every document it occurs in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermInfo {
    pub term: String,
    /// Always equal to `documents.len()`.
    pub document_freq: usize,
    pub total_freq: usize,
    /// Document path to occurrence count.
    pub documents: BTreeMap<String, usize>,
    /// Document path to token positions, bounded by the index limits.
    pub positions: BTreeMap<String, Vec<usize>>,
    pub last_seen: DateTime<Utc>,
    pub weight: f64,
    pub category: Category,
}

/// Forward entry for one indexed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub path: String,
    pub file_hash: String,
    pub last_modified: DateTime<Utc>,
    pub total_terms: usize,
    pub unique_terms: usize,
    pub term_freqs: BTreeMap<String, usize>,
    pub term_positions: BTreeMap<String, Vec<usize>>,
    pub language: String,
    /// Extension including the leading dot, empty when absent.
    pub file_type: String,
    pub size: u64,
}

/// Corpus-wide counters, derived from the two maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_documents: usize,
    /// Sum of term occurrences over all documents.
    pub total_terms: usize,
    pub unique_terms: usize,
    /// Sum of distinct terms per document.
    pub total_doc_terms: usize,
    /// Mean document size in bytes.
    pub avg_doc_length: f64,
    /// Size of the last written snapshot in bytes.
    pub index_size: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            total_documents: 0,
            total_terms: 0,
            unique_terms: 0,
            total_doc_terms: 0,
            avg_doc_length: 0.0,
            index_size: 0,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub total_updates: u64,
    pub build_duration_ms: u64,
    pub last_build_files: usize,
    pub indexer_version: String,
}

impl Default for IndexMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            last_update: now,
            total_updates: 0,
            build_duration_ms: 0,
            last_build_files: 0,
            indexer_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Storage bounds applied while ingesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexLimits {
    /// Positions kept per (term, document).
    pub max_positions: usize,
    /// Documents per term whose positions are kept. Counts are never capped.
    pub max_docs_per_term: usize,
}

impl Default for IndexLimits {
    fn default() -> Self {
        Self {
            max_positions: 100,
            max_docs_per_term: 10_000,
        }
    }
}

/// Net vocabulary change caused by ingesting one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub new_terms: usize,
    pub removed_terms: usize,
}

/// Inverted (term to documents) and forward (document to terms) views of
/// one term/document relation.
///
/// The maps are private: every mutation goes through [`ingest`],
/// [`retract`] or [`remove_terms_seen_before`], which keep the two views
/// reconciled.
///
/// [`ingest`]: VocabularyIndex::ingest
/// [`retract`]: VocabularyIndex::retract
/// [`remove_terms_seen_before`]: VocabularyIndex::remove_terms_seen_before
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VocabularyIndex {
    metadata: IndexMetadata,
    stats: GlobalStats,
    terms: BTreeMap<String, TermInfo>,
    documents: BTreeMap<String, DocumentInfo>,
    #[serde(skip)]
    limits: IndexLimits,
}

impl VocabularyIndex {
    pub fn new(limits: IndexLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn set_limits(&mut self, limits: IndexLimits) {
        self.limits = limits;
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn stats(&self) -> &GlobalStats {
        &self.stats
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains_term(&self, term: &str) -> bool {
        self.terms.contains_key(term)
    }

    pub fn term_info(&self, term: &str) -> Option<&TermInfo> {
        self.terms.get(term)
    }

    pub fn document_terms(&self, path: &str) -> Option<&DocumentInfo> {
        self.documents.get(path)
    }

    /// Stored `(hash, mtime)` for change detection.
    pub fn stored_fingerprint(
        &self,
        path: &str,
    ) -> Option<(&str, DateTime<Utc>)> {
        self.documents
            .get(path)
            .map(|doc| (doc.file_hash.as_str(), doc.last_modified))
    }

    /// Terms starting with `prefix`, in term order.
    pub fn prefix_matches(&self, prefix: &str) -> Vec<&TermInfo> {
        self.terms
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(term, _)| term.starts_with(prefix))
            .map(|(_, info)| info)
            .collect()
    }

    /// Record `path` with the tokens extracted from it.
    ///
    /// An existing record for `path` is retracted first. The outcome counts
    /// terms that appeared in or vanished from the vocabulary overall.
    pub fn ingest(
        &mut self,
        path: &str,
        fingerprint: &Fingerprint,
        tokens: &[String],
    ) -> IngestOutcome {
        let retracted: HashSet<String> =
            self.retract(path).unwrap_or_default().into_iter().collect();

        let mut term_freqs: BTreeMap<String, usize> = BTreeMap::new();
        let mut term_positions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (position, token) in tokens.iter().enumerate() {
            *term_freqs.entry(token.clone()).or_default() += 1;
            let positions = term_positions.entry(token.clone()).or_default();
            if positions.len() < self.limits.max_positions {
                positions.push(position);
            }
        }

        let now = Utc::now();
        let mut created = 0;
        let mut recreated = 0;
        for (term, &freq) in &term_freqs {
            let positions =
                term_positions.get(term).cloned().unwrap_or_default();
            match self.terms.get_mut(term) {
                Some(info) => {
                    info.document_freq += 1;
                    info.total_freq += freq;
                    info.documents.insert(path.to_string(), freq);
                    if info.positions.len() < self.limits.max_docs_per_term {
                        info.positions.insert(path.to_string(), positions);
                    }
                    info.last_seen = now;
                }
                None => {
                    if retracted.contains(term) {
                        recreated += 1;
                    } else {
                        created += 1;
                    }
                    let mut stored_positions = BTreeMap::new();
                    if self.limits.max_docs_per_term > 0 {
                        stored_positions.insert(path.to_string(), positions);
                    }
                    self.terms.insert(
                        term.clone(),
                        TermInfo {
                            term: term.clone(),
                            document_freq: 1,
                            total_freq: freq,
                            documents: BTreeMap::from([(
                                path.to_string(),
                                freq,
                            )]),
                            positions: stored_positions,
                            last_seen: now,
                            weight: 0.0,
                            category: categorize(term),
                        },
                    );
                }
            }
        }

        let file_path = std::path::Path::new(path);
        self.documents.insert(
            path.to_string(),
            DocumentInfo {
                path: path.to_string(),
                file_hash: fingerprint.hash.clone(),
                last_modified: fingerprint.modified,
                total_terms: tokens.len(),
                unique_terms: term_freqs.len(),
                term_freqs,
                term_positions,
                language: detect_language(file_path).to_string(),
                file_type: file_path
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
                    .unwrap_or_default(),
                size: fingerprint.size,
            },
        );

        IngestOutcome {
            new_terms: created,
            removed_terms: retracted.len() - recreated,
        }
    }

    /// Remove `path`'s contribution from every term it contains.
    ///
    /// Returns the terms deleted because no document holds them anymore, or
    /// `None` when `path` is not indexed.
    pub fn retract(&mut self, path: &str) -> Option<Vec<String>> {
        let doc = self.documents.remove(path)?;

        let mut removed = Vec::new();
        for (term, freq) in &doc.term_freqs {
            let Some(info) = self.terms.get_mut(term) else {
                continue;
            };
            info.document_freq = info.document_freq.saturating_sub(1);
            info.total_freq = info.total_freq.saturating_sub(*freq);
            info.documents.remove(path);
            info.positions.remove(path);

            if info.document_freq == 0 {
                self.terms.remove(term);
                removed.push(term.clone());
            }
        }

        Some(removed)
    }

    /// Indexed document paths accepted by `keep`.
    pub fn document_paths<F>(&self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        self.documents
            .keys()
            .filter(|path| keep(path))
            .cloned()
            .collect()
    }

    /// Rebuild [`GlobalStats`] from the current maps. Keeps `index_size`.
    pub fn recompute_stats(&mut self) {
        let mut total_terms = 0;
        let mut total_doc_terms = 0;
        let mut total_bytes: u64 = 0;
        for doc in self.documents.values() {
            total_terms += doc.total_terms;
            total_doc_terms += doc.unique_terms;
            total_bytes += doc.size;
        }

        let total_documents = self.documents.len();
        self.stats = GlobalStats {
            total_documents,
            total_terms,
            unique_terms: self.terms.len(),
            total_doc_terms,
            avg_doc_length: if total_documents > 0 {
                total_bytes as f64 / total_documents as f64
            } else {
                0.0
            },
            index_size: self.stats.index_size,
            last_updated: Utc::now(),
        };
    }

    /// Recompute every term weight from the current [`GlobalStats`].
    ///
    /// `tf = total_freq / total_terms`,
    /// `idf = ln((documents + 1) / (document_freq + 1))`, scaled by the
    /// category boost. Non-finite or negative results become 0.
    pub fn reweight(&mut self) {
        let total_docs = self.stats.total_documents as f64;
        let total_terms = self.stats.total_terms as f64;

        for info in self.terms.values_mut() {
            info.weight = if total_docs <= 0.0 || total_terms <= 0.0 {
                0.0
            } else {
                let tf = info.total_freq as f64 / total_terms;
                let idf =
                    ((total_docs + 1.0) / (info.document_freq as f64 + 1.0)).ln();
                sanitize(tf * idf * info.category.boost())
            };
        }
    }

    /// Smoothed tf-idf for one term, 0 when unknown.
    pub fn tf_idf(&self, term: &str) -> f64 {
        let Some(info) = self.terms.get(term) else {
            return 0.0;
        };
        if self.stats.total_terms == 0 {
            return 0.0;
        }
        let tf = info.total_freq as f64 / self.stats.total_terms as f64;
        let idf = ((self.stats.total_documents as f64 + 1.0)
            / (info.document_freq as f64 + 1.0))
            .ln();
        sanitize(tf * idf)
    }

    /// Highest-weighted terms, optionally restricted to one category.
    /// Ties break by term. `limit == 0` returns all.
    pub fn top_terms(
        &self,
        limit: usize,
        category: Option<Category>,
    ) -> Vec<&TermInfo> {
        let mut terms: Vec<&TermInfo> = self
            .terms
            .values()
            .filter(|info| category.is_none_or(|c| info.category == c))
            .collect();
        terms.sort_by(|a, b| {
            b.weight.total_cmp(&a.weight).then_with(|| a.term.cmp(&b.term))
        });
        if limit > 0 {
            terms.truncate(limit);
        }
        terms
    }

    pub fn documents_containing(&self, term: &str) -> Vec<&str> {
        self.terms
            .get(term)
            .map(|info| info.documents.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Terms sharing documents with `term`, ranked by Jaccard overlap of
    /// their document sets, then by term.
    pub fn similar_terms(&self, term: &str, limit: usize) -> Vec<(String, f64)> {
        let Some(info) = self.terms.get(term) else {
            return Vec::new();
        };

        let mut candidates: BTreeSet<&str> = BTreeSet::new();
        for path in info.documents.keys() {
            if let Some(doc) = self.documents.get(path) {
                candidates.extend(doc.term_freqs.keys().map(String::as_str));
            }
        }
        candidates.remove(term);

        let mut scored: Vec<(String, f64)> = candidates
            .into_iter()
            .filter_map(|other| {
                let other_info = self.terms.get(other)?;
                let shared = other_info
                    .documents
                    .keys()
                    .filter(|path| info.documents.contains_key(*path))
                    .count();
                let union =
                    info.documents.len() + other_info.documents.len() - shared;
                (shared > 0 && union > 0)
                    .then(|| (other.to_string(), shared as f64 / union as f64))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }

    /// Jaccard similarity of two documents' term sets.
    pub fn document_similarity(&self, a: &str, b: &str) -> f64 {
        let (Some(a), Some(b)) = (self.documents.get(a), self.documents.get(b))
        else {
            return 0.0;
        };

        let shared = a
            .term_freqs
            .keys()
            .filter(|term| b.term_freqs.contains_key(*term))
            .count();
        let union = a.term_freqs.len() + b.term_freqs.len() - shared;
        if union == 0 {
            0.0
        } else {
            shared as f64 / union as f64
        }
    }

    pub fn category_counts(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for info in self.terms.values() {
            *counts.entry(info.category).or_default() += 1;
        }
        counts
    }

    pub fn language_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for doc in self.documents.values() {
            *counts.entry(doc.language.clone()).or_default() += 1;
        }
        counts
    }

    /// Delete terms last seen before `cutoff` from both views.
    pub fn remove_terms_seen_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<String> = self
            .terms
            .values()
            .filter(|info| info.last_seen < cutoff)
            .map(|info| info.term.clone())
            .collect();

        for term in &stale {
            let Some(info) = self.terms.remove(term) else {
                continue;
            };
            for path in info.documents.keys() {
                if let Some(doc) = self.documents.get_mut(path) {
                    if let Some(freq) = doc.term_freqs.remove(term) {
                        doc.total_terms = doc.total_terms.saturating_sub(freq);
                        doc.unique_terms = doc.unique_terms.saturating_sub(1);
                    }
                    doc.term_positions.remove(term);
                }
            }
        }

        stale.len()
    }

    /// Re-apply the current limits to stored positions.
    pub fn compact_positions(&mut self) {
        let IndexLimits {
            max_positions,
            max_docs_per_term,
        } = self.limits;

        for doc in self.documents.values_mut() {
            for positions in doc.term_positions.values_mut() {
                positions.truncate(max_positions);
            }
        }

        for info in self.terms.values_mut() {
            if info.positions.len() > max_docs_per_term {
                // Keep positions for the documents with most occurrences.
                let mut ranked: Vec<(&String, usize)> = info
                    .documents
                    .iter()
                    .map(|(path, freq)| (path, *freq))
                    .collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
                let keep: HashSet<String> = ranked
                    .into_iter()
                    .take(max_docs_per_term)
                    .map(|(path, _)| path.clone())
                    .collect();
                info.positions.retain(|path, _| keep.contains(path));
            }
            for positions in info.positions.values_mut() {
                positions.truncate(max_positions);
            }
        }
    }

    pub fn set_index_size(&mut self, bytes: u64) {
        self.stats.index_size = bytes;
    }

    /// Stamp metadata after a build or update pass.
    pub fn record_update(&mut self, files: usize, duration_ms: u64) {
        self.metadata.last_update = Utc::now();
        self.metadata.total_updates += 1;
        self.metadata.last_build_files = files;
        self.metadata.build_duration_ms = duration_ms;
    }

    /// Check that both views describe the same relation.
    pub fn verify(&self) -> Result<(), String> {
        let mut expected: BTreeMap<(&str, &str), usize> = BTreeMap::new();
        for (path, doc) in &self.documents {
            if doc.unique_terms != doc.term_freqs.len() {
                return Err(format!("{path}: unique_terms out of sync"));
            }
            if doc.total_terms != doc.term_freqs.values().sum::<usize>() {
                return Err(format!("{path}: total_terms out of sync"));
            }
            for (term, freq) in &doc.term_freqs {
                expected.insert((term.as_str(), path.as_str()), *freq);
            }
        }

        let mut seen = 0;
        for (term, info) in &self.terms {
            if info.document_freq == 0 {
                return Err(format!("{term}: zero document frequency"));
            }
            if info.document_freq != info.documents.len() {
                return Err(format!("{term}: document_freq out of sync"));
            }
            if info.total_freq != info.documents.values().sum::<usize>() {
                return Err(format!("{term}: total_freq out of sync"));
            }
            for (path, freq) in &info.documents {
                match expected.get(&(term.as_str(), path.as_str())) {
                    Some(f) if f == freq => seen += 1,
                    _ => {
                        return Err(format!(
                            "{term}: {path} missing from forward index"
                        ));
                    }
                }
            }
        }

        if seen != expected.len() {
            return Err("forward index holds terms the inverted index lacks"
                .to_string());
        }
        Ok(())
    }
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(hash: &str) -> Fingerprint {
        Fingerprint {
            hash: hash.to_string(),
            modified: Utc::now(),
            size: 32,
        }
    }

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn indexed(docs: &[(&str, &[&str])]) -> VocabularyIndex {
        let mut index = VocabularyIndex::new(IndexLimits::default());
        for (path, words) in docs {
            index.ingest(path, &fp(path), &tokens(words));
        }
        index.recompute_stats();
        index.reweight();
        index
    }

    #[test]
    fn ingest_counts_frequencies_and_positions() {
        let index = indexed(&[("/a.go", &["func", "foo", "return", "foo"])]);

        let foo = index.term_info("foo").unwrap();
        assert_eq!(foo.document_freq, 1);
        assert_eq!(foo.total_freq, 2);
        assert_eq!(foo.positions["/a.go"], vec![1, 3]);

        let doc = index.document_terms("/a.go").unwrap();
        assert_eq!(doc.total_terms, 4);
        assert_eq!(doc.unique_terms, 3);
        assert_eq!(doc.language, "go");
        assert_eq!(doc.file_type, ".go");
        index.verify().unwrap();
    }

    #[test]
    fn retract_deletes_orphaned_terms_only() {
        let mut index = indexed(&[
            ("/a.go", &["func", "foo", "return"]),
            ("/b.go", &["func", "bar", "return"]),
        ]);

        let removed = index.retract("/b.go").unwrap();
        assert_eq!(removed, vec!["bar".to_string()]);
        assert_eq!(index.term_info("func").unwrap().document_freq, 1);
        assert!(index.term_info("bar").is_none());
        assert!(index.retract("/b.go").is_none());
        index.verify().unwrap();
    }

    #[test]
    fn reingest_reports_net_vocabulary_change() {
        let mut index = VocabularyIndex::new(IndexLimits::default());
        let first = index.ingest("/a.go", &fp("1"), &tokens(&["alpha", "beta"]));
        assert_eq!(first, IngestOutcome { new_terms: 2, removed_terms: 0 });

        let second =
            index.ingest("/a.go", &fp("2"), &tokens(&["beta", "gamma"]));
        assert_eq!(second, IngestOutcome { new_terms: 1, removed_terms: 1 });
        assert_eq!(index.term_info("beta").unwrap().total_freq, 1);
        assert!(index.term_info("alpha").is_none());
        index.verify().unwrap();
    }

    #[test]
    fn empty_documents_are_recorded() {
        let mut index = VocabularyIndex::new(IndexLimits::default());
        let outcome = index.ingest("/empty.txt", &fp("e"), &[]);
        assert_eq!(outcome, IngestOutcome::default());
        assert_eq!(index.document_count(), 1);
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn reweight_on_empty_corpus_is_zero() {
        let mut index = VocabularyIndex::default();
        index.recompute_stats();
        index.reweight();
        assert_eq!(index.stats().total_documents, 0);
        assert!(index.top_terms(0, None).is_empty());
    }

    #[test]
    fn reweight_uses_smoothed_idf() {
        let index = indexed(&[
            ("/a.txt", &["tree", "tree", "leaf"]),
            ("/b.txt", &["leaf"]),
        ]);

        // tf = 2/4, idf = ln(3/2), general boost 1.0
        let expected = 0.5 * (3.0f64 / 2.0).ln();
        let tree = index.term_info("tree").unwrap();
        assert!((tree.weight - expected).abs() < 1e-12);

        // present everywhere: idf = ln(3/3) = 0
        assert_eq!(index.term_info("leaf").unwrap().weight, 0.0);
    }

    #[test]
    fn category_boost_orders_equal_terms() {
        let index = indexed(&[
            ("/a.txt", &["vocabulary", "return", "parse_it", "tree"]),
            ("/b.txt", &["other"]),
            ("/c.txt", &["other"]),
        ]);

        let w = |t: &str| index.term_info(t).unwrap().weight;
        assert!(w("vocabulary") > w("return"));
        assert!(w("return") > w("parse_it"));
        assert!(w("parse_it") > w("tree"));
        assert!(w("tree") > 0.0);
    }

    #[test]
    fn top_terms_filters_and_breaks_ties_by_term() {
        let index = indexed(&[
            ("/a.txt", &["zeta", "alpha", "return"]),
            ("/b.txt", &["other"]),
        ]);

        let general: Vec<&str> = index
            .top_terms(0, Some(Category::General))
            .iter()
            .map(|t| t.term.as_str())
            .collect();
        assert_eq!(general, vec!["alpha", "other", "zeta"]);

        let top = index.top_terms(1, None);
        assert_eq!(top[0].term, "return");
    }

    #[test]
    fn prefix_matches_walk_only_the_prefix_range() {
        let index =
            indexed(&[("/a.txt", &["parse", "parser", "parsing", "part"])]);
        let found: Vec<&str> = index
            .prefix_matches("pars")
            .into_iter()
            .map(|t| t.term.as_str())
            .collect();
        assert_eq!(found, vec!["parse", "parser", "parsing"]);
    }

    #[test]
    fn similar_terms_rank_by_document_overlap() {
        let index = indexed(&[
            ("/a.txt", &["cache", "redis", "ttl"]),
            ("/b.txt", &["cache", "redis"]),
            ("/c.txt", &["cache", "disk"]),
        ]);

        let similar = index.similar_terms("redis", 10);
        assert_eq!(similar[0].0, "cache");
        assert!((similar[0].1 - 2.0 / 3.0).abs() < 1e-12);
        assert!(similar.iter().all(|(t, _)| t != "redis"));
        assert!(similar.iter().all(|(t, _)| t != "disk"));
        assert!(index.similar_terms("missing", 10).is_empty());
    }

    #[test]
    fn document_similarity_is_jaccard() {
        let index = indexed(&[
            ("/a.txt", &["one", "two", "three"]),
            ("/b.txt", &["two", "three", "four"]),
        ]);
        assert!((index.document_similarity("/a.txt", "/b.txt") - 0.5).abs() < 1e-12);
        assert_eq!(index.document_similarity("/a.txt", "/nope"), 0.0);
    }

    #[test]
    fn stale_terms_leave_both_views() {
        let mut index = indexed(&[
            ("/a.txt", &["fresh", "stale", "stale"]),
            ("/b.txt", &["stale"]),
        ]);
        let past = Utc::now() - chrono::Duration::days(30);
        index.terms.get_mut("stale").unwrap().last_seen = past;

        let removed =
            index.remove_terms_seen_before(Utc::now() - chrono::Duration::days(1));
        assert_eq!(removed, 1);
        assert!(index.term_info("stale").is_none());

        let doc = index.document_terms("/a.txt").unwrap();
        assert_eq!(doc.total_terms, 1);
        assert_eq!(doc.unique_terms, 1);
        index.verify().unwrap();
    }

    #[test]
    fn position_limits_bound_storage_not_counts() {
        let mut index = VocabularyIndex::new(IndexLimits {
            max_positions: 2,
            max_docs_per_term: 1,
        });
        index.ingest("/a.txt", &fp("a"), &tokens(&["word", "word", "word"]));
        index.ingest("/b.txt", &fp("b"), &tokens(&["word"]));

        let word = index.term_info("word").unwrap();
        assert_eq!(word.document_freq, 2);
        assert_eq!(word.total_freq, 4);
        assert_eq!(word.positions.len(), 1);
        assert_eq!(word.positions["/a.txt"], vec![0, 1]);
        index.verify().unwrap();
    }

    #[test]
    fn compact_positions_applies_tighter_limits() {
        let mut index = indexed(&[
            ("/a.txt", &["word", "word", "word"]),
            ("/b.txt", &["word"]),
        ]);
        index.set_limits(IndexLimits {
            max_positions: 1,
            max_docs_per_term: 1,
        });
        index.compact_positions();

        let word = index.term_info("word").unwrap();
        assert_eq!(word.positions.len(), 1);
        assert_eq!(word.positions["/a.txt"], vec![0]);
        assert_eq!(
            index.document_terms("/a.txt").unwrap().term_positions["word"],
            vec![0]
        );
        assert_eq!(word.document_freq, 2);
    }

    #[test]
    fn stats_aggregate_documents() {
        let index = indexed(&[
            ("/a.rs", &["alpha", "beta"]),
            ("/b.md", &["alpha"]),
        ]);
        let stats = index.stats();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_terms, 3);
        assert_eq!(stats.unique_terms, 2);
        assert_eq!(stats.total_doc_terms, 3);
        assert_eq!(stats.avg_doc_length, 32.0);

        let languages = index.language_counts();
        assert_eq!(languages["rust"], 1);
        assert_eq!(languages["markdown"], 1);
        assert_eq!(index.category_counts()[&Category::General], 2);
    }
}
