use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, PathFilter},
    embedder::Embedder,
    error::{Error, Result},
    expansion::{
        QueryExpansionResult,
        ScoredTerm,
        bucket_by_category,
        cosine,
        top_k,
    },
    export::{ExportFormat, render},
    fingerprint::{self, ChangeKind, Fingerprint},
    index::{
        DocumentInfo,
        GlobalStats,
        IndexLimits,
        IndexMetadata,
        TermInfo,
        VocabularyIndex,
    },
    snapshot,
    tokenizer::{Category, TermFilter},
    vector_store::TermVectorStore,
    walker,
};

/// Expansion size used when a caller passes 0.
pub const DEFAULT_EXPANSION_LIMIT: usize = 20;

/// Terms warmed by [`VocabularyBuilder::cache_term_embeddings`] by default.
pub const DEFAULT_CACHE_LIMIT: usize = 10_000;

/// Co-occurring terms listed per query token.
const SIMILAR_PER_TOKEN: usize = 5;

/// Outcome of a build, update or refresh pass.
///
/// File-level failures never abort a pass; they are collected in `errors`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateResult {
    pub added_files: usize,
    pub updated_files: usize,
    pub deleted_files: usize,
    pub new_terms: usize,
    pub removed_terms: usize,
    pub duration: Duration,
    pub errors: Vec<String>,
}

impl UpdateResult {
    pub fn is_noop(&self) -> bool {
        self.added_files == 0
            && self.updated_files == 0
            && self.deleted_files == 0
            && self.new_terms == 0
            && self.removed_terms == 0
    }

    /// Fold another pass into this one.
    pub fn merge(&mut self, other: UpdateResult) {
        self.added_files += other.added_files;
        self.updated_files += other.updated_files;
        self.deleted_files += other.deleted_files;
        self.new_terms += other.new_terms;
        self.removed_terms += other.removed_terms;
        self.duration += other.duration;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VocabularyStats {
    pub global: GlobalStats,
    pub metadata: IndexMetadata,
    pub categories: BTreeMap<Category, usize>,
    pub languages: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TermFrequency {
    pub total_freq: usize,
    pub document_freq: usize,
    pub tf_idf: f64,
}

enum FileOutcome {
    Unchanged,
    Loaded {
        path: String,
        kind: ChangeKind,
        fingerprint: Fingerprint,
        tokens: Vec<String>,
    },
    Failed(String),
}

/// Owns one vocabulary index and everything that mutates or queries it.
///
/// Mutations (build, update, refresh, cleanup, optimize) are serialized by a
/// build gate and apply their changes under the index write lock; file
/// reading and tokenizing happen before the lock is taken. Queries only
/// take the read lock.
pub struct VocabularyBuilder {
    config: Config,
    filter: PathFilter,
    term_filter: TermFilter,
    index: RwLock<VocabularyIndex>,
    build_gate: Mutex<()>,
    vectors: Mutex<Option<Arc<TermVectorStore>>>,
}

impl std::fmt::Debug for VocabularyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("VocabularyBuilder")
            .field("data_dir", &self.config.data_dir)
            .field("documents", &index.document_count())
            .field("terms", &index.term_count())
            .finish_non_exhaustive()
    }
}

fn limits(config: &Config) -> IndexLimits {
    IndexLimits {
        max_positions: config.max_positions,
        max_docs_per_term: config.max_docs_per_term,
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Canonical key for a caller-supplied path, or the path as given when it
/// cannot be resolved (e.g. the file is gone).
fn lookup_key(path: &Path) -> String {
    path.canonicalize()
        .map(|p| path_key(&p))
        .unwrap_or_else(|_| path_key(path))
}

fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_EXPANSION_LIMIT
    } else {
        limit
    }
}

/// Run a blocking embedder call off the async runtime, bounded by
/// `timeout`. A timed-out call is abandoned.
async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => {
            Err(Error::Embedder(format!("embedder task failed: {join}")))
        }
        Err(_) => Err(Error::EmbedderTimeout(timeout)),
    }
}

impl VocabularyBuilder {
    /// Start from an empty index.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let index = VocabularyIndex::new(limits(&config));
        Self::with_index(config, index)
    }

    /// Resume from the snapshot in the data directory, or start empty when
    /// there is none.
    pub fn load(config: Config) -> Result<Self> {
        config.validate()?;
        let index = match snapshot::load(&config.index_file())? {
            Some(mut index) => {
                index.set_limits(limits(&config));
                info!(
                    documents = index.document_count(),
                    terms = index.term_count(),
                    "loaded vocabulary snapshot"
                );
                index
            }
            None => VocabularyIndex::new(limits(&config)),
        };
        Self::with_index(config, index)
    }

    fn with_index(config: Config, index: VocabularyIndex) -> Result<Self> {
        Ok(Self {
            filter: config.path_filter()?,
            term_filter: TermFilter::from_config(&config),
            index: RwLock::new(index),
            build_gate: Mutex::new(()),
            vectors: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -- Build / update --

    /// Index the given files. Paths rejected by the include/exclude
    /// patterns are skipped; unresolvable paths are reported as errors.
    pub fn build_from_files(&self, paths: &[PathBuf]) -> Result<UpdateResult> {
        let _gate = self.build_gate.lock();
        let started = Instant::now();
        let mut result = UpdateResult::default();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match path.canonicalize() {
                Ok(canonical) if self.filter.matches(&canonical) => {
                    files.push(canonical);
                }
                Ok(canonical) => {
                    debug!(path = %canonical.display(), "skipped by patterns");
                }
                Err(e) => result
                    .errors
                    .push(format!("Error processing {}: {e}", path.display())),
            }
        }
        files.sort();
        files.dedup();

        self.run_batch(files, Vec::new(), result, started)
    }

    /// Index every accepted file under `root`. Never removes documents.
    pub fn build_from_directory(
        &self,
        root: &Path,
        recursive: bool,
    ) -> Result<UpdateResult> {
        let _gate = self.build_gate.lock();
        let started = Instant::now();
        let files = walker::discover_files(root, recursive, &self.filter)?;
        self.run_batch(files, Vec::new(), UpdateResult::default(), started)
    }

    /// Re-scan `root`: index new and changed files, and retract indexed
    /// documents under `root` whose file no longer exists.
    pub fn update_from_directory(
        &self,
        root: &Path,
        recursive: bool,
    ) -> Result<UpdateResult> {
        let _gate = self.build_gate.lock();
        let started = Instant::now();
        let files = walker::discover_files(root, recursive, &self.filter)?;

        // discover_files succeeded, so the root resolves.
        let canonical_root =
            root.canonicalize().map_err(|source| Error::Traversal {
                path: root.to_path_buf(),
                source,
            })?;
        let discovered: HashSet<String> =
            files.iter().map(|f| path_key(f)).collect();
        let vanished = self.index.read().document_paths(|doc| {
            let doc_path = Path::new(doc);
            doc_path.starts_with(&canonical_root)
                && !discovered.contains(doc)
                && !doc_path.exists()
        });

        self.run_batch(files, vanished, UpdateResult::default(), started)
    }

    /// Re-check every indexed document: changed files are re-indexed and
    /// vanished files retracted.
    pub fn refresh(&self) -> Result<UpdateResult> {
        let _gate = self.build_gate.lock();
        let started = Instant::now();

        let (existing, vanished): (Vec<String>, Vec<String>) = self
            .index
            .read()
            .document_paths(|_| true)
            .into_iter()
            .partition(|path| Path::new(path).exists());
        let files = existing.into_iter().map(PathBuf::from).collect();

        self.run_batch(files, vanished, UpdateResult::default(), started)
    }

    /// Shared tail of every mutation pass. Caller holds the build gate.
    fn run_batch(
        &self,
        files: Vec<PathBuf>,
        vanished: Vec<String>,
        mut result: UpdateResult,
        started: Instant,
    ) -> Result<UpdateResult> {
        let stored: HashMap<String, (String, DateTime<Utc>)> = {
            let index = self.index.read();
            files
                .iter()
                .filter_map(|f| {
                    let key = path_key(f);
                    let (hash, modified) = index.stored_fingerprint(&key)?;
                    Some((key, (hash.to_string(), modified)))
                })
                .collect()
        };

        let outcomes: Vec<FileOutcome> = files
            .par_iter()
            .map(|file| self.load_file(file, &stored))
            .collect();

        let mut index = self.index.write();
        for path in &vanished {
            if let Some(removed) = index.retract(path) {
                debug!(path, "retracted vanished document");
                result.deleted_files += 1;
                result.removed_terms += removed.len();
            }
        }

        for outcome in outcomes {
            match outcome {
                FileOutcome::Unchanged => {}
                FileOutcome::Loaded {
                    path,
                    kind,
                    fingerprint,
                    tokens,
                } => {
                    let ingested = index.ingest(&path, &fingerprint, &tokens);
                    result.new_terms += ingested.new_terms;
                    result.removed_terms += ingested.removed_terms;
                    match kind {
                        ChangeKind::New => result.added_files += 1,
                        _ => result.updated_files += 1,
                    }
                }
                FileOutcome::Failed(message) => {
                    warn!("{message}");
                    result.errors.push(message);
                }
            }
        }

        index.recompute_stats();
        index.reweight();
        result.duration = started.elapsed();
        index.record_update(files.len(), result.duration.as_millis() as u64);
        self.persist(index)?;

        info!(
            added = result.added_files,
            updated = result.updated_files,
            deleted = result.deleted_files,
            new_terms = result.new_terms,
            removed_terms = result.removed_terms,
            errors = result.errors.len(),
            elapsed_ms = result.duration.as_millis() as u64,
            "vocabulary pass complete"
        );
        Ok(result)
    }

    fn load_file(
        &self,
        path: &Path,
        stored: &HashMap<String, (String, DateTime<Utc>)>,
    ) -> FileOutcome {
        let key = path_key(path);
        let loaded = match fingerprint::load(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                return FileOutcome::Failed(format!(
                    "Error processing {key}: {e}"
                ));
            }
        };

        let previous = stored
            .get(&key)
            .map(|(hash, modified)| (hash.as_str(), *modified));
        let kind = fingerprint::classify(previous, &loaded.fingerprint);
        if kind == ChangeKind::Unchanged {
            return FileOutcome::Unchanged;
        }

        debug!(path = key, ?kind, "indexing");
        let tokens = self.term_filter.extract_terms(&loaded.text());
        FileOutcome::Loaded {
            path: key,
            kind,
            fingerprint: loaded.fingerprint,
            tokens,
        }
    }

    /// Write the snapshot, letting readers in while it is serialized.
    /// Caller holds the build gate.
    fn persist(&self, index: RwLockWriteGuard<'_, VocabularyIndex>) -> Result<()> {
        let index = RwLockWriteGuard::downgrade(index);
        let size = snapshot::save(&index, &self.config.index_file())?;
        drop(index);
        self.index.write().set_index_size(size);
        Ok(())
    }

    /// Persist the current index.
    pub fn save(&self) -> Result<()> {
        let _gate = self.build_gate.lock();
        let index = self.index.write();
        self.persist(index)
    }

    // -- Maintenance --

    /// Drop terms not seen within `max_age`. Returns how many were removed.
    pub fn cleanup_old_terms(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::Config(format!("invalid max age: {e}")))?;
        let _gate = self.build_gate.lock();

        let mut index = self.index.write();
        let removed = index.remove_terms_seen_before(Utc::now() - max_age);
        if removed > 0 {
            index.recompute_stats();
            index.reweight();
            self.persist(index)?;
        }
        info!(removed, "cleaned up old terms");
        Ok(removed)
    }

    /// Re-apply position limits, recompute weights and persist.
    pub fn optimize(&self) -> Result<()> {
        let _gate = self.build_gate.lock();
        let mut index = self.index.write();
        index.compact_positions();
        index.recompute_stats();
        index.reweight();
        self.persist(index)?;
        info!("vocabulary index optimized");
        Ok(())
    }

    // -- Read accessors --

    pub fn stats(&self) -> VocabularyStats {
        let index = self.index.read();
        VocabularyStats {
            global: index.stats().clone(),
            metadata: index.metadata().clone(),
            categories: index.category_counts(),
            languages: index.language_counts(),
        }
    }

    pub fn top_terms(
        &self,
        limit: usize,
        category: Option<Category>,
    ) -> Vec<TermInfo> {
        self.index
            .read()
            .top_terms(limit, category)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn term_info(&self, term: &str) -> Option<TermInfo> {
        self.index.read().term_info(term).cloned()
    }

    pub fn document_terms(&self, path: &Path) -> Option<DocumentInfo> {
        self.index.read().document_terms(&lookup_key(path)).cloned()
    }

    pub fn documents_containing(&self, term: &str) -> Vec<String> {
        self.index
            .read()
            .documents_containing(term)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn term_frequency(&self, term: &str) -> Option<TermFrequency> {
        let index = self.index.read();
        let info = index.term_info(term)?;
        Some(TermFrequency {
            total_freq: info.total_freq,
            document_freq: info.document_freq,
            tf_idf: index.tf_idf(term),
        })
    }

    pub fn document_similarity(&self, a: &Path, b: &Path) -> f64 {
        self.index
            .read()
            .document_similarity(&lookup_key(a), &lookup_key(b))
    }

    pub fn similar_terms(&self, term: &str, limit: usize) -> Vec<(String, f64)> {
        let term = term.to_ascii_lowercase();
        self.index.read().similar_terms(&term, limit)
    }

    /// Write the top `limit` terms (0 for all) to `path`. Returns the
    /// number of terms written.
    pub fn export(
        &self,
        path: &Path,
        format: ExportFormat,
        limit: usize,
    ) -> Result<usize> {
        let terms = self.top_terms(limit, None);
        let content = render(&terms, format)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        info!(path = %path.display(), %format, terms = terms.len(), "exported vocabulary");
        Ok(terms.len())
    }

    // -- Query expansion --

    /// Lexical matches for `query`: exact token matches in query order,
    /// then prefix matches by weight (ties by term). Deduplicated and
    /// truncated to `limit` (0 means [`DEFAULT_EXPANSION_LIMIT`]).
    pub fn search_terms(&self, query: &str, limit: usize) -> Vec<TermInfo> {
        let tokens = self.term_filter.extract_terms(query);
        let index = self.index.read();
        lexical_matches(&index, &tokens, effective_limit(limit))
            .into_iter()
            .cloned()
            .collect()
    }

    /// Lexical query expansion. Never fails; an unknown query yields an
    /// empty expansion.
    pub fn expand_query(&self, query: &str, limit: usize) -> QueryExpansionResult {
        let tokens = self.term_filter.extract_terms(query);
        let index = self.index.read();
        let matches = lexical_matches(&index, &tokens, effective_limit(limit));

        QueryExpansionResult {
            similar_terms: similar_by_token(&index, &tokens),
            expanded_terms: matches.iter().map(|t| t.term.clone()).collect(),
            category_terms: bucket_by_category(
                matches.iter().map(|t| (t.term.as_str(), t.category)),
            ),
            weighted_terms: matches
                .iter()
                .map(|t| (t.term.clone(), t.weight))
                .collect(),
            original_terms: tokens,
        }
    }

    /// Embedding-based query expansion.
    ///
    /// Warms the vector store with the highest-weighted terms, embeds the
    /// query and searches the ANN graph. An empty or failed ANN search falls
    /// back to brute-force cosine over the top terms. Terms no longer in the
    /// index are skipped. Both paths break equal scores by index weight,
    /// then term. Embedder failures and
    /// timeouts degrade to [`expand_query`]; vector store storage errors are
    /// returned.
    ///
    /// [`expand_query`]: VocabularyBuilder::expand_query
    pub async fn expand_query_with_embedding(
        &self,
        query: &str,
        limit: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<QueryExpansionResult> {
        let limit = effective_limit(limit);
        let timeout = self.config.embed_timeout();
        let batch_size = self.config.embed_batch_size;

        let candidates = self.top_term_names(self.config.semantic_candidates);
        if candidates.is_empty() {
            return Ok(self.expand_query(query, limit));
        }

        let store = self.vector_store(embedder.dimension())?;

        {
            let store = Arc::clone(&store);
            let embedder = Arc::clone(&embedder);
            let warm = run_blocking(timeout, move || {
                store.ensure_vectors(&candidates, embedder.as_ref(), batch_size)
            })
            .await;
            if let Err(e) = warm {
                warn!(error = %e, "could not warm term vectors");
            }
        }

        let query_vector = {
            let embedder = Arc::clone(&embedder);
            let text = vec![query.to_string()];
            match run_blocking(timeout, move || embedder.embed(&text)).await {
                Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
                Ok(_) => {
                    warn!("embedder returned no query vector");
                    return Ok(self.expand_query(query, limit));
                }
                Err(e) => {
                    warn!(error = %e, "query embedding failed, using lexical expansion");
                    return Ok(self.expand_query(query, limit));
                }
            }
        };

        let ann_hits = {
            let index = self.index.read();
            store
                .search_where(&query_vector, limit, |term| {
                    index.contains_term(term)
                })
                .map(|found| {
                    found
                        .into_iter()
                        .map(|(term, d)| {
                            let weight = term_weight(&index, &term);
                            let score = 1.0 / (1.0 + f64::from(d));
                            ScoredTerm::new(term, score, weight)
                        })
                        .collect::<Vec<_>>()
                })
        };
        let mut hits = match ann_hits {
            Ok(found) => top_k(found, limit),
            Err(e) => {
                warn!(error = %e, "ANN search failed");
                Vec::new()
            }
        };

        if hits.is_empty() {
            debug!("ANN search empty, falling back to brute force");
            let pool = self.top_term_names(self.config.fallback_pool);
            let embedder = Arc::clone(&embedder);
            let vectors = {
                let pool = pool.clone();
                run_blocking(timeout, move || embedder.embed(&pool)).await
            };
            match vectors {
                Ok(vectors) => {
                    let index = self.index.read();
                    hits = top_k(
                        pool.into_iter().zip(vectors).map(|(term, v)| {
                            let weight = term_weight(&index, &term);
                            let score = cosine(&query_vector, &v);
                            ScoredTerm::new(term, score, weight)
                        }),
                        limit,
                    );
                }
                Err(e) => {
                    warn!(error = %e, "fallback embedding failed, using lexical expansion");
                    return Ok(self.expand_query(query, limit));
                }
            }
        }

        let tokens = self.term_filter.extract_terms(query);
        let index = self.index.read();
        let categorized: Vec<(&str, Category)> = hits
            .iter()
            .filter_map(|(term, _)| {
                index.term_info(term).map(|t| (term.as_str(), t.category))
            })
            .collect();

        Ok(QueryExpansionResult {
            similar_terms: similar_by_token(&index, &tokens),
            category_terms: bucket_by_category(categorized),
            expanded_terms: hits.iter().map(|(t, _)| t.clone()).collect(),
            weighted_terms: hits.into_iter().collect(),
            original_terms: tokens,
        })
    }

    /// Embed and cache vectors for the top `limit` terms (0 means
    /// [`DEFAULT_CACHE_LIMIT`]). Returns how many terms were newly embedded.
    pub fn cache_term_embeddings(
        &self,
        embedder: &dyn Embedder,
        limit: usize,
    ) -> Result<usize> {
        let limit = if limit == 0 { DEFAULT_CACHE_LIMIT } else { limit };
        let terms = self.top_term_names(limit);
        if terms.is_empty() {
            return Ok(0);
        }
        let store = self.vector_store(embedder.dimension())?;
        let embedded =
            store.ensure_vectors(&terms, embedder, self.config.embed_batch_size)?;
        info!(embedded, cached = store.len(), "cached term embeddings");
        Ok(embedded)
    }

    fn top_term_names(&self, limit: usize) -> Vec<String> {
        self.index
            .read()
            .top_terms(limit, None)
            .into_iter()
            .map(|t| t.term.clone())
            .collect()
    }

    /// Open the vector store on first use. Concurrent first callers open it
    /// once.
    fn vector_store(&self, dimension: usize) -> Result<Arc<TermVectorStore>> {
        let mut slot = self.vectors.lock();
        if let Some(store) = slot.as_ref() {
            if store.dimension() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: store.dimension(),
                    found: dimension,
                });
            }
            return Ok(Arc::clone(store));
        }

        let store =
            Arc::new(TermVectorStore::open(&self.config.vectors_db(), dimension)?);
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }
}

fn lexical_matches<'a>(
    index: &'a VocabularyIndex,
    tokens: &[String],
    limit: usize,
) -> Vec<&'a TermInfo> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut matches: Vec<&TermInfo> = Vec::new();

    for token in tokens {
        if let Some(info) = index.term_info(token)
            && seen.insert(info.term.as_str())
        {
            matches.push(info);
        }
    }

    let mut prefixed: Vec<&TermInfo> = Vec::new();
    for token in tokens {
        for info in index.prefix_matches(token) {
            if seen.insert(info.term.as_str()) {
                prefixed.push(info);
            }
        }
    }
    prefixed.sort_by(|a, b| {
        b.weight.total_cmp(&a.weight).then_with(|| a.term.cmp(&b.term))
    });

    matches.extend(prefixed);
    matches.truncate(limit);
    matches
}

fn term_weight(index: &VocabularyIndex, term: &str) -> f64 {
    index.term_info(term).map_or(0.0, |t| t.weight)
}

fn similar_by_token(
    index: &VocabularyIndex,
    tokens: &[String],
) -> BTreeMap<String, Vec<String>> {
    tokens
        .iter()
        .filter_map(|token| {
            let similar: Vec<String> = index
                .similar_terms(token, SIMILAR_PER_TOKEN)
                .into_iter()
                .map(|(term, _)| term)
                .collect();
            (!similar.is_empty()).then(|| (token.clone(), similar))
        })
        .collect()
}
