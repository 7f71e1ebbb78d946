use std::{collections::HashMap, path::Path};

use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::{
    embedder::Embedder,
    error::{Error, Result},
    hnsw::{HnswConfig, HnswIndex},
};

/// Cached term vectors, keyed `vocab:vector:<term>`, f32 little-endian.
const VECTORS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("term_vectors");

const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const KEY_PREFIX: &str = "vocab:vector:";
const DIMENSION_KEY: &str = "dimension";

fn vector_key(term: &str) -> String {
    format!("{KEY_PREFIX}{term}")
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

struct AnnState {
    index: HnswIndex,
    /// Node id to term.
    terms: Vec<String>,
    ids: HashMap<String, usize>,
}

impl AnnState {
    fn insert(&mut self, term: &str, vector: &[f32]) -> Result<()> {
        if self.ids.contains_key(term) {
            return Ok(());
        }
        let id = self.index.insert(vector)?;
        debug_assert_eq!(id, self.terms.len());
        self.terms.push(term.to_string());
        self.ids.insert(term.to_string(), id);
        Ok(())
    }
}

/// Persistent term vector cache with an in-memory HNSW graph over it.
///
/// The dimension is fixed when the database is first created; reopening
/// with another dimension fails with [`Error::DimensionMismatch`]. The
/// graph is rebuilt from the cache on open.
pub struct TermVectorStore {
    db: Database,
    dimension: usize,
    ann: RwLock<AnnState>,
}

impl std::fmt::Debug for TermVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermVectorStore")
            .field("dimension", &self.dimension)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl TermVectorStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Embedder("embedder dimension is zero".into()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(VECTORS)?;
            let mut meta = txn.open_table(META)?;
            let stored = meta.get(DIMENSION_KEY)?.map(|g| g.value());
            match stored {
                Some(found) if found as usize != dimension => {
                    return Err(Error::DimensionMismatch {
                        expected: found as usize,
                        found: dimension,
                    });
                }
                Some(_) => {}
                None => {
                    meta.insert(DIMENSION_KEY, dimension as u64)?;
                }
            }
        }
        txn.commit()?;

        let mut state = AnnState {
            index: HnswIndex::new(dimension, HnswConfig::default()),
            terms: Vec::new(),
            ids: HashMap::new(),
        };

        {
            let txn = db.begin_read()?;
            let table = txn.open_table(VECTORS)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                let Some(term) = key.value().strip_prefix(KEY_PREFIX) else {
                    continue;
                };
                let vector = decode(value.value());
                if vector.len() == dimension {
                    state.insert(term, &vector)?;
                }
            }
        }
        debug!(
            path = %path.display(),
            vectors = state.terms.len(),
            "opened term vector store"
        );

        Ok(Self {
            db,
            dimension,
            ann: RwLock::new(state),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ann.read().terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, term: &str) -> bool {
        self.ann.read().ids.contains_key(term)
    }

    /// Cached vector for `term`, straight from the database.
    pub fn get_vector(&self, term: &str) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table
            .get(vector_key(term).as_str())?
            .map(|guard| decode(guard.value())))
    }

    /// Make sure every term has a cached vector and a graph node.
    ///
    /// Terms already cached are reused; the rest go through `embedder` in
    /// batches of `batch_size`. Returns how many terms were embedded.
    pub fn ensure_vectors(
        &self,
        terms: &[String],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<usize> {
        let pending: Vec<&String> = {
            let ann = self.ann.read();
            terms.iter().filter(|t| !ann.ids.contains_key(*t)).collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut missing: Vec<String> = Vec::new();
        {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(VECTORS)?;
            let mut ann = self.ann.write();
            for term in pending {
                match table.get(vector_key(term).as_str())? {
                    Some(guard) => {
                        let vector = decode(guard.value());
                        if vector.len() == self.dimension {
                            ann.insert(term, &vector)?;
                            continue;
                        }
                        missing.push(term.clone());
                    }
                    None => missing.push(term.clone()),
                }
            }
        }
        missing.sort();
        missing.dedup();

        let mut embedded = 0;
        for batch in missing.chunks(batch_size.max(1)) {
            let vectors = embedder.embed(batch)?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedder(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension)
            {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    found: bad.len(),
                });
            }

            let txn = self.db.begin_write()?;
            {
                let mut table = txn.open_table(VECTORS)?;
                for (term, vector) in batch.iter().zip(&vectors) {
                    let bytes: &[u8] = bytemuck::cast_slice(vector.as_slice());
                    table.insert(vector_key(term).as_str(), bytes)?;
                }
            }
            txn.commit()?;

            let mut ann = self.ann.write();
            for (term, vector) in batch.iter().zip(&vectors) {
                ann.insert(term, vector)?;
            }
            embedded += batch.len();
        }

        if embedded > 0 {
            debug!(embedded, total = self.len(), "cached term vectors");
        }
        Ok(embedded)
    }

    /// Nearest cached terms accepted by `keep`, closest first, with cosine
    /// distances. Up to `k` accepted terms are guaranteed when that many
    /// exist; more may be returned when several sit at the same distance.
    ///
    /// The graph window starts one past `k` and doubles while rejected
    /// terms crowd out accepted ones or while the window edge ties with
    /// the `k`-th accepted distance. Once it would cover the whole store
    /// the search becomes an exact scan.
    pub fn search_where<F>(
        &self,
        query: &[f32],
        k: usize,
        keep: F,
    ) -> Result<Vec<(String, f32)>>
    where
        F: Fn(&str) -> bool,
    {
        let ann = self.ann.read();
        let total = ann.terms.len();
        if k == 0 || total == 0 {
            return Ok(Vec::new());
        }

        // One slot past `k` so a tie at the k-th place is visible.
        let mut window = k.saturating_add(1).min(total);
        loop {
            let exhaustive = window >= total;
            let hits = if exhaustive {
                ann.index.exhaustive_search(query, total)?
            } else {
                ann.index.search(query, window)?
            };
            let edge = hits.last().map(|(_, d)| *d);
            let mut kept: Vec<(String, f32)> = hits
                .into_iter()
                .filter_map(|(id, d)| {
                    let term = ann.terms.get(id)?;
                    keep(term).then(|| (term.clone(), d))
                })
                .collect();

            let settled = kept.len() >= k
                && edge.is_none_or(|edge| kept[k - 1].1 < edge);
            if exhaustive || settled {
                if let Some(kth) = kept.get(k - 1).map(|(_, d)| *d) {
                    let mut rank = 0;
                    kept.retain(|(_, d)| {
                        rank += 1;
                        rank <= k || *d <= kth
                    });
                }
                debug!(window, kept = kept.len(), "vector search");
                return Ok(kept);
            }
            window = window.saturating_mul(2).min(total);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::embedder::HashEmbedder;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    struct CountingEmbedder {
        inner: HashEmbedder,
        calls: AtomicUsize,
        texts: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed(texts)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    fn counting() -> CountingEmbedder {
        CountingEmbedder {
            inner: HashEmbedder::new(32).unwrap(),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    #[test]
    fn ensure_vectors_embeds_only_missing_terms() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            TermVectorStore::open(&tmp.path().join("v.redb"), 32).unwrap();
        let embedder = counting();

        let added = store
            .ensure_vectors(&terms(&["alpha", "beta", "gamma"]), &embedder, 2)
            .unwrap();
        assert_eq!(added, 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        let added = store
            .ensure_vectors(&terms(&["beta", "delta"]), &embedder, 2)
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 4);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn vectors_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("v.redb");
        let embedder = counting();
        {
            let store = TermVectorStore::open(&path, 32).unwrap();
            store
                .ensure_vectors(&terms(&["parser", "lexer"]), &embedder, 8)
                .unwrap();
        }

        let store = TermVectorStore::open(&path, 32).unwrap();
        assert_eq!(store.len(), 2);
        let expected = embedder.inner.embed(&terms(&["parser"])).unwrap();
        assert_eq!(store.get_vector("parser").unwrap().unwrap(), expected[0]);
        assert!(store.get_vector("missing").unwrap().is_none());

        let added = store
            .ensure_vectors(&terms(&["parser"]), &embedder, 8)
            .unwrap();
        assert_eq!(added, 0);
    }

    #[test]
    fn search_returns_terms_closest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            TermVectorStore::open(&tmp.path().join("v.redb"), 32).unwrap();
        let embedder = counting();
        store
            .ensure_vectors(
                &terms(&["tokenizer", "database", "network"]),
                &embedder,
                8,
            )
            .unwrap();

        let query = embedder.inner.embed(&terms(&["tokenizer"])).unwrap();
        let found = store.search_where(&query[0], 2, |_| true).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, "tokenizer");
        assert!(found[0].1 < 1e-5);
    }

    #[test]
    fn filtered_search_widens_past_rejected_terms() {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            TermVectorStore::open(&tmp.path().join("v.redb"), 32).unwrap();
        let embedder = counting();
        store
            .ensure_vectors(
                &terms(&[
                    "tokenizer",
                    "tokenize",
                    "tokenized",
                    "tokenizing",
                    "tokens",
                    "alphabet",
                    "banana",
                    "cherry",
                    "dolphin",
                ]),
                &embedder,
                8,
            )
            .unwrap();

        let live = ["tokenizer", "alphabet", "banana", "cherry", "dolphin"];
        let query = embedder.inner.embed(&terms(&["tokenizer"])).unwrap();
        let found = store
            .search_where(&query[0], 5, |t| live.contains(&t))
            .unwrap();
        assert_eq!(found.len(), 5);
        assert_eq!(found[0].0, "tokenizer");
        assert!(found.iter().all(|(t, _)| live.contains(&t.as_str())));
        assert!(found.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn filtered_search_returns_every_tied_term() {
        struct Flat;
        impl Embedder for Flat {
            fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
            }
            fn dimension(&self) -> usize {
                3
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let store =
            TermVectorStore::open(&tmp.path().join("v.redb"), 3).unwrap();
        let words: Vec<String> = (0..120).map(|i| format!("w{i}")).collect();
        store.ensure_vectors(&words, &Flat, 64).unwrap();

        let found = store.search_where(&[1.0, 0.0, 0.0], 3, |_| true).unwrap();
        assert_eq!(found.len(), 120);
    }

    #[test]
    fn dimension_is_fixed_at_creation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("v.redb");
        drop(TermVectorStore::open(&path, 32).unwrap());

        let err = TermVectorStore::open(&path, 64).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 32,
                found: 64
            }
        ));
    }

    #[test]
    fn wrong_sized_embeddings_are_rejected() {
        struct Short;
        impl Embedder for Short {
            fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0; 3]).collect())
            }
            fn dimension(&self) -> usize {
                3
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let store =
            TermVectorStore::open(&tmp.path().join("v.redb"), 8).unwrap();
        assert!(store.ensure_vectors(&terms(&["x"]), &Short, 4).is_err());
        assert!(store.is_empty());
    }
}
