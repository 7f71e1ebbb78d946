//! lexicon - an incremental vocabulary index for source trees.
//!
//! lexicon tokenizes files into categorized terms, keeps a forward and an
//! inverted index over them with TF-IDF weights, and expands free-text
//! queries into weighted vocabulary terms, either lexically or through
//! cached term embeddings searched with HNSW.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use lexicon::{Config, DataDir, VocabularyBuilder};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let builder = VocabularyBuilder::load(Config::new(&data_dir)).unwrap();
//!
//! let result = builder.build_from_directory(Path::new("src"), true).unwrap();
//! println!("indexed {} files", result.added_files + result.updated_files);
//!
//! let expansion = builder.expand_query("parse config", 10);
//! for term in &expansion.expanded_terms {
//!     println!("{term}: {:.4}", expansion.weighted_terms[term]);
//! }
//! ```

pub mod builder;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod embedder;
pub mod error;
pub mod expansion;
pub mod export;
pub mod fingerprint;
pub mod hnsw;
pub mod index;
pub mod scheduler;
pub mod snapshot;
pub mod tokenizer;
pub mod vector_store;
pub mod walker;

pub use builder::{UpdateResult, VocabularyBuilder, VocabularyStats};
pub use config::Config;
pub use data_dir::DataDir;
pub use embedder::{Embedder, HashEmbedder};
pub use error::{Error, Result};
pub use expansion::QueryExpansionResult;
pub use export::ExportFormat;
pub use index::{DocumentInfo, TermInfo, VocabularyIndex};
pub use scheduler::AutoUpdateHandle;
pub use tokenizer::Category;
