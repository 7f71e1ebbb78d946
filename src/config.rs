use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
};

const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "*.go", "*.rs", "*.js", "*.ts", "*.py", "*.java", "*.cpp", "*.c", "*.h",
    "*.hpp", "*.cs", "*.php", "*.md", "*.txt", "*.json", "*.yaml", "*.yml",
];

const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "*.log",
    "*.tmp",
    "*.lock",
    "*.bak",
    ".git/*",
    "node_modules/*",
    "vendor/*",
    "target/*",
];

/// Words too common to carry meaning. Must stay disjoint from the keyword
/// set in [`crate::tokenizer`].
const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "from", "in", "is", "it",
    "of", "on", "or", "the", "this", "that", "to", "with",
];

/// Vocabulary settings, fixed for the lifetime of a builder.
///
/// Every field except `data_dir` can be overridden from a JSON file via
/// [`Config::load`]; missing keys keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage root; always taken from the resolved [`DataDir`].
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub min_term_length: usize,
    pub max_term_length: usize,
    pub stop_words: BTreeSet<String>,
    pub auto_update: bool,
    pub update_interval_minutes: u64,
    /// Documents per term whose positions are retained.
    pub max_docs_per_term: usize,
    /// Positions retained per (term, document) pair.
    pub max_positions: usize,
    /// Highest-weighted terms warmed into the vector store per query.
    pub semantic_candidates: usize,
    /// Terms compared by brute force when the ANN search comes back empty.
    pub fallback_pool: usize,
    pub embed_batch_size: usize,
    pub embed_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> {
            items.iter().map(|s| (*s).to_string()).collect()
        };

        Self {
            data_dir: PathBuf::new(),
            include_patterns: owned(DEFAULT_INCLUDE_PATTERNS),
            exclude_patterns: owned(DEFAULT_EXCLUDE_PATTERNS),
            min_term_length: 2,
            max_term_length: 50,
            stop_words: DEFAULT_STOP_WORDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            auto_update: true,
            update_interval_minutes: 60,
            max_docs_per_term: 10_000,
            max_positions: 100,
            semantic_candidates: 800,
            fallback_pool: 300,
            embed_batch_size: 64,
            embed_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Default settings rooted at `data_dir`.
    pub fn new(data_dir: &DataDir) -> Self {
        Self {
            data_dir: data_dir.root().to_path_buf(),
            ..Self::default()
        }
    }

    /// Read overrides from a JSON file, rooted at `data_dir`.
    pub fn load(path: &Path, data_dir: &DataDir) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config: Config = serde_json::from_str(&contents)?;
        config.data_dir = data_dir.root().to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_term_length == 0 {
            return Err(Error::Config(
                "min_term_length must be at least 1".into(),
            ));
        }
        if self.min_term_length > self.max_term_length {
            return Err(Error::Config(format!(
                "min_term_length ({}) exceeds max_term_length ({})",
                self.min_term_length, self.max_term_length
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config(
                "embed_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn index_file(&self) -> PathBuf {
        self.data_dir.join(crate::data_dir::INDEX_FILE_NAME)
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.data_dir.join(crate::data_dir::VECTORS_DB_NAME)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_minutes.max(1) * 60)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs.max(1))
    }

    pub fn path_filter(&self) -> Result<PathFilter> {
        PathFilter::new(&self.include_patterns, &self.exclude_patterns)
    }
}

/// Include/exclude matcher over file paths.
///
/// Patterns without a `/` match the file name. Patterns starting with `/`
/// or `**` match the whole path. Any other pattern with a `/` may match at
/// any depth. `*` crosses directory separators in path patterns, so
/// `vendor/*` covers the whole subtree.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include_names: GlobSet,
    include_paths: GlobSet,
    exclude_names: GlobSet,
    exclude_paths: GlobSet,
    has_includes: bool,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let (include_names, include_paths) = compile(include)?;
        let (exclude_names, exclude_paths) = compile(exclude)?;

        Ok(Self {
            has_includes: !include_names.is_empty()
                || !include_paths.is_empty(),
            include_names,
            include_paths,
            exclude_names,
            exclude_paths,
        })
    }

    /// Accept everything.
    pub fn allow_all() -> Self {
        Self {
            include_names: GlobSet::empty(),
            include_paths: GlobSet::empty(),
            exclude_names: GlobSet::empty(),
            exclude_paths: GlobSet::empty(),
            has_includes: false,
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let full = path.to_string_lossy().replace('\\', "/");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if self.has_includes
            && !self.include_names.is_match(&name)
            && !self.include_paths.is_match(&full)
        {
            return false;
        }

        !(self.exclude_names.is_match(&name)
            || self.exclude_paths.is_match(&full))
    }
}

fn compile(patterns: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut names = GlobSetBuilder::new();
    let mut paths = GlobSetBuilder::new();

    for pattern in patterns {
        let pattern = pattern.trim().replace('\\', "/");
        if pattern.is_empty() {
            continue;
        }

        if !pattern.contains('/') {
            names.add(Glob::new(&pattern)?);
        } else if pattern.starts_with('/') || pattern.starts_with("**") {
            paths.add(Glob::new(&pattern)?);
        } else {
            paths.add(Glob::new(&format!("**/{pattern}"))?);
        }
    }

    Ok((names.build()?, paths.build()?))
}
