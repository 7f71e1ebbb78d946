use std::{collections::BTreeSet, fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::config::Config;

const KEYWORDS: &[&str] = &[
    "async", "await", "catch", "class", "const", "else", "export", "for",
    "func", "function", "if", "import", "let", "method", "return", "try",
    "var", "while",
];

/// Coarse syntactic class of a term, used to boost its weight.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Keyword,
    Identifier,
    Concept,
    General,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Keyword,
        Category::Identifier,
        Category::Concept,
        Category::General,
    ];

    /// Multiplier applied on top of tf-idf.
    pub fn boost(self) -> f64 {
        match self {
            Category::Concept => 1.3,
            Category::Keyword => 1.2,
            Category::Identifier => 1.1,
            Category::General => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Keyword => "keyword",
            Category::Identifier => "identifier",
            Category::Concept => "concept",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyword" => Ok(Category::Keyword),
            "identifier" => Ok(Category::Identifier),
            "concept" => Ok(Category::Concept),
            "general" => Ok(Category::General),
            other => Err(format!(
                "unknown category '{other}' \
                 (expected keyword, identifier, concept or general)"
            )),
        }
    }
}

pub fn is_keyword(term: &str) -> bool {
    KEYWORDS.binary_search(&term).is_ok()
}

/// Classify a term. Pure function of the term text.
pub fn categorize(term: &str) -> Category {
    if is_keyword(term) {
        return Category::Keyword;
    }

    let len = term.chars().count();
    if (term.contains('_') || is_mixed_case(term)) && len > 3 {
        return Category::Identifier;
    }
    if len > 8 {
        return Category::Concept;
    }
    Category::General
}

fn is_mixed_case(term: &str) -> bool {
    term.chars().any(|c| c.is_ascii_uppercase())
        && term.chars().any(|c| c.is_ascii_lowercase())
}

/// Length, stopword and digit rules applied to every extracted token.
#[derive(Debug, Clone)]
pub struct TermFilter {
    min_len: usize,
    max_len: usize,
    stop_words: BTreeSet<String>,
}

impl TermFilter {
    pub fn new(
        min_len: usize,
        max_len: usize,
        stop_words: BTreeSet<String>,
    ) -> Self {
        Self {
            min_len,
            max_len,
            stop_words,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.min_term_length,
            config.max_term_length,
            config.stop_words.clone(),
        )
    }

    /// Split `text` on anything outside `[A-Za-z0-9_]`, lower-case, and keep
    /// the tokens that pass [`TermFilter::is_valid`]. Order is preserved and
    /// repeats are kept, so the index of a token is its position.
    pub fn extract_terms(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|token| !token.is_empty())
            .map(str::to_ascii_lowercase)
            .filter(|token| self.is_valid(token))
            .collect()
    }

    pub fn is_valid(&self, term: &str) -> bool {
        let len = term.len();
        if len < self.min_len || len > self.max_len {
            return false;
        }
        if self.stop_words.contains(term) {
            return false;
        }
        !term.bytes().any(|b| b.is_ascii_digit())
    }
}

/// Language name derived from the file extension.
pub fn detect_language(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "go" => "go",
        "rs" => "rust",
        "js" => "javascript",
        "ts" => "typescript",
        "py" => "python",
        "java" => "java",
        "cpp" | "hpp" => "cpp",
        "c" | "h" => "c",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "swift" => "swift",
        "kt" => "kotlin",
        "md" => "markdown",
        "txt" => "text",
        _ => "unknown",
    }
}
