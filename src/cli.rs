use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    embedder::DEFAULT_HASH_DIMENSION,
    export::DEFAULT_EXPORT_LIMIT,
    tokenizer::Category,
};

#[derive(Debug, Parser)]
#[command(
    name = "lexicon",
    about = "Build and query a weighted vocabulary of your source tree"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON file overriding the default settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index files and directories
    Build(BuildArgs),
    /// Re-scan a directory, indexing changes and dropping deleted files
    Update(UpdateArgs),
    /// Re-check every indexed document
    Refresh,
    /// Expand a query against the vocabulary
    Expand(ExpandArgs),
    /// Expand a query using term embeddings
    Semantic(SemanticArgs),
    /// Look up vocabulary terms matching a query
    Search(ExpandArgs),
    /// List the highest-weighted terms
    Top(TopArgs),
    /// Show everything known about one term
    Term(TermArgs),
    /// List terms that co-occur with a term
    Similar(SimilarArgs),
    /// Show the terms of one indexed document
    Doc(DocArgs),
    /// Show index statistics
    Stats(StatsArgs),
    /// Write the top terms to a file
    Export(ExportArgs),
    /// Drop terms not seen recently
    Cleanup(CleanupArgs),
    /// Compact positions and recompute weights
    Optimize,
    /// Keep the index fresh until interrupted
    Watch,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Build / update --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Files or directories to index
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Do not descend into subdirectories
    #[arg(long)]
    pub no_recursive: bool,

    /// Afterwards, cache hashing-embedder vectors for the top terms
    #[arg(long)]
    pub embed: bool,

    /// Dimension of the built-in hashing embedder
    #[arg(long, default_value_t = DEFAULT_HASH_DIMENSION)]
    pub dimension: usize,
}

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// Directory to re-scan
    pub root: PathBuf,

    /// Do not descend into subdirectories
    #[arg(long)]
    pub no_recursive: bool,
}

// -- Queries --

#[derive(Debug, Parser)]
pub struct ExpandArgs {
    /// Free-text query
    pub query: String,

    /// Maximum number of terms
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SemanticArgs {
    /// Free-text query
    pub query: String,

    /// Maximum number of terms
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Dimension of the built-in hashing embedder
    #[arg(long, default_value_t = DEFAULT_HASH_DIMENSION)]
    pub dimension: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct TopArgs {
    /// Number of terms (0 for all)
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Only terms of this category
    #[arg(short, long)]
    pub category: Option<Category>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct TermArgs {
    pub term: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SimilarArgs {
    pub term: String,

    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct DocArgs {
    /// Indexed file
    pub path: PathBuf,

    /// Also report term-set similarity with this file
    #[arg(long)]
    pub compare: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Export / maintenance --

#[derive(Debug, Parser)]
pub struct ExportArgs {
    /// Output file
    pub output: PathBuf,

    /// txt, csv or json
    #[arg(short, long, default_value = "txt")]
    pub format: String,

    /// Number of terms (0 for all)
    #[arg(short = 'n', long, default_value_t = DEFAULT_EXPORT_LIMIT)]
    pub limit: usize,
}

#[derive(Debug, Parser)]
pub struct CleanupArgs {
    /// Drop terms not seen for this many hours
    #[arg(long, default_value = "720")]
    pub max_age_hours: u64,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "lexicon",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_expand_defaults() {
        let cli = Cli::parse_from(["lexicon", "expand", "parse config"]);
        match cli.command {
            Command::Expand(args) => {
                assert_eq!(args.query, "parse config");
                assert_eq!(args.limit, 20);
                assert!(!args.json);
            }
            _ => panic!("expected expand command"),
        }
    }

    #[test]
    fn parse_top_with_category() {
        let cli = Cli::parse_from([
            "lexicon",
            "top",
            "-n",
            "5",
            "--category",
            "keyword",
        ]);
        match cli.command {
            Command::Top(args) => {
                assert_eq!(args.limit, 5);
                assert_eq!(args.category, Some(Category::Keyword));
            }
            _ => panic!("expected top command"),
        }
    }

    #[test]
    fn build_requires_a_path() {
        assert!(Cli::try_parse_from(["lexicon", "build"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
