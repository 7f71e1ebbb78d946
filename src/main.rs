use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use lexicon::{
    AutoUpdateHandle,
    Config,
    DataDir,
    Error,
    ExportFormat,
    HashEmbedder,
    QueryExpansionResult,
    Result,
    UpdateResult,
    VocabularyBuilder,
    cli::{Cli, Command, DocArgs, TermArgs},
    tokenizer::Category,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("LEXICON_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = match &cli.config {
        Some(path) => Config::load(path, &data_dir)?,
        None => Config::new(&data_dir),
    };
    let builder = VocabularyBuilder::load(config)?;

    match cli.command {
        Command::Build(args) => {
            let result = cmd_build(&builder, &args.paths, !args.no_recursive)?;
            print_update(&result);
            if args.embed {
                let embedder = HashEmbedder::new(args.dimension)?;
                let embedded = builder.cache_term_embeddings(&embedder, 0)?;
                println!("Embedded {embedded} terms");
            }
        }
        Command::Update(args) => {
            let result =
                builder.update_from_directory(&args.root, !args.no_recursive)?;
            print_update(&result);
        }
        Command::Refresh => {
            print_update(&builder.refresh()?);
        }
        Command::Expand(args) => {
            let result = builder.expand_query(&args.query, args.limit);
            print_expansion(&result, args.json)?;
        }
        Command::Semantic(args) => {
            let embedder = Arc::new(HashEmbedder::new(args.dimension)?);
            let result = runtime()?.block_on(builder.expand_query_with_embedding(
                &args.query,
                args.limit,
                embedder,
            ))?;
            print_expansion(&result, args.json)?;
        }
        Command::Search(args) => {
            let terms = builder.search_terms(&args.query, args.limit);
            if args.json {
                print_json(&terms)?;
            } else if terms.is_empty() {
                println!("No matching terms.");
            } else {
                for t in &terms {
                    println!("{}\t{:.6}\t{}", t.term, t.weight, t.category);
                }
            }
        }
        Command::Top(args) => {
            cmd_top(&builder, args.limit, args.category, args.json)?;
        }
        Command::Term(args) => cmd_term(&builder, &args)?,
        Command::Similar(args) => {
            let similar = builder.similar_terms(&args.term, args.limit);
            if args.json {
                print_json(&similar)?;
            } else if similar.is_empty() {
                println!("No co-occurring terms for '{}'.", args.term);
            } else {
                for (term, score) in &similar {
                    println!("{term}\t{score:.4}");
                }
            }
        }
        Command::Doc(args) => cmd_doc(&builder, &args)?,
        Command::Stats(args) => cmd_stats(&builder, args.json)?,
        Command::Export(args) => {
            let format: ExportFormat = args.format.parse()?;
            let written = builder.export(&args.output, format, args.limit)?;
            println!("Exported {written} terms to {}", args.output.display());
        }
        Command::Cleanup(args) => {
            let max_age = Duration::from_secs(args.max_age_hours * 3600);
            let removed = builder.cleanup_old_terms(max_age)?;
            println!("Removed {removed} terms");
        }
        Command::Optimize => {
            builder.optimize()?;
            println!("Optimized vocabulary index");
        }
        Command::Watch => cmd_watch(builder)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_build(
    builder: &VocabularyBuilder,
    paths: &[PathBuf],
    recursive: bool,
) -> Result<UpdateResult> {
    let (dirs, files): (Vec<&PathBuf>, Vec<&PathBuf>) =
        paths.iter().partition(|p| p.is_dir());

    let mut total = UpdateResult::default();
    for dir in dirs {
        eprintln!("Indexing {}...", dir.display());
        total.merge(builder.build_from_directory(dir, recursive)?);
    }
    if !files.is_empty() {
        let files: Vec<PathBuf> = files.into_iter().cloned().collect();
        total.merge(builder.build_from_files(&files)?);
    }
    Ok(total)
}

fn print_update(result: &UpdateResult) {
    println!(
        "Files: {} added, {} updated, {} deleted",
        result.added_files, result.updated_files, result.deleted_files
    );
    println!(
        "Terms: {} new, {} removed ({:.2?})",
        result.new_terms, result.removed_terms, result.duration
    );
    for error in &result.errors {
        eprintln!("  {error}");
    }
}

fn print_expansion(result: &QueryExpansionResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }

    if result.expanded_terms.is_empty() {
        println!("No expansion for '{}'.", result.original_terms.join(" "));
        return Ok(());
    }
    for term in &result.expanded_terms {
        let weight = result.weighted_terms.get(term).copied().unwrap_or(0.0);
        println!("{term}\t{weight:.6}");
    }
    for (token, similar) in &result.similar_terms {
        println!("~{token}: {}", similar.join(", "));
    }
    Ok(())
}

fn cmd_top(
    builder: &VocabularyBuilder,
    limit: usize,
    category: Option<Category>,
    json: bool,
) -> Result<()> {
    let terms = builder.top_terms(limit, category);
    if json {
        return print_json(&terms);
    }
    if terms.is_empty() {
        println!("Vocabulary is empty.");
    }
    for t in &terms {
        println!(
            "{}\t{:.6}\t{}\t{}\t{}",
            t.term, t.weight, t.document_freq, t.total_freq, t.category
        );
    }
    Ok(())
}

fn cmd_term(builder: &VocabularyBuilder, args: &TermArgs) -> Result<()> {
    let term = args.term.to_ascii_lowercase();
    let (Some(info), Some(freq)) =
        (builder.term_info(&term), builder.term_frequency(&term))
    else {
        return Err(Error::NotFound {
            kind: "term",
            name: args.term.clone(),
        });
    };

    if args.json {
        return print_json(&serde_json::json!({
            "info": info,
            "frequency": freq,
        }));
    }

    println!("term: {}", info.term);
    println!("category: {}", info.category);
    println!("weight: {:.6}", info.weight);
    println!("tf-idf: {:.6}", freq.tf_idf);
    println!("total frequency: {}", freq.total_freq);
    println!("document frequency: {}", freq.document_freq);
    println!("last seen: {}", info.last_seen.to_rfc3339());
    for path in builder.documents_containing(&term) {
        println!("  {path}");
    }
    Ok(())
}

fn cmd_doc(builder: &VocabularyBuilder, args: &DocArgs) -> Result<()> {
    let doc = builder.document_terms(&args.path).ok_or_else(|| {
        Error::NotFound {
            kind: "document",
            name: args.path.display().to_string(),
        }
    })?;
    let similarity = args
        .compare
        .as_deref()
        .map(|other| builder.document_similarity(&args.path, other));

    if args.json {
        return print_json(&serde_json::json!({
            "document": doc,
            "similarity": similarity,
        }));
    }

    println!("path: {}", doc.path);
    println!("language: {}", doc.language);
    println!("terms: {} ({} unique)", doc.total_terms, doc.unique_terms);
    let mut freqs: Vec<(&String, &usize)> = doc.term_freqs.iter().collect();
    freqs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (term, freq) in freqs.into_iter().take(20) {
        println!("  {term}\t{freq}");
    }
    if let (Some(other), Some(score)) = (args.compare.as_deref(), similarity) {
        println!("similarity with {}: {score:.4}", other.display());
    }
    Ok(())
}

fn cmd_stats(builder: &VocabularyBuilder, json: bool) -> Result<()> {
    let stats = builder.stats();
    if json {
        return print_json(&stats);
    }

    println!("Data directory: {}", builder.config().data_dir.display());
    println!("Documents: {}", stats.global.total_documents);
    println!(
        "Terms: {} unique, {} occurrences",
        stats.global.unique_terms, stats.global.total_terms
    );
    println!("Average document length: {:.1}", stats.global.avg_doc_length);
    println!("Index size: {} bytes", stats.global.index_size);
    println!("Updates: {}", stats.metadata.total_updates);
    println!("Last update: {}", stats.metadata.last_update.to_rfc3339());
    for (category, count) in &stats.categories {
        println!("  {category}: {count}");
    }
    for (language, count) in &stats.languages {
        println!("  {language}: {count} documents");
    }
    Ok(())
}

fn cmd_watch(builder: VocabularyBuilder) -> Result<()> {
    let builder = Arc::new(builder);
    runtime()?.block_on(async move {
        let handle = AutoUpdateHandle::spawn(Arc::clone(&builder))?;
        eprintln!(
            "Refreshing every {:?}; press Ctrl-C to stop.",
            builder.config().update_interval()
        );
        tokio::signal::ctrl_c().await?;
        handle.shutdown().await;
        Ok::<(), Error>(())
    })
}
