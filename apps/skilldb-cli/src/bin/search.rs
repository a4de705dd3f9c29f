use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;

use skilldb_cli::{exit_code, init_tracing, load_settings, render_result, render_stats, report_error};
use skilldb_core::config::EmbeddingProvider;
use skilldb_core::types::{ChunkKind, DocType};
use skilldb_vector::{Context, SearchQuery};

/// Search skills and agents by meaning.
#[derive(Parser, Debug)]
#[command(name = "skilldb-search", version)]
struct Cli {
    /// Search text
    #[arg(required_unless_present = "stats")]
    query: Option<String>,

    /// Number of results
    #[arg(short = 'k', long = "top-k")]
    top_k: Option<usize>,

    /// skill or agent
    #[arg(short = 't', long = "type")]
    doc_type: Option<DocType>,

    /// summary, section or full
    #[arg(short = 'c', long)]
    chunk_type: Option<ChunkKind>,

    /// Minimum similarity in [0, 1]
    #[arg(short = 's', long, default_value_t = 0.0)]
    min_score: f32,

    #[arg(long)]
    show_content: bool,

    #[arg(long)]
    json: bool,

    /// Show collection statistics instead of searching
    #[arg(long)]
    stats: bool,

    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long)]
    collection: Option<String>,

    /// Use the hashing embedder instead of the local model
    #[arg(long)]
    hash_embeddings: bool,

    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = load_settings()?;
    if let Some(p) = &cli.store {
        settings.store.path = p.to_string_lossy().to_string();
    }
    if let Some(c) = cli.collection.clone() {
        settings.store.collection = c;
    }
    if cli.hash_embeddings {
        settings.embedding.provider = EmbeddingProvider::Hash;
    }
    let default_k = settings.search.default_k;
    let ctx = Context::open_existing(settings).await?;
    let searcher = ctx.searcher();

    if cli.stats {
        let stats = searcher.stats().await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            print!("{}", render_stats(&stats));
        }
        return Ok(());
    }

    let text = cli.query.clone().unwrap_or_default();
    let query = SearchQuery {
        text: text.clone(),
        k: cli.top_k.unwrap_or(default_k),
        doc_type: cli.doc_type,
        chunk_kind: cli.chunk_type,
        min_score: cli.min_score,
    };
    let results = searcher.search(&query).await?;

    if cli.json {
        let output = json!({
            "query": text,
            "filters": {
                "type": cli.doc_type,
                "chunk_type": cli.chunk_type,
                "min_score": cli.min_score,
            },
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        if cli.min_score > 0.0 {
            println!("Try lowering --min-score");
        }
        return Ok(());
    }
    println!("Found {} results for \"{text}\":\n", results.len());
    for (i, r) in results.iter().enumerate() {
        println!("{}", render_result(i, r, cli.show_content));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code(&err))
        }
    }
}
