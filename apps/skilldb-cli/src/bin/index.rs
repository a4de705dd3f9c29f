use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use skilldb_cli::{exit_code, init_tracing, load_settings, render_report, report_error};
use skilldb_core::config::EmbeddingProvider;
use skilldb_vector::{Context, IndexOptions};

/// Build or update the semantic index over skill and agent documents.
#[derive(Parser, Debug)]
#[command(name = "skilldb-index", version)]
struct Cli {
    /// Directory holding `<name>/SKILL.md` documents
    #[arg(long)]
    skills_dir: Option<PathBuf>,

    /// Directory holding `<name>/AGENT.md` documents
    #[arg(long)]
    agents_dir: Option<PathBuf>,

    /// Store directory
    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long)]
    collection: Option<String>,

    /// Clear the collection and embedding cache first
    #[arg(long)]
    rebuild: bool,

    /// Keep entries whose documents disappeared
    #[arg(long)]
    no_prune: bool,

    /// Also drop cached vectors no stored chunk uses
    #[arg(long)]
    prune_cache: bool,

    /// Texts per embedding call
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: Option<u64>,

    /// Embedding batches in flight
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: Option<u64>,

    /// Give up on an embedding batch after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Use the hashing embedder instead of the local model
    #[arg(long)]
    hash_embeddings: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = load_settings()?;
    if let Some(d) = &cli.skills_dir {
        settings.corpus.skills_dir = Some(d.to_string_lossy().to_string());
    }
    if let Some(d) = &cli.agents_dir {
        settings.corpus.agents_dir = Some(d.to_string_lossy().to_string());
    }
    if let Some(p) = &cli.store {
        settings.store.path = p.to_string_lossy().to_string();
    }
    if let Some(c) = cli.collection {
        settings.store.collection = c;
    }
    if let Some(n) = cli.batch_size {
        settings.indexing.embed_batch_size = n as usize;
    }
    if let Some(n) = cli.concurrency {
        settings.indexing.embed_concurrency = n as usize;
    }
    if cli.timeout_secs.is_some() {
        settings.indexing.embed_timeout_secs = cli.timeout_secs;
    }
    if cli.no_prune {
        settings.indexing.prune = false;
    }
    if cli.prune_cache {
        settings.indexing.prune_cache = true;
    }
    if cli.hash_embeddings {
        settings.embedding.provider = EmbeddingProvider::Hash;
    }

    let corpora = settings.corpora();
    let mut opts = IndexOptions::from_settings(&settings.indexing);
    opts.rebuild = cli.rebuild;
    opts.show_progress = !cli.json;

    info!(store = %settings.store_path().display(), collection = %settings.store.collection, "Opening store");
    let ctx = Context::open_for_index(settings, &corpora).await.context("opening index")?;
    let report = ctx.indexer().run(&corpora, &opts).await?;
    ctx.close().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
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
