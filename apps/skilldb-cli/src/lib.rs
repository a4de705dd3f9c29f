//! Pieces shared by the `skilldb-index` and `skilldb-search` binaries.

use std::fmt::Write as _;
use anyhow::Context as _;
use skilldb_core::config::{Config, Settings};
use skilldb_core::types::{CollectionStats, SearchResult};
use skilldb_core::Error;
use skilldb_vector::IndexReport;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays clean for results and JSON.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let config = Config::load().context("loading configuration")?;
    config.settings().context("reading settings")
}

/// 2 for a rejected query, 1 for everything else (setup, missing index, store).
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::InvalidQuery(_)) => 2,
        _ => 1,
    }
}

pub fn report_error(err: &anyhow::Error) {
    eprintln!("Error: {err:#}");
    if let Some(Error::StoreMissing(_)) = err.downcast_ref::<Error>() {
        eprintln!("Build the index first: skilldb-index");
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

pub fn render_result(index: usize, result: &SearchResult, show_content: bool) -> String {
    let meta = &result.metadata;
    let mut out = format!("[{}] [{}] {}", index + 1, meta.doc_type.as_str().to_uppercase(), meta.name);
    if let Some(title) = &meta.section_title {
        let _ = write!(out, " - {title}");
    }
    let _ = writeln!(out, " (score: {:.3})", result.score);
    if let Some(desc) = &meta.doc.description {
        let _ = writeln!(out, "    {}", truncate_chars(desc, 200));
    }
    if let Some(tools) = &meta.doc.tools {
        let _ = writeln!(out, "    Tools: {tools}");
    }
    if let Some(role) = &meta.doc.role {
        let _ = writeln!(out, "    Role: {role}");
    }
    if !meta.doc.triggers.is_empty() {
        let shown: Vec<&str> = meta.doc.triggers.iter().take(5).map(String::as_str).collect();
        let _ = writeln!(out, "    Triggers: {}", shown.join(", "));
    }
    let _ = writeln!(out, "    Source: {}", meta.source_file);
    if show_content {
        let content = match result.text.char_indices().nth(1000) {
            Some((cut, _)) => format!("{}\n... (truncated)", &result.text[..cut]),
            None => result.text.clone(),
        };
        let _ = writeln!(out, "\n    Content:\n{content}");
    }
    out
}

pub fn render_stats(stats: &CollectionStats) -> String {
    let mut out = format!("Total chunks: {}\n", stats.total);
    out.push_str("By document type:\n");
    for (k, v) in &stats.by_doc_type {
        let _ = writeln!(out, "  {k}: {v}");
    }
    out.push_str("By chunk type:\n");
    for (k, v) in &stats.by_chunk_kind {
        let _ = writeln!(out, "  {k}: {v}");
    }
    out
}

pub fn render_report(report: &IndexReport) -> String {
    let mut out = String::new();
    for (t, n) in &report.docs_by_type {
        let _ = writeln!(out, "Found {n} {t} documents");
    }
    let _ = writeln!(out, "Parsed {} documents ({} failed)", report.docs_parsed, report.parse_failures.len());
    for f in &report.parse_failures {
        let _ = writeln!(out, "  parse error: {}: {}", f.path.display(), f.reason);
    }
    let _ = writeln!(
        out,
        "Chunks: {} total, {} needed vectors, {} embedded, {} from cache, {} written",
        report.chunks_total, report.chunks_new, report.chunks_embedded, report.cache_hits, report.chunks_written
    );
    if report.chunks_refreshed > 0 {
        let _ = writeln!(out, "Refreshed metadata on {} unchanged chunks", report.chunks_refreshed);
    }
    if report.pruned > 0 {
        let _ = writeln!(out, "Pruned {} stale entries", report.pruned);
    }
    if report.cache_evicted > 0 {
        let _ = writeln!(out, "Evicted {} unused cached vectors", report.cache_evicted);
    }
    for b in &report.batch_failures {
        let _ = writeln!(out, "  embedding failed for {}: {}", b.chunk_ids.join(", "), b.error);
    }
    let _ = writeln!(out, "Collection now holds {} chunks", report.store_count);
    out
}
