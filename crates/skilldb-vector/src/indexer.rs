//! Scan → chunk → fingerprint → embed the delta → upsert → reconcile.
//!
//! A run only embeds chunks that are new, whose text changed, or whose stored
//! vector came from a different embedder. Chunks whose metadata alone changed
//! are rewritten with their cached vector. Vectors are looked up in the
//! embedding cache first; misses are embedded in batches on the blocking pool.
//! A failed batch is reported and skipped, the rest of the run continues.

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use skilldb_core::chunker::Chunker;
use skilldb_core::config::IndexingSettings;
use skilldb_core::corpus::{scan, CorpusSpec, ParseFailure};
use skilldb_core::traits::Embedder;
use skilldb_core::types::{Chunk, ChunkId};
use skilldb_core::{Error, Result};

use crate::cache::CacheEntry;
use crate::context::Context;
use crate::schema::ChunkRecord;
use crate::store::ChunkStore;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Clear the collection and the embedding cache before indexing.
    pub rebuild: bool,
    /// Delete entries whose ids were not produced by this scan.
    pub prune: bool,
    /// Evict cached vectors no stored chunk references once the run is done.
    pub prune_cache: bool,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub store_batch_size: usize,
    pub embed_timeout: Option<Duration>,
    pub show_progress: bool,
}

impl Default for IndexOptions {
    fn default() -> Self { Self::from_settings(&IndexingSettings::default()) }
}

impl IndexOptions {
    pub fn from_settings(s: &IndexingSettings) -> Self {
        Self {
            rebuild: false,
            prune: s.prune,
            prune_cache: s.prune_cache,
            embed_batch_size: s.embed_batch_size.max(1),
            embed_concurrency: s.embed_concurrency.max(1),
            store_batch_size: s.store_batch_size.max(1),
            embed_timeout: s.embed_timeout_secs.map(Duration::from_secs),
            show_progress: false,
        }
    }
}

/// One embedding batch that produced no vectors.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub chunk_ids: Vec<ChunkId>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    /// Files found per document type, including ones that failed to parse.
    pub docs_by_type: BTreeMap<String, usize>,
    pub docs_parsed: usize,
    pub parse_failures: Vec<ParseFailure>,
    pub duplicate_ids: Vec<ChunkId>,
    pub chunks_total: usize,
    /// Chunks that needed a vector this run.
    pub chunks_new: usize,
    /// Unchanged text whose metadata changed; rewritten without re-embedding when cached.
    pub chunks_refreshed: usize,
    /// Texts sent to the embedder and embedded successfully.
    pub chunks_embedded: usize,
    pub cache_hits: usize,
    pub chunks_written: usize,
    pub pruned: usize,
    pub cache_evicted: usize,
    pub batch_failures: Vec<BatchFailure>,
    pub store_count: usize,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool { self.parse_failures.is_empty() && self.batch_failures.is_empty() }
}

pub struct Indexer<'a> {
    store: &'a ChunkStore,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
}

// Unique texts waiting for a vector, with every chunk id that shares them.
struct Pending {
    hash: String,
    text: String,
    ids: Vec<ChunkId>,
}

type BatchOutcome = (Vec<Pending>, Result<Vec<Vec<f32>>>);

impl<'a> Indexer<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            store: &ctx.store,
            embedder: Arc::clone(&ctx.embedder),
            chunker: Chunker::new(ctx.settings.chunking.clone()),
        }
    }

    pub async fn run(&self, corpora: &[CorpusSpec], opts: &IndexOptions) -> Result<IndexReport> {
        let outcome = scan(corpora)?;
        let mut report = IndexReport {
            docs_by_type: outcome.found.iter().map(|(t, n)| (t.to_string(), *n)).collect(),
            docs_parsed: outcome.documents.len(),
            ..Default::default()
        };
        let failed_sources: HashSet<String> =
            outcome.failures.iter().map(|f| f.path.to_string_lossy().to_string()).collect();
        report.parse_failures = outcome.failures;

        let mut seen: HashSet<ChunkId> = HashSet::new();
        let mut candidates: Vec<Chunk> = Vec::new();
        for doc in &outcome.documents {
            for chunk in self.chunker.chunk(doc) {
                if seen.insert(chunk.id.clone()) {
                    candidates.push(chunk);
                } else {
                    warn!(id = %chunk.id, path = %doc.path.display(), "duplicate chunk id; keeping the first occurrence");
                    report.duplicate_ids.push(chunk.id);
                }
            }
        }
        report.chunks_total = candidates.len();

        if opts.rebuild {
            self.store.clear().await?;
        }
        let stored = self.store.fingerprints().await?;
        let active = self.embedder.id();

        let mut refreshed = 0usize;
        let delta: Vec<Chunk> = candidates
            .into_iter()
            .filter(|c| match stored.get(&c.id) {
                Some(fp) if fp.content_hash != c.content_hash || fp.embedder_id != active => true,
                Some(fp) if fp.metadata != c.metadata => {
                    refreshed += 1;
                    true
                }
                Some(_) => false,
                None => true,
            })
            .collect();
        let mut orphans: Vec<ChunkId> = if opts.prune {
            stored
                .iter()
                .filter(|(id, fp)| !seen.contains(*id) && !failed_sources.contains(fp.source_file()))
                .map(|(id, _)| id.clone())
                .collect()
        } else {
            Vec::new()
        };
        orphans.sort();
        report.chunks_new = delta.len() - refreshed;
        report.chunks_refreshed = refreshed;
        info!(total = report.chunks_total, delta = report.chunks_new, refreshed, orphans = orphans.len(), "Computed index delta");

        if !delta.is_empty() {
            self.embed_and_write(delta, opts, &mut report).await?;
        }
        if !orphans.is_empty() {
            report.pruned = self.store.delete_ids(&orphans).await?;
            info!(count = report.pruned, "Pruned entries no longer in the corpus");
        }
        if opts.prune_cache {
            report.cache_evicted = self.store.evict_unreferenced_cache().await?;
        }
        report.store_count = self.store.count().await?;
        info!(
            written = report.chunks_written,
            embedded = report.chunks_embedded,
            cache_hits = report.cache_hits,
            failures = report.batch_failures.len(),
            store_count = report.store_count,
            "Indexing finished"
        );
        Ok(report)
    }

    async fn embed_and_write(&self, delta: Vec<Chunk>, opts: &IndexOptions, report: &mut IndexReport) -> Result<()> {
        let embedder_id = self.embedder.id().to_string();
        let hashes: Vec<String> = {
            let mut h: Vec<String> = delta.iter().map(|c| c.content_hash.clone()).collect();
            h.sort();
            h.dedup();
            h
        };
        let mut vectors = self.store.cached_vectors(&embedder_id, &hashes).await?;
        report.cache_hits = delta.iter().filter(|c| vectors.contains_key(&c.content_hash)).count();

        let mut pending: Vec<Pending> = Vec::new();
        let mut by_hash: HashMap<String, usize> = HashMap::new();
        for c in delta.iter().filter(|c| !vectors.contains_key(&c.content_hash)) {
            match by_hash.get(&c.content_hash) {
                Some(&i) => pending[i].ids.push(c.id.clone()),
                None => {
                    by_hash.insert(c.content_hash.clone(), pending.len());
                    pending.push(Pending { hash: c.content_hash.clone(), text: c.text.clone(), ids: vec![c.id.clone()] });
                }
            }
        }

        if !pending.is_empty() {
            let fresh = self.embed_pending(pending, opts, report).await;
            let entries: Vec<CacheEntry> = fresh
                .iter()
                .map(|(hash, v)| CacheEntry { content_hash: hash.clone(), embedder_id: embedder_id.clone(), vector: v.clone() })
                .collect();
            self.store.cache_vectors(&entries).await?;
            vectors.extend(fresh);
        }

        let records: Vec<ChunkRecord> = delta
            .into_iter()
            .filter_map(|c| {
                let v = vectors.get(&c.content_hash)?.clone();
                Some(ChunkRecord::new(c, &embedder_id, v))
            })
            .collect();
        for part in records.chunks(opts.store_batch_size) {
            report.chunks_written += self.store.upsert(part).await?;
        }
        Ok(())
    }

    /// Embeds pending texts; returns `hash -> vector` for every batch that succeeded.
    async fn embed_pending(&self, pending: Vec<Pending>, opts: &IndexOptions, report: &mut IndexReport) -> HashMap<String, Vec<f32>> {
        let total = pending.len() as u64;
        let pb = progress_bar(total, opts.show_progress);
        let dim = self.embedder.dim();

        let mut batches: Vec<Vec<Pending>> = Vec::new();
        let mut it = pending.into_iter().peekable();
        while it.peek().is_some() {
            batches.push(it.by_ref().take(opts.embed_batch_size).collect());
        }
        debug!(batches = batches.len(), size = opts.embed_batch_size, concurrency = opts.embed_concurrency, "Embedding");

        let timeout = opts.embed_timeout;
        let outcomes: Vec<BatchOutcome> = stream::iter(batches)
            .map(|batch| {
                let embedder = Arc::clone(&self.embedder);
                async move {
                    let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
                    let result = embed_blocking(embedder, texts, timeout).await.and_then(|v| check_vectors(v, batch.len(), dim));
                    (batch, result)
                }
            })
            .buffer_unordered(opts.embed_concurrency)
            .inspect(|(batch, _)| pb.inc(batch.len() as u64))
            .collect()
            .await;
        pb.finish_and_clear();

        let mut out = HashMap::new();
        for (batch, result) in outcomes {
            match result {
                Ok(vecs) => {
                    report.chunks_embedded += batch.len();
                    out.extend(batch.into_iter().map(|p| p.hash).zip(vecs));
                }
                Err(e) => {
                    let chunk_ids: Vec<ChunkId> = batch.into_iter().flat_map(|p| p.ids).collect();
                    warn!(error = %e, ids = ?chunk_ids, "Embedding batch failed; chunks skipped");
                    report.batch_failures.push(BatchFailure { chunk_ids, error: e.to_string() });
                }
            }
        }
        out
    }
}

async fn embed_blocking(embedder: Arc<dyn Embedder>, texts: Vec<String>, timeout: Option<Duration>) -> Result<Vec<Vec<f32>>> {
    let task = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts));
    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| Error::Embed(format!("batch timed out after {}s", limit.as_secs_f32())))?,
        None => task.await,
    };
    joined.map_err(|e| Error::Embed(format!("embedding task failed: {e}")))?
}

fn check_vectors(vectors: Vec<Vec<f32>>, expected: usize, dim: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(Error::Embed(format!("embedder returned {} vectors for {expected} texts", vectors.len())));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::Embed(format!("dim mismatch: got {} expected {dim}", v.len())));
    }
    if vectors.iter().flatten().any(|x| !x.is_finite()) {
        return Err(Error::Embed("embedder returned non-finite values".into()));
    }
    Ok(vectors)
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("embedding");
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_checks() {
        assert!(check_vectors(vec![vec![1.0, 0.0]], 1, 2).is_ok());
        assert!(check_vectors(vec![vec![1.0, 0.0]], 2, 2).is_err());
        assert!(check_vectors(vec![vec![1.0]], 1, 2).is_err());
        assert!(check_vectors(vec![vec![f32::NAN, 0.0]], 1, 2).is_err());
    }

    #[test]
    fn options_follow_settings() {
        let s = IndexingSettings { embed_timeout_secs: Some(3), prune: false, ..Default::default() };
        let o = IndexOptions::from_settings(&s);
        assert_eq!(o.embed_timeout, Some(Duration::from_secs(3)));
        assert!(!o.prune && !o.rebuild && !o.prune_cache);
        assert_eq!(o.store_batch_size, 100);
    }
}
