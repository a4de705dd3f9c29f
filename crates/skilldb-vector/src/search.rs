use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use skilldb_core::traits::Embedder;
use skilldb_core::types::{ChunkKind, CollectionStats, DocType, SearchResult};
use skilldb_core::{Error, Result};

use crate::context::Context;
use crate::store::ChunkStore;

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub k: usize,
    pub doc_type: Option<DocType>,
    pub chunk_kind: Option<ChunkKind>,
    pub min_score: f32,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), k: 5, doc_type: None, chunk_kind: None, min_score: 0.0 }
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn doc_type(mut self, doc_type: DocType) -> Self {
        self.doc_type = Some(doc_type);
        self
    }

    pub fn chunk_kind(mut self, kind: ChunkKind) -> Self {
        self.chunk_kind = Some(kind);
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is empty".into()));
        }
        if self.k == 0 {
            return Err(Error::InvalidQuery("k must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::InvalidQuery(format!("min_score {} is outside [0, 1]", self.min_score)));
        }
        Ok(())
    }

    /// Conjunction of the requested metadata filters. Values are closed enums.
    pub fn filter(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(t) = self.doc_type {
            clauses.push(format!("doc_type = '{t}'"));
        }
        if let Some(k) = self.chunk_kind {
            clauses.push(format!("chunk_type = '{k}'"));
        }
        (!clauses.is_empty()).then(|| clauses.join(" AND "))
    }
}

// Largest f32 below 1.0.
const BELOW_ONE: f32 = 1.0 - f32::EPSILON / 2.0;

/// Maps a cosine distance (`1 - cos`, in `[0, 2]`) to a similarity in `[0, 1]`.
///
/// Monotone non-increasing over positive distances; 1.0 only for a zero distance.
/// Negative distances (float noise on identical vectors) score just below 1.
pub fn similarity_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    if distance == 0.0 {
        return 1.0;
    }
    (1.0 - distance).clamp(0.0, BELOW_ONE)
}

pub struct Searcher<'a> {
    store: &'a ChunkStore,
    embedder: Arc<dyn Embedder>,
    overfetch_factor: usize,
    // Set after the first successful embedder check.
    embedder_checked: OnceCell<()>,
}

impl<'a> Searcher<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            store: &ctx.store,
            embedder: Arc::clone(&ctx.embedder),
            overfetch_factor: ctx.settings.search.overfetch_factor.max(1),
            embedder_checked: OnceCell::new(),
        }
    }

    async fn ensure_same_embedder(&self) -> Result<()> {
        let active = self.embedder.id();
        match self.store.embedder_ids().await?.into_iter().find(|id| id != active) {
            Some(stored) => Err(Error::EmbedderMismatch { stored, active: active.to_string() }),
            None => Ok(()),
        }
    }

    /// Top-k chunks for the query, best first, every score within `[0, 1]`.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        query.validate()?;
        self.embedder_checked.get_or_try_init(|| self.ensure_same_embedder()).await?;

        let embedder = Arc::clone(&self.embedder);
        let text = query.text.clone();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| Error::Embed(format!("embedding task failed: {e}")))??;
        let fetch = if query.min_score > 0.0 { query.k * self.overfetch_factor } else { query.k };
        let filter = query.filter();
        debug!(k = query.k, fetch, filter = ?filter, "Searching");

        let mut results: Vec<SearchResult> = self
            .store
            .nearest(vector, filter.as_deref(), fetch)
            .await?
            .into_iter()
            .map(|(record, distance)| SearchResult {
                id: record.id,
                text: record.text,
                metadata: record.metadata,
                score: similarity_from_distance(distance),
                distance,
            })
            .filter(|r| r.score >= query.min_score)
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(query.k);
        Ok(results)
    }

    pub async fn stats(&self) -> Result<CollectionStats> { self.store.stats().await }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_bounded_and_monotone() {
        let ds = [0.0f32, 1e-9, 1e-4, 0.3, 1.0, 1.5, 2.0, 3.0, -0.1];
        for d in ds {
            let s = similarity_from_distance(d);
            assert!((0.0..=1.0).contains(&s), "d={d} s={s}");
        }
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert!(similarity_from_distance(1e-9) < 1.0);
        assert!(similarity_from_distance(0.3) > similarity_from_distance(1.0));
        assert_eq!(similarity_from_distance(2.0), 0.0);
        assert_eq!(similarity_from_distance(f32::NAN), 0.0);
    }

    #[test]
    fn tiny_distances_never_outscore_smaller_ones() {
        assert!(similarity_from_distance(1e-8) >= similarity_from_distance(4e-8));
        assert!(similarity_from_distance(-1e-7) < 1.0);
        assert!(similarity_from_distance(-0.1) < 1.0);
        assert_eq!(similarity_from_distance(-0.0), 1.0);

        let mut prev = similarity_from_distance(f32::MIN_POSITIVE);
        for step in 1..2000 {
            let d = step as f32 * 1e-9;
            let s = similarity_from_distance(d);
            assert!(s < 1.0 && s <= prev, "d={d} s={s} prev={prev}");
            prev = s;
        }
    }

    #[test]
    fn invalid_queries_are_rejected() {
        assert!(SearchQuery::new("x").k(0).validate().is_err());
        assert!(SearchQuery::new("x").min_score(1.5).validate().is_err());
        assert!(SearchQuery::new("x").min_score(-0.1).validate().is_err());
        assert!(SearchQuery::new("   ").validate().is_err());
        assert!(SearchQuery::new("x").min_score(1.0).validate().is_ok());
    }

    #[test]
    fn filters_combine_with_and() {
        assert_eq!(SearchQuery::new("x").filter(), None);
        let q = SearchQuery::new("x").doc_type(DocType::Agent).chunk_kind(ChunkKind::Section);
        assert_eq!(q.filter().as_deref(), Some("doc_type = 'agent' AND chunk_type = 'section'"));
    }
}
