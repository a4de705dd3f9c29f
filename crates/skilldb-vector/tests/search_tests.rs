mod common;

use std::sync::Arc;

use common::{context, corpora, corpus, settings, write, CountingEmbedder};
use skilldb_core::types::{ChunkKind, DocType};
use skilldb_core::Error;
use skilldb_vector::{Context, IndexOptions, SearchQuery};
use tempfile::TempDir;

async fn indexed() -> (TempDir, TempDir, Context) {
    let docs = corpus();
    write(
        docs.path(),
        "agents/reviewer/AGENT.md",
        "---\nname: reviewer\nrole: code reviewer\ntriggers: [review, audit]\n---\n# Checklist\nLook for missing authentication checks, unsafe input handling and absent tests.\n",
    );
    let store = TempDir::new().unwrap();
    let ctx = context(store.path(), Arc::new(CountingEmbedder::new())).await;
    ctx.indexer().run(&corpora(docs.path()), &IndexOptions::default()).await.expect("index");
    (docs, store, ctx)
}

#[tokio::test]
async fn authentication_query_ranks_the_matching_summary_first() {
    let (_docs, _store, ctx) = indexed().await;
    let results = ctx.searcher().search(&SearchQuery::new("authentication").k(3).doc_type(DocType::Skill)).await.unwrap();
    assert!(!results.is_empty() && results.len() <= 3);
    assert_eq!(results[0].id, "skill-alpha-summary");
    assert!(results.iter().all(|r| r.metadata.doc_type == DocType::Skill));
}

#[tokio::test]
async fn scores_are_bounded_and_sorted() {
    let (_docs, _store, ctx) = indexed().await;
    let results = ctx.searcher().search(&SearchQuery::new("authentication checks").k(10)).await.unwrap();
    assert_eq!(results.len(), 8);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for r in &results {
        assert!((0.0..=1.0).contains(&r.score), "{} scored {}", r.id, r.score);
    }
}

#[tokio::test]
async fn filters_are_conjunctive() {
    let (_docs, _store, ctx) = indexed().await;
    let q = SearchQuery::new("review").k(10).doc_type(DocType::Agent).chunk_kind(ChunkKind::Section);
    let results = ctx.searcher().search(&q).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "agent-reviewer-section-0");
    assert_eq!(results[0].metadata.section_title.as_deref(), Some("Checklist"));
    assert_eq!(results[0].metadata.doc.triggers, vec!["review", "audit"]);
}

#[tokio::test]
async fn min_score_drops_weak_matches() {
    let (_docs, _store, ctx) = indexed().await;
    let all = ctx.searcher().search(&SearchQuery::new("gardening planting").k(8)).await.unwrap();
    let strict = ctx.searcher().search(&SearchQuery::new("gardening planting").k(8).min_score(0.2)).await.unwrap();
    assert!(strict.len() < all.len());
    assert!(strict.iter().all(|r| r.score >= 0.2));
    assert!(strict.iter().any(|r| r.metadata.name == "beta"));

    let none = ctx.searcher().search(&SearchQuery::new("gardening").min_score(1.0)).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn invalid_queries_fail_before_searching() {
    let (_docs, _store, ctx) = indexed().await;
    let searcher = ctx.searcher();
    assert!(matches!(searcher.search(&SearchQuery::new("x").k(0)).await, Err(Error::InvalidQuery(_))));
    assert!(matches!(searcher.search(&SearchQuery::new("x").min_score(2.0)).await, Err(Error::InvalidQuery(_))));
    assert!(matches!(searcher.search(&SearchQuery::new("")).await, Err(Error::InvalidQuery(_))));
}

#[tokio::test]
async fn stats_count_types_and_roles() {
    let (_docs, _store, ctx) = indexed().await;
    let stats = ctx.searcher().stats().await.unwrap();
    assert_eq!(stats.total, 8);
    assert_eq!(stats.by_doc_type.get("skill"), Some(&5));
    assert_eq!(stats.by_doc_type.get("agent"), Some(&3));
    assert_eq!(stats.by_chunk_kind.get("summary"), Some(&3));
    assert_eq!(stats.by_chunk_kind.get("section"), Some(&2));
    assert_eq!(stats.by_chunk_kind.get("full"), Some(&3));
}

#[tokio::test]
async fn searching_a_missing_store_reports_store_missing() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path().join("never-built"));
    let err = Context::existing_with_embedder(s, Arc::new(CountingEmbedder::new())).await.err().expect("missing");
    assert!(matches!(err, Error::StoreMissing(_)));

    // Directory exists but no collection was ever written.
    let s = settings(tmp.path().to_path_buf());
    let err = Context::existing_with_embedder(s, Arc::new(CountingEmbedder::new())).await.err().expect("missing");
    assert!(matches!(err, Error::StoreMissing(_)));
}

#[tokio::test]
async fn a_different_embedder_cannot_query_the_collection() {
    let (_docs, store, ctx) = indexed().await;
    ctx.close().await.unwrap();
    let other = Context::existing_with_embedder(settings(store.path().to_path_buf()), Arc::new(CountingEmbedder::with_id("hash:v2:d384")))
        .await
        .unwrap();
    let err = other.searcher().search(&SearchQuery::new("authentication")).await.unwrap_err();
    assert!(matches!(err, Error::EmbedderMismatch { .. }));
}

#[tokio::test]
async fn the_embedder_check_runs_once_per_searcher() {
    let (docs, store, ctx) = indexed().await;
    let searcher = ctx.searcher();
    searcher.search(&SearchQuery::new("authentication")).await.unwrap();

    // Re-index the same store under another embedder id.
    let other = context(store.path(), Arc::new(CountingEmbedder::with_id("hash:v2:d384"))).await;
    other.indexer().run(&corpora(docs.path()), &IndexOptions::default()).await.unwrap();

    assert!(searcher.search(&SearchQuery::new("authentication")).await.is_ok());
    let err = ctx.searcher().search(&SearchQuery::new("authentication")).await.unwrap_err();
    assert!(matches!(err, Error::EmbedderMismatch { .. }));
}
