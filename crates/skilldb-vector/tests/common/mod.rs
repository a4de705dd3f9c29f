#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use skilldb_core::config::{EmbeddingProvider, Settings};
use skilldb_core::corpus::CorpusSpec;
use skilldb_core::traits::Embedder;
use skilldb_core::types::DocType;
use skilldb_core::{Error, Result};
use skilldb_embed::HashEmbedder;
use skilldb_vector::Context;
use tempfile::TempDir;

/// Hash embedder that counts calls and can be told to fail on a marker word.
pub struct CountingEmbedder {
    inner: HashEmbedder,
    id: String,
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
    fail_marker: Option<String>,
}

impl CountingEmbedder {
    pub fn new() -> Self { Self::with_id("hash:d384") }

    pub fn with_id(id: &str) -> Self {
        Self { inner: HashEmbedder::new(384), id: id.to_string(), calls: AtomicUsize::new(0), texts: AtomicUsize::new(0), fail_marker: None }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self { fail_marker: Some(marker.to_string()), ..Self::new() }
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    pub fn texts(&self) -> usize { self.texts.load(Ordering::SeqCst) }
}

impl Embedder for CountingEmbedder {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.inner.dim() }
    fn max_len(&self) -> usize { self.inner.max_len() }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(Error::Embed(format!("refusing text containing {marker}")));
            }
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts)
    }
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let p = root.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, content).unwrap();
}

pub const ALPHA_SETUP: &str = "Install the package and point it at the identity provider before first use. Then restart the service.";

pub fn alpha_doc(setup: &str) -> String {
    format!("---\nname: alpha\ndescription: handles authentication\n---\n## Setup\n{setup}\n## x\nten chars!\n")
}

/// `skills/alpha` (summary, one section, full) and `skills/beta` (summary, full); `agents/` empty.
pub fn corpus() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "skills/alpha/SKILL.md", &alpha_doc(ALPHA_SETUP));
    write(tmp.path(), "skills/beta/SKILL.md", "A short note about gardening tools and seasonal planting schedules.\n");
    fs::create_dir_all(tmp.path().join("agents")).unwrap();
    tmp
}

pub fn corpora(root: &Path) -> Vec<CorpusSpec> {
    vec![CorpusSpec::new(root.join("skills"), DocType::Skill), CorpusSpec::new(root.join("agents"), DocType::Agent)]
}

pub fn settings(store: PathBuf) -> Settings {
    let mut s = Settings::default();
    s.store.path = store.to_string_lossy().to_string();
    s.store.collection = "test_chunks".to_string();
    s.embedding.provider = EmbeddingProvider::Hash;
    s
}

pub async fn context(store: &Path, embedder: Arc<dyn Embedder>) -> Context {
    Context::with_embedder(settings(store.to_path_buf()), embedder).await.expect("context")
}
