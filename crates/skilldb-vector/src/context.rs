use std::sync::Arc;
use tracing::info;

use skilldb_core::config::Settings;
use skilldb_core::corpus::{validate_roots, CorpusSpec};
use skilldb_core::traits::Embedder;
use skilldb_core::Result;
use skilldb_embed::embedder_from_settings;

use crate::indexer::Indexer;
use crate::search::Searcher;
use crate::store::ChunkStore;

/// Everything one process needs: the store handle, the embedder and the settings.
///
/// Built once and lent to [`Indexer`] and [`Searcher`].
pub struct Context {
    pub store: ChunkStore,
    pub embedder: Arc<dyn Embedder>,
    pub settings: Settings,
}

impl Context {
    /// Opens or creates the store, for indexing.
    pub async fn open(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let embedder = embedder_from_settings(&settings.embedding)?;
        Self::with_embedder(settings, embedder).await
    }

    /// Checks the corpus roots, then opens or creates the store to index them.
    ///
    /// A missing root fails before the store directory is created or the model is loaded.
    pub async fn open_for_index(settings: Settings, corpora: &[CorpusSpec]) -> Result<Self> {
        settings.validate()?;
        validate_roots(corpora)?;
        Self::open(settings).await
    }

    pub async fn for_index_with_embedder(settings: Settings, embedder: Arc<dyn Embedder>, corpora: &[CorpusSpec]) -> Result<Self> {
        validate_roots(corpora)?;
        Self::with_embedder(settings, embedder).await
    }

    /// Opens a store that must already hold a collection, for searching.
    ///
    /// The store is checked before the embedder is loaded.
    pub async fn open_existing(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let root = settings.store_path();
        if !root.is_dir() {
            return Err(skilldb_core::Error::StoreMissing(root));
        }
        let embedder = embedder_from_settings(&settings.embedding)?;
        Self::existing_with_embedder(settings, embedder).await
    }

    pub async fn with_embedder(settings: Settings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store = ChunkStore::open(&settings.store_path(), &settings.store.collection, embedder.dim()).await?;
        Ok(Self { store, embedder, settings })
    }

    pub async fn existing_with_embedder(settings: Settings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store = ChunkStore::open_existing(&settings.store_path(), &settings.store.collection, embedder.dim()).await?;
        Ok(Self { store, embedder, settings })
    }

    pub fn indexer(&self) -> Indexer<'_> { Indexer::new(self) }

    pub fn searcher(&self) -> Searcher<'_> { Searcher::new(self) }

    /// Compacts the collection and releases the store and model.
    pub async fn close(self) -> Result<()> {
        self.store.optimize().await?;
        let count = self.store.count().await?;
        info!(collection = %self.store.collection(), count, "Closed store");
        Ok(())
    }
}
