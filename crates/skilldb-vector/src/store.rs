//! The persistent collection: chunk records keyed by id, plus the embedding cache.
use arrow_array::RecordBatchIterator;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::table::OptimizeAction;
use lancedb::{Connection, DistanceType, Table};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use skilldb_core::types::{ChunkId, ChunkMetadata, CollectionStats};
use skilldb_core::{Error, Result};

use crate::cache::{self, CacheEntry};
use crate::schema::{batch_to_records, cache_schema, chunk_schema, distances, records_to_batch, utf8, vector_dim, ChunkRecord};
use crate::table::{ensure_table, open_db, open_table, sql_list, sql_str, table_exists};

/// What the indexer needs to know about a stored entry to decide whether to touch it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub content_hash: String,
    pub embedder_id: String,
    pub metadata: ChunkMetadata,
}

impl Fingerprint {
    pub fn source_file(&self) -> &str { &self.metadata.source_file }
}

// Every chunk column except the vector.
const FINGERPRINT_COLUMNS: &[&str] = &[
    "id",
    "doc_type",
    "chunk_type",
    "name",
    "source_file",
    "section_title",
    "section_index",
    "description",
    "role",
    "tools",
    "triggers",
    "coordinates_with",
    "outputs",
    "extra",
    "content",
    "content_hash",
    "embedder_id",
];

pub struct ChunkStore {
    conn: Connection,
    root: PathBuf,
    collection: String,
    dim: usize,
    // Set by any write; `optimize` is skipped for read-only sessions.
    dirty: AtomicBool,
}

impl ChunkStore {
    /// Opens (creating if needed) the store directory and both tables.
    pub async fn open(root: &Path, collection: &str, dim: usize) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| Error::Setup(format!("Failed to create store directory {}: {e}", root.display())))?;
        let store = Self::connect(root, collection, dim).await?;
        let chunks = ensure_table(&store.conn, &store.collection, chunk_schema(dim)).await?;
        store.check_dim(&chunks).await?;
        ensure_table(&store.conn, &store.cache_table(), cache_schema(dim)).await?;
        Ok(store)
    }

    /// Opens an existing collection; [`Error::StoreMissing`] if it was never built.
    pub async fn open_existing(root: &Path, collection: &str, dim: usize) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::StoreMissing(root.to_path_buf()));
        }
        let store = Self::connect(root, collection, dim).await?;
        if !table_exists(&store.conn, collection).await? {
            return Err(Error::StoreMissing(root.to_path_buf()));
        }
        let chunks = store.chunks().await?;
        store.check_dim(&chunks).await?;
        Ok(store)
    }

    async fn connect(root: &Path, collection: &str, dim: usize) -> Result<Self> {
        if collection.trim().is_empty() {
            return Err(Error::InvalidConfig("collection name must not be empty".into()));
        }
        let conn = open_db(&root.to_string_lossy()).await?;
        Ok(Self { conn, root: root.to_path_buf(), collection: collection.to_string(), dim, dirty: AtomicBool::new(false) })
    }

    async fn check_dim(&self, table: &Table) -> Result<()> {
        let schema = table.schema().await.map_err(Error::store)?;
        match vector_dim(&schema) {
            Some(d) if d == self.dim => Ok(()),
            Some(d) => Err(Error::Setup(format!(
                "Collection '{}' stores {d}-dimensional vectors but the embedder produces {}; remove {} and re-index",
                self.collection,
                self.dim,
                self.root.display()
            ))),
            None => Err(Error::Store(format!("Collection '{}' has no vector column", self.collection))),
        }
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn collection(&self) -> &str { &self.collection }

    pub fn dim(&self) -> usize { self.dim }

    fn cache_table(&self) -> String { format!("{}_emb_cache", self.collection) }

    async fn chunks(&self) -> Result<Table> { open_table(&self.conn, &self.collection).await }

    async fn cache(&self) -> Result<Table> {
        ensure_table(&self.conn, &self.cache_table(), cache_schema(self.dim)).await
    }

    /// Removes every entry from the collection and the embedding cache.
    pub async fn clear(&self) -> Result<()> {
        info!(collection = %self.collection, "Clearing collection and embedding cache");
        self.dirty.store(true, Ordering::Relaxed);
        self.chunks().await?.delete("id IS NOT NULL").await.map_err(Error::store)?;
        self.cache().await?.delete("content_hash IS NOT NULL").await.map_err(Error::store)?;
        Ok(())
    }

    pub async fn fingerprints(&self) -> Result<HashMap<ChunkId, Fingerprint>> {
        let table = self.chunks().await?;
        let mut stream = table
            .query()
            .select(Select::columns(FINGERPRINT_COLUMNS))
            .execute()
            .await
            .map_err(Error::store)?;
        let mut out = HashMap::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
            for r in batch_to_records(&batch)? {
                out.insert(r.id, Fingerprint { content_hash: r.content_hash, embedder_id: r.embedder_id, metadata: r.metadata });
            }
        }
        Ok(out)
    }

    /// Inserts new ids and replaces existing ones in a single merge.
    pub async fn upsert(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let batch = records_to_batch(records, self.dim)?;
        self.dirty.store(true, Ordering::Relaxed);
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), chunk_schema(self.dim)));
        let table = self.chunks().await?;
        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(|e| Error::Store(format!("Failed to upsert chunks: {e}")))?;
        debug!(count = records.len(), "Upserted chunks");
        Ok(records.len())
    }

    pub async fn delete_ids(&self, ids: &[ChunkId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = self.chunks().await?;
        self.dirty.store(true, Ordering::Relaxed);
        for part in ids.chunks(256) {
            table
                .delete(&format!("id IN ({})", sql_list(part)))
                .await
                .map_err(|e| Error::Store(format!("Failed to delete chunks: {e}")))?;
        }
        Ok(ids.len())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ChunkRecord>> {
        let table = self.chunks().await?;
        let mut stream = table
            .query()
            .only_if(format!("id = {}", sql_str(id)))
            .limit(1)
            .execute()
            .await
            .map_err(Error::store)?;
        match stream.try_next().await.map_err(Error::store)? {
            Some(batch) => Ok(batch_to_records(&batch)?.into_iter().next()),
            None => Ok(None),
        }
    }

    pub async fn count(&self) -> Result<usize> {
        self.chunks().await?.count_rows(None).await.map_err(Error::store)
    }

    /// Totals per document type and chunk role, from the metadata columns only.
    pub async fn stats(&self) -> Result<CollectionStats> {
        let table = self.chunks().await?;
        let mut stream = table
            .query()
            .select(Select::columns(&["doc_type", "chunk_type"]))
            .execute()
            .await
            .map_err(Error::store)?;
        let mut stats = CollectionStats::default();
        while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
            let types = utf8(&batch, "doc_type")?;
            let kinds = utf8(&batch, "chunk_type")?;
            for i in 0..batch.num_rows() {
                stats.total += 1;
                *stats.by_doc_type.entry(types.value(i).to_string()).or_default() += 1;
                *stats.by_chunk_kind.entry(kinds.value(i).to_string()).or_default() += 1;
            }
        }
        Ok(stats)
    }

    /// Distinct embedder ids present in the collection.
    pub async fn embedder_ids(&self) -> Result<BTreeSet<String>> {
        let table = self.chunks().await?;
        let mut stream =
            table.query().select(Select::columns(&["embedder_id"])).execute().await.map_err(Error::store)?;
        let mut out = BTreeSet::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
            let col = utf8(&batch, "embedder_id")?;
            out.extend((0..batch.num_rows()).map(|i| col.value(i).to_string()));
        }
        Ok(out)
    }

    /// Up to `limit` entries closest to `vector` by cosine distance, nearest first.
    pub async fn nearest(&self, vector: Vec<f32>, filter: Option<&str>, limit: usize) -> Result<Vec<(ChunkRecord, f32)>> {
        let table = self.chunks().await?;
        let mut query = table
            .vector_search(vector)
            .map_err(|e| Error::Store(format!("Failed to create search query: {e}")))?
            .distance_type(DistanceType::Cosine)
            .limit(limit);
        if let Some(f) = filter {
            query = query.only_if(f);
        }
        let mut stream = query.execute().await.map_err(|e| Error::Store(format!("Failed to execute search: {e}")))?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
            let dist = distances(&batch)?;
            for (i, record) in batch_to_records(&batch)?.into_iter().enumerate() {
                out.push((record, dist.value(i)));
            }
        }
        Ok(out)
    }

    pub async fn cached_vectors(&self, embedder_id: &str, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        cache::get_many(&self.cache().await?, embedder_id, hashes, self.dim).await
    }

    pub async fn cache_vectors(&self, entries: &[CacheEntry]) -> Result<()> {
        cache::put_many(&self.cache().await?, entries, self.dim).await
    }

    /// Deletes cached vectors whose `(content_hash, embedder_id)` no stored chunk uses.
    pub async fn evict_unreferenced_cache(&self) -> Result<usize> {
        let live: HashSet<(String, String)> =
            self.fingerprints().await?.into_values().map(|fp| (fp.content_hash, fp.embedder_id)).collect();
        let cache = self.cache().await?;
        let stale = cache::unreferenced(&cache, &live).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        self.dirty.store(true, Ordering::Relaxed);
        let evicted = cache::delete_many(&cache, &stale).await?;
        debug!(collection = %self.collection, evicted, "Evicted unreferenced cache entries");
        Ok(evicted)
    }

    /// Compacts files and prunes old versions if anything was written.
    pub async fn optimize(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        debug!(collection = %self.collection, "Optimizing collection");
        self.chunks().await?.optimize(OptimizeAction::All).await.map_err(Error::store)?;
        Ok(())
    }
}
