//! Lance-backed embedding cache keyed by `(content_hash, embedder_id)`.
//!
//! Consulted before calling the embedder and written through on misses, so
//! text that moves to a new chunk id (a reordered section) is not re-embedded.
use arrow_array::{Array, ArrayRef, FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::Table;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use skilldb_core::{Error, Result};

use crate::schema::{cache_schema, utf8, vector_array, vector_at, VECTOR_COLUMN};
use crate::table::{sql_list, sql_str};

// Keeps IN-lists well below predicate size limits.
const LOOKUP_CHUNK: usize = 256;

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub content_hash: String,
    pub embedder_id: String,
    pub vector: Vec<f32>,
}

pub async fn get_many(table: &Table, embedder_id: &str, hashes: &[String], dim: usize) -> Result<HashMap<String, Vec<f32>>> {
    let mut out = HashMap::new();
    for part in hashes.chunks(LOOKUP_CHUNK) {
        let filter = format!("embedder_id = {} AND content_hash IN ({})", sql_str(embedder_id), sql_list(part));
        let mut stream = table.query().only_if(filter).execute().await.map_err(Error::store)?;
        while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
            let hash_col = utf8(&batch, "content_hash")?;
            let vec_col = batch
                .column_by_name(VECTOR_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
                .ok_or_else(|| Error::Store("cache vector column missing".into()))?;
            for i in 0..batch.num_rows() {
                let v = vector_at(vec_col, i);
                if v.len() == dim {
                    out.insert(hash_col.value(i).to_string(), v);
                }
            }
        }
    }
    Ok(out)
}

pub async fn put_many(table: &Table, entries: &[CacheEntry], dim: usize) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let now = Utc::now().to_rfc3339();
    let vectors: Vec<Vec<f32>> = entries.iter().map(|e| e.vector.clone()).collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(entries.iter().map(|e| e.content_hash.clone()).collect::<Vec<_>>())),
        Arc::new(StringArray::from(entries.iter().map(|e| e.embedder_id.clone()).collect::<Vec<_>>())),
        Arc::new(StringArray::from(vec![now; entries.len()])),
        vector_array(&vectors, dim)?,
    ];
    let batch = RecordBatch::try_new(cache_schema(dim), columns).map_err(Error::store)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), cache_schema(dim)));
    let mut mi = table.merge_insert(&["content_hash", "embedder_id"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await.map_err(Error::store)?;
    Ok(())
}

/// Cache keys, `(content_hash, embedder_id)`, that are not in `live`.
pub async fn unreferenced(table: &Table, live: &HashSet<(String, String)>) -> Result<Vec<(String, String)>> {
    let mut stream = table
        .query()
        .select(Select::columns(&["content_hash", "embedder_id"]))
        .execute()
        .await
        .map_err(Error::store)?;
    let mut out = Vec::new();
    while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
        let hashes = utf8(&batch, "content_hash")?;
        let embedders = utf8(&batch, "embedder_id")?;
        for i in 0..batch.num_rows() {
            let key = (hashes.value(i).to_string(), embedders.value(i).to_string());
            if !live.contains(&key) {
                out.push(key);
            }
        }
    }
    Ok(out)
}

pub async fn delete_many(table: &Table, keys: &[(String, String)]) -> Result<usize> {
    let mut by_embedder: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (hash, embedder_id) in keys {
        by_embedder.entry(embedder_id.as_str()).or_default().push(hash.as_str());
    }
    let mut deleted = 0;
    for (embedder_id, hashes) in by_embedder {
        for part in hashes.chunks(LOOKUP_CHUNK) {
            let filter = format!("embedder_id = {} AND content_hash IN ({})", sql_str(embedder_id), sql_list(part));
            table.delete(&filter).await.map_err(Error::store)?;
            deleted += part.len();
        }
    }
    Ok(deleted)
}
