//! Arrow schemas for the chunk collection and the embedding cache.
//!
//! `records_to_batch` / `batch_to_records` are the only place chunk metadata
//! is flattened into columns and rebuilt from them. List fields are stored as
//! JSON strings, unrecognised header keys as one JSON object column.

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use skilldb_core::types::{Chunk, ChunkId, ChunkMetadata, DocMetadata, METADATA_SCHEMA_VERSION};
use skilldb_core::{Error, Result};

pub const VECTOR_COLUMN: &str = "vector";
pub const DISTANCE_COLUMN: &str = "_distance";

fn vector_field(dim: usize) -> Field {
    Field::new(
        VECTOR_COLUMN,
        DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
        false,
    )
}

pub fn chunk_schema(dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("doc_type", DataType::Utf8, false),
        Field::new("chunk_type", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("source_file", DataType::Utf8, false),
        Field::new("section_title", DataType::Utf8, true),
        Field::new("section_index", DataType::Int32, true),
        Field::new("description", DataType::Utf8, true),
        Field::new("role", DataType::Utf8, true),
        Field::new("tools", DataType::Utf8, true),
        Field::new("triggers", DataType::Utf8, true),
        Field::new("coordinates_with", DataType::Utf8, true),
        Field::new("outputs", DataType::Utf8, true),
        Field::new("extra", DataType::Utf8, true),
        Field::new("content", DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("embedder_id", DataType::Utf8, false),
        Field::new("schema_version", DataType::Int32, false),
        Field::new("indexed_at", DataType::Utf8, false),
        vector_field(dim),
    ]))
}

pub fn cache_schema(dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("embedder_id", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
        vector_field(dim),
    ]))
}

/// Vector dimension declared by a schema built with [`chunk_schema`] or [`cache_schema`].
pub fn vector_dim(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
        DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
        _ => None,
    }
}

/// One persisted entry of the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub content_hash: String,
    pub embedder_id: String,
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    pub fn new(chunk: Chunk, embedder_id: &str, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            text: chunk.text,
            metadata: chunk.metadata,
            content_hash: chunk.content_hash,
            embedder_id: embedder_id.to_string(),
            vector,
        }
    }
}

pub(crate) fn vector_array(vectors: &[Vec<f32>], dim: usize) -> Result<ArrayRef> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::Store(format!("vector has {} dimensions, collection expects {dim}", bad.len())));
    }
    let rows = vectors.iter().map(|v| Some(v.iter().copied().map(Some).collect::<Vec<_>>()));
    Ok(Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(rows, dim as i32)))
}

fn json_list(values: &[String]) -> Result<Option<String>> {
    if values.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(values).map(Some).map_err(Error::store)
}

pub fn records_to_batch(records: &[ChunkRecord], dim: usize) -> Result<RecordBatch> {
    let now = Utc::now().to_rfc3339();
    let mut triggers = Vec::with_capacity(records.len());
    let mut coordinates_with = Vec::with_capacity(records.len());
    let mut outputs = Vec::with_capacity(records.len());
    let mut extra = Vec::with_capacity(records.len());
    for r in records {
        let doc = &r.metadata.doc;
        triggers.push(json_list(&doc.triggers)?);
        coordinates_with.push(json_list(&doc.coordinates_with)?);
        outputs.push(json_list(&doc.outputs)?);
        extra.push(if doc.extra.is_empty() { None } else { Some(serde_json::to_string(&doc.extra).map_err(Error::store)?) });
    }
    let vectors: Vec<Vec<f32>> = records.iter().map(|r| r.vector.clone()).collect();
    let strings = |f: fn(&ChunkRecord) -> String| -> ArrayRef { Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>())) };
    let optional = |f: fn(&ChunkRecord) -> Option<String>| -> ArrayRef { Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>())) };

    let columns: Vec<ArrayRef> = vec![
        strings(|r| r.id.clone()),
        strings(|r| r.metadata.doc_type.to_string()),
        strings(|r| r.metadata.kind.to_string()),
        strings(|r| r.metadata.name.clone()),
        strings(|r| r.metadata.source_file.clone()),
        optional(|r| r.metadata.section_title.clone()),
        Arc::new(Int32Array::from(records.iter().map(|r| r.metadata.section_index.map(|i| i as i32)).collect::<Vec<_>>())),
        optional(|r| r.metadata.doc.description.clone()),
        optional(|r| r.metadata.doc.role.clone()),
        optional(|r| r.metadata.doc.tools.clone()),
        Arc::new(StringArray::from(triggers)),
        Arc::new(StringArray::from(coordinates_with)),
        Arc::new(StringArray::from(outputs)),
        Arc::new(StringArray::from(extra)),
        strings(|r| r.text.clone()),
        strings(|r| r.content_hash.clone()),
        strings(|r| r.embedder_id.clone()),
        Arc::new(Int32Array::from(vec![METADATA_SCHEMA_VERSION; records.len()])),
        Arc::new(StringArray::from(vec![now; records.len()])),
        vector_array(&vectors, dim)?,
    ];
    RecordBatch::try_new(chunk_schema(dim), columns).map_err(Error::store)
}

pub(crate) fn utf8<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Store(format!("column '{name}' missing or not utf8")))
}

fn opt_string(col: &StringArray, i: usize) -> Option<String> {
    (!col.is_null(i)).then(|| col.value(i).to_string())
}

fn list_from_json(col: &StringArray, i: usize) -> Result<Vec<String>> {
    match opt_string(col, i) {
        Some(raw) => serde_json::from_str(&raw).map_err(Error::store),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn vector_at(col: &FixedSizeListArray, i: usize) -> Vec<f32> {
    col.value(i).as_primitive::<Float32Type>().values().to_vec()
}

/// Rebuilds records from a scan or query batch. A missing vector column yields empty vectors.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<ChunkRecord>> {
    let ids = utf8(batch, "id")?;
    let doc_types = utf8(batch, "doc_type")?;
    let kinds = utf8(batch, "chunk_type")?;
    let names = utf8(batch, "name")?;
    let sources = utf8(batch, "source_file")?;
    let titles = utf8(batch, "section_title")?;
    let indices = batch
        .column_by_name("section_index")
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| Error::Store("column 'section_index' missing".into()))?;
    let descriptions = utf8(batch, "description")?;
    let roles = utf8(batch, "role")?;
    let tools = utf8(batch, "tools")?;
    let triggers = utf8(batch, "triggers")?;
    let coordinates_with = utf8(batch, "coordinates_with")?;
    let outputs = utf8(batch, "outputs")?;
    let extras = utf8(batch, "extra")?;
    let contents = utf8(batch, "content")?;
    let hashes = utf8(batch, "content_hash")?;
    let embedder_ids = utf8(batch, "embedder_id")?;
    let vectors = batch.column_by_name(VECTOR_COLUMN).and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let extra: BTreeMap<String, serde_json::Value> = match opt_string(extras, i) {
            Some(raw) => serde_json::from_str(&raw).map_err(Error::store)?,
            None => BTreeMap::new(),
        };
        let metadata = ChunkMetadata {
            doc_type: doc_types.value(i).parse().map_err(Error::store)?,
            name: names.value(i).to_string(),
            source_file: sources.value(i).to_string(),
            kind: kinds.value(i).parse().map_err(Error::store)?,
            section_title: opt_string(titles, i),
            section_index: (!indices.is_null(i)).then(|| indices.value(i) as u32),
            doc: DocMetadata {
                description: opt_string(descriptions, i),
                role: opt_string(roles, i),
                tools: opt_string(tools, i),
                triggers: list_from_json(triggers, i)?,
                coordinates_with: list_from_json(coordinates_with, i)?,
                outputs: list_from_json(outputs, i)?,
                extra,
            },
        };
        out.push(ChunkRecord {
            id: ids.value(i).to_string(),
            text: contents.value(i).to_string(),
            metadata,
            content_hash: hashes.value(i).to_string(),
            embedder_id: embedder_ids.value(i).to_string(),
            vector: vectors.filter(|v| !v.is_null(i)).map(|v| vector_at(v, i)).unwrap_or_default(),
        });
    }
    Ok(out)
}

/// `_distance` values of a vector query batch.
pub fn distances(batch: &RecordBatch) -> Result<&Float32Array> {
    batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| Error::Store("vector query returned no distance column".into()))
}
