//! Domain types shared by the parser, the chunker, the store and the searcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;

/// Version of the column layout produced from [`ChunkMetadata`]. Stored with
/// every record so a future layout change can be detected on read.
pub const METADATA_SCHEMA_VERSION: i32 = 1;

/// The kind of source document. Each kind has a special file name used by
/// the nested corpus layout (`<root>/<name>/SKILL.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Skill,
    Agent,
}

impl DocType {
    pub const ALL: [DocType; 2] = [DocType::Skill, DocType::Agent];

    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Skill => "skill",
            DocType::Agent => "agent",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            DocType::Skill => "SKILL.md",
            DocType::Agent => "AGENT.md",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for DocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skill" => Ok(DocType::Skill),
            "agent" => Ok(DocType::Agent),
            other => Err(Error::InvalidConfig(format!("unknown document type '{other}'"))),
        }
    }
}

/// Role of a chunk within its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Synthesized from header fields.
    Summary,
    /// One heading-delimited block of the body.
    Section,
    /// The whole body, only for short documents.
    Full,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 3] = [ChunkKind::Summary, ChunkKind::Section, ChunkKind::Full];

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Summary => "summary",
            ChunkKind::Section => "section",
            ChunkKind::Full => "full",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ChunkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(ChunkKind::Summary),
            "section" => Ok(ChunkKind::Section),
            "full" => Ok(ChunkKind::Full),
            other => Err(Error::InvalidConfig(format!("unknown chunk type '{other}'"))),
        }
    }
}

/// Header fields with a known meaning, plus everything else in `extra`.
///
/// `name` is not part of this struct: it is resolved once by the parser
/// (header value or path fallback) and lives on [`Document::name`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// `allowed-tools` in the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coordinates_with: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocMetadata {
    pub fn is_empty(&self) -> bool { self == &DocMetadata::default() }
}

/// One parsed source file. Immutable for the duration of an indexing run.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: PathBuf,
    pub doc_type: DocType,
    pub name: String,
    pub metadata: DocMetadata,
    pub body: String,
}

impl Document {
    pub fn source_file(&self) -> String { self.path.to_string_lossy().to_string() }
}

/// Metadata attached to every chunk: the document metadata plus the chunk role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(rename = "type")]
    pub doc_type: DocType,
    pub name: String,
    pub source_file: String,
    #[serde(rename = "chunk_type")]
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_index: Option<u32>,
    #[serde(flatten)]
    pub doc: DocMetadata,
}

/// The unit of retrieval.
///
/// - `id`: pure function of document identity and role/position
/// - `content_hash`: blake3 of `text`, used to detect edited chunks
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub content_hash: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn kind(&self) -> ChunkKind { self.metadata.kind }
}

/// Deterministic chunk identifier: `{type}-{name}-summary`,
/// `{type}-{name}-section-{i}`, `{type}-{name}-full`.
pub fn chunk_id(doc_type: DocType, name: &str, kind: ChunkKind, section_index: Option<usize>) -> ChunkId {
    match (kind, section_index) {
        (ChunkKind::Section, Some(i)) => format!("{doc_type}-{name}-section-{i}"),
        (ChunkKind::Section, None) => format!("{doc_type}-{name}-section"),
        (kind, _) => format!("{doc_type}-{name}-{kind}"),
    }
}

pub fn content_hash(text: &str) -> String { blake3::hash(text.as_bytes()).to_hex().to_string() }

/// One ranked answer to a query. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: ChunkId,
    #[serde(rename = "content")]
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Similarity in `[0, 1]`, 1 only for zero distance.
    pub score: f32,
    pub distance: f32,
}

/// Collection health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub total: usize,
    pub by_doc_type: BTreeMap<String, usize>,
    pub by_chunk_kind: BTreeMap<String, usize>,
}
