//! Fixed chunking strategy: one summary chunk, one chunk per substantial
//! section, and a full-document chunk for short bodies.

use serde::{Deserialize, Serialize};

use crate::types::{chunk_id, content_hash, Chunk, ChunkKind, ChunkMetadata, Document};

pub const DEFAULT_SECTION_TITLE: &str = "Introduction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// A section is kept only when its content is longer than this (chars).
    pub min_section_chars: usize,
    /// A full chunk is emitted only when the body is shorter than this (chars).
    pub full_doc_max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { min_section_chars: 50, full_doc_max_chars: 4000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self { Self { config } }

    pub fn config(&self) -> &ChunkingConfig { &self.config }

    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let base = ChunkMetadata {
            doc_type: doc.doc_type,
            name: doc.name.clone(),
            source_file: doc.source_file(),
            kind: ChunkKind::Summary,
            section_title: None,
            section_index: None,
            doc: doc.metadata.clone(),
        };
        let mut chunks = vec![make_chunk(
            chunk_id(doc.doc_type, &doc.name, ChunkKind::Summary, None),
            summary_text(doc),
            base.clone(),
        )];

        let body_chars = doc.body.chars().count();
        let wants_full = !doc.body.trim().is_empty() && body_chars < self.config.full_doc_max_chars;

        // A heading-free body is covered by the full chunk; only split it when that chunk is absent.
        if body_has_heading(&doc.body) || !wants_full {
            for (i, section) in split_sections(&doc.body).iter().enumerate() {
                if section.content.chars().count() <= self.config.min_section_chars {
                    continue;
                }
                let meta = ChunkMetadata {
                    kind: ChunkKind::Section,
                    section_title: Some(section.title.clone()),
                    section_index: u32::try_from(i).ok(),
                    ..base.clone()
                };
                chunks.push(make_chunk(
                    chunk_id(doc.doc_type, &doc.name, ChunkKind::Section, Some(i)),
                    format!("## {}\n\n{}", section.title, section.content),
                    meta,
                ));
            }
        }

        if wants_full {
            let meta = ChunkMetadata { kind: ChunkKind::Full, ..base };
            chunks.push(make_chunk(chunk_id(doc.doc_type, &doc.name, ChunkKind::Full, None), doc.body.clone(), meta));
        }
        chunks
    }
}

fn make_chunk(id: String, text: String, metadata: ChunkMetadata) -> Chunk {
    let content_hash = content_hash(&text);
    Chunk { id, text, content_hash, metadata }
}

/// `# name` followed by the role, description, triggers and tools lines that are present.
pub fn summary_text(doc: &Document) -> String {
    let meta = &doc.metadata;
    let mut parts = vec![format!("# {}", doc.name)];
    if let Some(role) = &meta.role {
        parts.push(format!("Role: {role}"));
    }
    if let Some(description) = &meta.description {
        parts.push(format!("Description: {description}"));
    }
    if !meta.triggers.is_empty() {
        parts.push(format!("Triggers: {}", meta.triggers.join(", ")));
    }
    if let Some(tools) = &meta.tools {
        parts.push(format!("Tools: {tools}"));
    }
    parts.join("\n")
}

/// Splits a markdown body on level 1-3 ATX headings, in encounter order.
/// Content before the first heading is titled [`DEFAULT_SECTION_TITLE`];
/// sections whose trimmed content is empty are omitted.
pub fn split_sections(body: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title = DEFAULT_SECTION_TITLE.to_string();
    let mut lines: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;

    for line in body.lines() {
        if let Some(marker) = fence_marker(line) {
            match fence {
                None => fence = Some(marker),
                Some(open) if open == marker => fence = None,
                Some(_) => {}
            }
            lines.push(line);
            continue;
        }
        if fence.is_none() {
            if let Some(heading) = heading_title(line) {
                push_section(&mut sections, &title, &lines);
                title = heading.to_string();
                lines.clear();
                continue;
            }
        }
        lines.push(line);
    }
    push_section(&mut sections, &title, &lines);
    sections
}

fn push_section(sections: &mut Vec<Section>, title: &str, lines: &[&str]) {
    let content = lines.join("\n").trim().to_string();
    if !content.is_empty() {
        sections.push(Section { title: title.to_string(), content });
    }
}

fn body_has_heading(body: &str) -> bool {
    let mut fence: Option<&str> = None;
    for line in body.lines() {
        if let Some(marker) = fence_marker(line) {
            match fence {
                None => fence = Some(marker),
                Some(open) if open == marker => fence = None,
                Some(_) => {}
            }
        } else if fence.is_none() && heading_title(line).is_some() {
            return true;
        }
    }
    false
}

/// `#`, `##` or `###`, at least one whitespace, then a non-empty title.
fn heading_title(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let title = rest.trim();
    (!title.is_empty()).then_some(title)
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}
