//! Header-block + body parser for skill and agent markdown files.
//!
//! A file may start with a line consisting solely of `---`; everything up to
//! the next `---` line is a YAML mapping, the rest is the body. Files without
//! that opening line are all body.

use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{DocMetadata, DocType, Document};

const HEADER_MARKER: &str = "---";

pub fn parse_document(path: &Path, doc_type: DocType) -> Result<Document> {
    let bytes = fs::read(path).map_err(|e| Error::parse(path, e))?;
    let raw = String::from_utf8(bytes).map_err(|e| Error::parse(path, format!("invalid UTF-8: {e}")))?;
    parse_str(path, doc_type, &raw)
}

pub fn parse_str(path: &Path, doc_type: DocType, raw: &str) -> Result<Document> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let (header, body) = split_header(raw).map_err(|reason| Error::parse(path, reason))?;
    let mapping = match header {
        Some(h) => parse_header(h).map_err(|reason| Error::parse(path, reason))?,
        None => Mapping::new(),
    };

    let header_name = mapping
        .get("name")
        .and_then(scalar_to_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let name = header_name.unwrap_or_else(|| fallback_name(path, doc_type));
    let metadata = metadata_from_mapping(mapping).map_err(|reason| Error::parse(path, reason))?;

    Ok(Document { path: path.to_path_buf(), doc_type, name, metadata, body: body.to_string() })
}

/// Returns `(header, body)`. An opening marker without a closing one is an error.
fn split_header(raw: &str) -> std::result::Result<(Option<&str>, &str), String> {
    let Some((first, rest)) = split_line(raw) else { return Ok((None, raw)) };
    if first.trim_end() != HEADER_MARKER {
        return Ok((None, raw));
    }
    let mut offset = 0usize;
    let mut remaining = rest;
    while let Some((line, after)) = split_line(remaining) {
        if line.trim_end() == HEADER_MARKER {
            return Ok((Some(&rest[..offset]), after));
        }
        offset += remaining.len() - after.len();
        remaining = after;
    }
    Err("header block opened with '---' is never closed".to_string())
}

/// Splits off the first line, returning `(line_without_newline, rest)`.
fn split_line(s: &str) -> Option<(&str, &str)> {
    if s.is_empty() {
        return None;
    }
    match s.find('\n') {
        Some(i) => Some((s[..i].trim_end_matches('\r'), &s[i + 1..])),
        None => Some((s.trim_end_matches('\r'), "")),
    }
}

fn parse_header(header: &str) -> std::result::Result<Mapping, String> {
    if header.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(header) {
        Ok(Value::Mapping(m)) => Ok(m),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(_) => Err("header block is not a key-value mapping".to_string()),
        Err(e) => Err(format!("malformed header block: {e}")),
    }
}

/// Fallback display name: the directory holding `SKILL.md`/`AGENT.md`, or the file stem.
fn fallback_name(path: &Path, doc_type: DocType) -> String {
    let is_special = path
        .file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f.eq_ignore_ascii_case(doc_type.file_name()));
    let from_dir = if is_special { path.parent().and_then(|p| p.file_name()) } else { None };
    from_dir
        .or_else(|| path.file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string())
}

fn metadata_from_mapping(mapping: Mapping) -> std::result::Result<DocMetadata, String> {
    let mut meta = DocMetadata::default();
    for (key, value) in mapping {
        let key = match key {
            Value::String(s) => s,
            other => scalar_to_string(&other).ok_or_else(|| "header keys must be scalars".to_string())?,
        };
        match key.as_str() {
            "name" => {}
            "description" => meta.description = scalar_to_string(&value),
            "role" => meta.role = scalar_to_string(&value),
            "allowed-tools" | "allowed_tools" | "tools" => meta.tools = scalar_to_string(&value),
            "triggers" => meta.triggers = to_string_list(&value),
            "coordinates_with" => meta.coordinates_with = to_string_list(&value),
            "outputs" => meta.outputs = to_string_list(&value),
            _ => {
                let json = serde_json::to_value(&value).map_err(|e| format!("header field '{key}': {e}"))?;
                meta.extra.insert(key, json);
            }
        }
    }
    Ok(meta)
}

/// Scalars become their display form, sequences are joined with `", "`.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            Some(parts.join(", "))
        }
        Value::Mapping(_) => serde_json::to_string(value).ok(),
        Value::Tagged(t) => scalar_to_string(&t.value),
    }
}

fn to_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_to_string).collect(),
        Value::Null => Vec::new(),
        other => scalar_to_string(other).into_iter().collect(),
    }
}
