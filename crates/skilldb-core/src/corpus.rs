//! Corpus enumeration: which files make up the document set of one run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::parser::parse_document;
use crate::types::{DocType, Document};

/// How documents are laid out under a corpus root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `<root>/<name>/SKILL.md` (or `AGENT.md`), one level deep.
    #[default]
    Nested,
    /// `<root>/*.md`.
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSpec {
    pub root: PathBuf,
    pub doc_type: DocType,
    #[serde(default)]
    pub layout: Layout,
}

impl CorpusSpec {
    pub fn new(root: impl Into<PathBuf>, doc_type: DocType) -> Self {
        Self { root: root.into(), doc_type, layout: Layout::Nested }
    }

    pub fn flat(mut self) -> Self {
        self.layout = Layout::Flat;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub documents: Vec<Document>,
    /// Files matched per type, including those that failed to parse.
    pub found: BTreeMap<DocType, usize>,
    pub failures: Vec<ParseFailure>,
}

/// Checks every root up front so a bad corpus path aborts before any work.
pub fn validate_roots(corpora: &[CorpusSpec]) -> Result<Vec<CorpusSpec>> {
    if corpora.is_empty() {
        return Err(Error::Setup("no corpus directories configured".to_string()));
    }
    corpora
        .iter()
        .map(|spec| {
            if !spec.root.is_dir() {
                return Err(Error::Setup(format!("{} directory not found: {}", spec.doc_type, spec.root.display())));
            }
            let root = fs::canonicalize(&spec.root)
                .map_err(|e| Error::Setup(format!("cannot resolve {}: {e}", spec.root.display())))?;
            Ok(CorpusSpec { root, ..spec.clone() })
        })
        .collect()
}

/// Matching files under one root, sorted by path.
pub fn list_documents(spec: &CorpusSpec) -> Vec<PathBuf> {
    let depth = match spec.layout {
        Layout::Nested => 2,
        Layout::Flat => 1,
    };
    let mut files: Vec<PathBuf> = WalkDir::new(&spec.root)
        .min_depth(depth)
        .max_depth(depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| matches_layout(p, spec))
        .collect();
    files.sort();
    files
}

fn matches_layout(path: &Path, spec: &CorpusSpec) -> bool {
    match spec.layout {
        Layout::Nested => path.file_name().and_then(|f| f.to_str()) == Some(spec.doc_type.file_name()),
        Layout::Flat => path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("md")),
    }
}

/// Enumerates and parses every corpus. Parse failures are logged and
/// collected; they never abort the scan.
pub fn scan(corpora: &[CorpusSpec]) -> Result<ScanOutcome> {
    let corpora = validate_roots(corpora)?;
    let mut outcome = ScanOutcome::default();
    for spec in &corpora {
        let files = list_documents(spec);
        debug!(root = %spec.root.display(), doc_type = %spec.doc_type, files = files.len(), "scanned corpus");
        *outcome.found.entry(spec.doc_type).or_default() += files.len();
        for path in files {
            match parse_document(&path, spec.doc_type) {
                Ok(doc) => outcome.documents.push(doc),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping document");
                    let reason = match err {
                        Error::Parse { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    outcome.failures.push(ParseFailure { path, reason });
                }
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }

    #[test]
    fn nested_layout_finds_special_files_only() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b/SKILL.md", "b");
        write(tmp.path(), "a/SKILL.md", "a");
        write(tmp.path(), "a/README.md", "ignored");
        write(tmp.path(), "top.md", "ignored");
        write(tmp.path(), "c/deep/SKILL.md", "too deep");
        let files = list_documents(&CorpusSpec::new(tmp.path(), DocType::Skill));
        let names: Vec<String> = files
            .iter()
            .map(|p| p.parent().unwrap().file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn flat_layout_takes_markdown_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "one.md", "1");
        write(tmp.path(), "two.MD", "2");
        write(tmp.path(), "three.txt", "3");
        let files = list_documents(&CorpusSpec::new(tmp.path(), DocType::Agent).flat());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn missing_root_is_a_setup_error() {
        let err = scan(&[CorpusSpec::new("/definitely/not/here", DocType::Skill)]).unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn parse_failures_do_not_abort_the_scan() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "bad/SKILL.md", "---\nname: [oops\n---\nbody");
        write(tmp.path(), "good/SKILL.md", "---\nname: good\n---\nbody");
        let outcome = scan(&[CorpusSpec::new(tmp.path(), DocType::Skill)]).unwrap();
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].name, "good");
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].path.ends_with("bad/SKILL.md"));
        assert_eq!(outcome.found.get(&DocType::Skill), Some(&2));
    }
}
