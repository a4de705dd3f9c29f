use std::fs;
use std::path::Path;
use tempfile::TempDir;

use skilldb_core::chunker::Chunker;
use skilldb_core::corpus::{scan, CorpusSpec};
use skilldb_core::types::{ChunkKind, DocType};

fn write(root: &Path, rel: &str, content: &str) {
    let p = root.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, content).unwrap();
}

fn two_doc_corpus() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let doc_a = format!(
        "---\nname: alpha\ndescription: handles authentication\n---\n## Setup\n{}\n## x\n{}\n",
        "Install the package and point it at the identity provider before first use. ".repeat(2).trim_end(),
        "ten chars!"
    );
    write(tmp.path(), "skills/alpha/SKILL.md", &doc_a);
    write(tmp.path(), "skills/beta/SKILL.md", "A short note about gardening tools and seasonal planting schedules.\n");
    tmp
}

#[test]
fn scenario_chunk_layout() {
    let tmp = two_doc_corpus();
    let outcome = scan(&[CorpusSpec::new(tmp.path().join("skills"), DocType::Skill)]).expect("scan");
    assert_eq!(outcome.documents.len(), 2);
    let chunker = Chunker::default();

    let alpha = outcome.documents.iter().find(|d| d.name == "alpha").expect("alpha");
    let a_chunks = chunker.chunk(alpha);
    let kinds: Vec<ChunkKind> = a_chunks.iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec![ChunkKind::Summary, ChunkKind::Section, ChunkKind::Full]);
    assert_eq!(a_chunks[1].metadata.section_title.as_deref(), Some("Setup"));
    assert!(a_chunks[0].text.contains("handles authentication"));

    // No header: the name comes from the containing directory.
    let beta = outcome.documents.iter().find(|d| d.name == "beta").expect("beta");
    let b_chunks = chunker.chunk(beta);
    let ids: Vec<&str> = b_chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["skill-beta-summary", "skill-beta-full"]);
    assert_eq!(b_chunks[0].text, "# beta");
}

#[test]
fn rescanning_an_unchanged_corpus_is_byte_identical() {
    let tmp = two_doc_corpus();
    let spec = [CorpusSpec::new(tmp.path().join("skills"), DocType::Skill)];
    let chunker = Chunker::default();
    let run = || -> Vec<(String, String, String)> {
        scan(&spec)
            .expect("scan")
            .documents
            .iter()
            .flat_map(|d| chunker.chunk(d))
            .map(|c| (c.id, c.text, c.content_hash))
            .collect()
    };
    assert_eq!(run(), run());
}
