//! Layered configuration and path helpers.
//!
//! Uses Figment to merge built-in defaults + `skilldb.toml` +
//! `skilldb.<env>.toml` + `SKILLDB_*` env vars (`__` separates nested keys,
//! e.g. `SKILLDB_INDEXING__EMBED_BATCH_SIZE=16`). Provides helpers to expand
//! `~` and `${VAR}` and to resolve relative paths against a base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::corpus::{CorpusSpec, Layout};
use crate::error::{Error, Result};
use crate::types::DocType;

pub const ENV_PREFIX: &str = "SKILLDB_";
pub const DEFAULT_COLLECTION: &str = "claude_ecosystem";

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("SKILLDB_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("skilldb.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("skilldb.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("skilldb.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("skilldb.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    /// Wraps an explicit figment; defaults are still applied underneath.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment) }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    pub fn settings(&self) -> Result<Settings> {
        self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub corpus: CorpusSettings,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingSettings,
    pub indexing: IndexingSettings,
    pub search: SearchSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.store.collection.trim().is_empty() {
            return Err(Error::InvalidConfig("store.collection must not be empty".into()));
        }
        if self.indexing.embed_batch_size == 0 || self.indexing.store_batch_size == 0 {
            return Err(Error::InvalidConfig("batch sizes must be at least 1".into()));
        }
        if self.indexing.embed_concurrency == 0 {
            return Err(Error::InvalidConfig("indexing.embed_concurrency must be at least 1".into()));
        }
        if self.search.default_k == 0 {
            return Err(Error::InvalidConfig("search.default_k must be at least 1".into()));
        }
        if self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be at least 1".into()));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf { expand_path(&self.store.path) }

    /// Skills and agents roots plus any extra corpora, with paths expanded.
    pub fn corpora(&self) -> Vec<CorpusSpec> {
        let c = &self.corpus;
        let mut out = Vec::new();
        if let Some(dir) = &c.skills_dir {
            out.push(CorpusSpec { root: expand_path(dir), doc_type: DocType::Skill, layout: c.skills_layout });
        }
        if let Some(dir) = &c.agents_dir {
            out.push(CorpusSpec { root: expand_path(dir), doc_type: DocType::Agent, layout: c.agents_layout });
        }
        out.extend(c.extra.iter().map(|spec| CorpusSpec { root: expand_path(spec.root.to_string_lossy()), ..spec.clone() }));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: String,
    pub collection: String,
}

impl Default for StoreSettings {
    fn default() -> Self { Self { path: ".skilldb".to_string(), collection: DEFAULT_COLLECTION.to_string() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    pub skills_dir: Option<String>,
    pub agents_dir: Option<String>,
    pub skills_layout: Layout,
    pub agents_layout: Layout,
    pub extra: Vec<CorpusSpec>,
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            skills_dir: Some(".claude/skills".to_string()),
            agents_dir: Some(".claude/agents".to_string()),
            skills_layout: Layout::Nested,
            agents_layout: Layout::Nested,
            extra: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local sentence-transformer weights through candle.
    #[default]
    Bert,
    /// Deterministic feature hashing; no model files needed.
    Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model_dir: Option<String>,
    /// Output dimension for the hash provider; the bert provider reads it from the model config.
    pub dim: usize,
    pub max_len: usize,
    pub use_metal: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self { Self { provider: EmbeddingProvider::Bert, model_dir: None, dim: 384, max_len: 256, use_metal: true } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,
    pub store_batch_size: usize,
    pub embed_timeout_secs: Option<u64>,
    pub prune: bool,
    /// Drop cached vectors that no stored chunk references after each run.
    pub prune_cache: bool,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self { embed_batch_size: 64, embed_concurrency: 1, store_batch_size: 100, embed_timeout_secs: None, prune: true, prune_cache: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_k: usize,
    /// Multiplier applied to `k` when a minimum score is set.
    pub overfetch_factor: usize,
}

impl Default for SearchSettings {
    fn default() -> Self { Self { default_k: 5, overfetch_factor: 2 } }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_scripts() {
        let s = Settings::default();
        assert_eq!(s.store.collection, "claude_ecosystem");
        assert_eq!(s.chunking.min_section_chars, 50);
        assert_eq!(s.chunking.full_doc_max_chars, 4000);
        assert_eq!(s.indexing.store_batch_size, 100);
        assert_eq!(s.search.default_k, 5);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn toml_overrides_nested_keys() {
        let toml = r#"
            [indexing]
            embed_batch_size = 8
            prune = false

            [embedding]
            provider = "hash"

            [[corpus.extra]]
            root = "/docs/agents-flat"
            doc_type = "agent"
            layout = "flat"
        "#;
        let cfg = Config::from_figment(Figment::from(Toml::string(toml)));
        let s = cfg.settings().unwrap();
        assert_eq!(s.indexing.embed_batch_size, 8);
        assert!(!s.indexing.prune);
        assert_eq!(s.indexing.store_batch_size, 100);
        assert_eq!(s.embedding.provider, EmbeddingProvider::Hash);
        let corpora = s.corpora();
        assert_eq!(corpora.len(), 3);
        assert_eq!(corpora[2].layout, Layout::Flat);
        assert_eq!(cfg.get::<usize>("indexing.embed_batch_size").unwrap(), 8);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut s = Settings::default();
        s.indexing.embed_batch_size = 0;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        assert_eq!(resolve_with_base(Path::new("/base"), "/abs/x"), PathBuf::from("/abs/x"));
        assert_eq!(resolve_with_base(Path::new("/base"), "rel/x"), PathBuf::from("/base/rel/x"));
    }
}
