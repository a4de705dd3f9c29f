use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, warn};

use skilldb_core::config::{expand_path, EmbeddingProvider, EmbeddingSettings};
use skilldb_core::traits::Embedder;
use skilldb_core::{Error, Result};

pub mod device;
pub mod hash;
pub mod pool;
pub mod tokenize;

pub use device::select_device;
pub use hash::HashEmbedder;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

pub const DEFAULT_MODEL_DIR: &str = "models/all-MiniLM-L6-v2";

/// Sentence-transformer BERT (e.g. all-MiniLM-L6-v2) with mean pooling.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    id: String,
}

impl BertEmbedder {
    /// Loads `tokenizer.json`, `config.json` and `model.safetensors` (or `pytorch_model.bin`) from `model_dir`.
    pub fn load(model_dir: &Path, max_len: usize, prefer_metal: bool) -> Result<Self> {
        let device = select_device(prefer_metal);
        info!(model_dir = %model_dir.display(), "Loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Setup(format!("Failed to load tokenizer from {}: {e}", tokenizer_path.display())))?;
        tokenizer
            .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
            .map_err(|e| Error::Setup(format!("Invalid truncation settings: {e}")))?;
        tokenizer.with_padding(None);

        let config_path = model_dir.join("config.json");
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| Error::Setup(format!("Failed to read {}: {e}", config_path.display())))?;
        let config: BertConfig =
            serde_json::from_str(&raw).map_err(|e| Error::Setup(format!("Invalid model config: {e}")))?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| v.get("hidden_size").and_then(|h| h.as_u64()))
            .ok_or_else(|| Error::Setup("model config has no hidden_size".into()))? as usize;

        let vb = load_weights(model_dir, &device)?;
        let model = BertModel::load(vb, &config).map_err(|e| Error::Setup(format!("Failed to build model: {e}")))?;

        let name = model_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "model".into());
        let id = format!("bert:{name}:d{dim}");
        info!(embedder = %id, "Embedding model loaded");
        Ok(Self { model, tokenizer, device, dim, max_len, id })
    }

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(input_ids, &token_type_ids, Some(attention_mask))?;
        Ok(hidden)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        let bytes = std::fs::read(&safetensors)
            .map_err(|e| Error::Setup(format!("Failed to read weights from {}: {e}", safetensors.display())))?;
        return VarBuilder::from_buffered_safetensors(bytes, DType::F32, device)
            .map_err(|e| Error::Setup(format!("Failed to load weights: {e}")));
    }
    let weights_path = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&weights_path)
        .map_err(|e| Error::Setup(format!("Failed to read weights from {}: {e}", weights_path.display())))?;
    let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, DType::F32, device))
}

impl Embedder for BertEmbedder {
    fn id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let hidden = self.forward(&input_ids, &attention_mask).map_err(Error::embed)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu).and_then(|t| t.to_vec2()).map_err(Error::embed)?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "Embedded batch");
        Ok(vectors)
    }
}

fn fake_embeddings_requested() -> bool {
    std::env::var("SKILLDB_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Builds the configured embedder. `SKILLDB_USE_FAKE_EMBEDDINGS=1` forces the hash embedder.
pub fn embedder_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if fake_embeddings_requested() || settings.provider == EmbeddingProvider::Hash {
        info!(dim = settings.dim, "Using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dim)));
    }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    let embedder = BertEmbedder::load(&model_dir, settings.max_len, settings.use_metal)?;
    if embedder.dim() != settings.dim {
        warn!(configured = settings.dim, model = embedder.dim(), "embedding.dim ignored; using the model's hidden size");
    }
    Ok(Arc::new(embedder))
}

/// Configured dir, then `SKILLDB_MODEL_DIR`, then `models/all-MiniLM-L6-v2` here or one level up.
pub fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = configured {
        candidates.push(expand_path(dir));
    }
    if let Ok(dir) = std::env::var("SKILLDB_MODEL_DIR") {
        candidates.push(expand_path(dir));
    }
    candidates.push(PathBuf::from(DEFAULT_MODEL_DIR));
    candidates.push(Path::new("..").join(DEFAULT_MODEL_DIR));
    first_model_dir(&candidates)
}

/// The first candidate holding a `config.json`.
pub fn first_model_dir(candidates: &[PathBuf]) -> Result<PathBuf> {
    match candidates.iter().find(|p| p.join("config.json").exists()) {
        Some(dir) => {
            debug!(model_dir = %dir.display(), "Resolved model directory");
            Ok(dir.clone())
        }
        None => Err(Error::Setup(format!(
            "Could not locate embedding model (looked in {}); set embedding.model_dir or SKILLDB_MODEL_DIR, or use embedding.provider = \"hash\"",
            candidates.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
        ))),
    }
}
