use candle_core::{Device, Tensor};
use skilldb_core::{Error, Result};
use tokenizers::Tokenizer;

/// Encodes a batch and right-pads it to the longest member (capped at `max_len`).
///
/// Returns `(input_ids, attention_mask)`, both `[B, T]` u32.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| Error::Embed(format!("Tokenization failed: {e}")))?;
    let pad_id = tokenizer.get_padding().map_or(0, |p| p.pad_id);
    let seq_len = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(0).max(1);

    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask = Vec::with_capacity(encodings.len() * seq_len);
    for enc in &encodings {
        let n = enc.get_ids().len().min(seq_len);
        ids.extend_from_slice(&enc.get_ids()[..n]);
        mask.extend_from_slice(&enc.get_attention_mask()[..n]);
        ids.extend(std::iter::repeat(pad_id).take(seq_len - n));
        mask.extend(std::iter::repeat(0u32).take(seq_len - n));
    }
    let shape = (encodings.len(), seq_len);
    let input_ids = Tensor::from_vec(ids, shape, device).map_err(Error::embed)?;
    let attention_mask = Tensor::from_vec(mask, shape, device).map_err(Error::embed)?;
    Ok((input_ids, attention_mask))
}
