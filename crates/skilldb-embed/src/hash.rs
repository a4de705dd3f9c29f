use std::hash::Hasher;

use skilldb_core::traits::Embedder;
use skilldb_core::Result;
use twox_hash::XxHash64;

/// Feature-hashing bag of words.
///
/// Lowercased alphanumeric tokens are hashed into `dim` buckets with a
/// non-negative weight each, then the vector is L2-normalised. Needs no model
/// files, so tests and offline runs use it; texts sharing words score higher.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("hash:d{dim}") }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
        // Punctuation-only input still needs a non-zero vector for cosine distance.
        if tokens.is_empty() {
            tokens.push(lowered.trim());
        }
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let weight = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += 0.5 + 0.5 * weight;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str { &self.id }

    fn dim(&self) -> usize { self.dim }

    fn max_len(&self) -> usize { usize::MAX }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

    #[test]
    fn shared_words_score_higher() {
        let e = HashEmbedder::new(384);
        let q = e.embed("authentication flow").unwrap();
        let near = e.embed("Handles authentication for the login flow").unwrap();
        let far = e.embed("gardening tools and seasonal planting").unwrap();
        assert!(cosine(&q, &near) > cosine(&q, &far));
    }

    #[test]
    fn case_and_punctuation_are_ignored() {
        let e = HashEmbedder::new(64);
        assert_eq!(e.embed("Hello, World!").unwrap(), e.embed("hello world").unwrap());
    }

    #[test]
    fn punctuation_only_text_is_not_the_zero_vector() {
        let e = HashEmbedder::new(32);
        let v = e.embed("?!").unwrap();
        assert!(v.iter().any(|x| *x > 0.0));
    }
}
