// Feature-hashing embedder.
//
// Each token (and each adjacent token pair) is hashed into one of DIM buckets
// with a sign bit, then the vector is L2-normalized. Comments that share
// vocabulary land close together in cosine space. No model files, no
// randomness: the same text always yields the same vector.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::traits::TextEmbedder;
use crate::themes::extract::tokenize;

pub const HASHING_DIM: usize = 384;

pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0_f64; self.dim];
        let tokens = tokenize(text);

        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        l2_normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f64], feature: &str, weight: f64) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_DIM)
    }
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f64]) {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > f64::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::dbscan::cosine_distance;

    #[test]
    fn test_same_text_same_vector() {
        let e = HashingEmbedder::default();
        assert_eq!(e.embed("formation très utile"), e.embed("formation très utile"));
    }

    #[test]
    fn test_vectors_are_unit_length() {
        let e = HashingEmbedder::default();
        let v = e.embed("le formateur explique bien");
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::default();
        let v = e.embed("");
        assert_eq!(v.len(), HASHING_DIM);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let e = HashingEmbedder::default();
        let a = e.embed("salle trop petite et froide");
        let b = e.embed("salle petite et froide");
        let c = e.embed("formateur excellent pédagogue");
        assert!(cosine_distance(&a, &b) < cosine_distance(&a, &c));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let e = HashingEmbedder::default();
        let texts = vec!["un".to_string(), "deux mots".to_string()];
        let out = e.embed_batch(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], e.embed("deux mots"));
    }
}
