//! Embedding generation using fastembed

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::{Config, LgrepError, Result};

/// Turns text into an L2-normalized vector of fixed length.
///
/// Implementations fail on input they cannot process instead of returning a
/// zero vector.
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Scale `vector` to unit length. A zero or non-finite norm is an error.
pub fn l2_normalize(vector: &mut [f32]) -> Result<()> {
    let norm = vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if !norm.is_finite() || norm < 1e-12 {
        return Err(LgrepError::Embedding(format!(
            "cannot normalize vector with norm {norm}"
        )));
    }
    for x in vector.iter_mut() {
        *x = (f64::from(*x) / norm) as f32;
    }
    Ok(())
}

/// Wrapper around fastembed for generating embeddings.
pub struct FastEmbedder {
    model: TextEmbedding,
    dimension: usize,
}

impl FastEmbedder {
    /// Create a new embedder with the model specified in config.
    pub fn new(config: &Config) -> Result<Self> {
        let model_type = match config.model.as_str() {
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "all-MiniLM-L12-v2" => EmbeddingModel::AllMiniLML12V2,
            "jina-embeddings-v2-base-code" => EmbeddingModel::JinaEmbeddingsV2BaseCode,
            other => {
                return Err(LgrepError::Config(format!(
                    "Unknown model: {}. Supported: bge-small-en-v1.5, bge-base-en-v1.5, all-MiniLM-L6-v2, all-MiniLM-L12-v2, jina-embeddings-v2-base-code",
                    other
                )));
            }
        };

        let model =
            TextEmbedding::try_new(InitOptions::new(model_type).with_show_download_progress(true))
                .map_err(|e| LgrepError::Embedding(e.to_string()))?;

        Ok(Self {
            model,
            dimension: config.dimension,
        })
    }
}

impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| LgrepError::Embedding("No embedding generated".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| LgrepError::Embedding(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(LgrepError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        for embedding in &mut embeddings {
            l2_normalize(embedding)?;
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_an_error() {
        let mut v = vec![0.0; 8];
        assert!(matches!(l2_normalize(&mut v), Err(LgrepError::Embedding(_))));
    }

    #[test]
    fn nan_is_an_error() {
        let mut v = vec![f32::NAN, 1.0];
        assert!(l2_normalize(&mut v).is_err());
    }

    struct Constant;

    impl Embedder for Constant {
        fn dimension(&self) -> usize {
            2
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.is_empty() {
                return Err(LgrepError::Embedding("empty input".to_string()));
            }
            Ok(vec![1.0, 0.0])
        }
    }

    #[test]
    fn default_batch_preserves_order_and_fails_whole_batch() {
        let embedder = Constant;
        assert_eq!(embedder.embed_batch(&["a", "b"]).unwrap().len(), 2);
        assert!(embedder.embed_batch(&["a", ""]).is_err());
    }
}
