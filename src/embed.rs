//! Embedding engines.
//!
//! The core treats embedding as an opaque, deterministic `text -> vector`
//! function and depends only on its dimension, bulk calls, and stability for
//! identical input. The default engine is fastembed's local model (feature
//! `semantic`); without it a hashed bag-of-tokens projection keeps every
//! retrieval path functional and fully deterministic.

use crate::error::{QuarryError, Result};
use std::sync::Arc;

/// Opaque embedding function.
pub trait EmbeddingEngine: Send + Sync {
    /// Fixed output dimension for the life of the index.
    fn dim(&self) -> usize;

    /// Bulk-embed document texts. Output order matches input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one query string.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&query.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| QuarryError::Embedding("engine returned no vector".into()))
    }
}

/// Deterministic hashed bag-of-tokens projection, L2-normalised.
///
/// Not a semantic model: it makes embedding-dependent paths testable and
/// keeps the engine usable when the `semantic` feature is off.
pub struct HashedEmbedder {
    dim: usize,
}

impl HashedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbeddingEngine for HashedEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.project(t)).collect())
    }
}

impl HashedEmbedder {
    fn project(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in crate::bm25::tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let bucket = u64::from_le_bytes(word) as usize % self.dim;
            // Second hash bit decides sign, spreading collisions.
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

/// Local embedding model backed by fastembed.
#[cfg(feature = "semantic")]
pub struct FastembedEngine {
    model: Arc<fastembed::TextEmbedding>,
    dim: usize,
}

#[cfg(feature = "semantic")]
impl FastembedEngine {
    pub fn new(model_name: &str) -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let (model_id, dim) = match model_name {
            "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            other => {
                tracing::warn!(model = other, "unknown embedding model, using all-minilm-l6-v2");
                (EmbeddingModel::AllMiniLML6V2, 384)
            }
        };

        let model = TextEmbedding::try_new(
            InitOptions::new(model_id).with_show_download_progress(false),
        )
        .map_err(|e| QuarryError::Embedding(format!("model init failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
            dim,
        })
    }
}

#[cfg(feature = "semantic")]
impl EmbeddingEngine for FastembedEngine {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| QuarryError::Embedding(e.to_string()))
    }
}

/// The engine used when none is injected: fastembed when the `semantic`
/// feature is on, the hashed projection otherwise.
pub fn default_engine(config: &crate::config::Config) -> Result<Arc<dyn EmbeddingEngine>> {
    #[cfg(feature = "semantic")]
    {
        Ok(Arc::new(FastembedEngine::new(&config.embedding_model)?))
    }
    #[cfg(not(feature = "semantic"))]
    {
        Ok(Arc::new(HashedEmbedder::new(config.embedding_dimensions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_embedder_is_deterministic() {
        let engine = HashedEmbedder::new(64);
        let a = engine.embed_query("retry policy with backoff").unwrap();
        let b = engine.embed_query("retry policy with backoff").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hashed_embedder_is_normalised() {
        let engine = HashedEmbedder::new(64);
        let v = engine.embed_query("some tokens to embed").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_texts_are_closer_than_unrelated() {
        let engine = HashedEmbedder::new(256);
        let a = engine.embed_query("parse configuration file toml").unwrap();
        let b = engine.embed_query("parse configuration toml").unwrap();
        let c = engine.embed_query("websocket frame decoder").unwrap();

        let dot = |x: &[f32], y: &[f32]| -> f32 {
            x.iter().zip(y).map(|(a, b)| a * b).sum()
        };
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn bulk_embed_preserves_order() {
        let engine = HashedEmbedder::new(32);
        let texts = vec!["first text".to_string(), "second text".to_string()];
        let vectors = engine.embed(&texts).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], engine.embed_query("first text").unwrap());
        assert_eq!(vectors[1], engine.embed_query("second text").unwrap());
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let engine = HashedEmbedder::new(16);
        let v = engine.embed_query("").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
