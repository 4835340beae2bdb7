//! Text-to-vector embedding pipeline.
//!
//! [`EmbeddingProvider`] is the synchronous encoder contract; the local ONNX
//! implementation lives in [`local`]. [`EmbeddingService`] wraps a provider in
//! lazy, single-flight initialization: the model loads on first use, concurrent
//! first callers coalesce onto one load, and a failed load marks the service
//! unavailable without crashing anything — search then runs FTS-only.

pub mod local;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Inputs longer than this are truncated before encoding.
pub const MAX_INPUT_BYTES: usize = 2 * 1024;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`]
/// dimensions. All methods are synchronous — callers in async contexts should
/// use `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
///
/// Currently only `"local"` is supported (ONNX Runtime + all-MiniLM-L6-v2).
/// Returns an error if model files are not found — run `cortex model download`
/// first.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}

/// Cosine similarity clamped to `[0, 1]` for ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0) as f64
}

/// Convert an f32 embedding to little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert raw BLOB bytes back to an f32 embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
        .collect()
}

/// Lazily-initialized singleton around the provider.
pub struct EmbeddingService {
    config: EmbeddingConfig,
    cell: OnceCell<Option<Arc<dyn EmbeddingProvider>>>,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    /// Service with a pre-built provider, for tests and re-embed tooling.
    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let cell = OnceCell::new();
        cell.set(Some(provider)).ok();
        Self {
            config: EmbeddingConfig::default(),
            cell,
        }
    }

    /// Get the provider, loading the model on first call. Concurrent first
    /// callers coalesce on the `OnceCell`; a failed load is remembered as
    /// `None` and logged once.
    async fn provider(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        self.cell
            .get_or_init(|| async {
                let config = self.config.clone();
                let loaded = tokio::task::spawn_blocking(move || create_provider(&config)).await;
                match loaded {
                    Ok(Ok(provider)) => {
                        tracing::info!("embedding provider ready");
                        Some(provider)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "embedding unavailable — search degrades to FTS-only");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "embedding load task failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Whether a provider is loaded and usable right now (does not trigger a load).
    pub fn is_available(&self) -> bool {
        matches!(self.cell.get(), Some(Some(_)))
    }

    /// Embed text, truncated to [`MAX_INPUT_BYTES`]. Returns `None` when the
    /// pipeline is unavailable or encoding fails; callers degrade silently.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let provider = self.provider().await?;
        let input = truncate_input(text).to_string();
        let result =
            tokio::task::spawn_blocking(move || provider.embed(&input)).await;
        match result {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "embedding failed");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding task panicked");
                None
            }
        }
    }
}

fn truncate_input(text: &str) -> &str {
    if text.len() <= MAX_INPUT_BYTES {
        return text;
    }
    let mut end = MAX_INPUT_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
