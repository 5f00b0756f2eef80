//! Embedding provider: an opaque `embed(text) -> vector` capability,
//! configured via `providers.embedding.kind` ("none" or "local").
//!
//! The teacher's `semantic.rs` wires up an embedding backend behind a
//! trait boundary; this keeps that shape but narrows the surface to the
//! single method the store engine actually needs, and backs the "local"
//! kind with `fastembed` (the backend its own Cargo.toml already declared,
//! fixing a drift where the implementation had reached for `candle`
//! instead).

use roux_core::error::RouxError;

pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RouxError>;
    fn model_id(&self) -> &str;
}

/// No embedding capability configured. `resolve_nodes` with `strategy:
/// semantic` and the backfill pass both degrade gracefully against this:
/// the former returns null matches, the latter logs and skips.
pub struct NoneProvider;

impl EmbeddingProvider for NoneProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, RouxError> {
        Err(RouxError::provider_error("no embedding provider configured"))
    }

    fn model_id(&self) -> &str {
        "none"
    }
}

#[cfg(feature = "semantic")]
pub struct LocalProvider {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    model_id: String,
}

#[cfg(feature = "semantic")]
impl LocalProvider {
    pub fn new(model_name: Option<&str>) -> Result<Self, RouxError> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let embedding_model = match model_name {
            Some("bge-small-en-v1.5") | None => EmbeddingModel::BGESmallENV15,
            Some(other) => {
                return Err(RouxError::invalid_input(format!("unknown local embedding model: {other}")))
            }
        };
        let model_id = model_name.unwrap_or("bge-small-en-v1.5").to_string();

        let model = TextEmbedding::try_new(InitOptions::new(embedding_model))
            .map_err(|e| RouxError::provider_error(format!("failed to initialise embedding model: {e}")))?;

        Ok(Self { model: std::sync::Mutex::new(model), model_id })
    }
}

#[cfg(feature = "semantic")]
impl EmbeddingProvider for LocalProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RouxError> {
        let mut model = self.model.lock().map_err(|_| RouxError::internal("embedding model mutex poisoned"))?;
        let mut vectors = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| RouxError::provider_error(format!("embedding failed: {e}")))?;
        vectors.pop().ok_or_else(|| RouxError::internal("embedding backend returned no vector"))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Build the configured provider. `kind` outside the recognised set fails
/// with `InvalidInput` rather than silently falling back to `none`.
pub fn build_provider(kind: &str, model: Option<&str>) -> Result<Box<dyn EmbeddingProvider>, RouxError> {
    match kind {
        "none" => Ok(Box::new(NoneProvider)),
        #[cfg(feature = "semantic")]
        "local" => Ok(Box::new(LocalProvider::new(model)?)),
        #[cfg(not(feature = "semantic"))]
        "local" => Err(RouxError::provider_error("local embedding provider requires the 'semantic' feature")),
        other => Err(RouxError::invalid_input(format!("unknown embedding provider kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_provider_errors_on_embed() {
        let provider = NoneProvider;
        assert!(provider.embed("text").is_err());
        assert_eq!(provider.model_id(), "none");
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(build_provider("bogus", None).is_err());
    }

    #[test]
    fn none_kind_builds() {
        let provider = build_provider("none", None).unwrap();
        assert_eq!(provider.model_id(), "none");
    }
}
