use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Client for the OpenAI-compatible embedding endpoint this consumer
/// instance is pinned to. One provider per process; concurrency limits are
/// applied by the caller.
pub struct EmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
}

impl EmbeddingProvider {
    pub fn from_config(config: &AppConfig) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.embedding_api_key)
                .with_api_base(&config.embedding_base_url),
        );

        Self {
            client,
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimensions
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generates an embedding vector for the given input text.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions as u32)
            .input([input])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding: Vec<f32> = response
            .data
            .first()
            .ok_or_else(|| AppError::Processing("No embedding data received".into()))?
            .embedding
            .clone();

        debug!(
            model = %self.model,
            dimensions = embedding.len(),
            "embedding generated"
        );

        Ok(embedding)
    }

    /// Probes the live model for its actual output dimension. Called once at
    /// startup; a mismatch with the configured dimension is fatal.
    pub async fn probe_dimension(&self) -> Result<usize, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(["dimension probe"])
            .build()?;

        let response = self.client.embeddings().create(request).await?;
        let probed = response
            .data
            .first()
            .ok_or_else(|| AppError::Processing("No embedding data received".into()))?
            .embedding
            .len();

        if probed != self.dimensions {
            return Err(AppError::DataIntegrity(format!(
                "embedding model {} produces {probed} dimensions, configured {}",
                self.model, self.dimensions
            )));
        }

        Ok(probed)
    }
}
