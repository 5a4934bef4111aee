use std::time::Duration;

use common::{
    error::AppError,
    events::enrichment::{EnrichmentRequestEvent, EnrichmentResult},
    utils::config::AppConfig,
};
use tracing::{debug, instrument};

/// Typed client for the intelligence service. The service owns the entity
/// extractors, quality scorers, and pattern libraries; this side only sees
/// the request/result contract.
#[derive(Clone)]
pub struct IntelligenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl IntelligenceClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeouts.http_connect_secs))
            .timeout(Duration::from_secs(config.timeouts.http_request_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.intelligence_service_url.trim_end_matches('/').to_string(),
        })
    }

    /// Requests enrichment for one document. 5xx and transport failures are
    /// retriable; a 4xx means the request itself is bad and retrying cannot
    /// help.
    #[instrument(skip_all, fields(document_id = %request.document_id))]
    pub async fn generate(
        &self,
        request: &EnrichmentRequestEvent,
    ) -> Result<EnrichmentResult, AppError> {
        let url = format!("{}/intelligence/generate", self.base_url);
        let response = self.http.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let result: EnrichmentResult = response.json().await?;
        debug!(
            entities = result.entities.len(),
            concepts = result.concepts.len(),
            quality = result.quality_score,
            "intelligence result received"
        );
        Ok(result)
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::Upstream {
                status: status.as_u16(),
                message: "intelligence health check failed".into(),
            })
        }
    }
}
