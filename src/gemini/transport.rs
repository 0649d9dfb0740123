use crate::{
    config::Config,
    error::{HatError, Result},
    models::{ApiErrorBody, GenerateContentRequest, GenerateContentResponse},
};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A failed call to the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", display_transport_error(.status, .message))]
pub struct TransportError {
    /// HTTP status, when the server answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

fn display_transport_error(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("HTTP {}: {}", status, message),
        None => message.to_string(),
    }
}

#[async_trait]
pub trait GenerationTransport: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        api_key: &str,
        request: &GenerateContentRequest,
    ) -> std::result::Result<GenerateContentResponse, TransportError>;
}

pub fn endpoint_for_model(api_base: &str, model: &str) -> String {
    let model = model.trim();
    let model_path = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    };
    format!("{}/{}:generateContent", api_base.trim_end_matches('/'), model_path)
}

/// `generateContent` over HTTPS with the key in the `x-goog-api-key` header.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    api_base: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HatError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_base: config.api_base.clone(),
        })
    }
}

#[async_trait]
impl GenerationTransport for HttpTransport {
    async fn generate_content(
        &self,
        model: &str,
        api_key: &str,
        request: &GenerateContentRequest,
    ) -> std::result::Result<GenerateContentResponse, TransportError> {
        let endpoint = endpoint_for_model(&self.api_base, model);
        log::debug!("POST {}", endpoint);

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                log::error!("Gemini transport error details: {:?}", e);
                TransportError::new(e.status().map(|s| s.as_u16()), e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            log::error!("Gemini service error {}: {}", status.as_u16(), message);
            return Err(TransportError::new(Some(status.as_u16()), message));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| TransportError::new(None, format!("invalid response body: {}", e)))
    }
}

/// Pulls `error.message` out of a Google API error body.
pub fn api_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error.message)
        .filter(|message| !message.is_empty())
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(500).collect())
        })
}
