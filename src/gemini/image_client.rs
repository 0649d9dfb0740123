use super::transport::{GenerationTransport, TransportError};
use crate::{
    config::Config,
    credentials::mask_key,
    error::{HatError, Result},
    models::{
        Content, GenerateContentRequest, GenerateContentResponse, GenerationRequest,
        GenerationResult, ImageAsset, Part,
    },
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;

#[derive(Clone)]
pub struct ImageClient {
    transport: Arc<dyn GenerationTransport>,
    model: String,
}

impl ImageClient {
    pub fn new(transport: Arc<dyn GenerationTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = super::transport::HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config.model.clone()))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Asks the model to put the hat on. An empty key fails before any network call.
    pub async fn generate(&self, image: &ImageAsset, api_key: &str) -> Result<GenerationResult> {
        let request = GenerationRequest::new(image.clone(), api_key.trim())?;
        let body = build_request_body(&request);

        log::info!(
            "Generating with model {} ({} {}x{}, key {})",
            self.model,
            image.mime_type(),
            image.width(),
            image.height(),
            mask_key(request.api_key())
        );

        let response = self
            .transport
            .generate_content(&self.model, request.api_key(), &body)
            .await
            .map_err(classify_transport_error)?;

        extract_image(&response)
    }
}

/// Inline image first, instruction second.
pub fn build_request_body(request: &GenerationRequest) -> GenerateContentRequest {
    let image = request.image();
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![
                Part::inline(image.mime_type(), image.to_base64()),
                Part::text(request.instruction()),
            ],
        }],
    }
}

/// First inline image in the first candidate, in part order.
pub fn extract_image(response: &GenerateContentResponse) -> Result<GenerationResult> {
    let inline = response
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .and_then(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.inline_data.as_ref())
                .find(|inline| !inline.data.is_empty())
        })
        .ok_or(HatError::NoImageReturned)?;

    let bytes = BASE64
        .decode(inline.data.trim().as_bytes())
        .map_err(|e| HatError::GenerationFailed(format!("image payload is not valid base64: {}", e)))?;
    log::info!(
        "Model returned {} bytes of {}",
        bytes.len(),
        if inline.mime_type.is_empty() { "image data" } else { inline.mime_type.as_str() }
    );
    Ok(GenerationResult::new(bytes))
}

/// 400/401/403, or any message about the API key, means the credential is at fault.
pub fn classify_transport_error(err: TransportError) -> HatError {
    let message_lower = err.message.to_ascii_lowercase();
    let credential_status = matches!(err.status, Some(400) | Some(401) | Some(403));
    let mentions_key = message_lower.contains("api key") || message_lower.contains("api_key");

    if credential_status || mentions_key {
        HatError::InvalidCredential(err.to_string())
    } else if err.message.is_empty() {
        HatError::GenerationFailed("error while generating the image".into())
    } else {
        HatError::GenerationFailed(err.to_string())
    }
}
