//! Orchestration of a single avatar: pick an image, generate, retry, reset.
//!
//! [`AppState`] is a pure state machine driven by [`Event`]s. [`Session`]
//! wires it to the credential resolver, the compositor and the image client
//! and runs one attempt at a time.

use crate::{
    config::Config,
    credentials::{CredentialResolver, CredentialStore, FileCredentialStore},
    error::{HatError, Result},
    gemini::ImageClient,
    imaging::{prepare_with_fallback, AvatarCompositor, ImageTransform},
    logger,
    models::{GenerationResult, ImageAsset},
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub enum Status {
    Idle,
    Processing,
    Success(GenerationResult),
    Error(HatError),
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Processing => "processing",
            Status::Success(_) => "success",
            Status::Error(_) => "error",
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Status::Processing)
    }
}

#[derive(Debug)]
pub enum Event {
    ImageSelected(ImageAsset),
    SetOptimize(bool),
    /// Start an attempt; also used to retry after success or failure.
    Generate,
    /// The attempt was refused before it started, e.g. no credential.
    Rejected(HatError),
    Completed(Result<GenerationResult>),
    Reset,
}

#[derive(Debug)]
pub struct AppState {
    status: Status,
    image: Option<ImageAsset>,
    optimize_for_avatar: bool,
}

impl AppState {
    pub fn new(optimize_for_avatar: bool) -> Self {
        Self {
            status: Status::Idle,
            image: None,
            optimize_for_avatar,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn image(&self) -> Option<&ImageAsset> {
        self.image.as_ref()
    }

    pub fn optimize_for_avatar(&self) -> bool {
        self.optimize_for_avatar
    }

    /// Applies `event`. Returns true when it started a new attempt.
    ///
    /// While processing, only `Completed` is accepted; everything else is
    /// dropped so a second attempt can never overlap the first.
    pub fn dispatch(&mut self, event: Event) -> bool {
        if self.status.is_processing() {
            return match event {
                Event::Completed(outcome) => {
                    self.status = match outcome {
                        Ok(result) => Status::Success(result),
                        Err(err) => Status::Error(err),
                    };
                    false
                }
                other => {
                    log::debug!("Ignoring {:?} while processing", event_name(&other));
                    false
                }
            };
        }

        match event {
            Event::ImageSelected(image) => {
                self.image = Some(image);
                self.status = Status::Idle;
                false
            }
            Event::SetOptimize(enabled) => {
                self.optimize_for_avatar = enabled;
                false
            }
            Event::Generate => {
                if self.image.is_none() {
                    log::debug!("Ignoring generate without an image");
                    return false;
                }
                self.status = Status::Processing;
                true
            }
            Event::Rejected(err) => {
                self.status = Status::Error(err);
                false
            }
            Event::Completed(_) => {
                log::debug!("Ignoring completion outside of an attempt");
                false
            }
            Event::Reset => {
                self.image = None;
                self.status = Status::Idle;
                false
            }
        }
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::ImageSelected(_) => "ImageSelected",
        Event::SetOptimize(_) => "SetOptimize",
        Event::Generate => "Generate",
        Event::Rejected(_) => "Rejected",
        Event::Completed(_) => "Completed",
        Event::Reset => "Reset",
    }
}

pub struct Session {
    state: AppState,
    resolver: CredentialResolver,
    store: Arc<dyn CredentialStore>,
    client: ImageClient,
    transform: Arc<dyn ImageTransform>,
}

impl Session {
    pub fn new(config: &Config, client: ImageClient, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            state: AppState::new(config.optimize_for_avatar),
            resolver: CredentialResolver::new(config.credential_sources.clone()),
            store,
            client,
            transform: Arc::new(AvatarCompositor::default()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = ImageClient::from_config(config)?;
        let store = Arc::new(FileCredentialStore::new(&config.credential_file));
        Ok(Self::new(config, client, store))
    }

    pub fn with_transform(mut self, transform: Arc<dyn ImageTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn status(&self) -> &Status {
        self.state.status()
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        match self.state.status() {
            Status::Success(result) => Some(result),
            _ => None,
        }
    }

    pub fn select_image(&mut self, image: ImageAsset) {
        self.state.dispatch(Event::ImageSelected(image));
    }

    pub fn set_optimize(&mut self, enabled: bool) {
        self.state.dispatch(Event::SetOptimize(enabled));
    }

    pub fn reset(&mut self) {
        self.state.dispatch(Event::Reset);
    }

    /// Persists `key` as the stored credential; an empty key removes it.
    pub fn set_api_key(&self, key: &str) -> Result<()> {
        self.store.save(key)
    }

    /// Runs one attempt and returns the resulting status. Calling it again
    /// after success or failure is a retry.
    ///
    /// `explicit_key` takes priority over the stored credential, which takes
    /// priority over the environment.
    pub async fn generate(&mut self, explicit_key: Option<&str>) -> &Status {
        let Some(image) = self.state.image().cloned() else {
            log::warn!("No image selected");
            return self.state.status();
        };
        if self.state.status().is_processing() {
            return self.state.status();
        }

        let key = self.resolve_key(explicit_key);
        if key.is_empty() {
            self.state.dispatch(Event::Rejected(HatError::MissingCredential));
            return self.state.status();
        }

        if !self.state.dispatch(Event::Generate) {
            return self.state.status();
        }

        let attempt = Uuid::new_v4();
        let _timer = logger::timer(&format!("attempt {}", attempt));

        let to_send = if self.state.optimize_for_avatar() {
            prepare_with_fallback(self.transform.clone(), &image).await
        } else {
            image
        };

        let outcome = self.client.generate(&to_send, &key).await;
        match &outcome {
            Ok(result) => log::info!(
                "✅ Attempt {} succeeded ({} bytes)",
                attempt,
                result.image_bytes.len()
            ),
            Err(e) => log::error!("Attempt {} failed: {}", attempt, e),
        }

        self.state.dispatch(Event::Completed(outcome));
        self.state.status()
    }

    /// Consumes the session, yielding the outcome of the last attempt.
    pub fn into_result(self) -> Result<GenerationResult> {
        match self.state.status {
            Status::Success(result) => Ok(result),
            Status::Error(err) => Err(err),
            Status::Idle | Status::Processing => Err(HatError::Validation(
                "no generation attempt has completed".into(),
            )),
        }
    }

    fn resolve_key(&self, explicit_key: Option<&str>) -> String {
        let preferred = match explicit_key.map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => match self.store.load() {
                Ok(stored) => stored.unwrap_or_default(),
                Err(e) => {
                    log::warn!("Ignoring unreadable credential store: {}", e);
                    String::new()
                }
            },
        };
        self.resolver.resolve(&preferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::error::CompositionError;
    use crate::gemini::{GenerationTransport, TransportError};
    use crate::models::{GenerateContentRequest, GenerateContentResponse};
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    type Reply = std::result::Result<serde_json::Value, TransportError>;

    #[derive(Default)]
    struct QueuedTransport {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl QueuedTransport {
        fn with(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn sent_image(&self, index: usize) -> (String, RgbaImage) {
            let requests = self.requests.lock().unwrap();
            let (key, body) = &requests[index];
            let data = body["contents"][0]["parts"][0]["inlineData"]["data"]
                .as_str()
                .unwrap();
            let bytes = BASE64.decode(data).unwrap();
            (key.clone(), image::load_from_memory(&bytes).unwrap().to_rgba8())
        }
    }

    #[async_trait]
    impl GenerationTransport for QueuedTransport {
        async fn generate_content(
            &self,
            _model: &str,
            api_key: &str,
            request: &GenerateContentRequest,
        ) -> std::result::Result<GenerateContentResponse, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((api_key.to_string(), serde_json::to_value(request).unwrap()));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new(None, "no scripted reply")));
            reply.map(|value| serde_json::from_value(value).unwrap())
        }
    }

    struct BrokenDecoder;

    impl ImageTransform for BrokenDecoder {
        fn name(&self) -> &str {
            "broken-decoder"
        }

        fn apply(&self, _image: &ImageAsset) -> std::result::Result<ImageAsset, CompositionError> {
            Err(CompositionError::Decode("simulated".into()))
        }
    }

    fn image_reply(bytes: &[u8]) -> Reply {
        Ok(json!({
            "candidates": [{"content": {"parts": [
                {"text": "Here is your hat"},
                {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(bytes)}}
            ]}}]
        }))
    }

    fn png(width: u32, height: u32) -> ImageAsset {
        let img = RgbaImage::from_pixel(width, height, Rgba([180, 40, 40, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        ImageAsset::decode(buf, None).unwrap()
    }

    fn session(transport: Arc<QueuedTransport>, stored: Option<&str>) -> Session {
        let config = Config::default().with_credential_sources(["HATGEN_TEST_UNSET_KEY_SOURCE"]);
        let client = ImageClient::new(transport, config.model.clone());
        Session::new(&config, client, Arc::new(MemoryCredentialStore::new(stored)))
    }

    #[test]
    fn generate_needs_an_image() {
        let mut state = AppState::new(true);
        assert!(!state.dispatch(Event::Generate));
        assert!(matches!(state.status(), Status::Idle));

        state.dispatch(Event::ImageSelected(png(4, 4)));
        assert!(state.dispatch(Event::Generate));
        assert!(state.status().is_processing());
    }

    #[test]
    fn processing_ignores_everything_but_completion() {
        let mut state = AppState::new(true);
        state.dispatch(Event::ImageSelected(png(4, 4)));
        state.dispatch(Event::Generate);

        assert!(!state.dispatch(Event::Generate));
        state.dispatch(Event::Reset);
        state.dispatch(Event::ImageSelected(png(8, 8)));
        state.dispatch(Event::SetOptimize(false));
        assert!(state.status().is_processing());
        assert_eq!(state.image().unwrap().width(), 4);
        assert!(state.optimize_for_avatar());

        state.dispatch(Event::Completed(Err(HatError::NoImageReturned)));
        assert!(matches!(
            state.status(),
            Status::Error(HatError::NoImageReturned)
        ));
    }

    #[test]
    fn success_and_error_can_retry_or_reset() {
        let mut state = AppState::new(false);
        state.dispatch(Event::ImageSelected(png(4, 4)));
        state.dispatch(Event::Generate);
        state.dispatch(Event::Completed(Ok(GenerationResult::new(vec![1]))));
        assert_eq!(state.status().name(), "success");

        assert!(state.dispatch(Event::Generate));
        state.dispatch(Event::Completed(Err(HatError::GenerationFailed("x".into()))));
        assert_eq!(state.status().name(), "error");

        state.dispatch(Event::Reset);
        assert!(matches!(state.status(), Status::Idle));
        assert!(state.image().is_none());
    }

    #[test]
    fn completion_outside_an_attempt_is_ignored() {
        let mut state = AppState::new(true);
        state.dispatch(Event::Completed(Ok(GenerationResult::new(vec![1]))));
        assert!(matches!(state.status(), Status::Idle));
    }

    #[test]
    fn selecting_a_new_image_clears_the_previous_outcome() {
        let mut state = AppState::new(true);
        state.dispatch(Event::ImageSelected(png(4, 4)));
        state.dispatch(Event::Rejected(HatError::MissingCredential));
        assert_eq!(state.status().name(), "error");

        state.dispatch(Event::ImageSelected(png(6, 6)));
        assert!(matches!(state.status(), Status::Idle));
        assert_eq!(state.image().unwrap().width(), 6);
    }

    #[tokio::test]
    async fn missing_credential_never_calls_the_model() {
        let transport = QueuedTransport::with(vec![]);
        let mut session = session(transport.clone(), None);
        session.select_image(png(10, 10));

        let status = session.generate(None).await;
        assert!(matches!(status, Status::Error(HatError::MissingCredential)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn stored_key_and_padding_are_used() {
        let transport = QueuedTransport::with(vec![image_reply(b"hat")]);
        let mut session = session(transport.clone(), Some("stored-key"));
        session.select_image(png(25, 10));

        let status = session.generate(None).await;
        assert!(matches!(status, Status::Success(_)));
        assert_eq!(session.result().unwrap().image_bytes, b"hat".to_vec());

        let (key, sent) = transport.sent_image(0);
        assert_eq!(key, "stored-key");
        assert_eq!(sent.dimensions(), (40, 40));
    }

    #[tokio::test]
    async fn explicit_key_beats_stored_key() {
        let transport = QueuedTransport::with(vec![image_reply(b"hat")]);
        let mut session = session(transport.clone(), Some("stored-key"));
        session.select_image(png(5, 5));

        session.generate(Some("  typed-key ")).await;
        assert_eq!(transport.sent_image(0).0, "typed-key");
    }

    #[tokio::test]
    async fn optimization_off_sends_the_original() {
        let transport = QueuedTransport::with(vec![image_reply(b"hat")]);
        let mut session = session(transport.clone(), Some("k"));
        session.set_optimize(false);
        session.select_image(png(25, 10));

        session.generate(None).await;
        assert_eq!(transport.sent_image(0).1.dimensions(), (25, 10));
    }

    #[tokio::test]
    async fn composition_failure_still_generates_from_the_original() {
        let transport = QueuedTransport::with(vec![image_reply(b"hat")]);
        let mut session =
            session(transport.clone(), Some("k")).with_transform(Arc::new(BrokenDecoder));
        session.select_image(png(500, 500));

        let status = session.generate(None).await;
        assert!(matches!(status, Status::Success(_)));
        assert_eq!(transport.sent_image(0).1.dimensions(), (500, 500));
    }

    #[tokio::test]
    async fn manual_retry_after_failure() {
        let transport = QueuedTransport::with(vec![
            Ok(json!({"candidates": []})),
            image_reply(b"second time lucky"),
        ]);
        let mut session = session(transport.clone(), Some("k"));
        session.select_image(png(8, 8));

        let status = session.generate(None).await;
        assert!(matches!(status, Status::Error(HatError::NoImageReturned)));

        let status = session.generate(None).await;
        assert!(matches!(status, Status::Success(_)));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn invalid_key_is_reported_distinctly() {
        let transport = QueuedTransport::with(vec![Err(TransportError::new(
            Some(400),
            "API key not valid. Please pass a valid API key.",
        ))]);
        let mut session = session(transport, Some("bad"));
        session.select_image(png(8, 8));

        match session.generate(None).await {
            Status::Error(err) => {
                assert!(matches!(err, HatError::InvalidCredential(_)));
                assert!(!err.is_retryable());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn into_result_saves_a_named_png() {
        let transport = QueuedTransport::with(vec![image_reply(b"png-bytes")]);
        let mut session = session(transport, Some("k"));
        session.select_image(png(8, 8));
        session.generate(None).await;

        let dir = tempfile::tempdir().unwrap();
        let path = session.into_result().unwrap().save_to_dir(dir.path()).await.unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("santa-hat-avatar-") && name.ends_with(".png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes".to_vec());
    }

    #[test]
    fn into_result_without_an_attempt_is_an_error() {
        let session = session(QueuedTransport::with(vec![]), Some("k"));
        assert!(matches!(session.into_result(), Err(HatError::Validation(_))));
    }

    #[tokio::test]
    async fn set_api_key_persists_through_the_store() {
        let transport = QueuedTransport::with(vec![image_reply(b"hat")]);
        let mut session = session(transport.clone(), None);
        session.set_api_key("fresh").unwrap();
        session.select_image(png(8, 8));

        session.generate(None).await;
        assert_eq!(transport.sent_image(0).0, "fresh");
    }
}
