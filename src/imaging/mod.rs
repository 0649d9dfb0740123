pub mod compositor;
pub mod filters;

use crate::error::CompositionError;
use crate::models::ImageAsset;
use std::sync::Arc;

pub use compositor::{AvatarCompositor, AvatarLayout, CompositorOptions};

/// A pre-processing step applied to an image before generation.
pub trait ImageTransform: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, image: &ImageAsset) -> Result<ImageAsset, CompositionError>;
}

/// Runs `transform` off the async runtime and falls back to the untouched
/// original when it fails. A failed transform never aborts the attempt.
pub async fn prepare_with_fallback(
    transform: Arc<dyn ImageTransform>,
    image: &ImageAsset,
) -> ImageAsset {
    let input = image.clone();
    let name = transform.name().to_string();
    match tokio::task::spawn_blocking(move || transform.apply(&input)).await {
        Ok(Ok(prepared)) => {
            log::info!(
                "Prepared image with {}: {}x{} -> {}x{}",
                name,
                image.width(),
                image.height(),
                prepared.width(),
                prepared.height()
            );
            prepared
        }
        Ok(Err(e)) => {
            log::warn!("{} failed, falling back to original image: {}", name, e);
            image.clone()
        }
        Err(e) => {
            log::warn!("{} panicked, falling back to original image: {}", name, e);
            image.clone()
        }
    }
}
