use thiserror::Error;

/// Why the avatar compositor could not produce a padded image.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("cannot create a {size}x{size} drawing surface")]
    Surface { size: u64 },
    #[error("failed to encode composed image: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum HatError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("No API key configured. Run `hatgen key set <KEY>` or export API_KEY")]
    MissingCredential,
    #[error("Composition error: {0}")]
    Composition(#[from] CompositionError),
    #[error("API key is invalid or expired, check your configuration: {0}")]
    InvalidCredential(String),
    #[error("The model returned no image data, please try again")]
    NoImageReturned,
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat tag over [`HatError`] used by the session and the CLI to pick guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    MissingCredential,
    Composition,
    InvalidCredential,
    NoImageReturned,
    GenerationFailed,
    Config,
    Io,
}

impl HatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HatError::Validation(_) => ErrorKind::Validation,
            HatError::MissingCredential => ErrorKind::MissingCredential,
            HatError::Composition(_) => ErrorKind::Composition,
            HatError::InvalidCredential(_) => ErrorKind::InvalidCredential,
            HatError::NoImageReturned => ErrorKind::NoImageReturned,
            HatError::GenerationFailed(_) => ErrorKind::GenerationFailed,
            HatError::Config(_) => ErrorKind::Config,
            HatError::Io(_) => ErrorKind::Io,
        }
    }

    /// Failures the user can reasonably retry without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HatError::NoImageReturned | HatError::GenerationFailed(_)
        )
    }

    /// Failures that point at credential setup rather than a transient fault.
    pub fn needs_configuration(&self) -> bool {
        matches!(
            self,
            HatError::MissingCredential | HatError::InvalidCredential(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_and_configuration_guidance_are_disjoint() {
        let errors = vec![
            HatError::Validation("too big".into()),
            HatError::MissingCredential,
            HatError::InvalidCredential("403".into()),
            HatError::NoImageReturned,
            HatError::GenerationFailed("boom".into()),
        ];
        for err in &errors {
            assert!(!(err.is_retryable() && err.needs_configuration()));
        }
        assert!(HatError::NoImageReturned.is_retryable());
        assert!(HatError::MissingCredential.needs_configuration());
        assert!(!HatError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn composition_error_converts() {
        let err: HatError = CompositionError::Surface { size: 20000 }.into();
        assert_eq!(err.kind(), ErrorKind::Composition);
        assert!(err.to_string().contains("20000x20000"));
    }
}
