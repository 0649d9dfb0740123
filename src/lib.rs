pub mod config;
pub mod credentials;
pub mod error;
pub mod gemini;
pub mod imaging;
pub mod logger;
pub mod models;
pub mod session;

pub use config::Config;
pub use credentials::{
    CredentialResolver, CredentialStore, FileCredentialStore, KeySource, MemoryCredentialStore,
};
pub use error::{CompositionError, ErrorKind, HatError, Result};
pub use gemini::{GenerationTransport, HttpTransport, ImageClient};
pub use imaging::{prepare_with_fallback, AvatarCompositor, CompositorOptions, ImageTransform};
pub use models::*;
pub use session::{AppState, Event, Session, Status};
