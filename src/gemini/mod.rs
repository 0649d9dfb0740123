pub mod image_client;
pub mod transport;

pub use image_client::ImageClient;
pub use transport::{GenerationTransport, HttpTransport, TransportError};
