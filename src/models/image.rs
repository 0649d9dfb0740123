use crate::error::{HatError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{ImageFormat, ImageReader};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest accepted upload: 10 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Generated images are always reported as PNG.
pub const RESULT_MIME: &str = "image/png";

/// Edit instruction sent alongside the image. Reproduced verbatim for the upstream model.
pub const HAT_INSTRUCTION: &str = "Edit this image to put a red festive Christmas Santa Claus hat on the person's head. The tail of the hat must drape down to the right side (viewer's right). Ensure the entire hat is visible and not cut off by the top or side edges of the image. The hat should fit naturally, matching lighting and shadows. Keep the person's face clearly visible and unchanged.";

/// A decoded, immutable image. Cloning shares the underlying bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAsset {
    bytes: Arc<[u8]>,
    mime_type: String,
    width: u32,
    height: u32,
}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl ImageAsset {
    pub(crate) fn new(
        bytes: impl Into<Arc<[u8]>>,
        mime_type: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            width,
            height,
        }
    }

    /// Decodes the image header from `bytes`.
    ///
    /// The mime type is sniffed from the content first; `mime_hint` is only
    /// used when sniffing fails. Only the header is read here, so a truncated
    /// body is still accepted and surfaces later as a composition failure.
    pub fn decode(bytes: Vec<u8>, mime_hint: Option<&str>) -> Result<Self> {
        let sniffed = image::guess_format(&bytes)
            .ok()
            .map(|format| format.to_mime_type().to_string());
        let mime_type = sniffed
            .or_else(|| mime_hint.map(|m| m.trim().to_ascii_lowercase()))
            .unwrap_or_default();
        validate_upload(&mime_type, bytes.len() as u64)?;

        let (width, height) = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| HatError::Validation(format!("unreadable image: {}", e)))?
            .into_dimensions()
            .map_err(|e| HatError::Validation(format!("unsupported image: {}", e)))?;
        if width == 0 || height == 0 {
            return Err(HatError::Validation("image has no pixels".into()));
        }

        Ok(Self::new(bytes, mime_type, width, height))
    }

    /// Reads and decodes an image file, rejecting oversized files before reading them.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() > MAX_UPLOAD_BYTES {
            return Err(HatError::Validation(format!(
                "image must not exceed 10 MB ({} bytes given)",
                metadata.len()
            )));
        }
        let bytes = tokio::fs::read(path).await?;
        let hint = ImageFormat::from_path(path)
            .ok()
            .map(|format| format.to_mime_type());
        let asset = Self::decode(bytes, hint)?;
        log::debug!(
            "Loaded {} ({}, {}x{}, {} bytes)",
            path.display(),
            asset.mime_type,
            asset.width,
            asset.height,
            asset.bytes.len()
        );
        Ok(asset)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

/// Rejects non-image mime types and files over [`MAX_UPLOAD_BYTES`].
pub fn validate_upload(mime_type: &str, size: u64) -> Result<()> {
    if !mime_type.starts_with("image/") {
        return Err(HatError::Validation(
            "please provide an image file (JPG, PNG, WEBP)".into(),
        ));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(HatError::Validation(format!(
            "image must not exceed 10 MB ({} bytes given)",
            size
        )));
    }
    Ok(())
}

/// One generation attempt. Only constructible with a non-empty key.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    image: ImageAsset,
    api_key: String,
}

impl GenerationRequest {
    pub fn new(image: ImageAsset, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(HatError::MissingCredential);
        }
        Ok(Self { image, api_key })
    }

    pub fn image(&self) -> &ImageAsset {
        &self.image
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn instruction(&self) -> &'static str {
        HAT_INSTRUCTION
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub image_bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl GenerationResult {
    pub fn new(image_bytes: Vec<u8>) -> Self {
        Self {
            image_bytes,
            mime_type: RESULT_MIME,
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.image_bytes))
    }

    /// `santa-hat-avatar-<unix-ms>.png`
    pub fn file_name(timestamp_ms: i64) -> String {
        format!("santa-hat-avatar-{}.png", timestamp_ms)
    }

    pub async fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(Self::file_name(chrono::Utc::now().timestamp_millis()));
        tokio::fs::write(&path, &self.image_bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decode_sniffs_mime_and_dimensions() {
        let asset = ImageAsset::decode(png_bytes(12, 7), Some("image/jpeg")).unwrap();
        assert_eq!(asset.mime_type(), "image/png");
        assert_eq!((asset.width(), asset.height()), (12, 7));
    }

    #[test]
    fn decode_rejects_non_images() {
        let err = ImageAsset::decode(b"hello world".to_vec(), Some("text/plain")).unwrap_err();
        assert!(matches!(err, HatError::Validation(_)));

        let err = ImageAsset::decode(b"hello world".to_vec(), None).unwrap_err();
        assert!(matches!(err, HatError::Validation(_)));
    }

    #[test]
    fn upload_limits() {
        assert!(validate_upload("image/webp", MAX_UPLOAD_BYTES).is_ok());
        assert!(validate_upload("image/webp", MAX_UPLOAD_BYTES + 1).is_err());
        assert!(validate_upload("application/pdf", 10).is_err());
    }

    #[tokio::test]
    async fn load_reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portrait.png");
        std::fs::write(&path, png_bytes(9, 4)).unwrap();

        let asset = ImageAsset::load(&path).await.unwrap();
        assert_eq!((asset.width(), asset.height()), (9, 4));
    }

    #[test]
    fn request_requires_key() {
        let asset = ImageAsset::decode(png_bytes(2, 2), None).unwrap();
        assert!(matches!(
            GenerationRequest::new(asset.clone(), "  "),
            Err(HatError::MissingCredential)
        ));
        let request = GenerationRequest::new(asset, "k").unwrap();
        assert!(request.instruction().starts_with("Edit this image to put a red festive"));
    }

    #[test]
    fn result_data_url_and_file_name() {
        let result = GenerationResult::new(vec![1, 2, 3]);
        assert_eq!(result.data_url(), "data:image/png;base64,AQID");
        assert_eq!(
            GenerationResult::file_name(1700000000123),
            "santa-hat-avatar-1700000000123.png"
        );
    }
}
