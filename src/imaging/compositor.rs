use super::filters::{brighten, cover_square, drop_shadow, soft_blur};
use super::ImageTransform;
use crate::error::CompositionError;
use crate::models::ImageAsset;
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Output canvas side relative to the longer input side.
pub const PADDING_FACTOR: f64 = 1.6;

/// Browsers refuse canvases much beyond this; so do we.
pub const MAX_CANVAS_SIDE: u32 = 16_384;

/// Placement of the original image on the padded square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvatarLayout {
    pub canvas: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl AvatarLayout {
    pub fn for_size(width: u32, height: u32) -> Self {
        let canvas = padded_side(width, height);
        Self {
            canvas,
            offset_x: (canvas - width) / 2,
            offset_y: (canvas - height) / 2,
        }
    }
}

/// `floor(max(width, height) * PADDING_FACTOR)`
pub fn padded_side(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height) as f64;
    (max_dim * PADDING_FACTOR).floor() as u32
}

#[derive(Debug, Clone)]
pub struct CompositorOptions {
    /// Background blur strength in canvas pixels.
    pub background_blur: f32,
    pub background_brightness: f32,
    /// Canvas-style shadow blur; the gaussian sigma is half of this.
    pub shadow_blur: f32,
    pub shadow_offset_y: i64,
    pub shadow_opacity: f32,
    /// Requested output encoding. `None` keeps the input's mime type.
    pub output_mime: Option<String>,
    pub max_canvas_side: u32,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            background_blur: 40.0,
            background_brightness: 1.1,
            shadow_blur: 25.0,
            shadow_offset_y: 10,
            shadow_opacity: 0.25,
            output_mime: None,
            max_canvas_side: MAX_CANVAS_SIDE,
        }
    }
}

impl CompositorOptions {
    pub fn with_output_mime(mut self, mime: impl Into<String>) -> Self {
        self.output_mime = Some(mime.into());
        self
    }

    pub fn with_max_canvas_side(mut self, side: u32) -> Self {
        self.max_canvas_side = side;
        self
    }
}

/// Pads an image onto a blurred square backdrop so a circular crop keeps
/// room above the head.
#[derive(Debug, Clone, Default)]
pub struct AvatarCompositor {
    options: CompositorOptions,
}

impl AvatarCompositor {
    pub fn new(options: CompositorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompositorOptions {
        &self.options
    }

    pub fn composite(&self, image: &ImageAsset) -> Result<ImageAsset, CompositionError> {
        let source = image::load_from_memory(image.bytes())
            .map_err(|e| CompositionError::Decode(e.to_string()))?
            .to_rgba8();
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(CompositionError::Decode("image has no pixels".into()));
        }

        let layout = AvatarLayout::for_size(width, height);
        if layout.canvas > self.options.max_canvas_side {
            return Err(CompositionError::Surface {
                size: layout.canvas as u64,
            });
        }

        let canvas = self.compose(&source, layout);
        let format = output_format(
            self.options
                .output_mime
                .as_deref()
                .unwrap_or(image.mime_type()),
        );
        let bytes = encode(canvas, format)?;

        log::debug!(
            "Composited {}x{} {} into {}x{} {} ({} bytes)",
            width,
            height,
            image.mime_type(),
            layout.canvas,
            layout.canvas,
            format.to_mime_type(),
            bytes.len()
        );

        Ok(ImageAsset::new(
            bytes,
            format.to_mime_type(),
            layout.canvas,
            layout.canvas,
        ))
    }

    fn compose(&self, source: &RgbaImage, layout: AvatarLayout) -> RgbaImage {
        let opts = &self.options;

        let mut canvas = soft_blur(
            &cover_square(source, layout.canvas),
            opts.background_blur,
        );
        brighten(&mut canvas, opts.background_brightness);

        let (shadow, margin) = drop_shadow(source, opts.shadow_blur / 2.0, opts.shadow_opacity);
        imageops::overlay(
            &mut canvas,
            &shadow,
            layout.offset_x as i64 - margin as i64,
            layout.offset_y as i64 + opts.shadow_offset_y - margin as i64,
        );

        imageops::overlay(
            &mut canvas,
            source,
            layout.offset_x as i64,
            layout.offset_y as i64,
        );
        canvas
    }
}

impl ImageTransform for AvatarCompositor {
    fn name(&self) -> &str {
        "avatar-compositor"
    }

    fn apply(&self, image: &ImageAsset) -> Result<ImageAsset, CompositionError> {
        self.composite(image)
    }
}

/// Encodings we can produce; anything else falls back to lossless PNG.
fn output_format(mime: &str) -> ImageFormat {
    match ImageFormat::from_mime_type(mime) {
        Some(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP)) => format,
        _ => ImageFormat::Png,
    }
}

fn encode(canvas: RgbaImage, format: ImageFormat) -> Result<Vec<u8>, CompositionError> {
    let image = match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
        _ => DynamicImage::ImageRgba8(canvas),
    };
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| CompositionError::Encode(e.to_string()))?;
    Ok(buf)
}
