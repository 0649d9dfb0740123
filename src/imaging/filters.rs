use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Largest sigma blurred at full resolution; anything stronger runs on a
/// downsampled copy and is scaled back up.
const MAX_DIRECT_SIGMA: f32 = 6.0;

/// Gaussian blur whose cost stays flat as `sigma` grows.
pub fn soft_blur(img: &RgbaImage, sigma: f32) -> RgbaImage {
    if !(sigma > 0.0) {
        return img.clone();
    }
    let factor = (sigma / MAX_DIRECT_SIGMA).ceil();
    if factor <= 1.0 {
        return imageops::blur(img, sigma);
    }

    let (width, height) = img.dimensions();
    let small_w = ((width as f32 / factor).round() as u32).max(1);
    let small_h = ((height as f32 / factor).round() as u32).max(1);
    let small = imageops::resize(img, small_w, small_h, FilterType::Triangle);
    let blurred = imageops::blur(&small, sigma / factor);
    imageops::resize(&blurred, width, height, FilterType::Triangle)
}

/// Multiplies the colour channels by `factor`, leaving alpha alone.
pub fn brighten(img: &mut RgbaImage, factor: f32) {
    for pixel in img.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Scales `img` uniformly until it covers a `side` x `side` square, cropping
/// the overflow evenly from both ends.
///
/// The visible region is cut from the source before resizing, so the work
/// stays proportional to `side` however extreme the aspect ratio is.
pub fn cover_square(img: &RgbaImage, side: u32) -> RgbaImage {
    let (width, height) = img.dimensions();
    let scale = f64::max(side as f64 / width as f64, side as f64 / height as f64);
    let visible_w = ((side as f64 / scale).round() as u32).clamp(1, width);
    let visible_h = ((side as f64 / scale).round() as u32).clamp(1, height);

    let x = (width - visible_w) / 2;
    let y = (height - visible_h) / 2;
    let visible = imageops::crop_imm(img, x, y, visible_w, visible_h).to_image();
    imageops::resize(&visible, side, side, FilterType::Triangle)
}

/// Black silhouette of `img` at `opacity`, blurred by `sigma`.
///
/// The returned tile is padded by `margin` pixels on every side so the blur
/// has room to fall off; draw it at the image origin minus `margin`.
pub fn drop_shadow(img: &RgbaImage, sigma: f32, opacity: f32) -> (RgbaImage, u32) {
    let margin = (sigma.max(0.0) * 3.0).ceil() as u32;
    let (width, height) = img.dimensions();
    let mut tile = RgbaImage::new(width + margin * 2, height + margin * 2);

    for (x, y, pixel) in img.enumerate_pixels() {
        let alpha = (pixel.0[3] as f32 * opacity).round().clamp(0.0, 255.0) as u8;
        tile.put_pixel(x + margin, y + margin, Rgba([0, 0, 0, alpha]));
    }

    (soft_blur(&tile, sigma), margin)
}
