use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use stockchat_contracts::conversation::ContentPart;

pub const MAX_UPLOAD_WIDTH: u32 = 300;
pub const MAX_UPLOAD_HEIGHT: u32 = 300;
const JPEG_QUALITY: u8 = 90;

/// Upload-ready image: resized, re-encoded and base64'd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub base64: String,
    pub mime_type: String,
    pub original_name: String,
    pub width: u32,
    pub height: u32,
}

impl ProcessedImage {
    pub fn content_part(&self) -> ContentPart {
        ContentPart::image_data(&self.mime_type, &self.base64)
    }
}

/// Target size that fits inside `max_width` x `max_height`, keeping the aspect
/// ratio. The longer side drives the scale and images are never enlarged.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let (mut out_w, mut out_h) = (width, height);
    if width > height {
        if width > max_width {
            out_h = (f64::from(height) * f64::from(max_width) / f64::from(width)).round() as u32;
            out_w = max_width;
        }
    } else if height > max_height {
        out_w = (f64::from(width) * f64::from(max_height) / f64::from(height)).round() as u32;
        out_h = max_height;
    }
    (out_w.max(1), out_h.max(1))
}

pub fn prepare_image(path: &Path) -> Result<ProcessedImage> {
    let Some(mime) = guess_image_mime(path) else {
        bail!("{} is not an image file", path.display());
    };
    let original_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_string();
    let image =
        image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;

    let (width, height) = fit_within(
        image.width(),
        image.height(),
        MAX_UPLOAD_WIDTH,
        MAX_UPLOAD_HEIGHT,
    );
    let resized = if (width, height) == (image.width(), image.height()) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    };

    let (bytes, mime_type) = if mime == "image/png" {
        (encode_png(&resized)?, "image/png")
    } else {
        (encode_jpeg(&resized)?, "image/jpeg")
    };

    Ok(ProcessedImage {
        base64: BASE64.encode(bytes),
        mime_type: mime_type.to_string(),
        original_name,
        width,
        height,
    })
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(bytes)
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let rgb = DynamicImage::ImageRgba8(flattened).to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(rgb))
        .context("failed to encode JPEG")?;
    Ok(bytes)
}

fn guess_image_mime(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
