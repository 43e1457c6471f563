//! Raster image path: resize, watermark and re-encode in process.

use crate::error::{KilobyeError, Result};
use crate::media::compiler::{ImagePlan, ResizeRequest};
use crate::media::pipeline::{EncodedImage, ImageFormat, Resizer};
use crate::media::watermark::WatermarkSpec;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use tracing::debug;

pub const QUALITY_STEP: f32 = 0.1;
pub const MIN_QUALITY: f32 = 0.1;
const AVIF_SPEED: u8 = 8;

/// [`Resizer`] backed by the `image` crate. Stateless; CPU bound, so callers
/// should run it off the async runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterResizer;

impl RasterResizer {
    pub fn new() -> Self {
        Self
    }
}

impl Resizer for RasterResizer {
    fn resize(&self, input: &[u8], request: &ResizeRequest) -> Result<EncodedImage> {
        let source_format = decodable_format(input)?;
        let format = request.format.or(source_format).unwrap_or(ImageFormat::Png);

        let mut img = image::load_from_memory(input)?;
        let (w, h) = (img.width(), img.height());
        if w.max(h) > request.max_dimension && request.max_dimension > 0 {
            img = img.resize(request.max_dimension, request.max_dimension, FilterType::Lanczos3);
            debug!(
                "Resized {}x{} -> {}x{}",
                w,
                h,
                img.width(),
                img.height()
            );
        }

        if let Some(watermark) = &request.watermark {
            img = apply_watermark(img, watermark)?;
        }

        encode_within_budget(&img, format, request.quality, request.max_size_bytes)
    }

    fn convert(&self, input: &[u8], format: ImageFormat, quality: f32) -> Result<EncodedImage> {
        decodable_format(input)?;
        let img = image::load_from_memory(input)?;
        Ok(EncodedImage {
            bytes: encode(&img, format, quality)?,
            format,
        })
    }
}

/// First pass through the resizer, then the conversion pass if the plan still needs one.
pub fn run_image_job(resizer: &dyn Resizer, input: &[u8], plan: &ImagePlan) -> Result<EncodedImage> {
    let first = resizer.resize(input, &plan.resize)?;
    match plan.conversion_after(first.format) {
        Some((format, quality)) => {
            debug!(
                "Converting intermediate {:?} to {:?} at quality {}",
                first.format, format, quality
            );
            resizer.convert(&first.bytes, format, quality)
        }
        None => Ok(first),
    }
}

pub fn detect_format(input: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(input).ok()? {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        image::ImageFormat::Avif => Some(ImageFormat::Avif),
        _ => None,
    }
}

/// AVIF is output only: the `image` build here encodes it but cannot decode it.
fn decodable_format(input: &[u8]) -> Result<Option<ImageFormat>> {
    match detect_format(input) {
        Some(ImageFormat::Avif) => Err(KilobyeError::Policy(
            "AVIF input is not supported, only AVIF output".to_string(),
        )),
        other => Ok(other),
    }
}

fn apply_watermark(img: DynamicImage, watermark: &WatermarkSpec) -> Result<DynamicImage> {
    let overlay = image::load_from_memory(&watermark.image)?;
    let mut base = img.to_rgba8();
    let (bw, bh) = base.dimensions();
    let (ow, oh) = watermark.overlay_size(bw, (overlay.width(), overlay.height()));
    let mut overlay = overlay.resize_exact(ow, oh, FilterType::Lanczos3).to_rgba8();

    if watermark.opacity < 1.0 {
        for pixel in overlay.pixels_mut() {
            pixel[3] = (f32::from(pixel[3]) * watermark.opacity).round() as u8;
        }
    }

    let (x, y) = watermark.placement((bw, bh), (ow, oh));
    imageops::overlay(&mut base, &overlay, x, y);
    Ok(DynamicImage::ImageRgba8(base))
}

/// Re-encodes with decreasing quality until the output fits. Lossless formats
/// get one attempt. Returns the smallest attempt if nothing fits.
fn encode_within_budget(
    img: &DynamicImage,
    format: ImageFormat,
    quality: f32,
    max_size_bytes: u64,
) -> Result<EncodedImage> {
    let mut quality = quality.clamp(MIN_QUALITY, 1.0);
    let mut best = encode(img, format, quality)?;

    while has_quality_knob(format) && best.len() as u64 > max_size_bytes && quality > MIN_QUALITY {
        quality = (quality - QUALITY_STEP).max(MIN_QUALITY);
        let attempt = encode(img, format, quality)?;
        debug!(
            "{:?} at quality {:.1}: {} bytes (budget {})",
            format,
            quality,
            attempt.len(),
            max_size_bytes
        );
        if attempt.len() < best.len() {
            best = attempt;
        }
    }

    if best.len() as u64 > max_size_bytes {
        debug!(
            "Output still {} bytes over a {} byte budget at minimum quality",
            best.len(),
            max_size_bytes
        );
    }

    Ok(EncodedImage {
        bytes: best,
        format,
    })
}

/// WebP encoding here is lossless only, so only JPEG and AVIF respond to quality.
fn has_quality_knob(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Jpeg | ImageFormat::Avif)
}

fn to_percent(quality: f32) -> u8 {
    (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8
}

fn encode(img: &DynamicImage, format: ImageFormat, quality: f32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, to_percent(quality)))?;
        }
        ImageFormat::Png => {
            img.write_with_encoder(PngEncoder::new(&mut out))?;
        }
        ImageFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
        }
        ImageFormat::Avif => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(AvifEncoder::new_with_speed_quality(
                &mut out,
                AVIF_SPEED,
                to_percent(quality),
            ))?;
        }
    }
    if out.is_empty() {
        return Err(KilobyeError::JobExecution(format!(
            "{:?} encoder produced no data",
            format
        )));
    }
    Ok(out)
}
