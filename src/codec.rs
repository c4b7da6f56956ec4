//! Image codec: preview extraction, full decode, orientation, encode
//!
//! Formats the `image` crate can read (detected by magic bytes) are decoded
//! in process; everything else (HEIC/HEIF) goes through an `ffmpeg`
//! subprocess with autorotation disabled so that the `Orientation` tag stays
//! the single source of truth for rotation.

use async_trait::async_trait;
use image::metadata::Orientation;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageFormat};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::metadata::ExifTool;
use crate::tool::{ToolCommand, DEFAULT_TIMEOUT};

/// Output encodings supported by conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    #[default]
    Jpeg,
    Png,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Png => "png",
        }
    }
}

impl std::str::FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(TargetFormat::Jpeg),
            "png" => Ok(TargetFormat::Png),
            other => Err(format!("unsupported target format: {other}")),
        }
    }
}

/// Pixel access for conversion.
#[async_trait]
pub trait ImageCodec: Send + Sync {
    /// Embedded rendered preview; may be empty.
    async fn extract_preview(&self, path: &Path) -> Result<Vec<u8>>;

    /// Full decode, pixels as stored (orientation not applied).
    async fn decode(&self, path: &Path) -> Result<DynamicImage>;
}

// ============================================================================
// Tool-backed codec
// ============================================================================

/// [`ImageCodec`] using ExifTool for previews, the `image` crate for the
/// formats it reads and ffmpeg for the rest.
#[derive(Debug, Clone)]
pub struct ToolCodec {
    exiftool: ExifTool,
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl ToolCodec {
    pub fn new(exiftool: ExifTool, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            exiftool,
            ffmpeg: ffmpeg.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn decode_with_ffmpeg(&self, path: &Path) -> Result<DynamicImage> {
        let scratch = tempfile::tempdir()?;
        let frame = scratch.path().join("frame.png");

        ToolCommand::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"])
            .path(path)
            .args(["-frames:v", "1", "-y"])
            .path(&frame)
            .timeout(self.timeout)
            .execute()
            .await?;

        tokio::task::spawn_blocking(move || {
            let img = image::open(&frame).map_err(ReconcileError::conversion);
            drop(scratch);
            img
        })
        .await
        .map_err(ReconcileError::conversion)?
    }
}

impl Default for ToolCodec {
    fn default() -> Self {
        Self::new(ExifTool::default(), "ffmpeg")
    }
}

#[async_trait]
impl ImageCodec for ToolCodec {
    async fn extract_preview(&self, path: &Path) -> Result<Vec<u8>> {
        self.exiftool.preview_image(path).await
    }

    async fn decode(&self, path: &Path) -> Result<DynamicImage> {
        match native_format(path)? {
            Some(format) => {
                debug!("Decoding {} natively as {:?}", path.display(), format);
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || decode_native(&path, format))
                    .await
                    .map_err(ReconcileError::conversion)?
            }
            None => {
                debug!("Decoding {} with ffmpeg", path.display());
                self.decode_with_ffmpeg(path).await
            }
        }
    }
}

/// Format the `image` crate can decode, identified by magic bytes.
fn native_format(path: &Path) -> Result<Option<ImageFormat>> {
    let kind = infer::get_from_path(path)?;
    Ok(kind
        .and_then(|k| ImageFormat::from_mime_type(k.mime_type()))
        .filter(|f| f.reading_enabled()))
}

fn decode_native(path: &Path, format: ImageFormat) -> Result<DynamicImage> {
    let reader = BufReader::new(File::open(path)?);
    image::load(reader, format).map_err(ReconcileError::conversion)
}

// ============================================================================
// Pixel helpers
// ============================================================================

/// Rotate/flip `img` so it displays upright for the given EXIF orientation.
pub fn apply_orientation(mut img: DynamicImage, orientation: u8) -> DynamicImage {
    if let Some(o) = Orientation::from_exif(orientation) {
        img.apply_orientation(o);
    }
    img
}

/// Encode `img` as `format`. `quality` applies to JPEG only.
pub fn encode<W: Write>(img: &DynamicImage, format: TargetFormat, quality: u8, writer: W) -> Result<()> {
    match format {
        TargetFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(writer, quality.clamp(1, 100)))
        }
        TargetFormat::Png => img.write_with_encoder(PngEncoder::new(writer)),
    }
    .map_err(ReconcileError::conversion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn test_target_format_parse() {
        assert_eq!("JPG".parse::<TargetFormat>().unwrap(), TargetFormat::Jpeg);
        assert_eq!("jpeg".parse::<TargetFormat>().unwrap(), TargetFormat::Jpeg);
        assert_eq!("png".parse::<TargetFormat>().unwrap(), TargetFormat::Png);
        assert!("webp".parse::<TargetFormat>().is_err());
        assert_eq!(TargetFormat::Jpeg.extension(), "jpg");
    }

    #[test]
    fn test_apply_orientation_rotates() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        assert_eq!(apply_orientation(img.clone(), 1).dimensions(), (4, 2));
        assert_eq!(apply_orientation(img.clone(), 6).dimensions(), (2, 4));
        assert_eq!(apply_orientation(img.clone(), 8).dimensions(), (2, 4));
        assert_eq!(apply_orientation(img.clone(), 3).dimensions(), (4, 2));
        // Out of range leaves pixels alone
        assert_eq!(apply_orientation(img, 0).dimensions(), (4, 2));
    }

    #[test]
    fn test_apply_orientation_moves_pixels() {
        let mut buf = RgbImage::new(2, 1);
        buf.put_pixel(0, 0, Rgb([255, 0, 0]));
        let rotated = apply_orientation(DynamicImage::ImageRgb8(buf), 6).to_rgb8();
        // 90° clockwise: the left pixel ends up on top
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(rotated.get_pixel(0, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_encode_jpeg_and_png() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::new(3, 3));

        let mut jpeg = Vec::new();
        encode(&img, TargetFormat::Jpeg, 95, &mut jpeg).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);

        let mut png = Vec::new();
        encode(&img, TargetFormat::Png, 95, &mut png).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.dimensions(), (3, 3));
    }

    #[tokio::test]
    async fn test_decode_native_png() {
        let dir = tempfile::tempdir().unwrap();
        // Extension deliberately wrong: detection is by content
        let path = dir.path().join("frame.heic");
        RgbImage::new(5, 7).save_with_format(&path, ImageFormat::Png).unwrap();

        let img = ToolCodec::default().decode(&path).await.unwrap();
        assert_eq!(img.dimensions(), (5, 7));
    }

    #[test]
    fn test_native_format_unknown_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.heic");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert_eq!(native_format(&path).unwrap(), None);
    }
}
