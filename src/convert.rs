//! Still-image conversion (HEIC/HEIF → JPEG or PNG)
//!
//! Edited photos carry an embedded preview that already has the edit
//! applied; when edits are to be preserved that preview becomes the output.
//! Everything else is fully decoded, rotated upright and re-encoded. Either
//! way the source's tags are transplanted with `Orientation` forced to 1.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backup::{move_to_backup, Staged};
use crate::codec::{apply_orientation, encode, ImageCodec, TargetFormat};
use crate::config::{PipelineConfig, CONVERT_BACKUP_DIR, CONVERT_SUFFIXES};
use crate::error::{ReconcileError, Result};
use crate::index::{scan, Asset};
use crate::metadata::{CopyOptions, MetadataService};
use crate::pool::{blocking, run_ordered};
use crate::report::{ConvertTally, Operation, OperationReport, Timer};

/// Settings for a conversion batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    pub format: TargetFormat,
    /// Use the embedded preview for edited assets.
    pub preserve_edits: bool,
    /// Move each converted source into the backup directory.
    pub remove_original: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionRoute {
    /// Written from the embedded (edited) preview.
    Preview,
    /// Fully decoded and re-encoded.
    FullDecode,
}

#[derive(Debug, Clone)]
pub struct ConvertedAsset {
    pub source: PathBuf,
    pub output: PathBuf,
    pub route: ConversionRoute,
}

pub struct Converter {
    metadata: Arc<dyn MetadataService>,
    codec: Arc<dyn ImageCodec>,
    config: PipelineConfig,
}

impl Converter {
    pub fn new(
        metadata: Arc<dyn MetadataService>,
        codec: Arc<dyn ImageCodec>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            metadata,
            codec,
            config,
        }
    }

    /// Where the converted file for `source` lands.
    pub fn output_path(source: &Path, format: TargetFormat) -> PathBuf {
        source.with_extension(format.extension())
    }

    /// Convert one asset. Every failure is reported as
    /// [`ReconcileError::Conversion`] and leaves no output behind.
    pub async fn convert(
        &self,
        asset: &Asset,
        format: TargetFormat,
        preserve_edits: bool,
    ) -> Result<ConvertedAsset> {
        self.try_convert(asset, format, preserve_edits)
            .await
            .map_err(|e| match e {
                ReconcileError::Conversion(_) => e,
                other => ReconcileError::conversion(other),
            })
    }

    async fn try_convert(
        &self,
        asset: &Asset,
        format: TargetFormat,
        preserve_edits: bool,
    ) -> Result<ConvertedAsset> {
        let output = Self::output_path(&asset.path, format);
        let dir = asset
            .path
            .parent()
            .ok_or_else(|| ReconcileError::conversion("source has no parent directory"))?
            .to_path_buf();
        {
            let (dir, output) = (dir.clone(), output.clone());
            blocking(move || refuse_existing_target(&dir, &output)).await?;
        }

        let tags = asset.metadata(self.metadata.as_ref()).await?;
        let quality = self.config.jpeg_quality;

        let mut encoded = None;
        if preserve_edits && tags.is_edited() {
            match self.codec.extract_preview(&asset.path).await {
                Ok(preview) if !preview.is_empty() => {
                    match blocking(move || reencode_preview(preview, format, quality)).await {
                        Ok(bytes) => encoded = Some((bytes, ConversionRoute::Preview)),
                        Err(e) => info!("{}: preview unusable ({e}), full re-decode needed", asset.name),
                    }
                }
                Ok(_) => info!("{}: edited but has no preview, full re-decode needed", asset.name),
                Err(e) => info!("{}: preview extraction failed ({e}), full re-decode needed", asset.name),
            }
        }

        let (bytes, route) = match encoded {
            Some(encoded) => encoded,
            None => {
                let img = self.codec.decode(&asset.path).await?;
                let orientation = tags.orientation();
                let bytes = blocking(move || {
                    let upright = apply_orientation(img, orientation);
                    let mut buf = Vec::new();
                    encode(&upright, format, quality, &mut buf)?;
                    Ok(buf)
                })
                .await?;
                (bytes, ConversionRoute::FullDecode)
            }
        };

        let staged = blocking(move || {
            let mut staged = Staged::new_in(&dir, format.extension())?;
            staged.as_file_mut().write_all(&bytes)?;
            Ok(staged)
        })
        .await?;
        self.metadata
            .copy_tags(&asset.path, staged.path(), &CopyOptions::normalized_orientation())
            .await?;
        let dest = output.clone();
        blocking(move || staged.persist_new(&dest))
            .await
            .map_err(|e| ReconcileError::conversion(format!("cannot write {}: {e}", output.display())))?;

        debug!("Converted {} -> {} via {:?}", asset.path.display(), output.display(), route);
        Ok(ConvertedAsset {
            source: asset.path.clone(),
            output,
            route,
        })
    }

    /// Convert every HEIC/HEIF file under `root`.
    pub async fn convert_all(
        &self,
        root: &Path,
        options: ConvertOptions,
        cancel: &CancellationToken,
    ) -> Result<OperationReport> {
        let timer = Timer::new();
        let set = scan(root, CONVERT_SUFFIXES).await?;
        info!("Found {} HEIC files under {}", set.len(), set.root.display());

        let mut report = OperationReport::new(Operation::Convert);
        report.note_index_issues(&set);
        let backup_dir = set.root.join(CONVERT_BACKUP_DIR);

        let results = run_ordered(&set.assets, self.config.workers, cancel, |asset| {
            self.convert(asset, options.format, options.preserve_edits)
        })
        .await;

        let mut tally = ConvertTally::default();
        for (asset, result) in set.assets.iter().zip(results) {
            match result {
                Ok(converted) => {
                    report.record_success();
                    match converted.route {
                        ConversionRoute::Preview => tally.edited += 1,
                        ConversionRoute::FullDecode => tally.original += 1,
                    }
                    if options.remove_original {
                        if let Err(e) = move_to_backup(&converted.source, &backup_dir) {
                            warn!("{}: converted but original kept: {e}", asset.path.display());
                            report
                                .warnings
                                .push(format!("{}: original kept: {e}", asset.path.display()));
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to convert {}: {e}", asset.path.display());
                    report.record_failure(&asset.path, &e);
                }
            }
        }
        report.conversions = Some(tally);
        Ok(report.finish(&timer))
    }
}

/// Fail when `dir` already holds `output` under any letter case. A
/// case-variant would share the output's identity key.
fn refuse_existing_target(dir: &Path, output: &Path) -> Result<()> {
    let wanted = output
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .ok_or_else(|| ReconcileError::conversion("output has no file name"))?;
    let entries = std::fs::read_dir(dir).map_err(|e| ReconcileError::access(dir, e))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().to_lowercase() == wanted {
            return Err(ReconcileError::conversion(format!(
                "target exists: {}",
                entry.path().display()
            )));
        }
    }
    Ok(())
}

/// Preview bytes in the target encoding. A JPEG preview bound for JPEG is
/// kept byte for byte.
fn reencode_preview(preview: Vec<u8>, format: TargetFormat, quality: u8) -> Result<Vec<u8>> {
    let is_jpeg = matches!(image::guess_format(&preview), Ok(image::ImageFormat::Jpeg));
    if format == TargetFormat::Jpeg && is_jpeg {
        return Ok(preview);
    }
    let img = image::load_from_memory(&preview).map_err(ReconcileError::conversion)?;
    let mut buf = Vec::new();
    encode(&img, format, quality, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        encode(&DynamicImage::ImageRgb8(RgbImage::new(w, h)), TargetFormat::Jpeg, 90, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            Converter::output_path(Path::new("/a/IMG_1.HEIC"), TargetFormat::Jpeg),
            PathBuf::from("/a/IMG_1.jpg")
        );
        assert_eq!(
            Converter::output_path(Path::new("/a/IMG_1.heif"), TargetFormat::Png),
            PathBuf::from("/a/IMG_1.png")
        );
    }

    #[test]
    fn test_refuse_existing_target_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IMG_1.JPG"), b"x").unwrap();
        std::fs::write(dir.path().join("IMG_2.HEIC"), b"x").unwrap();

        let err = refuse_existing_target(dir.path(), &dir.path().join("IMG_1.jpg")).unwrap_err();
        assert!(err.to_string().contains("target exists"));
        assert!(refuse_existing_target(dir.path(), &dir.path().join("IMG_2.jpg")).is_ok());
    }

    #[test]
    fn test_reencode_preview_keeps_jpeg_bytes() {
        let preview = jpeg_bytes(4, 4);
        let out = reencode_preview(preview.clone(), TargetFormat::Jpeg, 95).unwrap();
        assert_eq!(out, preview);
    }

    #[test]
    fn test_reencode_preview_to_png() {
        let out = reencode_preview(jpeg_bytes(4, 2), TargetFormat::Png, 95).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Png);
    }

    #[test]
    fn test_reencode_preview_rejects_garbage() {
        let err = reencode_preview(b"nope".to_vec(), TargetFormat::Png, 95).unwrap_err();
        assert!(matches!(err, ReconcileError::Conversion(_)));
    }
}
