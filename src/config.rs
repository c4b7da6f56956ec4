//! Pipeline configuration

use crate::tool::DEFAULT_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

/// Suffixes considered by `replace`.
pub const REPLACE_SUFFIXES: &[&str] = &["jpg", "jpeg", "heic"];

/// Suffixes considered by `merge`.
pub const MERGE_SUFFIXES: &[&str] = &["jpg", "jpeg", "png", "heic"];

/// Suffixes picked up by `convert`.
pub const CONVERT_SUFFIXES: &[&str] = &["heic", "heif"];

/// Image suffixes eligible for the native EXIF date fallback in `fix-dates`.
pub const NATIVE_EXIF_SUFFIXES: &[&str] = &["jpg", "jpeg", "heic", "png", "tiff", "bmp"];

pub const MERGE_BACKUP_DIR: &str = "_merged_photos_backup";
pub const REPLACE_BACKUP_DIR: &str = "_replaced_photos_backup";
pub const CONVERT_BACKUP_DIR: &str = "_converted_photos_backup";
pub const LIVE_BACKUP_DIR: &str = "_live_photo_backup";

/// Directory names the indexer never descends into.
pub const RESERVED_DIRS: &[&str] = &[
    MERGE_BACKUP_DIR,
    REPLACE_BACKUP_DIR,
    CONVERT_BACKUP_DIR,
    LIVE_BACKUP_DIR,
];

pub fn is_reserved_dir(name: &str) -> bool {
    RESERVED_DIRS.contains(&name)
}

/// Settings shared by every pipeline operation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of assets processed concurrently.
    pub workers: usize,
    /// Timeout applied to each external tool invocation.
    pub tool_timeout: Duration,
    /// JPEG quality (1-100) for full-decode conversions.
    pub jpeg_quality: u8,
    pub exiftool: PathBuf,
    pub ffmpeg: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            tool_timeout: DEFAULT_TIMEOUT,
            jpeg_quality: 95,
            exiftool: PathBuf::from("exiftool"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl PipelineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }
}
