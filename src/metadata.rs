//! Embedded metadata access
//!
//! The pipeline treats tags as opaque except for a handful it interprets:
//!
//! - capture dates, checked in priority order ([`DATE_TAGS`])
//! - edit indicators written by phone photo editors ([`EDIT_TAGS`])
//! - `Orientation`, forced to 1 after pixels have been transposed
//!
//! ## Backends
//!
//! 1. **ExifTool** (primary) - reads and transplants the full tag set
//! 2. **kamadak-exif** (pure Rust) - date fallback when ExifTool yields nothing

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};
use crate::tool::{ToolCommand, DEFAULT_TIMEOUT};

/// Capture-date tags, most trusted first.
pub const DATE_TAGS: &[&str] = &[
    "ContentCreateDate",
    "CreationDate",
    "DateTimeOriginal",
    "CreateDate",
    "FileModifyDate",
];

/// Presence of either tag marks an asset as edited.
pub const EDIT_TAGS: &[&str] = &["AdjustmentType", "HasCrop"];

pub const ORIENTATION_TAG: &str = "Orientation";

const DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

// ============================================================================
// Tag mapping
// ============================================================================

/// Ordered tag name → value pairs, as reported by the metadata backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    entries: Vec<(String, String)>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    /// Set `tag`, keeping its original position if already present.
    pub fn insert(&mut self, tag: impl Into<String>, value: impl Into<String>) {
        let tag = tag.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == tag) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((tag, value)),
        }
    }

    pub fn remove(&mut self, tag: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(name, _)| name == tag)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First parsable date among [`DATE_TAGS`], in priority order.
    pub fn capture_date(&self) -> Option<NaiveDateTime> {
        DATE_TAGS
            .iter()
            .filter_map(|tag| self.get(tag))
            .find_map(parse_date)
    }

    pub fn is_edited(&self) -> bool {
        EDIT_TAGS.iter().any(|tag| self.contains(tag))
    }

    /// EXIF orientation (1-8); anything missing or out of range reads as 1.
    pub fn orientation(&self) -> u8 {
        self.get(ORIENTATION_TAG)
            .and_then(|v| v.trim().parse::<u8>().ok())
            .filter(|o| (1..=8).contains(o))
            .unwrap_or(1)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = TagMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Parse an EXIF-style date (`YYYY:MM:DD HH:MM:SS`), ignoring any
/// fractional seconds or zone suffix that follows.
pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.len() < 19 || !value.is_char_boundary(19) {
        return None;
    }
    let (stamp, rest) = value.split_at(19);
    if !(rest.is_empty() || rest.starts_with(['.', '+', '-', 'Z', ' '])) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, DATE_FORMAT).ok()
}

// ============================================================================
// Service contract
// ============================================================================

/// Options for [`MetadataService::copy_tags`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Tags left out of the copy.
    pub exclude: Vec<String>,
    /// Tags forced to a (numeric) value on the destination after the copy.
    pub set: Vec<(String, String)>,
}

impl CopyOptions {
    /// Copy every tag unchanged.
    pub fn all() -> Self {
        Self::default()
    }

    /// Copy every tag but reset `Orientation` to 1 (pixels already upright).
    pub fn normalized_orientation() -> Self {
        Self {
            exclude: vec![ORIENTATION_TAG.to_string()],
            set: vec![(ORIENTATION_TAG.to_string(), "1".to_string())],
        }
    }
}

/// Reads and transplants embedded metadata.
///
/// `copy_tags` rewrites `dest` in place and must not leave a stray backup
/// artifact next to it when it reports success.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn read_tags(&self, path: &Path) -> Result<TagMap>;

    async fn copy_tags(&self, source: &Path, dest: &Path, options: &CopyOptions) -> Result<()>;
}

// ============================================================================
// ExifTool Backend (Primary)
// ============================================================================

/// [`MetadataService`] backed by the `exiftool` binary.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
    timeout: Duration,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.program).timeout(self.timeout)
    }

    /// Embedded rendered preview (`PreviewImage`); empty when there is none.
    pub async fn preview_image(&self, path: &Path) -> Result<Vec<u8>> {
        let output = self
            .command()
            .args(["-b", "-PreviewImage"])
            .path(path)
            .execute()
            .await?;
        Ok(output.stdout)
    }
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

#[async_trait]
impl MetadataService for ExifTool {
    async fn read_tags(&self, path: &Path) -> Result<TagMap> {
        let output = self
            .command()
            .arg("-j")  // JSON output
            .arg("-n")  // Numeric values (Orientation as 1-8)
            .path(path)
            .execute()
            .await?;
        parse_exiftool_json(&output.stdout)
    }

    async fn copy_tags(&self, source: &Path, dest: &Path, options: &CopyOptions) -> Result<()> {
        let mut cmd = self
            .command()
            .arg("-TagsFromFile")
            .path(source)
            .arg("-all:all");
        for tag in &options.exclude {
            cmd = cmd.arg(format!("--{tag}"));
        }
        for (tag, value) in &options.set {
            cmd = cmd.arg(format!("-{tag}#={value}"));
        }
        cmd.arg("-overwrite_original").path(dest).execute().await?;

        remove_original_artifact(dest)?;
        debug!("Copied tags {} -> {}", source.display(), dest.display());
        Ok(())
    }
}

/// Parse `exiftool -j` output into a [`TagMap`], keeping tag order.
fn parse_exiftool_json(stdout: &[u8]) -> Result<TagMap> {
    let parsed: Vec<serde_json::Map<String, Value>> = serde_json::from_slice(stdout)
        .map_err(|e| ReconcileError::tool("exiftool", format!("JSON parse error: {e}")))?;

    let tags = parsed
        .into_iter()
        .next()
        .ok_or_else(|| ReconcileError::tool("exiftool", "No metadata found"))?;

    Ok(tags
        .into_iter()
        .filter(|(key, _)| key != "SourceFile")
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string().trim_matches('"').to_string(),
            };
            (key, value)
        })
        .collect())
}

/// Remove the `<dest>_original` file ExifTool leaves behind when it is not
/// told to overwrite in place.
fn remove_original_artifact(dest: &Path) -> Result<()> {
    let mut artifact: OsString = dest.as_os_str().to_os_string();
    artifact.push("_original");
    let artifact = PathBuf::from(artifact);
    if artifact.exists() {
        warn!("Removing stray metadata backup {}", artifact.display());
        std::fs::remove_file(&artifact)?;
    }
    Ok(())
}

/// Check if ExifTool is available on the system
pub fn exiftool_available(program: &Path) -> bool {
    crate::tool::tool_available(program, "-ver")
}

// ============================================================================
// kamadak-exif Backend (Pure Rust, date fallback)
// ============================================================================

/// Capture date from the embedded EXIF block (`DateTime`, then
/// `DateTimeOriginal`), read without any external tool.
pub fn read_native_exif_date(path: &Path) -> Option<NaiveDateTime> {
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif_data = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let ascii = |tag: exif::Tag| -> Option<String> {
        let field = exif_data.get_field(tag, exif::In::PRIMARY)?;
        match field.value {
            exif::Value::Ascii(ref v) if !v.is_empty() => {
                Some(String::from_utf8_lossy(&v[0]).to_string())
            }
            _ => None,
        }
    };

    [exif::Tag::DateTime, exif::Tag::DateTimeOriginal]
        .into_iter()
        .filter_map(ascii)
        .find_map(|s| parse_date(&s))
}
