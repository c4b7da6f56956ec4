//! Shared fakes for integration tests.
//!
//! [`FakeMetadata`] keeps tags inside the test files themselves, as a
//! `--tags--` trailer after the "pixel" bytes, so tags travel with a file
//! through copies, renames and staged writes the way embedded EXIF does.
//! [`FakeCodec`] serves a configurable preview and decodes every file to a
//! fixed 4x2 image.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use photo_reconcile::error::{ReconcileError, Result};
use photo_reconcile::{CopyOptions, ImageCodec, MetadataService, TagMap};

const MARKER: &[u8] = b"\n--tags--\n";

/// Write a fake photo: `pixels` followed by the tag trailer.
pub fn write_photo(path: &Path, pixels: &[u8], tags: &[(&str, &str)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let tags: TagMap = tags.iter().copied().collect();
    std::fs::write(path, encode(pixels, &tags)).unwrap();
}

fn encode(pixels: &[u8], tags: &TagMap) -> Vec<u8> {
    let mut out = pixels.to_vec();
    out.extend_from_slice(MARKER);
    for (k, v) in tags.iter() {
        out.extend_from_slice(format!("{k}={v}\n").as_bytes());
    }
    out
}

fn split(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    match data.windows(MARKER.len()).rposition(|w| w == MARKER) {
        Some(pos) => (&data[..pos], Some(&data[pos + MARKER.len()..])),
        None => (data, None),
    }
}

/// The bytes before the tag trailer.
pub fn pixels_of(path: &Path) -> Vec<u8> {
    let data = std::fs::read(path).unwrap();
    split(&data).0.to_vec()
}

/// Tags stored in the trailer (empty when there is none).
pub fn tags_of(path: &Path) -> TagMap {
    let data = std::fs::read(path).unwrap();
    parse_tags(&data)
}

fn parse_tags(data: &[u8]) -> TagMap {
    match split(data).1 {
        Some(trailer) => String::from_utf8_lossy(trailer)
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        None => TagMap::new(),
    }
}

type CopyFailure = Box<dyn Fn(&Path, &Path) -> bool + Send + Sync>;

#[derive(Default)]
pub struct FakeMetadata {
    pub reads: Mutex<Vec<PathBuf>>,
    pub copies: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail_copy: Option<CopyFailure>,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `copy_tags(source, dest)` for which `predicate` holds.
    pub fn failing_copies(predicate: impl Fn(&Path, &Path) -> bool + Send + Sync + 'static) -> Self {
        Self {
            fail_copy: Some(Box::new(predicate)),
            ..Self::default()
        }
    }

    pub fn copy_count(&self) -> usize {
        self.copies.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataService for FakeMetadata {
    async fn read_tags(&self, path: &Path) -> Result<TagMap> {
        self.reads.lock().unwrap().push(path.to_path_buf());
        let data = std::fs::read(path)?;
        Ok(parse_tags(&data))
    }

    async fn copy_tags(&self, source: &Path, dest: &Path, options: &CopyOptions) -> Result<()> {
        self.copies
            .lock()
            .unwrap()
            .push((source.to_path_buf(), dest.to_path_buf()));
        if self.fail_copy.as_ref().is_some_and(|fail| fail(source, dest)) {
            return Err(ReconcileError::tool("fake-exiftool", "injected failure"));
        }

        let mut tags = parse_tags(&std::fs::read(source)?);
        for tag in &options.exclude {
            tags.remove(tag);
        }
        for (tag, value) in &options.set {
            tags.insert(tag.clone(), value.clone());
        }
        let dest_data = std::fs::read(dest)?;
        let pixels = split(&dest_data).0.to_vec();
        std::fs::write(dest, encode(&pixels, &tags))?;
        Ok(())
    }
}

pub struct FakeCodec {
    preview: Option<Vec<u8>>,
    pub decodes: AtomicUsize,
    pub previews: AtomicUsize,
}

impl FakeCodec {
    /// `None` makes preview extraction fail outright.
    pub fn with_preview(preview: Option<Vec<u8>>) -> Self {
        Self {
            preview,
            decodes: AtomicUsize::new(0),
            previews: AtomicUsize::new(0),
        }
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageCodec for FakeCodec {
    async fn extract_preview(&self, _path: &Path) -> Result<Vec<u8>> {
        self.previews.fetch_add(1, Ordering::SeqCst);
        self.preview
            .clone()
            .ok_or_else(|| ReconcileError::tool("fake-exiftool", "no preview"))
    }

    async fn decode(&self, path: &Path) -> Result<DynamicImage> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(ReconcileError::conversion("missing"));
        }
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(0, 0, Rgb([255, 255, 255]));
        Ok(DynamicImage::ImageRgb8(img))
    }
}

/// A small real JPEG, used as an embedded preview.
pub fn jpeg_preview(width: u32, height: u32) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

/// Relative paths of every file under `root`, sorted.
pub fn tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .to_string()
        })
        .collect();
    files.sort();
    files
}
