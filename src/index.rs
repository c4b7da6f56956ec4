//! Asset indexing: recursive, suffix-filtered directory walks

use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::is_reserved_dir;
use crate::error::{ReconcileError, Result};
use crate::metadata::{MetadataService, TagMap};

/// One media file under management.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the indexed root.
    pub relative_path: PathBuf,
    /// Base filename as found on disk.
    pub name: String,
    /// Identity key: lowercased base filename.
    pub key: String,
    /// Lowercased extension without the dot.
    pub suffix: String,
    pub size: u64,
    metadata: OnceCell<TagMap>,
}

impl Asset {
    pub fn new(root: &Path, path: &Path, size: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        Self {
            path: path.to_path_buf(),
            relative_path,
            key: identity_key(&name),
            suffix: suffix_of(path),
            name,
            size,
            metadata: OnceCell::new(),
        }
    }

    /// Embedded tags, fetched from `service` on first use and cached.
    pub async fn metadata(&self, service: &dyn MetadataService) -> Result<&TagMap> {
        self.metadata
            .get_or_try_init(|| service.read_tags(&self.path))
            .await
    }
}

/// Identity used for matching across trees.
pub fn identity_key(name: &str) -> String {
    name.to_lowercase()
}

fn suffix_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// An entry the walk could not read.
#[derive(Debug, Clone)]
pub struct IndexIssue {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of indexing one tree.
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    pub root: PathBuf,
    /// Assets in walk order (file name order, depth first).
    pub assets: Vec<Asset>,
    pub skipped: Vec<IndexIssue>,
}

impl AssetSet {
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Index every file under `root` whose suffix (case-insensitive) is in
/// `suffixes`. An empty allow-list admits every file.
///
/// Directory symlinks are not followed and reserved backup directories are
/// never entered. File symlinks are indexed under the link's own path; a
/// dangling link is recorded in [`AssetSet::skipped`]. A missing or non-directory root is an [`ReconcileError::Access`];
/// unreadable entries below it are recorded in [`AssetSet::skipped`].
pub fn index(root: &Path, suffixes: &[&str]) -> Result<AssetSet> {
    let root = std::fs::canonicalize(root).map_err(|e| ReconcileError::access(root, e))?;
    if !root.is_dir() {
        return Err(ReconcileError::access(&root, "not a directory"));
    }

    let mut set = AssetSet {
        root: root.clone(),
        ..Default::default()
    };

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() > 0
                && e.file_type().is_dir()
                && is_reserved_dir(&e.file_name().to_string_lossy()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.clone());
                warn!("Skipping unreadable entry {}: {}", path.display(), err);
                set.skipped.push(IndexIssue {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let file_type = entry.file_type();
        if !file_type.is_file() && !file_type.is_symlink() {
            continue;
        }
        let path = entry.path();
        if !suffixes.is_empty() && !suffixes.contains(&suffix_of(path).as_str()) {
            continue;
        }

        // A link is admitted under its own name when it resolves to a file
        let meta = if file_type.is_symlink() {
            std::fs::metadata(path)
        } else {
            entry.metadata().map_err(std::io::Error::from)
        };
        match meta {
            Ok(meta) if meta.is_file() => set.assets.push(Asset::new(&root, path, meta.len())),
            Ok(_) => debug!("Skipping link to a non-file: {}", path.display()),
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                set.skipped.push(IndexIssue {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                });
            }
        }
    }

    debug!(
        "Indexed {} assets under {} ({} skipped)",
        set.assets.len(),
        root.display(),
        set.skipped.len()
    );
    Ok(set)
}

/// Index two independent trees in parallel.
pub fn index_both(
    first: &Path,
    first_suffixes: &[&str],
    second: &Path,
    second_suffixes: &[&str],
) -> Result<(AssetSet, AssetSet)> {
    let (a, b) = rayon::join(
        || index(first, first_suffixes),
        || index(second, second_suffixes),
    );
    Ok((a?, b?))
}

/// [`index`] on the blocking pool.
pub async fn scan(root: &Path, suffixes: &'static [&'static str]) -> Result<AssetSet> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || index(&root, suffixes))
        .await
        .map_err(|e| ReconcileError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// [`index_both`] on the blocking pool.
pub async fn scan_both(
    first: &Path,
    first_suffixes: &'static [&'static str],
    second: &Path,
    second_suffixes: &'static [&'static str],
) -> Result<(AssetSet, AssetSet)> {
    let (first, second) = (first.to_path_buf(), second.to_path_buf());
    tokio::task::spawn_blocking(move || index_both(&first, first_suffixes, &second, second_suffixes))
        .await
        .map_err(|e| ReconcileError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
    }

    #[test]
    fn test_index_filters_suffixes_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("IMG_1.JPG"));
        touch(&dir.path().join("sub/IMG_2.heic"));
        touch(&dir.path().join("sub/notes.txt"));
        touch(&dir.path().join("clip.MOV"));

        let set = index(dir.path(), &["jpg", "heic"]).unwrap();
        let names: Vec<&str> = set.assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["IMG_1.JPG", "IMG_2.heic"]);

        let asset = &set.assets[1];
        assert_eq!(asset.key, "img_2.heic");
        assert_eq!(asset.suffix, "heic");
        assert_eq!(asset.relative_path, Path::new("sub/IMG_2.heic"));
        assert_eq!(asset.size, 4);
        assert!(asset.path.is_absolute());
    }

    #[test]
    fn test_index_empty_allowlist_admits_everything() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"));
        touch(&dir.path().join("b"));
        let set = index(dir.path(), &[]).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_index_skips_reserved_dirs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("IMG_1.jpg"));
        touch(&dir.path().join("_replaced_photos_backup/IMG_1.jpg"));
        touch(&dir.path().join("_merged_photos_backup/IMG_9.jpg"));

        let set = index(dir.path(), &["jpg"]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.assets[0].relative_path, Path::new("IMG_1.jpg"));
    }

    #[test]
    fn test_index_deterministic_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.jpg", "a.jpg", "b/z.jpg", "b/a.jpg"] {
            touch(&dir.path().join(name));
        }
        let first: Vec<PathBuf> = index(dir.path(), &["jpg"])
            .unwrap()
            .assets
            .into_iter()
            .map(|a| a.relative_path)
            .collect();
        let second: Vec<PathBuf> = index(dir.path(), &["jpg"])
            .unwrap()
            .assets
            .into_iter()
            .map(|a| a.relative_path)
            .collect();
        assert_eq!(first, second);
        assert_eq!(first[0], Path::new("a.jpg"));
    }

    #[test]
    fn test_index_missing_root() {
        let err = index(Path::new("/nonexistent/photos"), &["jpg"]).unwrap_err();
        assert!(matches!(err, ReconcileError::Access { .. }));
    }

    #[test]
    fn test_index_root_is_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        touch(&file);
        let err = index(&file, &["jpg"]).unwrap_err();
        assert!(matches!(err, ReconcileError::Access { .. }));
    }

    #[test]
    fn test_index_both() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        touch(&a.path().join("x.jpg"));
        touch(&b.path().join("y.png"));
        let (sa, sb) = index_both(a.path(), &["jpg"], b.path(), &["png"]).unwrap();
        assert_eq!(sa.len(), 1);
        assert_eq!(sb.len(), 1);

        assert!(index_both(a.path(), &["jpg"], Path::new("/nonexistent"), &["png"]).is_err());
    }

    #[tokio::test]
    async fn test_scan_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("IMG_1.HEIC"));
        let set = scan(dir.path(), &["heic"]).await.unwrap();
        assert_eq!(set.len(), 1);
        assert!(scan(Path::new("/nonexistent"), &["heic"]).await.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_index_follows_file_links_only() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        touch(&elsewhere.path().join("IMG_7.jpg"));
        touch(&elsewhere.path().join("album/IMG_8.jpg"));
        symlink(elsewhere.path().join("IMG_7.jpg"), dir.path().join("IMG_7.jpg")).unwrap();
        symlink(elsewhere.path().join("album"), dir.path().join("album")).unwrap();
        symlink(elsewhere.path().join("gone.jpg"), dir.path().join("gone.jpg")).unwrap();

        let set = index(dir.path(), &["jpg"]).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.assets[0].relative_path, Path::new("IMG_7.jpg"));
        assert_eq!(set.assets[0].size, 4);
        assert_eq!(set.skipped.len(), 1);
        assert!(set.skipped[0].path.ends_with("gone.jpg"));
    }

    #[cfg(unix)]
    #[test]
    fn test_index_reports_unreadable_subdir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("ok.jpg"));
        let locked = dir.path().join("locked");
        touch(&locked.join("hidden.jpg"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root can read anything; nothing to assert in that case.
        let readable = fs::read_dir(&locked).is_ok();
        let set = index(dir.path(), &["jpg"]).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if !readable {
            assert_eq!(set.len(), 1);
            assert_eq!(set.skipped.len(), 1);
        }
    }
}
