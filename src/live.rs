//! Live-photo companion pruning
//!
//! A phone exports each Live Photo as `IMG_1234.HEIC` plus a short
//! `IMG_1234.MOV`. Pruning moves the MOV half into `_live_photo_backup`.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backup::move_to_backup;
use crate::config::LIVE_BACKUP_DIR;
use crate::error::{ReconcileError, Result};
use crate::report::{Operation, OperationReport, Timer};

/// MOV companions of `IMG_*.HEIC` stills directly inside `dir`, in name
/// order. The `IMG_` prefix is case-sensitive, the `.heic` suffix is not.
pub fn live_companions(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ReconcileError::access(dir, e))?;

    let mut stills: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| is_live_still(path))
        .collect();
    stills.sort();

    Ok(stills
        .into_iter()
        .filter_map(|still| {
            let mov = still.with_extension("MOV");
            mov.is_file().then_some(mov)
        })
        .collect())
}

fn is_live_still(path: &Path) -> bool {
    let prefixed = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with("IMG_"));
    let heic = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("heic"));
    prefixed && heic
}

/// Move every live-photo MOV companion in `dir` (not recursive) into its
/// backup directory.
pub fn prune_live(dir: &Path) -> Result<OperationReport> {
    let timer = Timer::new();
    if !dir.is_dir() {
        return Err(ReconcileError::access(dir, "not a directory"));
    }
    let companions = live_companions(dir)?;
    info!("Found {} live photo companions in {}", companions.len(), dir.display());

    let backup_dir = dir.join(LIVE_BACKUP_DIR);
    let mut report = OperationReport::new(Operation::PruneLive);
    for mov in &companions {
        let result = move_to_backup(mov, &backup_dir);
        match &result {
            Ok(dest) => info!("Moved {} -> {}", mov.display(), dest.display()),
            Err(e) => warn!("Failed to move {}: {e}", mov.display()),
        }
        report.record(mov, &result);
    }
    Ok(report.finish(&timer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), name.as_bytes()).unwrap();
    }

    #[test]
    fn test_live_companions() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "IMG_0001.HEIC",
            "IMG_0001.MOV",
            "IMG_0002.heic",
            "IMG_0002.MOV",
            "IMG_0003.HEIC",
            "img_0004.HEIC",
            "img_0004.MOV",
            "IMG_0005.JPG",
            "IMG_0005.MOV",
        ] {
            touch(dir.path(), name);
        }

        let found = live_companions(dir.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["IMG_0001.MOV", "IMG_0002.MOV"]);
    }

    #[test]
    fn test_prune_live_moves_not_deletes() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "IMG_0001.HEIC");
        touch(dir.path(), "IMG_0001.MOV");
        fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "IMG_0009.HEIC");
        touch(&dir.path().join("nested"), "IMG_0009.MOV");

        let report = prune_live(dir.path()).unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(report.failures.is_empty());

        assert!(!dir.path().join("IMG_0001.MOV").exists());
        assert!(dir.path().join("IMG_0001.HEIC").exists());
        let moved = dir.path().join(LIVE_BACKUP_DIR).join("IMG_0001.MOV");
        assert_eq!(fs::read(moved).unwrap(), b"IMG_0001.MOV");
        // Not recursive
        assert!(dir.path().join("nested/IMG_0009.MOV").exists());
    }

    #[test]
    fn test_prune_live_missing_dir() {
        let err = prune_live(Path::new("/nonexistent/dcim")).unwrap_err();
        assert!(matches!(err, ReconcileError::Access { .. }));
    }
}
