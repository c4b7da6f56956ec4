//! Safety backups and staged writes
//!
//! Nothing in a backup directory is ever overwritten: a name already taken
//! gets a `~N` suffix before the extension (`IMG_1.jpg` → `IMG_1~1.jpg`).
//! Slots are claimed with an exclusive create, so concurrent workers backing
//! up equally named files never collide.

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ReconcileError, Result};

/// Create `dir` (and parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| ReconcileError::backup(format!("cannot create {}: {e}", dir.display())))
}

/// `name` with `~n` inserted before the extension.
fn numbered(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}~{n}.{ext}"),
        _ => format!("{name}~{n}"),
    }
}

/// Exclusively create the first free `name`, `name~1`, ... in `dir`.
fn claim_slot(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    let mut n = 0;
    loop {
        let candidate = dir.join(numbered(name, n));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ReconcileError::backup(format!("{} has no file name", path.display())))
}

/// Copy `src` into `backup_dir` under its own name, keeping its modification
/// time, and verify the copy's length before returning its path.
///
/// On failure the partial copy is removed and `src` is untouched.
pub fn backup_copy(src: &Path, backup_dir: &Path) -> Result<PathBuf> {
    ensure_dir(backup_dir)?;
    let name = file_name(src)?;
    let (dest, mut out) = claim_slot(backup_dir, &name)
        .map_err(|e| ReconcileError::backup(format!("cannot claim backup slot for {name}: {e}")))?;

    let result = (|| -> io::Result<u64> {
        let mut input = File::open(src)?;
        let meta = input.metadata()?;
        let written = io::copy(&mut input, &mut out)?;
        out.sync_all()?;
        out.set_times(FileTimes::new().set_modified(meta.modified()?))?;
        let on_disk = fs::metadata(&dest)?.len();
        if written != meta.len() || on_disk != meta.len() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("length mismatch: source {} bytes, backup {on_disk} bytes", meta.len()),
            ));
        }
        Ok(on_disk)
    })();

    match result {
        Ok(len) => {
            debug!("Backed up {} -> {} ({len} bytes)", src.display(), dest.display());
            Ok(dest)
        }
        Err(e) => {
            drop(out);
            let _ = fs::remove_file(&dest);
            Err(ReconcileError::backup(format!("{}: {e}", src.display())))
        }
    }
}

/// Move `src` into `backup_dir`, never replacing an existing backup.
pub fn move_to_backup(src: &Path, backup_dir: &Path) -> Result<PathBuf> {
    ensure_dir(backup_dir)?;
    let name = file_name(src)?;
    let (dest, placeholder) = claim_slot(backup_dir, &name)
        .map_err(|e| ReconcileError::backup(format!("cannot claim backup slot for {name}: {e}")))?;
    drop(placeholder);

    // Renaming over our own empty placeholder is the no-clobber move
    if let Err(e) = fs::rename(src, &dest) {
        let _ = fs::remove_file(&dest);
        return Err(ReconcileError::backup(format!(
            "cannot move {} to {}: {e}",
            src.display(),
            dest.display()
        )));
    }
    debug!("Moved {} -> {}", src.display(), dest.display());
    Ok(dest)
}

// ============================================================================
// Staged writes
// ============================================================================

/// A temporary file in the destination's directory. Dropping it without
/// persisting removes it, so failed work leaves nothing behind.
pub struct Staged {
    file: NamedTempFile,
}

impl Staged {
    /// Stage an empty file in `dir`, named `.<random>.<extension>`.
    pub fn new_in(dir: &Path, extension: &str) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(".")
            .suffix(&format!(".{extension}"))
            .tempfile_in(dir)?;
        Ok(Self { file })
    }

    /// Stage a byte-for-byte copy of `src` in `dir`.
    pub fn copy_of(src: &Path, dir: &Path) -> Result<Self> {
        let extension = src
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut staged = Self::new_in(dir, &extension)?;
        let mut input = File::open(src)?;
        io::copy(&mut input, staged.file.as_file_mut())?;
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn as_file_mut(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Set the modification time of whatever file now sits at the staged
    /// path (metadata tools may have swapped it for a rewritten copy).
    pub fn set_modified(&self, modified: SystemTime) -> Result<()> {
        File::options()
            .write(true)
            .open(self.path())?
            .set_times(FileTimes::new().set_modified(modified))?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        File::open(self.path())?.sync_all()?;
        Ok(())
    }

    /// Move into place at `dest`; fails if `dest` already exists.
    pub fn persist_new(self, dest: &Path) -> Result<()> {
        self.sync()?;
        self.file.persist_noclobber(dest).map_err(|e| ReconcileError::Io(e.error))?;
        Ok(())
    }

    /// Atomically rename over `dest`.
    pub fn persist_over(self, dest: &Path) -> Result<()> {
        self.sync()?;
        self.file.persist(dest).map_err(|e| ReconcileError::Io(e.error))?;
        Ok(())
    }
}
