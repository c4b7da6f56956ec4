//! Merge and replace across two photo trees
//!
//! ## Replace
//!
//! Each match moves through `Pending → BackedUp → Replaced`, or fails from
//! either of the first two states. The states are types: only a
//! [`BackedUp`] match can overwrite its primary, so no destructive write
//! happens before the backup has been verified.
//!
//! ## Merge
//!
//! Source files whose name is absent from the target are copied to the same
//! relative path under the target. Name presence alone skips a file, so a
//! second merge of unchanged trees copies nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backup::{backup_copy, ensure_dir, Staged};
use crate::config::{PipelineConfig, MERGE_BACKUP_DIR, MERGE_SUFFIXES, REPLACE_BACKUP_DIR, REPLACE_SUFFIXES};
use crate::error::{ReconcileError, Result};
use crate::index::{scan_both, Asset};
use crate::matcher::{match_assets, Match};
use crate::metadata::{CopyOptions, MetadataService};
use crate::pool::{blocking, run_ordered};
use crate::report::{Operation, OperationReport, Timer};

// ============================================================================
// Replace state machine
// ============================================================================

/// A match nothing has been done to yet.
pub struct Pending<'a> {
    pub m: &'a Match,
}

/// The primary has a verified, tagged copy in the backup directory.
pub struct BackedUp<'a> {
    pub m: &'a Match,
    pub backup: PathBuf,
}

/// The primary now holds the reference's pixels and its own original tags.
#[derive(Debug, Clone)]
pub struct Replaced {
    pub primary: PathBuf,
    pub backup: PathBuf,
}

impl<'a> Pending<'a> {
    /// Copy the primary into `backup_dir` and transplant its tags onto the
    /// copy. Any failure abandons the match with the primary untouched.
    pub async fn back_up(
        self,
        metadata: &dyn MetadataService,
        backup_dir: &Path,
    ) -> Result<BackedUp<'a>> {
        let src = self.m.primary.path.clone();
        let dir = backup_dir.to_path_buf();
        let backup = blocking(move || backup_copy(&src, &dir))
            .await
            .map_err(|e| match e {
                ReconcileError::Backup(_) => e,
                other => ReconcileError::backup(other),
            })?;

        if let Err(e) = metadata
            .copy_tags(&self.m.primary.path, &backup, &CopyOptions::all())
            .await
        {
            // Incomplete record; the match is abandoned
            if let Err(cleanup) = tokio::fs::remove_file(&backup).await {
                warn!("Cannot remove untagged backup {}: {cleanup}", backup.display());
            }
            return Err(ReconcileError::backup(format!("tagging backup failed: {e}")));
        }

        debug!("{}: backed up to {}", self.m.primary.name, backup.display());
        Ok(BackedUp { m: self.m, backup })
    }
}

impl BackedUp<'_> {
    /// Stage the reference's bytes next to the primary, transplant the
    /// original tags from the backup, then rename over the primary.
    ///
    /// On failure the primary is byte-identical to its pre-run state and the
    /// backup stays in place.
    pub async fn replace(self, metadata: &dyn MetadataService) -> Result<Replaced> {
        let primary = self.m.primary.path.clone();
        let reference = self.m.reference.path.clone();
        let dir = primary
            .parent()
            .ok_or_else(|| ReconcileError::replace("primary has no parent directory"))?
            .to_path_buf();

        let staged = blocking(move || Staged::copy_of(&reference, &dir))
            .await
            .map_err(ReconcileError::replace)?;

        metadata
            .copy_tags(&self.backup, staged.path(), &CopyOptions::all())
            .await
            .map_err(ReconcileError::replace)?;

        let dest = primary.clone();
        blocking(move || staged.persist_over(&dest))
            .await
            .map_err(ReconcileError::replace)?;

        Ok(Replaced {
            primary,
            backup: self.backup,
        })
    }
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler {
    metadata: Arc<dyn MetadataService>,
    config: PipelineConfig,
}

impl Reconciler {
    pub fn new(metadata: Arc<dyn MetadataService>, config: PipelineConfig) -> Self {
        Self { metadata, config }
    }

    /// Replace primary photos with same-named reference photos, keeping the
    /// primary's metadata and a backup of each original.
    pub async fn replace(
        &self,
        primary_root: &Path,
        reference_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<OperationReport> {
        let timer = Timer::new();
        let (primary, reference) =
            scan_both(primary_root, REPLACE_SUFFIXES, reference_root, REPLACE_SUFFIXES).await?;

        let mut report = OperationReport::new(Operation::Replace);
        report.note_index_issues(&primary);
        report.note_index_issues(&reference);

        let matched = match_assets(&primary.assets, &reference.assets);
        report.note_ambiguities(&matched.ambiguous);
        info!(
            "Found {} matching photos ({} primary photos without a counterpart)",
            matched.matches.len(),
            matched.unmatched.len()
        );
        if matched.matches.is_empty() {
            return Ok(report.finish(&timer));
        }

        let backup_dir = primary.root.join(REPLACE_BACKUP_DIR);
        ensure_dir(&backup_dir)?;

        let results = run_ordered(&matched.matches, self.config.workers, cancel, |m| {
            self.replace_match(m, &backup_dir)
        })
        .await;

        for (m, result) in matched.matches.iter().zip(results) {
            if let Err(e) = &result {
                warn!("Failed to replace {}: {e}", m.primary.path.display());
            }
            report.record(&m.primary.path, &result);
        }
        Ok(report.finish(&timer))
    }

    async fn replace_match(&self, m: &Match, backup_dir: &Path) -> Result<Replaced> {
        let metadata = self.metadata.as_ref();
        let backed_up = Pending { m }.back_up(metadata, backup_dir).await?;
        let replaced = backed_up.replace(metadata).await?;
        debug!(
            "Replaced {} with {}",
            replaced.primary.display(),
            m.reference.path.display()
        );
        Ok(replaced)
    }

    /// Copy source photos whose name is absent from the target into the
    /// target, mirroring their relative paths.
    pub async fn merge(
        &self,
        source_root: &Path,
        target_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<OperationReport> {
        let timer = Timer::new();
        let (source, target) =
            scan_both(source_root, MERGE_SUFFIXES, target_root, MERGE_SUFFIXES).await?;
        ensure_dir(&target.root.join(MERGE_BACKUP_DIR))?;

        let mut report = OperationReport::new(Operation::Merge);
        report.note_index_issues(&source);
        report.note_index_issues(&target);

        let eligible = match_assets(&source.assets, &target.assets).unmatched;
        let mut seen = HashSet::new();
        let (plan, duplicates): (Vec<Asset>, Vec<Asset>) =
            eligible.into_iter().partition(|a| seen.insert(a.key.clone()));
        info!(
            "{} of {} source photos are missing from the target",
            plan.len(),
            source.len()
        );

        let results = run_ordered(&plan, self.config.workers, cancel, |asset| {
            self.merge_one(asset, &target.root)
        })
        .await;

        for (asset, result) in plan.iter().zip(results) {
            if let Err(e) = &result {
                warn!("Failed to merge {}: {e}", asset.path.display());
            }
            report.record(&asset.path, &result);
        }
        for asset in &duplicates {
            report.record_skip(
                &asset.path,
                format!("another source file named {} was merged", asset.name),
            );
        }
        Ok(report.finish(&timer))
    }

    async fn merge_one(&self, asset: &Asset, target_root: &Path) -> Result<PathBuf> {
        let dest = target_root.join(&asset.relative_path);
        let dir = dest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| target_root.to_path_buf());

        let src = asset.path.clone();
        let staged = blocking(move || {
            std::fs::create_dir_all(&dir)?;
            Staged::copy_of(&src, &dir)
        })
        .await?;

        self.metadata
            .copy_tags(&asset.path, staged.path(), &CopyOptions::all())
            .await?;
        let (src, to) = (asset.path.clone(), dest.clone());
        blocking(move || {
            if let Ok(modified) = std::fs::metadata(&src).and_then(|m| m.modified()) {
                staged.set_modified(modified)?;
            }
            staged.persist_new(&to)
        })
        .await?;

        debug!("Merged {} -> {}", asset.path.display(), dest.display());
        Ok(dest)
    }
}
