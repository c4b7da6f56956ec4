//! File timestamps from embedded capture dates

use chrono::{Local, NaiveDateTime, TimeZone};
use std::fs::{File, FileTimes};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, NATIVE_EXIF_SUFFIXES};
use crate::error::{ReconcileError, Result};
use crate::index::{scan, Asset};
use crate::metadata::{read_native_exif_date, MetadataService};
use crate::pool::run_ordered;
use crate::report::{Operation, OperationReport, Timer};
use crate::tool::{find_in_path, ToolCommand};

/// Sets each file's access and modification time (and, on macOS, its
/// creation date) to the capture date found in its metadata.
pub struct DateFixer {
    metadata: Arc<dyn MetadataService>,
    config: PipelineConfig,
    set_file: Option<PathBuf>,
}

impl DateFixer {
    pub fn new(metadata: Arc<dyn MetadataService>, config: PipelineConfig) -> Self {
        let set_file = if cfg!(target_os = "macos") {
            find_in_path("SetFile")
        } else {
            None
        };
        Self {
            metadata,
            config,
            set_file,
        }
    }

    /// Override the `SetFile` binary used for creation dates (`None` skips
    /// creation dates entirely).
    pub fn with_set_file(mut self, set_file: Option<PathBuf>) -> Self {
        self.set_file = set_file;
        self
    }

    /// Capture date from the metadata service, falling back to the native
    /// EXIF reader for image files.
    pub async fn capture_date(&self, asset: &Asset) -> Result<NaiveDateTime> {
        let from_tags = match asset.metadata(self.metadata.as_ref()).await {
            Ok(tags) => tags.capture_date(),
            Err(e) => {
                debug!("{}: metadata read failed: {e}", asset.path.display());
                None
            }
        };
        if let Some(date) = from_tags {
            return Ok(date);
        }

        if NATIVE_EXIF_SUFFIXES.contains(&asset.suffix.as_str()) {
            let path = asset.path.clone();
            let native = tokio::task::spawn_blocking(move || read_native_exif_date(&path))
                .await
                .ok()
                .flatten();
            if let Some(date) = native {
                return Ok(date);
            }
        }

        Err(ReconcileError::MetadataRead(
            "no creation date found in metadata".to_string(),
        ))
    }

    async fn fix_one(&self, asset: &Asset) -> Result<NaiveDateTime> {
        let date = self.capture_date(asset).await?;

        if let Some(set_file) = &self.set_file {
            ToolCommand::new(set_file)
                .arg("-d")
                .arg(date.format("%m/%d/%Y %H:%M:%S").to_string())
                .path(&asset.path)
                .timeout(self.config.tool_timeout)
                .execute()
                .await?;
        }

        set_file_times(&asset.path, local_time(date))?;
        debug!("{}: dated {}", asset.path.display(), date);
        Ok(date)
    }

    /// Fix the dates of every file under `root`.
    pub async fn fix_all(&self, root: &Path, cancel: &CancellationToken) -> Result<OperationReport> {
        let timer = Timer::new();
        let set = scan(root, &[]).await?;
        info!("Found {} files under {}", set.len(), set.root.display());
        if self.set_file.is_none() && cfg!(target_os = "macos") {
            warn!("SetFile not found; only access and modification times will be set");
        }

        let mut report = OperationReport::new(Operation::FixDates);
        report.note_index_issues(&set);

        let results = run_ordered(&set.assets, self.config.workers, cancel, |asset| {
            self.fix_one(asset)
        })
        .await;

        for (asset, result) in set.assets.iter().zip(results) {
            if let Err(e) = &result {
                warn!("{}: {e}", asset.path.display());
            }
            report.record(&asset.path, &result);
        }
        Ok(report.finish(&timer))
    }
}

/// A naive capture date read as local wall-clock time.
pub fn local_time(date: NaiveDateTime) -> SystemTime {
    // A wall-clock time skipped by a DST jump has no local instant
    let instant = Local
        .from_local_datetime(&date)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&date));
    SystemTime::from(instant)
}

fn set_file_times(path: &Path, time: SystemTime) -> Result<()> {
    let file = File::open(path)?;
    file.set_times(FileTimes::new().set_accessed(time).set_modified(time))?;
    Ok(())
}
