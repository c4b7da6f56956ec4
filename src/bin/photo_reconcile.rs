// photo_reconcile - command line front end
// Per-file failures are listed in the report; only invocation errors exit non-zero

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use photo_reconcile::metadata::exiftool_available;
use photo_reconcile::{
    prune_live, ConvertOptions, Converter, DateFixer, ExifTool, MetadataService, OperationReport,
    PipelineConfig, Reconciler, TargetFormat, ToolCodec,
};

#[derive(Parser)]
#[command(name = "photo_reconcile", version, about = "Reconcile, merge and convert photo libraries")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Files processed concurrently (default: available cores)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Timeout for each exiftool/ffmpeg invocation, in seconds
    #[arg(long, global = true, default_value_t = 60)]
    tool_timeout: u64,

    /// ExifTool executable
    #[arg(long, global = true, default_value = "exiftool")]
    exiftool: PathBuf,

    /// ffmpeg executable
    #[arg(long, global = true, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Set file times from the capture date in each file's metadata
    FixDates { dir: PathBuf },

    /// Convert HEIC/HEIF stills to JPEG or PNG
    Convert {
        dir: PathBuf,

        /// Output format (jpg or png)
        #[arg(long, default_value = "jpg")]
        format: TargetFormat,

        /// Use the embedded edited preview for edited photos
        #[arg(long)]
        preserve_edits: bool,

        /// Move converted originals into _converted_photos_backup
        #[arg(long)]
        remove_original: bool,
    },

    /// Copy photos missing from TARGET over from SOURCE
    Merge { source: PathBuf, target: PathBuf },

    /// Replace PRIMARY photos with same-named REFERENCE photos, keeping metadata
    Replace { primary: PathBuf, reference: PathBuf },

    /// Move live-photo MOV companions of IMG_*.HEIC files aside
    PruneLive { dir: PathBuf },
}

impl Args {
    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default()
            .with_tool_timeout(Duration::from_secs(self.tool_timeout.max(1)));
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        config.exiftool = self.exiftool.clone();
        config.ffmpeg = self.ffmpeg.clone();
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr, so --json output stays clean)
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level))
        )
        .init();

    let config = args.config();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: finishing files in progress, skipping the rest");
            on_interrupt.cancel();
        }
    });

    let report = run(&args.command, config, &cancel).await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!();
        print!("{report}");
    }
    Ok(())
}

async fn run(
    command: &Command,
    config: PipelineConfig,
    cancel: &CancellationToken,
) -> Result<OperationReport> {
    info!("Using {} workers", config.workers);

    match command {
        Command::FixDates { dir } => DateFixer::new(metadata_service(&config)?, config)
            .fix_all(dir, cancel)
            .await
            .with_context(|| format!("Cannot fix dates under {}", dir.display())),

        Command::Convert {
            dir,
            format,
            preserve_edits,
            remove_original,
        } => {
            let metadata = metadata_service(&config)?;
            let codec = ToolCodec::new(exiftool(&config), &config.ffmpeg)
                .with_timeout(config.tool_timeout);
            let options = ConvertOptions {
                format: *format,
                preserve_edits: *preserve_edits,
                remove_original: *remove_original,
            };
            Converter::new(metadata, Arc::new(codec), config)
                .convert_all(dir, options, cancel)
                .await
                .with_context(|| format!("Cannot convert under {}", dir.display()))
        }

        Command::Merge { source, target } => Reconciler::new(metadata_service(&config)?, config)
            .merge(source, target, cancel)
            .await
            .with_context(|| roots_context("merge", source, target)),

        Command::Replace { primary, reference } => {
            Reconciler::new(metadata_service(&config)?, config)
                .replace(primary, reference, cancel)
                .await
                .with_context(|| roots_context("replace", primary, reference))
        }

        Command::PruneLive { dir } => {
            prune_live(dir).with_context(|| format!("Cannot prune {}", dir.display()))
        }
    }
}

fn exiftool(config: &PipelineConfig) -> ExifTool {
    ExifTool::new(&config.exiftool).with_timeout(config.tool_timeout)
}

fn metadata_service(config: &PipelineConfig) -> Result<Arc<dyn MetadataService>> {
    if !exiftool_available(&config.exiftool) {
        bail!(
            "exiftool not found (looked for {}); install it or pass --exiftool",
            config.exiftool.display()
        );
    }
    Ok(Arc::new(exiftool(config)))
}

fn roots_context(op: &str, a: &Path, b: &Path) -> String {
    format!("Cannot {op} {} and {}", a.display(), b.display())
}
