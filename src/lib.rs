//! photo_reconcile - photo library reconciliation and conversion
//!
//! Matches photos across directory trees by file name, replaces or merges
//! them while carrying embedded metadata along, converts HEIC stills to
//! JPEG/PNG, and keeps a backup before anything destructive happens.
//! Metadata work shells out to `exiftool`; HEIC decoding to `ffmpeg`.

pub mod backup;
pub mod codec;
pub mod config;
pub mod convert;
pub mod error;
pub mod fix_dates;
pub mod index;
pub mod live;
pub mod matcher;
pub mod metadata;
pub mod pool;
pub mod reconcile;
pub mod report;
pub mod tool;

pub use codec::{ImageCodec, TargetFormat, ToolCodec};
pub use config::PipelineConfig;
pub use convert::{ConversionRoute, ConvertOptions, ConvertedAsset, Converter};
pub use error::{FailureKind, ReconcileError, Result};
pub use fix_dates::DateFixer;
pub use index::{index, Asset, AssetSet};
pub use live::prune_live;
pub use matcher::{match_assets, Match, MatchSet};
pub use metadata::{CopyOptions, ExifTool, MetadataService, TagMap};
pub use reconcile::Reconciler;
pub use report::{Failure, OperationReport};
