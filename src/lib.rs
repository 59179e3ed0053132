//! # pacs-etl
//!
//! Batch ETL pipeline that extracts DICOM file references and report text
//! from a PACS database, downloads the referenced files, optionally
//! converts them to JPEG, and uploads the results plus a CSV manifest to
//! object storage.
//!
//! ## Overview
//!
//! The source query joins studies → series → instances → files → report
//! fields, producing one row per (file, report-field) combination. The
//! pipeline pages through that result set, fans pages and batches out
//! across a worker pool with retry semantics, aggregates rows into one
//! record per physical file with report text rolled up at study level, and
//! checkpoints progress after every page so a crashed run resumes without
//! duplicating output.
//!
//! ## Module Organization
//!
//! - [`models`] - rows, file keys, records, and mergeable outcomes
//! - [`extract`] - paged database reads and file downloads
//! - [`transform`] - aggregation, DICOM→JPEG conversion, CSV manifest
//! - [`load`] - object storage uploads
//! - [`progress`] - durable checkpoint with atomic merge
//! - [`orchestration`] - dispatchers, batch/page runners, the pipeline
//! - [`config`] - environment-driven configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pacs_etl::config::EtlConfig;
//! use pacs_etl::extract::{HttpFileFetcher, PgPageReader};
//! use pacs_etl::load::GsutilStore;
//! use pacs_etl::orchestration::{EtlPipeline, OutputLayout};
//! use pacs_etl::progress::JsonProgressStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EtlConfig::from_env()?;
//! let pool = sqlx::PgPool::connect(&config.database_url).await?;
//! let layout = OutputLayout::prepare(&config.output_dir)?;
//!
//! let pipeline = EtlPipeline::new(
//!     config.clone(),
//!     layout.clone(),
//!     Arc::new(PgPageReader::new(pool, config.media_base_url.clone())),
//!     Arc::new(HttpFileFetcher::new(Duration::from_secs(60))),
//!     None,
//!     Arc::new(GsutilStore::new(config.bucket.clone())),
//!     Arc::new(JsonProgressStore::open(&layout.checkpoint_path)?),
//! );
//!
//! let summary = pipeline.run().await?;
//! println!("{} records written", summary.records_written);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod progress;
pub mod transform;

pub use config::EtlConfig;
pub use error::{EtlError, Result};
pub use models::{BatchOutcome, FileKey, FileRecord, PageOutcome, RunSummary, StudyFileRow};
pub use orchestration::{EtlPipeline, OutputLayout};
