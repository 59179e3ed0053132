//! # Configuration
//!
//! Environment-driven pipeline configuration. Every knob has a default that
//! works for local development and can be overridden with a `PACS_ETL_*`
//! environment variable. Invalid values fail fast with
//! [`EtlError::Configuration`] rather than being silently replaced.

use crate::error::{EtlError, Result};
use crate::transform::aggregator::ReportAggregation;
use std::path::PathBuf;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct EtlConfig {
    /// PostgreSQL connection string for the PACS database
    pub database_url: String,
    /// Destination bucket for the CSV manifest and binary files
    pub bucket: String,
    /// Key prefix under the bucket for everything this run uploads
    pub remote_prefix: String,
    /// Base URL the source query prepends to relative file paths
    pub media_base_url: String,
    /// Local working directory (downloads, conversions, CSV, checkpoint)
    pub output_dir: PathBuf,
    /// Rows per page of the source query
    pub page_size: u64,
    /// Rows per batch within a page
    pub batch_size: usize,
    /// Maximum units of work (pages or batches) in flight at once
    pub max_concurrent_units: usize,
    /// Upper bound on waiting for a dispatch group to finish
    pub group_timeout_secs: u64,
    /// Per-file download timeout
    pub download_timeout_secs: u64,
    /// Whether downloaded DICOM files are converted to JPEG
    pub convert_enabled: bool,
    /// JPEG quality passed to the converter (0.0 to 1.0)
    pub jpeg_quality: f64,
    /// How report field values are combined per study
    pub aggregation: ReportAggregation,
    /// Attempts per unit of work before it is recorded as failed
    pub retry_limit: u32,
    /// Base delay before the first retry
    pub backoff_base_ms: u64,
    /// Ceiling on the backoff delay
    pub backoff_max_ms: u64,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/pacs_development".to_string(),
            bucket: "pacs-etl-dev".to_string(),
            remote_prefix: "dicom-reports".to_string(),
            media_base_url: "https://files.example.org/media/".to_string(),
            output_dir: PathBuf::from("pacs-etl-output"),
            page_size: 25,
            batch_size: 25,
            max_concurrent_units: 10,
            group_timeout_secs: 3600,
            download_timeout_secs: 60,
            convert_enabled: true,
            jpeg_quality: 1.0,
            aggregation: ReportAggregation::default(),
            retry_limit: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
        }
    }
}

impl EtlConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }
        if let Ok(bucket) = std::env::var("PACS_ETL_BUCKET") {
            config.bucket = bucket;
        }
        if let Ok(prefix) = std::env::var("PACS_ETL_REMOTE_PREFIX") {
            config.remote_prefix = prefix;
        }
        if let Ok(base) = std::env::var("PACS_ETL_MEDIA_BASE_URL") {
            config.media_base_url = base;
        }
        if let Ok(dir) = std::env::var("PACS_ETL_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(page_size) = std::env::var("PACS_ETL_PAGE_SIZE") {
            config.page_size = parse_field("PACS_ETL_PAGE_SIZE", &page_size)?;
        }
        if let Ok(batch_size) = std::env::var("PACS_ETL_BATCH_SIZE") {
            config.batch_size = parse_field("PACS_ETL_BATCH_SIZE", &batch_size)?;
        }
        if let Ok(max_units) = std::env::var("PACS_ETL_MAX_CONCURRENT_UNITS") {
            config.max_concurrent_units = parse_field("PACS_ETL_MAX_CONCURRENT_UNITS", &max_units)?;
        }
        if let Ok(timeout) = std::env::var("PACS_ETL_GROUP_TIMEOUT_SECS") {
            config.group_timeout_secs = parse_field("PACS_ETL_GROUP_TIMEOUT_SECS", &timeout)?;
        }
        if let Ok(timeout) = std::env::var("PACS_ETL_DOWNLOAD_TIMEOUT_SECS") {
            config.download_timeout_secs = parse_field("PACS_ETL_DOWNLOAD_TIMEOUT_SECS", &timeout)?;
        }
        if let Ok(enabled) = std::env::var("PACS_ETL_CONVERT_ENABLED") {
            config.convert_enabled = parse_field("PACS_ETL_CONVERT_ENABLED", &enabled)?;
        }
        if let Ok(quality) = std::env::var("PACS_ETL_JPEG_QUALITY") {
            config.jpeg_quality = parse_field("PACS_ETL_JPEG_QUALITY", &quality)?;
        }
        if let Ok(retry_limit) = std::env::var("PACS_ETL_RETRY_LIMIT") {
            config.retry_limit = parse_field("PACS_ETL_RETRY_LIMIT", &retry_limit)?;
        }
        if let Ok(base) = std::env::var("PACS_ETL_BACKOFF_BASE_MS") {
            config.backoff_base_ms = parse_field("PACS_ETL_BACKOFF_BASE_MS", &base)?;
        }
        if let Ok(max) = std::env::var("PACS_ETL_BACKOFF_MAX_MS") {
            config.backoff_max_ms = parse_field("PACS_ETL_BACKOFF_MAX_MS", &max)?;
        }
        config.aggregation = aggregation_from_env(config.aggregation)?;

        if config.page_size == 0 {
            return Err(EtlError::configuration(
                "PACS_ETL_PAGE_SIZE",
                "page size must be at least 1",
            ));
        }
        if config.batch_size == 0 {
            return Err(EtlError::configuration(
                "PACS_ETL_BATCH_SIZE",
                "batch size must be at least 1",
            ));
        }
        if config.max_concurrent_units == 0 {
            return Err(EtlError::configuration(
                "PACS_ETL_MAX_CONCURRENT_UNITS",
                "concurrency must be at least 1",
            ));
        }

        Ok(config)
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| EtlError::configuration(field, format!("invalid value {raw:?}: {e}")))
}

fn aggregation_from_env(current: ReportAggregation) -> Result<ReportAggregation> {
    let Ok(mode) = std::env::var("PACS_ETL_REPORT_AGGREGATION") else {
        return Ok(current);
    };
    match mode.as_str() {
        "join_all" => {
            let separator = std::env::var("PACS_ETL_REPORT_SEPARATOR")
                .unwrap_or_else(|_| " | ".to_string());
            Ok(ReportAggregation::JoinAll { separator })
        }
        "latest_wins" => Ok(ReportAggregation::LatestWins),
        other => Err(EtlError::configuration(
            "PACS_ETL_REPORT_AGGREGATION",
            format!("expected \"join_all\" or \"latest_wins\", got {other:?}"),
        )),
    }
}
