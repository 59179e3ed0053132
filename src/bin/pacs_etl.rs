//! Pipeline entrypoint: wire up the real collaborators and run once.

use anyhow::{Context, Result};
use pacs_etl::config::EtlConfig;
use pacs_etl::extract::{HttpFileFetcher, PgPageReader};
use pacs_etl::load::GsutilStore;
use pacs_etl::logging::init_logging;
use pacs_etl::orchestration::{EtlPipeline, OutputLayout};
use pacs_etl::progress::JsonProgressStore;
use pacs_etl::transform::{Dcm2JpgConverter, DicomConverter};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const CONVERT_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = EtlConfig::from_env().context("loading configuration")?;
    info!(
        output_dir = %config.output_dir.display(),
        page_size = config.page_size,
        batch_size = config.batch_size,
        bucket = %config.bucket,
        "starting pacs-etl"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_concurrent_units as u32 + 2)
        .connect(&config.database_url)
        .await
        .context("connecting to the PACS database")?;

    let layout = OutputLayout::prepare(&config.output_dir).context("preparing output directory")?;

    let converter: Option<Arc<dyn DicomConverter>> = if config.convert_enabled {
        Some(Arc::new(Dcm2JpgConverter::new(
            config.jpeg_quality,
            CONVERT_TIMEOUT,
        )))
    } else {
        None
    };

    let pipeline = EtlPipeline::new(
        config.clone(),
        layout.clone(),
        Arc::new(PgPageReader::new(pool, config.media_base_url.clone())),
        Arc::new(HttpFileFetcher::new(Duration::from_secs(
            config.download_timeout_secs,
        ))),
        converter,
        Arc::new(GsutilStore::new(config.bucket.clone())),
        Arc::new(
            JsonProgressStore::open(&layout.checkpoint_path).context("opening checkpoint")?,
        ),
    );

    let summary = pipeline.run().await.context("pipeline run failed")?;

    if summary.errors.is_empty() {
        info!("run finished with no errors");
    } else {
        for message in &summary.errors {
            error!(error = %message, "recorded during run");
        }
        error!(errors = summary.errors.len(), "run finished with errors");
    }

    println!(
        "pages {}/{} | records {} | processed {} | downloaded {} | converted {} | uploaded {} | errors {} | {:.1}s",
        summary.pages_completed,
        summary.total_pages,
        summary.records_written,
        summary.files_processed,
        summary.files_downloaded,
        summary.files_converted,
        summary.files_uploaded,
        summary.errors.len(),
        summary.total_duration.as_secs_f64(),
    );

    Ok(())
}
