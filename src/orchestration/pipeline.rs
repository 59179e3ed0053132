//! # Pipeline Orchestrator
//!
//! Top-level sequencing of a run: Init → Extract → Transform → Load →
//! Complete.
//!
//! Init failures (unreachable database, corrupt checkpoint) propagate and
//! the run produces no summary. From Extract onward every failure is data:
//! page outcomes carry their own error lists, exhausted or timed-out pages
//! are recorded as error strings, and the Load phase records upload
//! failures without blocking its other uploads. The pipeline always
//! reaches Complete because every dispatched group has a bounded wait.
//!
//! Progress is checkpointed as each page finishes, so a crash loses at
//! most one page of work, and a restarted run re-processes the checkpoint
//! page rather than trusting it completed — key de-duplication makes the
//! redundant work safe.

use crate::config::EtlConfig;
use crate::error::Result;
use crate::extract::{FileFetcher, PageReader};
use crate::load::ObjectStore;
use crate::models::{FileRecord, RunSummary};
use crate::orchestration::batch_runner::BatchRunner;
use crate::orchestration::dispatcher::{Dispatcher, DispatcherConfig, UnitOutcome};
use crate::orchestration::page_orchestrator::PageOrchestrator;
use crate::progress::ProgressStore;
use crate::transform::{DicomConverter, ManifestWriter, RowAggregator};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub const MANIFEST_FILE: &str = "dicom-reports-extracted.csv";
pub const CHECKPOINT_FILE: &str = "extraction_progress.json";
const DICOM_DIR: &str = "dicom_files";
const JPG_DIR: &str = "images_jpg";

/// Local working directories and file paths owned by one pipeline.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub dicom_dir: PathBuf,
    pub jpg_dir: PathBuf,
    pub csv_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl OutputLayout {
    /// Build the layout under `root` and create the directories.
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let layout = Self {
            dicom_dir: root.join(DICOM_DIR),
            jpg_dir: root.join(JPG_DIR),
            csv_path: root.join(MANIFEST_FILE),
            checkpoint_path: root.join(CHECKPOINT_FILE),
            root,
        };
        for dir in [&layout.root, &layout.dicom_dir, &layout.jpg_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| crate::error::EtlError::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(layout)
    }
}

pub struct EtlPipeline {
    config: EtlConfig,
    layout: OutputLayout,
    reader: Arc<dyn PageReader>,
    progress: Arc<dyn ProgressStore>,
    object_store: Arc<dyn ObjectStore>,
    page_orchestrator: Arc<PageOrchestrator>,
    page_dispatcher: Dispatcher,
}

impl EtlPipeline {
    pub fn new(
        config: EtlConfig,
        layout: OutputLayout,
        reader: Arc<dyn PageReader>,
        fetcher: Arc<dyn FileFetcher>,
        converter: Option<Arc<dyn DicomConverter>>,
        object_store: Arc<dyn ObjectStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        let runner = Arc::new(BatchRunner::new(
            RowAggregator::new(config.aggregation.clone()),
            fetcher,
            converter,
            layout.dicom_dir.clone(),
            layout.jpg_dir.clone(),
        ));

        // Pages and batches draw permits from separate pools: with a shared
        // semaphore, waiting pages could hold every permit their own
        // batches need.
        let dispatcher_config = DispatcherConfig::from_pipeline_config(&config);
        let batch_dispatcher = Arc::new(Dispatcher::new(dispatcher_config.clone()));
        let page_dispatcher = Dispatcher::new(dispatcher_config);

        let page_orchestrator = Arc::new(PageOrchestrator::new(
            reader.clone(),
            runner,
            batch_dispatcher,
            config.batch_size,
        ));

        Self {
            config,
            layout,
            reader,
            progress,
            object_store,
            page_orchestrator,
            page_dispatcher,
        }
    }

    /// Execute the full run and return its summary.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RunSummary> {
        let run_started = Instant::now();
        let mut summary = RunSummary::default();

        // Init
        let progress_state = self.progress.load()?;
        let count_started = Instant::now();
        let total_rows = self.reader.total_count().await?;
        summary.count_duration = count_started.elapsed();

        let total_pages = total_rows.div_ceil(self.config.page_size);
        // The checkpoint page is re-run, not skipped: it is not assumed
        // complete, and key de-duplication absorbs the overlap.
        let start_page = progress_state.current_page.max(1);
        summary.total_rows = total_rows;
        summary.total_pages = total_pages;

        info!(
            total_rows,
            total_pages,
            start_page,
            page_size = self.config.page_size,
            batch_size = self.config.batch_size,
            resumed = progress_state.current_page > 0,
            "starting extraction"
        );

        // Extract
        let extract_started = Instant::now();
        let mut csv_rows = Vec::new();
        self.extract_pages(
            start_page,
            total_pages,
            &progress_state.processed_file_keys,
            &mut summary,
            &mut csv_rows,
        )
        .await;
        summary.extract_duration = extract_started.elapsed();

        // Transform
        summary.records_written = ManifestWriter::write(&self.layout.csv_path, &csv_rows)?;

        // Load
        let upload_started = Instant::now();
        self.upload_outputs(&mut summary).await;
        summary.upload_duration = upload_started.elapsed();

        // Complete
        if let Err(err) = self.progress.merge(&HashSet::new(), total_pages) {
            summary.errors.push(format!("final checkpoint merge failed: {err}"));
        }
        summary.files_processed = self.progress.load()?.processed_file_count;
        summary.total_duration = run_started.elapsed();

        info!(
            total_rows = summary.total_rows,
            pages_completed = summary.pages_completed,
            records_written = summary.records_written,
            files_processed = summary.files_processed,
            files_downloaded = summary.files_downloaded,
            files_converted = summary.files_converted,
            files_uploaded = summary.files_uploaded,
            errors = summary.errors.len(),
            count_secs = summary.count_duration.as_secs_f64(),
            extract_secs = summary.extract_duration.as_secs_f64(),
            upload_secs = summary.upload_duration.as_secs_f64(),
            total_secs = summary.total_duration.as_secs_f64(),
            "extraction and upload complete"
        );
        Ok(summary)
    }

    async fn extract_pages(
        &self,
        start_page: u64,
        total_pages: u64,
        processed_keys: &HashSet<crate::models::FileKey>,
        summary: &mut RunSummary,
        csv_rows: &mut Vec<FileRecord>,
    ) {
        if start_page > total_pages {
            return;
        }

        // Every page runs against the snapshot taken at Init.
        let processed = Arc::new(processed_keys.clone());
        let page_size = self.config.page_size;

        let mut units = Vec::with_capacity((total_pages - start_page + 1) as usize);
        for page_index in start_page..=total_pages {
            let orchestrator = self.page_orchestrator.clone();
            let processed = processed.clone();
            units.push(move || {
                let orchestrator = orchestrator.clone();
                let processed = processed.clone();
                async move { orchestrator.run(page_index, page_size, processed).await }
            });
        }

        info!(pages = units.len(), "dispatching page units");
        let mut group = self.page_dispatcher.dispatch(units);

        // Merge and checkpoint each page as it arrives, so finished pages
        // survive even if a later page fails.
        while let Some(outcome) = group.join_next().await {
            match outcome {
                UnitOutcome::Completed { value: page, .. } => {
                    if let Err(err) = self.progress.merge(&page.new_file_keys, page.page_index) {
                        warn!(page_index = page.page_index, error = %err, "checkpoint merge failed");
                        summary
                            .errors
                            .push(format!("page {}: checkpoint merge failed: {err}", page.page_index));
                    }
                    summary.absorb_page(&page);
                    csv_rows.extend(page.csv_rows);
                }
                UnitOutcome::Exhausted {
                    unit_index,
                    attempts,
                    error,
                } => {
                    let page_index = start_page + unit_index as u64;
                    summary.errors.push(format!(
                        "page {page_index}: failed after {attempts} attempts: {error}"
                    ));
                }
                UnitOutcome::TimedOut { unit_index } => {
                    let page_index = start_page + unit_index as u64;
                    summary.errors.push(format!(
                        "page {page_index}: did not complete before the group timeout"
                    ));
                }
            }
        }
    }

    async fn upload_outputs(&self, summary: &mut RunSummary) {
        let csv_remote = format!("{}/{MANIFEST_FILE}", self.config.remote_prefix);
        match self
            .object_store
            .upload_file(&self.layout.csv_path, &csv_remote)
            .await
        {
            Ok(()) => summary.files_uploaded += 1,
            Err(err) => summary.errors.push(err.to_string()),
        }

        for (dir, remote_dir) in [
            (&self.layout.dicom_dir, "dicom-files"),
            (&self.layout.jpg_dir, "images-jpg"),
        ] {
            let file_count = count_files(dir);
            if file_count == 0 {
                continue;
            }
            let remote_prefix = format!("{}/{remote_dir}/", self.config.remote_prefix);
            match self
                .object_store
                .upload_directory(dir, &remote_prefix)
                .await
            {
                Ok(()) => summary.files_uploaded += file_count,
                Err(err) => summary.errors.push(err.to_string()),
            }
        }
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    #[test]
    fn page_math_uses_ceiling_division() {
        assert_eq!(200u64.div_ceil(25), 8);
        assert_eq!(201u64.div_ceil(25), 9);
        assert_eq!(0u64.div_ceil(25), 0);
        assert_eq!(1u64.div_ceil(25), 1);
    }
}
