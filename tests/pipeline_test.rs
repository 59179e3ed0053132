//! End-to-end pipeline tests against in-memory collaborators.
//!
//! The page reader, file fetcher, and object store are mocks; the progress
//! store is the real JSON-file implementation, since resume semantics are
//! what these tests exercise.

use async_trait::async_trait;
use pacs_etl::config::EtlConfig;
use pacs_etl::error::{EtlError, Result};
use pacs_etl::extract::{FetchResult, FileFetcher, PageReader};
use pacs_etl::load::ObjectStore;
use pacs_etl::models::StudyFileRow;
use pacs_etl::orchestration::{EtlPipeline, OutputLayout};
use pacs_etl::progress::{JsonProgressStore, ProgressStore};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

fn row(study_id: i64, instance_id: i64, value: &str) -> StudyFileRow {
    StudyFileRow {
        study_id,
        series_id: study_id * 10,
        instance_id,
        instance_number: Some(1),
        series_number: Some(1),
        file_path: Some(format!("files/file-{instance_id}.dcm")),
        file_url: Some(format!("https://media.test/files/file-{instance_id}.dcm")),
        report_field_value: Some(value.to_string()),
        report_field_created_at: None,
    }
}

fn report_only_row(study_id: i64, value: &str) -> StudyFileRow {
    StudyFileRow {
        study_id,
        series_id: study_id * 10,
        instance_id: study_id * 1000,
        instance_number: None,
        series_number: None,
        file_path: None,
        file_url: None,
        report_field_value: Some(value.to_string()),
        report_field_created_at: None,
    }
}

/// Paged reader over fixed in-memory pages, with optional scripted
/// transient failures per page.
struct MockPageReader {
    pages: Vec<Vec<StudyFileRow>>,
    failures: Mutex<HashMap<u64, u32>>,
}

impl MockPageReader {
    fn new(pages: Vec<Vec<StudyFileRow>>) -> Self {
        Self {
            pages,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failing(mut self, page_index: u64, times: u32) -> Self {
        self.failures.get_mut().unwrap().insert(page_index, times);
        self
    }
}

#[async_trait]
impl PageReader for MockPageReader {
    async fn total_count(&self) -> Result<u64> {
        Ok(self.pages.iter().map(|p| p.len() as u64).sum())
    }

    async fn fetch_page(&self, page_index: u64, _page_size: u64) -> Result<Vec<StudyFileRow>> {
        if let Some(remaining) = self.failures.lock().unwrap().get_mut(&page_index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EtlError::database("fetch_page", "simulated outage"));
            }
        }
        Ok(self
            .pages
            .get(page_index as usize - 1)
            .cloned()
            .unwrap_or_default())
    }
}

/// Fetcher that writes a stub file on success and fails for URLs
/// containing a marker.
struct MockFetcher {
    fail_marker: Option<&'static str>,
}

#[async_trait]
impl FileFetcher for MockFetcher {
    async fn download(&self, url: &str, destination: &Path) -> FetchResult {
        if let Some(marker) = self.fail_marker {
            if url.contains(marker) {
                return FetchResult {
                    downloaded: false,
                    local_path: destination.to_path_buf(),
                    error: Some(format!("{url}: 404 Not Found")),
                };
            }
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(destination, b"dicom-bytes").await.unwrap();
        FetchResult {
            downloaded: true,
            local_path: destination.to_path_buf(),
            error: None,
        }
    }
}

/// Object store that records destinations instead of uploading.
#[derive(Default)]
struct RecordingStore {
    uploads: Mutex<Vec<String>>,
    fail_files: bool,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload_file(&self, _local_path: &Path, remote_path: &str) -> Result<()> {
        if self.fail_files {
            return Err(EtlError::storage(remote_path, "bucket unavailable"));
        }
        self.uploads.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }

    async fn upload_directory(&self, _local_dir: &Path, remote_prefix: &str) -> Result<()> {
        self.uploads.lock().unwrap().push(remote_prefix.to_string());
        Ok(())
    }
}

struct Harness {
    _workdir: tempfile::TempDir,
    layout: OutputLayout,
    config: EtlConfig,
    store: Arc<RecordingStore>,
}

impl Harness {
    fn new(page_size: u64) -> Self {
        Self::with_sizes(page_size, 4)
    }

    fn with_sizes(page_size: u64, batch_size: usize) -> Self {
        let workdir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::prepare(workdir.path().join("run")).unwrap();
        let mut config = EtlConfig::default();
        config.output_dir = layout.root.clone();
        config.page_size = page_size;
        config.batch_size = batch_size;
        config.convert_enabled = false;
        config.backoff_base_ms = 1;
        config.backoff_max_ms = 5;
        config.group_timeout_secs = 10;
        Self {
            _workdir: workdir,
            layout,
            config,
            store: Arc::new(RecordingStore::default()),
        }
    }

    fn pipeline(&self, reader: MockPageReader, fail_marker: Option<&'static str>) -> EtlPipeline {
        EtlPipeline::new(
            self.config.clone(),
            self.layout.clone(),
            Arc::new(reader),
            Arc::new(MockFetcher { fail_marker }),
            None,
            self.store.clone(),
            Arc::new(JsonProgressStore::open(&self.layout.checkpoint_path).unwrap()),
        )
    }

    fn progress(&self) -> JsonProgressStore {
        JsonProgressStore::open(&self.layout.checkpoint_path).unwrap()
    }

    fn manifest(&self) -> String {
        std::fs::read_to_string(&self.layout.csv_path).unwrap()
    }
}

fn two_pages() -> Vec<Vec<StudyFileRow>> {
    vec![
        vec![
            row(1, 100, "Impression: normal"),
            row(1, 101, "Findings: clear"),
            row(1, 100, "Findings: clear"),
            report_only_row(1, "Technique: PA"),
        ],
        vec![
            row(2, 200, "No acute disease"),
            row(2, 201, "No acute disease"),
            row(3, 300, "Cardiomegaly"),
        ],
    ]
}

#[tokio::test]
async fn full_run_extracts_downloads_and_uploads() {
    let harness = Harness::new(4);
    let pipeline = harness.pipeline(MockPageReader::new(two_pages()), None);

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.total_rows, 7);
    assert_eq!(summary.total_pages, 2);
    assert_eq!(summary.pages_completed, 2);
    // Five distinct files: 100, 101, 200, 201, 300.
    assert_eq!(summary.records_written, 5);
    assert_eq!(summary.files_processed, 5);
    assert_eq!(summary.files_downloaded, 5);
    // Manifest plus five files in the dicom directory.
    assert_eq!(summary.files_uploaded, 6);
    assert!(summary.errors.is_empty());

    let state = harness.progress().load().unwrap();
    assert_eq!(state.current_page, 2);
    assert_eq!(state.processed_file_count, 5);

    let uploads = harness.store.uploads.lock().unwrap();
    assert!(uploads.iter().any(|u| u.ends_with(".csv")));
    assert!(uploads.iter().any(|u| u.contains("dicom-files")));
}

#[tokio::test]
async fn study_report_text_reaches_every_file_in_the_study() {
    let harness = Harness::new(4);
    let pipeline = harness.pipeline(MockPageReader::new(two_pages()), None);
    pipeline.run().await.unwrap();

    let manifest = harness.manifest();
    // Both study-1 files carry all three study-1 field values, including
    // the one that joined through a file-less row.
    let study1_rows: Vec<&str> = manifest
        .lines()
        .filter(|l| l.contains("file-100") || l.contains("file-101"))
        .collect();
    assert_eq!(study1_rows.len(), 2);
    for line in study1_rows {
        assert!(line.contains("Impression: normal | Findings: clear | Technique: PA"));
    }
}

#[tokio::test]
async fn second_run_emits_nothing_new() {
    let harness = Harness::new(4);

    let first = harness
        .pipeline(MockPageReader::new(two_pages()), None)
        .run()
        .await
        .unwrap();
    let keys_after_first = harness.progress().load().unwrap().processed_file_keys;

    let second = harness
        .pipeline(MockPageReader::new(two_pages()), None)
        .run()
        .await
        .unwrap();
    let keys_after_second = harness.progress().load().unwrap().processed_file_keys;

    assert_eq!(first.records_written, 5);
    assert_eq!(second.records_written, 0);
    assert_eq!(second.files_downloaded, 0);
    assert_eq!(keys_after_first, keys_after_second);
}

#[tokio::test]
async fn duplicate_keys_across_sibling_batches_collapse_in_the_manifest() {
    // batch_size 1 forces the duplicate rows of file-100 into separate
    // batches running against the same processed-key snapshot.
    let harness = Harness::with_sizes(3, 1);
    let page = vec![row(1, 100, "first"), row(1, 100, "second"), row(1, 101, "third")];

    let summary = harness
        .pipeline(MockPageReader::new(vec![page]), None)
        .run()
        .await
        .unwrap();

    // Both duplicate batches download the file, but the manifest and the
    // checkpoint both collapse to one entry per key.
    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.files_processed, 2);
    assert_eq!(summary.files_downloaded, 3);

    let manifest = harness.manifest();
    let file_100_rows = manifest.lines().filter(|l| l.contains("file-100")).count();
    assert_eq!(file_100_rows, 1);
}

#[tokio::test]
async fn restart_reprocesses_the_checkpoint_page_without_duplicates() {
    let harness = Harness::with_sizes(2, 2);
    let pages = vec![
        vec![row(1, 100, "a"), row(1, 101, "a")],
        vec![row(2, 200, "b"), row(2, 201, "b")],
        vec![row(3, 300, "c"), row(3, 301, "c")],
    ];

    // Simulate a run that completed pages 1-2 and crashed inside page 3:
    // the checkpoint holds pages 1-2 keys and current_page = 3.
    {
        let store = harness.progress();
        let seeded: HashSet<_> = pages[0]
            .iter()
            .chain(&pages[1])
            .filter_map(|r| r.file_key())
            .collect();
        store.merge(&seeded, 3).unwrap();
    }

    let summary = harness
        .pipeline(MockPageReader::new(pages), None)
        .run()
        .await
        .unwrap();

    // Only page 3 produced records; nothing from pages 1-2 reappears.
    assert_eq!(summary.records_written, 2);
    let manifest = harness.manifest();
    assert!(!manifest.contains("file-100"));
    assert!(!manifest.contains("file-200"));
    assert!(manifest.contains("file-300"));
    assert!(manifest.contains("file-301"));

    assert_eq!(harness.progress().load().unwrap().processed_file_count, 6);
}

#[tokio::test]
async fn failed_download_is_recorded_not_fatal() {
    let harness = Harness::new(5);
    let page = vec![
        row(1, 100, "a"),
        row(1, 101, "a"),
        row(1, 102, "a"),
        row(1, 103, "a"),
        row(1, 104, "a"),
    ];

    let summary = harness
        .pipeline(MockPageReader::new(vec![page]), Some("file-102"))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.records_written, 5);
    assert_eq!(summary.files_downloaded, 4);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("file-102"));

    // The failed file keeps its manifest row, marked undownloaded.
    let manifest = harness.manifest();
    let failed_line = manifest
        .lines()
        .find(|l| l.contains("file-102"))
        .unwrap();
    assert!(failed_line.contains("false"));
}

#[tokio::test]
async fn transient_page_failures_are_retried_to_success() {
    let harness = Harness::new(4);
    let reader = MockPageReader::new(two_pages()).failing(1, 2);

    let summary = harness.pipeline(reader, None).run().await.unwrap();

    assert!(summary.errors.is_empty());
    assert_eq!(summary.pages_completed, 2);
    assert_eq!(summary.records_written, 5);
}

#[tokio::test]
async fn exhausted_page_is_an_error_entry_not_an_abort() {
    let harness = Harness::new(4);
    let reader = MockPageReader::new(two_pages()).failing(2, 99);

    let summary = harness.pipeline(reader, None).run().await.unwrap();

    assert_eq!(summary.pages_completed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("page 2"));
    assert!(summary.errors[0].contains("3 attempts"));
    // Page 1's work still landed.
    assert_eq!(summary.records_written, 2);
    assert!(harness.progress().load().unwrap().processed_file_count >= 2);
}

#[tokio::test]
async fn upload_failures_do_not_block_other_uploads() {
    let workdir = tempfile::tempdir().unwrap();
    let layout = OutputLayout::prepare(workdir.path().join("run")).unwrap();
    let mut config = EtlConfig::default();
    config.output_dir = layout.root.clone();
    config.page_size = 4;
    config.batch_size = 2;
    config.convert_enabled = false;
    config.backoff_base_ms = 1;
    config.backoff_max_ms = 5;

    let store = Arc::new(RecordingStore {
        uploads: Mutex::new(Vec::new()),
        fail_files: true,
    });
    let pipeline = EtlPipeline::new(
        config,
        layout.clone(),
        Arc::new(MockPageReader::new(two_pages())),
        Arc::new(MockFetcher { fail_marker: None }),
        None,
        store.clone(),
        Arc::new(JsonProgressStore::open(&layout.checkpoint_path).unwrap()),
    );

    let summary = pipeline.run().await.unwrap();

    // The manifest upload failed but the directory upload went through.
    assert!(summary.errors.iter().any(|e| e.contains("bucket unavailable")));
    assert_eq!(summary.files_uploaded, 5);
    let uploads = store.uploads.lock().unwrap();
    assert!(uploads.iter().any(|u| u.contains("dicom-files")));
}
