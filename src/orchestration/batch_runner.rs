//! # Batch Runner
//!
//! Processes one batch of rows end to end: aggregate, download referenced
//! files, optionally convert, and account for everything in a
//! [`BatchOutcome`].
//!
//! Failure isolation is per file: a download or conversion failure is
//! recorded in the outcome's error list and the record is kept with
//! `downloaded = false`, never dropped. The runner itself is infallible —
//! it always returns an outcome, so nothing it does can abort a sibling
//! batch or the owning page.

use crate::extract::FileFetcher;
use crate::models::{BatchOutcome, FileKey, StudyFileRow};
use crate::transform::{DicomConverter, RowAggregator};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct BatchRunner {
    aggregator: RowAggregator,
    fetcher: Arc<dyn FileFetcher>,
    converter: Option<Arc<dyn DicomConverter>>,
    dicom_dir: PathBuf,
    jpg_dir: PathBuf,
}

impl BatchRunner {
    pub fn new(
        aggregator: RowAggregator,
        fetcher: Arc<dyn FileFetcher>,
        converter: Option<Arc<dyn DicomConverter>>,
        dicom_dir: PathBuf,
        jpg_dir: PathBuf,
    ) -> Self {
        Self {
            aggregator,
            fetcher,
            converter,
            dicom_dir,
            jpg_dir,
        }
    }

    /// Process one batch against a snapshot of already-processed keys.
    ///
    /// The snapshot is taken at page dispatch; sibling batches do not see
    /// each other's new keys, and the resulting duplicates are resolved at
    /// manifest-write time.
    pub async fn run(
        &self,
        batch_index: usize,
        rows: &[StudyFileRow],
        processed: &HashSet<FileKey>,
    ) -> BatchOutcome {
        let (mut records, new_file_keys) = self.aggregator.process_batch(rows, processed);

        let mut outcome = BatchOutcome {
            batch_index,
            rows_processed: rows.len(),
            files_found: records.len(),
            ..BatchOutcome::default()
        };

        for record in &mut records {
            let Some(url) = record.file_url.clone() else {
                continue;
            };
            let destination = self.dicom_dir.join(format!("{}.dcm", record.instance_id));
            let fetch = self.fetcher.download(&url, &destination).await;

            if !fetch.downloaded {
                outcome.errors.push(
                    fetch
                        .error
                        .unwrap_or_else(|| format!("download failed: {url}")),
                );
                continue;
            }

            record.downloaded = true;
            record.local_file_path = fetch.local_path.display().to_string();
            outcome.files_downloaded += 1;

            if let Some(converter) = &self.converter {
                let jpg_path = self.jpg_dir.join(format!("{}.jpg", record.instance_id));
                match converter.convert(&fetch.local_path, &jpg_path).await {
                    Ok(()) => {
                        record.jpg_path = jpg_path.display().to_string();
                        outcome.files_converted += 1;
                    }
                    Err(err) => outcome.errors.push(err.to_string()),
                }
            }
        }

        outcome.csv_rows = records;
        outcome.new_file_keys = new_file_keys;

        info!(
            batch_index,
            rows = outcome.rows_processed,
            files = outcome.files_found,
            downloaded = outcome.files_downloaded,
            converted = outcome.files_converted,
            errors = outcome.errors.len(),
            "batch complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FetchResult;
    use async_trait::async_trait;
    use std::path::Path;

    /// Fetcher that fails for URLs containing a marker substring.
    struct FlakyFetcher {
        fail_marker: &'static str,
    }

    #[async_trait]
    impl FileFetcher for FlakyFetcher {
        async fn download(&self, url: &str, destination: &Path) -> FetchResult {
            if url.contains(self.fail_marker) {
                FetchResult {
                    downloaded: false,
                    local_path: destination.to_path_buf(),
                    error: Some(format!("{url}: 404 Not Found")),
                }
            } else {
                FetchResult {
                    downloaded: true,
                    local_path: destination.to_path_buf(),
                    error: None,
                }
            }
        }
    }

    fn row(instance_id: i64, file_name: &str) -> StudyFileRow {
        StudyFileRow {
            study_id: 1,
            series_id: 2,
            instance_id,
            instance_number: Some(1),
            series_number: Some(1),
            file_path: Some(file_name.to_string()),
            file_url: Some(format!("https://media.test/{file_name}")),
            report_field_value: Some("Findings: clear".to_string()),
            report_field_created_at: None,
        }
    }

    fn runner(fail_marker: &'static str) -> BatchRunner {
        BatchRunner::new(
            RowAggregator::default(),
            Arc::new(FlakyFetcher { fail_marker }),
            None,
            PathBuf::from("/tmp/batch-runner-test/dicom"),
            PathBuf::from("/tmp/batch-runner-test/jpg"),
        )
    }

    #[tokio::test]
    async fn one_failed_download_does_not_abort_the_batch() {
        let rows: Vec<_> = (1..=5)
            .map(|i| row(i, &format!("file-{i}.dcm")))
            .collect();
        // file-3 is the one that fails.
        let outcome = runner("file-3").run(0, &rows, &HashSet::new()).await;

        assert_eq!(outcome.files_found, 5);
        assert_eq!(outcome.files_downloaded, 4);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("file-3"));
        assert_eq!(outcome.csv_rows.len(), 5);

        let failed = outcome
            .csv_rows
            .iter()
            .find(|r| r.file_path == "file-3.dcm")
            .unwrap();
        assert!(!failed.downloaded);
        assert!(failed.local_file_path.is_empty());
    }

    #[tokio::test]
    async fn processed_keys_are_not_reprocessed() {
        let rows = vec![row(1, "a.dcm"), row(2, "b.dcm")];
        let processed: HashSet<FileKey> = rows[0].file_key().into_iter().collect();

        let outcome = runner("no-match").run(0, &rows, &processed).await;

        assert_eq!(outcome.files_found, 1);
        assert_eq!(outcome.files_downloaded, 1);
        assert_eq!(outcome.rows_processed, 2);
        assert_eq!(outcome.new_file_keys.len(), 1);
    }

    #[tokio::test]
    async fn rows_without_urls_are_kept_undownloaded() {
        let mut no_url = row(1, "a.dcm");
        no_url.file_url = None;

        let outcome = runner("no-match").run(0, &[no_url], &HashSet::new()).await;

        assert_eq!(outcome.files_found, 1);
        assert_eq!(outcome.files_downloaded, 0);
        assert!(outcome.errors.is_empty());
        assert!(!outcome.csv_rows[0].downloaded);
    }
}
