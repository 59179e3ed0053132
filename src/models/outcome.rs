//! Results merged upward through the two fan-out levels.
//!
//! All merge operations are commutative and associative (sums, unions,
//! concatenations whose order is not meaningful), so sibling batches and
//! sibling pages can complete in any order without changing the run-level
//! totals.

use super::record::FileRecord;
use super::row::FileKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Result of processing one batch of rows.
///
/// A batch always produces an outcome; failures inside it are carried in
/// `errors` rather than propagated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_index: usize,
    pub rows_processed: usize,
    pub files_found: usize,
    pub files_downloaded: usize,
    pub files_converted: usize,
    pub csv_rows: Vec<FileRecord>,
    pub errors: Vec<String>,
    /// Keys newly processed in this batch, merged into the checkpoint by
    /// the caller without re-deriving them from `csv_rows`.
    pub new_file_keys: HashSet<FileKey>,
}

/// Merged result of all batches in one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    pub page_index: u64,
    pub batches_dispatched: usize,
    pub rows_processed: usize,
    pub files_found: usize,
    pub files_downloaded: usize,
    pub files_converted: usize,
    pub csv_rows: Vec<FileRecord>,
    pub errors: Vec<String>,
    pub new_file_keys: HashSet<FileKey>,
}

impl PageOutcome {
    pub fn empty(page_index: u64) -> Self {
        Self {
            page_index,
            batches_dispatched: 0,
            rows_processed: 0,
            files_found: 0,
            files_downloaded: 0,
            files_converted: 0,
            csv_rows: Vec::new(),
            errors: Vec::new(),
            new_file_keys: HashSet::new(),
        }
    }

    /// Fold one batch outcome into this page.
    pub fn absorb_batch(&mut self, batch: BatchOutcome) {
        self.rows_processed += batch.rows_processed;
        self.files_found += batch.files_found;
        self.files_downloaded += batch.files_downloaded;
        self.files_converted += batch.files_converted;
        self.csv_rows.extend(batch.csv_rows);
        self.errors.extend(batch.errors);
        self.new_file_keys.extend(batch.new_file_keys);
    }
}

/// Run-level summary returned by the pipeline.
///
/// `errors` is the single source of truth for everything that went wrong; a
/// run with errors still reports the counts of everything that succeeded.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total_rows: u64,
    pub total_pages: u64,
    pub pages_completed: usize,
    pub records_written: usize,
    pub files_processed: usize,
    pub files_downloaded: usize,
    pub files_converted: usize,
    pub files_uploaded: usize,
    pub errors: Vec<String>,
    pub count_duration: Duration,
    pub extract_duration: Duration,
    pub upload_duration: Duration,
    pub total_duration: Duration,
}

impl RunSummary {
    /// Fold one page outcome into the run totals.
    ///
    /// CSV rows are accumulated by the pipeline separately because they are
    /// de-duplicated by [`FileKey`] at manifest-write time.
    pub fn absorb_page(&mut self, page: &PageOutcome) {
        self.pages_completed += 1;
        self.files_downloaded += page.files_downloaded;
        self.files_converted += page.files_converted;
        self.errors.extend(page.errors.iter().cloned());
    }
}
