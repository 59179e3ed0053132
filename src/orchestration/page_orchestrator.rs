//! # Page Orchestrator
//!
//! Fetches one page of rows, splits it into batches, fans the batches out
//! through the dispatcher, and merges their outcomes into one
//! [`PageOutcome`].
//!
//! The page fetch is the only fallible step: its error propagates so the
//! page-level dispatcher can retry the whole unit (re-fetching a page is
//! idempotent). Everything after the fetch is carried as data in the
//! outcome.

use crate::error::Result;
use crate::extract::PageReader;
use crate::models::{FileKey, PageOutcome};
use crate::orchestration::batch_runner::BatchRunner;
use crate::orchestration::dispatcher::{Dispatcher, UnitOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct PageOrchestrator {
    reader: Arc<dyn PageReader>,
    runner: Arc<BatchRunner>,
    dispatcher: Arc<Dispatcher>,
    batch_size: usize,
}

impl PageOrchestrator {
    pub fn new(
        reader: Arc<dyn PageReader>,
        runner: Arc<BatchRunner>,
        dispatcher: Arc<Dispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            reader,
            runner,
            dispatcher,
            batch_size,
        }
    }

    /// Process one page against a snapshot of already-processed keys.
    ///
    /// Every batch runs against the same snapshot; keys produced by one
    /// batch are invisible to its siblings, and the duplicate records that
    /// can cause are resolved at manifest-write time rather than
    /// suppressed here.
    #[instrument(skip(self, processed))]
    pub async fn run(
        &self,
        page_index: u64,
        page_size: u64,
        processed: Arc<HashSet<FileKey>>,
    ) -> Result<PageOutcome> {
        let rows = self.reader.fetch_page(page_index, page_size).await?;
        if rows.is_empty() {
            debug!(page_index, "page is empty");
            return Ok(PageOutcome::empty(page_index));
        }

        let batches = split_into_batches(rows, self.batch_size);
        let mut outcome = PageOutcome::empty(page_index);
        outcome.batches_dispatched = batches.len();

        let mut units = Vec::with_capacity(batches.len());
        for (batch_index, batch) in batches.into_iter().enumerate() {
            let runner = self.runner.clone();
            let processed = processed.clone();
            let batch = Arc::new(batch);
            units.push(move || {
                let runner = runner.clone();
                let processed = processed.clone();
                let batch = batch.clone();
                async move { Ok(runner.run(batch_index, &batch, &processed).await) }
            });
        }

        for unit in self.dispatcher.dispatch_group(units).await {
            match unit {
                UnitOutcome::Completed { value, .. } => outcome.absorb_batch(value),
                UnitOutcome::Exhausted {
                    unit_index,
                    attempts,
                    error,
                } => outcome.errors.push(format!(
                    "page {page_index} batch {unit_index}: failed after {attempts} attempts: {error}"
                )),
                UnitOutcome::TimedOut { unit_index } => outcome.errors.push(format!(
                    "page {page_index} batch {unit_index}: did not complete before the group timeout"
                )),
            }
        }

        info!(
            page_index,
            batches = outcome.batches_dispatched,
            rows = outcome.rows_processed,
            files = outcome.files_found,
            downloaded = outcome.files_downloaded,
            errors = outcome.errors.len(),
            "page complete"
        );
        Ok(outcome)
    }
}

/// Split rows into fixed-size batches, preserving order.
///
/// Every row lands in exactly one batch; the last batch holds the
/// remainder.
pub fn split_into_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut batch = Vec::with_capacity(batch_size.min(items.len()));
    for item in items {
        batch.push(item);
        if batch.len() == batch_size {
            batches.push(std::mem::take(&mut batch));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}
