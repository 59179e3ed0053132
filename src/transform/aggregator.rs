//! # Row Aggregation
//!
//! Collapses the one-row-per-(file, report-field) join into one record per
//! distinct file, with report text aggregated at study granularity: a
//! report attached to the study is attached to every file under that
//! study, even when the field row joined through a different series or
//! instance.
//!
//! This is also the idempotency enforcement point: keys present in the
//! caller's already-processed set are skipped, guaranteeing at-most-once
//! record emission per [`FileKey`] across reruns.

use crate::models::{FileKey, FileRecord, StudyFileRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How report field values are combined into one `report_value` per study.
///
/// The rule must be deterministic and applied uniformly across the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportAggregation {
    /// Join every distinct value, in first-seen order, with a separator.
    JoinAll { separator: String },
    /// Keep only the value with the most recent `created_at`.
    LatestWins,
}

impl Default for ReportAggregation {
    fn default() -> Self {
        Self::JoinAll {
            separator: " | ".to_string(),
        }
    }
}

/// Aggregates a batch of rows into CSV-ready records.
#[derive(Debug, Clone, Default)]
pub struct RowAggregator {
    policy: ReportAggregation,
}

impl RowAggregator {
    pub fn new(policy: ReportAggregation) -> Self {
        Self { policy }
    }

    /// Process one batch of rows against a snapshot of processed keys.
    ///
    /// Returns the records emitted for keys not yet seen, plus the set of
    /// those keys so the caller can merge them into the checkpoint without
    /// re-deriving them from the records.
    ///
    /// Rows with no file path contribute their report text to the study
    /// but produce no record; rows with no report value aggregate as
    /// absent.
    pub fn process_batch(
        &self,
        rows: &[StudyFileRow],
        already_processed: &HashSet<FileKey>,
    ) -> (Vec<FileRecord>, HashSet<FileKey>) {
        // Pass 1: collect distinct report values per study across the whole
        // batch, keeping first-seen order.
        let mut study_reports: HashMap<i64, Vec<(String, Option<DateTime<Utc>>)>> = HashMap::new();
        for row in rows {
            let Some(value) = row.report_field_value.as_deref() else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let entries = study_reports.entry(row.study_id).or_default();
            if !entries.iter().any(|(existing, _)| existing == value) {
                entries.push((value.to_string(), row.report_field_created_at));
            }
        }

        // Pass 2: one record per unseen file key, first-seen order.
        let mut records = Vec::new();
        let mut new_keys = HashSet::new();
        for row in rows {
            let Some(key) = row.file_key() else {
                continue;
            };
            if already_processed.contains(&key) || new_keys.contains(&key) {
                continue;
            }

            let (report_value, field_created_at) =
                self.aggregate_reports(study_reports.get(&row.study_id));

            records.push(FileRecord {
                file_key: key.clone(),
                study_id: row.study_id,
                series_number: row.series_number,
                instance_id: row.instance_id,
                instance_number: row.instance_number,
                file_path: key.file_path.clone(),
                file_url: row.file_url.clone(),
                report_value,
                field_created_at,
                downloaded: false,
                local_file_path: String::new(),
                jpg_path: String::new(),
            });
            new_keys.insert(key);
        }

        debug!(
            rows = rows.len(),
            files = records.len(),
            studies = study_reports.len(),
            "aggregated batch"
        );
        (records, new_keys)
    }

    fn aggregate_reports(
        &self,
        entries: Option<&Vec<(String, Option<DateTime<Utc>>)>>,
    ) -> (String, Option<DateTime<Utc>>) {
        let Some(entries) = entries.filter(|e| !e.is_empty()) else {
            return (String::new(), None);
        };

        let latest_created = entries.iter().filter_map(|(_, created)| *created).max();
        let value = match &self.policy {
            ReportAggregation::JoinAll { separator } => entries
                .iter()
                .map(|(value, _)| value.as_str())
                .collect::<Vec<_>>()
                .join(separator),
            ReportAggregation::LatestWins => {
                let mut best = &entries[0];
                for entry in &entries[1..] {
                    if entry.1 > best.1 {
                        best = entry;
                    }
                }
                best.0.clone()
            }
        };
        (value, latest_created)
    }
}
