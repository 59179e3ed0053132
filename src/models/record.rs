//! Aggregated per-file records, one CSV row each.

use super::row::FileKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One aggregated record per distinct [`FileKey`].
///
/// Created once during aggregation of a batch and immutable once written to
/// the manifest; reruns skip the key instead of mutating the record.
/// `report_value` holds the study-level aggregate of every report field
/// value seen for the owning study (empty when the study has no report
/// text), not just the fields that joined through this file's rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_key: FileKey,
    pub study_id: i64,
    pub series_number: Option<i32>,
    pub instance_id: i64,
    pub instance_number: Option<i32>,
    pub file_path: String,
    pub file_url: Option<String>,
    pub report_value: String,
    pub field_created_at: Option<DateTime<Utc>>,
    pub downloaded: bool,
    pub local_file_path: String,
    pub jpg_path: String,
}
