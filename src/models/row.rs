//! Raw query rows and the file identity key derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// One row of the source query.
///
/// The query joins studies → series → instances → instance files → report
/// fields, so the same physical file appears once per report field that
/// joined against its study. A row with no attached file (`file_path` is
/// NULL) still carries report text that belongs to the study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StudyFileRow {
    pub study_id: i64,
    pub series_id: i64,
    pub instance_id: i64,
    pub instance_number: Option<i32>,
    pub series_number: Option<i32>,
    pub file_path: Option<String>,
    pub file_url: Option<String>,
    pub report_field_value: Option<String>,
    pub report_field_created_at: Option<DateTime<Utc>>,
}

impl StudyFileRow {
    /// The file identity of this row, or `None` for report-only rows.
    pub fn file_key(&self) -> Option<FileKey> {
        let file_path = self.file_path.as_deref()?;
        if file_path.is_empty() {
            return None;
        }
        Some(FileKey {
            study_id: self.study_id,
            series_id: self.series_id,
            instance_id: self.instance_id,
            file_path: file_path.to_string(),
        })
    }
}

/// Unique identity of one physical file across the entire run.
///
/// Invariant: however many report fields joined against a file, all of its
/// rows produce the same key, and two distinct files never share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub study_id: i64,
    pub series_id: i64,
    pub instance_id: i64,
    pub file_path: String,
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.study_id, self.series_id, self.instance_id, self.file_path
        )
    }
}
