//! CSV manifest output.

use crate::error::{EtlError, Result};
use crate::models::FileRecord;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

const COLUMNS: &[&str] = &[
    "file_key",
    "study_id",
    "series_number",
    "instance_id",
    "instance_number",
    "file_path",
    "file_url",
    "report_value",
    "field_created_at",
    "downloaded",
    "local_file_path",
    "jpg_path",
];

/// Writes the run's file records to a UTF-8 CSV manifest.
pub struct ManifestWriter;

impl ManifestWriter {
    /// Write `records` to `path`, de-duplicating by [`crate::models::FileKey`].
    ///
    /// Sibling batches within a page may emit the same key; the first
    /// occurrence wins here. A record with an empty `report_value` is still
    /// written. Returns the number of rows written.
    pub fn write(path: &Path, records: &[FileRecord]) -> Result<usize> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| {
            EtlError::io(
                format!("creating manifest {}", path.display()),
                std::io::Error::other(e),
            )
        })?;
        writer
            .write_record(COLUMNS)
            .map_err(|e| manifest_error(path, e))?;

        let mut seen = HashSet::new();
        let mut written = 0usize;
        for record in records {
            if !seen.insert(&record.file_key) {
                continue;
            }
            writer
                .write_record([
                    record.file_key.to_string(),
                    record.study_id.to_string(),
                    optional_number(record.series_number),
                    record.instance_id.to_string(),
                    optional_number(record.instance_number),
                    record.file_path.clone(),
                    record.file_url.clone().unwrap_or_default(),
                    record.report_value.clone(),
                    record
                        .field_created_at
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_default(),
                    record.downloaded.to_string(),
                    record.local_file_path.clone(),
                    record.jpg_path.clone(),
                ])
                .map_err(|e| manifest_error(path, e))?;
            written += 1;
        }

        writer.flush().map_err(|e| {
            EtlError::io(format!("flushing manifest {}", path.display()), e)
        })?;

        info!(path = %path.display(), rows = written, "wrote manifest");
        Ok(written)
    }
}

fn optional_number(value: Option<i32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn manifest_error(path: &Path, err: csv::Error) -> EtlError {
    EtlError::io(
        format!("writing manifest {}", path.display()),
        std::io::Error::other(err),
    )
}
