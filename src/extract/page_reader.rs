//! Paged access to the DICOM files / report fields join.

use crate::error::{EtlError, Result};
use crate::models::StudyFileRow;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A paginated, read-only source of joined rows.
///
/// Pages are 1-indexed. Implementations must be side-effect-free and safe
/// to call repeatedly for the same page, because the dispatcher retries
/// page units after transient failures. Errors propagate to the caller as
/// retryable; nothing is caught or swallowed here.
#[async_trait]
pub trait PageReader: Send + Sync {
    /// Total number of rows in the result set. Executed once per run and
    /// cached by implementations.
    async fn total_count(&self) -> Result<u64>;

    /// Rows for `page_index` (1-indexed) at the given page size.
    async fn fetch_page(&self, page_index: u64, page_size: u64) -> Result<Vec<StudyFileRow>>;
}

const COUNT_SQL: &str = r"
SELECT COUNT(*)
FROM pacs_studies ps
INNER JOIN pacs_series pser ON pser.study_id = ps.id AND pser.deleted = FALSE
INNER JOIN pacs_instances pi ON pi.series_id = pser.id AND pi.deleted = FALSE
LEFT JOIN pacs_instance_files pif ON pif.instance_id = pi.id AND pif.deleted = FALSE
INNER JOIN pacs_reports pr ON pr.study_id = ps.id AND pr.deleted = FALSE
LEFT JOIN pacs_report_fields prf ON prf.report_id = pr.id AND prf.deleted = FALSE
WHERE ps.deleted = FALSE
";

const PAGE_SQL: &str = r"
SELECT
  ps.id AS study_id,
  pser.id AS series_id,
  pi.id AS instance_id,
  pi.dicom_number AS instance_number,
  pser.dicom_number AS series_number,
  pif.file AS file_path,
  CASE WHEN pif.file IS NULL THEN NULL ELSE CONCAT($3::text, pif.file) END AS file_url,
  prf.value AS report_field_value,
  prf.created_at AS report_field_created_at
FROM pacs_studies ps
INNER JOIN pacs_series pser ON pser.study_id = ps.id AND pser.deleted = FALSE
INNER JOIN pacs_instances pi ON pi.series_id = pser.id AND pi.deleted = FALSE
LEFT JOIN pacs_instance_files pif ON pif.instance_id = pi.id AND pif.deleted = FALSE
INNER JOIN pacs_reports pr ON pr.study_id = ps.id AND pr.deleted = FALSE
LEFT JOIN pacs_report_fields prf ON prf.report_id = pr.id AND prf.deleted = FALSE
WHERE ps.deleted = FALSE
ORDER BY ps.id, pser.dicom_number, pi.dicom_number, pif.file, prf.created_at, prf.id
OFFSET $1 LIMIT $2
";

/// [`PageReader`] over the PACS PostgreSQL database.
pub struct PgPageReader {
    pool: PgPool,
    media_base_url: String,
    total: OnceCell<u64>,
}

impl PgPageReader {
    pub fn new(pool: PgPool, media_base_url: impl Into<String>) -> Self {
        Self {
            pool,
            media_base_url: media_base_url.into(),
            total: OnceCell::new(),
        }
    }
}

#[async_trait]
impl PageReader for PgPageReader {
    async fn total_count(&self) -> Result<u64> {
        let count = self
            .total
            .get_or_try_init(|| async {
                let count: i64 = sqlx::query_scalar(COUNT_SQL)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| EtlError::database("total_count", e.to_string()))?;
                info!(total_rows = count, "counted source rows");
                Ok::<u64, EtlError>(count.max(0) as u64)
            })
            .await?;
        Ok(*count)
    }

    async fn fetch_page(&self, page_index: u64, page_size: u64) -> Result<Vec<StudyFileRow>> {
        let offset = page_index.saturating_sub(1) * page_size;
        debug!(page_index, offset, limit = page_size, "fetching page");

        let rows: Vec<StudyFileRow> = sqlx::query_as(PAGE_SQL)
            .bind(offset as i64)
            .bind(page_size as i64)
            .bind(&self.media_base_url)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EtlError::database("fetch_page", e.to_string()))?;

        debug!(page_index, rows = rows.len(), "fetched page");
        Ok(rows)
    }
}
