//! DICOM to JPEG conversion through the external `dcm2jpg` tool.

use crate::error::{EtlError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Converts one local DICOM file into a JPEG.
///
/// A failed conversion is a partial error: the owning batch records it and
/// keeps the file record, it never aborts the batch.
#[async_trait]
pub trait DicomConverter: Send + Sync {
    async fn convert(&self, dicom_path: &Path, jpg_path: &Path) -> Result<()>;
}

const CANDIDATE_PATHS: &[&str] = &[
    "/usr/local/dcm2jpg/bin/dcm2jpg.sh",
    "/usr/local/bin/dcm2jpg",
];

/// [`DicomConverter`] shelling out to `dcm2jpg`.
pub struct Dcm2JpgConverter {
    executable: PathBuf,
    quality: f64,
    timeout: Duration,
}

impl Dcm2JpgConverter {
    pub fn new(quality: f64, timeout: Duration) -> Self {
        Self {
            executable: locate_executable(),
            quality,
            timeout,
        }
    }
}

fn locate_executable() -> PathBuf {
    for candidate in CANDIDATE_PATHS {
        if Path::new(candidate).exists() {
            return PathBuf::from(candidate);
        }
    }
    // Fall back to PATH resolution at spawn time.
    PathBuf::from("dcm2jpg")
}

#[async_trait]
impl DicomConverter for Dcm2JpgConverter {
    async fn convert(&self, dicom_path: &Path, jpg_path: &Path) -> Result<()> {
        let display = dicom_path.display().to_string();

        if let Some(parent) = jpg_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EtlError::io(format!("creating {}", parent.display()), e))?;
        }

        let command = tokio::process::Command::new(&self.executable)
            .arg("-q")
            .arg(self.quality.to_string())
            .arg(dicom_path)
            .arg(jpg_path)
            .output();

        let output = tokio::time::timeout(self.timeout, command)
            .await
            .map_err(|_| {
                EtlError::conversion(
                    display.clone(),
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| EtlError::conversion(display.clone(), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EtlError::conversion(
                display,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        debug!(
            dicom = %dicom_path.display(),
            jpg = %jpg_path.display(),
            "converted file"
        );
        Ok(())
    }
}
