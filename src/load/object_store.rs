//! Object storage uploads through the `gsutil` CLI.

use crate::error::{EtlError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Uploads local files to a cloud bucket.
///
/// Both operations overwrite on conflict. Failures during the Load phase
/// are recorded by the pipeline, not raised past it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a single file to `remote_path` under the store's bucket.
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Upload the contents of a directory under `remote_prefix`.
    async fn upload_directory(&self, local_dir: &Path, remote_prefix: &str) -> Result<()>;
}

const CANDIDATE_PATHS: &[&str] = &[
    "/usr/local/google-cloud-sdk/bin/gsutil",
    "/root/google-cloud-sdk/bin/gsutil",
];

/// [`ObjectStore`] backed by Google Cloud Storage via `gsutil`.
pub struct GsutilStore {
    bucket: String,
    executable: PathBuf,
}

impl GsutilStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            executable: locate_executable(),
        }
    }

    async fn run(&self, args: &[&str], destination: &str) -> Result<()> {
        let output = tokio::process::Command::new(&self.executable)
            .args(args)
            .output()
            .await
            .map_err(|e| EtlError::storage(destination, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EtlError::storage(
                destination,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

fn locate_executable() -> PathBuf {
    for candidate in CANDIDATE_PATHS {
        if Path::new(candidate).exists() {
            return PathBuf::from(candidate);
        }
    }
    PathBuf::from("gsutil")
}

#[async_trait]
impl ObjectStore for GsutilStore {
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let destination = format!("gs://{}/{}", self.bucket, remote_path);
        let local = local_path.display().to_string();

        self.run(&["cp", &local, &destination], &destination).await?;
        info!(local = %local, destination = %destination, "uploaded file");
        Ok(())
    }

    async fn upload_directory(&self, local_dir: &Path, remote_prefix: &str) -> Result<()> {
        let destination = format!("gs://{}/{}", self.bucket, remote_prefix);
        // Copy the directory's contents, not the directory itself.
        let source = local_dir.join(".").display().to_string();

        self.run(&["-m", "cp", "-r", &source, &destination], &destination)
            .await?;
        info!(local = %local_dir.display(), destination = %destination, "uploaded directory");
        Ok(())
    }
}
