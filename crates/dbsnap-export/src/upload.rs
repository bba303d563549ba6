use crate::compress::CompressedArtifact;
use crate::error::{ExportError, Result};
use crate::layout::{Destination, OutputLayout};
use crate::storage::ObjectStore;
use dbsnap_common::checksum::sha256_file;
use dbsnap_common::CommonError;
use std::sync::Arc;
use tracing::{info, instrument};

/// Outcome of one delivered artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub destination: Destination,
    pub size: u64,
    pub sha256: String,
}

/// Puts compressed artifacts into the object store
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn destination(&self, layout: &OutputLayout, artifact: &CompressedArtifact) -> Destination {
        Destination {
            bucket: self.store.bucket().to_string(),
            key: layout.remote_key(&artifact.source_name),
        }
    }

    /// Upload `artifact` and remove the local copy once the store accepted it
    #[instrument(skip(self, artifact, destination), fields(destination = %destination))]
    pub async fn upload(
        &self,
        artifact: &CompressedArtifact,
        destination: &Destination,
    ) -> Result<UploadResult> {
        let path = artifact.path.clone();
        let sha256 = tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))?
            .map_err(|CommonError::Io(e)| ExportError::io(&artifact.path, e))?;

        let size = self
            .store
            .put_file(&destination.key, &artifact.path)
            .await
            .map_err(|e| match e {
                upload @ ExportError::Upload { .. } => upload,
                other => ExportError::Upload {
                    path: artifact.path.clone(),
                    bucket: destination.bucket.clone(),
                    key: destination.key.clone(),
                    message: other.to_string(),
                },
            })?;

        tokio::fs::remove_file(&artifact.path)
            .await
            .map_err(|source| ExportError::Cleanup {
                path: artifact.path.clone(),
                destination: destination.clone(),
                source,
            })?;

        info!(size, sha256 = %sha256, "Uploaded artifact");

        Ok(UploadResult {
            destination: destination.clone(),
            size,
            sha256,
        })
    }
}
