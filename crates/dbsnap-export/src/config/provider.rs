use super::ParamSet;
use crate::error::{ExportError, Result};
use crate::storage::{parse_s3_url, ObjectStore, S3Storage, StorageConfig};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Source of the `key=value` parameter set
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Human readable location, for logs
    fn describe(&self) -> String;

    async fn load_params(&self) -> Result<ParamSet>;
}

/// Parameters from a local file
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load_params(&self) -> Result<ParamSet> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ExportError::config(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(ParamSet::parse(&text))
    }
}

/// Parameters from an object in a bucket, e.g. `s3://configs/exports/prod.params`
pub struct S3ConfigProvider {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl S3ConfigProvider {
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Build a client for the bucket named in `url`, reusing the endpoint
    /// and credentials of `storage`
    pub async fn from_url(url: &str, storage: &StorageConfig) -> Result<Self> {
        let (bucket, key) = parse_s3_url(url)?;
        let store = S3Storage::new(&storage.clone().with_bucket(bucket)).await?;
        Ok(Self::new(Arc::new(store), key))
    }
}

#[async_trait]
impl ConfigProvider for S3ConfigProvider {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.store.bucket(), self.key)
    }

    async fn load_params(&self) -> Result<ParamSet> {
        let bytes = self.store.get(&self.key).await.map_err(|e| {
            ExportError::config(format!("cannot fetch {}: {}", self.describe(), e))
        })?;
        let text = String::from_utf8(bytes).map_err(|_| {
            ExportError::config(format!("{} is not valid UTF-8", self.describe()))
        })?;

        let params = ParamSet::parse(&text);
        info!(source = %self.describe(), count = params.len(), "Fetched remote parameters");
        Ok(params)
    }
}
