//! Run configuration
//!
//! Parameters are resolved once through a [`ConfigProvider`] and turned into
//! an immutable [`ExportConfig`] before any database or network I/O. The
//! runtime never mutates global state; command line overrides are applied
//! with the `with_*` builders before the config is handed to the pipeline.

mod params;
mod provider;

pub use params::ParamSet;
pub use provider::{ConfigProvider, FileConfigProvider, S3ConfigProvider};

use crate::error::{ExportError, Result};
use crate::layout::{LayoutStyle, DEFAULT_OUTPUT_ROOT};
use crate::storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Uploads in flight when `upload_concurrency` is not configured
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Parameter names understood by [`ExportConfig::from_params`]
pub mod keys {
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const USER: &str = "user";
    pub const PASSWORD: &str = "password";
    pub const DATABASE: &str = "database";
    pub const TIMEOUT_SECONDS: &str = "timeout_seconds";
    pub const MAX_RECORDS_PER_FETCH: &str = "max_records_per_fetch";
    pub const UPLOAD_CONCURRENCY: &str = "upload_concurrency";
}

/// What to do when the query returns no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyResultPolicy {
    /// Write nothing and upload nothing
    #[default]
    Skip,
    /// Write and upload a single partition holding only the header row
    HeaderOnly,
}

impl std::str::FromStr for EmptyResultPolicy {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "header-only" | "header_only" | "header" => Ok(Self::HeaderOnly),
            other => Err(ExportError::config(format!("invalid empty-result policy '{}'", other))),
        }
    }
}

/// What to do with delivered objects when some uploads fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartialUploadPolicy {
    /// Leave successful uploads in place
    #[default]
    Keep,
    /// Delete this run's successful uploads
    Rollback,
}

impl std::str::FromStr for PartialUploadPolicy {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "rollback" => Ok(Self::Rollback),
            other => Err(ExportError::config(format!("invalid partial-upload policy '{}'", other))),
        }
    }
}

/// MySQL connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let config = Self {
            host: params.required(keys::HOST)?.to_string(),
            port: params.required_parsed(keys::PORT)?,
            user: params.required(keys::USER)?.to_string(),
            password: params.required(keys::PASSWORD)?.to_string(),
            database: params.required(keys::DATABASE)?.to_string(),
            connect_timeout_secs: params.required_parsed(keys::TIMEOUT_SECONDS)?,
        };

        if config.host.is_empty() {
            return Err(ExportError::config("host must not be empty"));
        }
        if config.database.is_empty() {
            return Err(ExportError::config("database must not be empty"));
        }
        if config.connect_timeout_secs == 0 {
            return Err(ExportError::config("timeout_seconds must be greater than 0"));
        }

        Ok(config)
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Knobs for one export run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub max_rows_per_file: usize,
    pub upload_concurrency: usize,
    pub output_root: PathBuf,
    pub layout: LayoutStyle,
    pub empty_result: EmptyResultPolicy,
    pub on_partial: PartialUploadPolicy,
    pub fail_fast: bool,
}

impl JobConfig {
    pub fn new(max_rows_per_file: usize) -> Self {
        Self {
            max_rows_per_file,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            layout: LayoutStyle::default(),
            empty_result: EmptyResultPolicy::default(),
            on_partial: PartialUploadPolicy::default(),
            fail_fast: false,
        }
    }

    pub fn from_params(params: &ParamSet) -> Result<Self> {
        let mut job = Self::new(params.required_parsed(keys::MAX_RECORDS_PER_FETCH)?);
        if let Some(concurrency) = params.optional_parsed(keys::UPLOAD_CONCURRENCY)? {
            job.upload_concurrency = concurrency;
        }
        job.validate()?;
        Ok(job)
    }

    pub fn with_max_rows_per_file(mut self, max_rows: usize) -> Self {
        self.max_rows_per_file = max_rows;
        self
    }

    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency;
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn with_layout(mut self, layout: LayoutStyle) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_empty_result(mut self, policy: EmptyResultPolicy) -> Self {
        self.empty_result = policy;
        self
    }

    pub fn with_on_partial(mut self, policy: PartialUploadPolicy) -> Self {
        self.on_partial = policy;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rows_per_file == 0 {
            return Err(ExportError::config("max_records_per_fetch must be greater than 0"));
        }
        if self.upload_concurrency == 0 {
            return Err(ExportError::config("upload_concurrency must be greater than 0"));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(ExportError::config("output root must not be empty"));
        }
        Ok(())
    }
}

/// Everything a run needs, resolved up front
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub database: DatabaseConfig,
    pub job: JobConfig,
    pub storage: StorageConfig,
}

impl ExportConfig {
    pub fn from_params(params: &ParamSet, storage: StorageConfig) -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_params(params)?,
            job: JobConfig::from_params(params)?,
            storage,
        })
    }

    /// Resolve parameters through `provider` and validate them
    pub async fn load(provider: &dyn ConfigProvider, storage: StorageConfig) -> Result<Self> {
        let params = provider.load_params().await?;
        tracing::debug!(source = %provider.describe(), keys = ?params, "Loaded parameters");
        Self::from_params(&params, storage)
    }

    pub fn validate(&self) -> Result<()> {
        self.job.validate()?;
        self.storage.validate()
    }
}
