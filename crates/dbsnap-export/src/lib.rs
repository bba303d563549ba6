//! dbsnap Export Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extract one MySQL table (or one partition of it) into row-bounded,
//! `|`-delimited partition files, gzip them, and upload them concurrently to
//! an S3-compatible bucket.
//!
//! The pipeline is split into small pieces wired together by the
//! [`orchestrator::Orchestrator`]:
//!
//! - [`context::RunContext`] and [`layout::OutputLayout`]: what is exported and where it goes
//! - [`config`]: parameter providers and the immutable [`config::ExportConfig`]
//! - [`catalog::QueryCatalog`]: per-table SELECT statements
//! - [`extract`]: streaming row batches from MySQL
//! - [`writer`], [`compress`], [`upload`]: partition files, gzip artifacts, object store puts
//!
//! # Example
//!
//! ```no_run
//! use dbsnap_export::config::{ExportConfig, FileConfigProvider};
//! use dbsnap_export::context::{LoadType, RunContext};
//! use dbsnap_export::extract::MySqlConnector;
//! use dbsnap_export::orchestrator::Orchestrator;
//! use dbsnap_export::storage::{S3Storage, StorageConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = FileConfigProvider::new("export.params");
//!     let config = ExportConfig::load(&provider, StorageConfig::from_env()).await?;
//!
//!     let ctx = RunContext::new("orders", LoadType::Full, None, "dt", config.job.max_rows_per_file)?;
//!     let connector = MySqlConnector::new(config.database.clone(), "SELECT * FROM orders");
//!     let store = Arc::new(S3Storage::new(&config.storage).await?);
//!
//!     let report = Orchestrator::new(config.job.clone(), store).run(&ctx, &connector).await?;
//!     println!("uploaded {} partitions", report.uploaded_count());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod compress;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod layout;
pub mod orchestrator;
pub mod storage;
pub mod upload;
pub mod writer;

pub use error::{ExportError, Result};
