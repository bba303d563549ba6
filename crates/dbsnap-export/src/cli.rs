//! Command line interface

use crate::config::{EmptyResultPolicy, JobConfig, PartialUploadPolicy};
use crate::context::{LoadType, DEFAULT_PARTITION_KEY};
use crate::layout::{LayoutStyle, DEFAULT_OUTPUT_ROOT};
use clap::Parser;
use dbsnap_common::logging::{LogConfig, LogLevel};
use std::path::PathBuf;

/// Export a MySQL table as gzip-compressed `|`-delimited partitions to S3
#[derive(Parser, Debug, Clone)]
#[command(name = "dbsnap-export")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Table to export
    pub table: String,

    /// Load type: full or incremental
    pub load_type: LoadType,

    /// Run date / partition value, required for incremental loads
    pub run_date: Option<String>,

    /// Partition key used in incremental remote prefixes
    #[arg(long, default_value = DEFAULT_PARTITION_KEY)]
    pub partition_key: String,

    /// Local `key=value` parameters file
    #[arg(
        long,
        env = "DBSNAP_CONFIG_FILE",
        conflicts_with = "config_s3",
        required_unless_present = "config_s3"
    )]
    pub config_file: Option<PathBuf>,

    /// Parameters object, as s3://bucket/key
    #[arg(long, env = "DBSNAP_CONFIG_S3")]
    pub config_s3: Option<String>,

    /// TOML query catalog
    #[arg(long, env = "DBSNAP_CATALOG", default_value = "queries.toml")]
    pub catalog: PathBuf,

    /// Destination bucket (overrides S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Root directory for local partition files
    #[arg(long, default_value = DEFAULT_OUTPUT_ROOT)]
    pub output_root: PathBuf,

    /// Rows per partition file (overrides max_records_per_fetch)
    #[arg(long)]
    pub max_rows: Option<usize>,

    /// Uploads in flight at once (overrides upload_concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Incremental layout: hive or date-path
    #[arg(long, default_value = "hive")]
    pub layout: LayoutStyle,

    /// Empty result handling: skip or header-only
    #[arg(long, default_value = "skip")]
    pub empty_result: EmptyResultPolicy,

    /// Partial delivery handling: keep or rollback
    #[arg(long, default_value = "keep")]
    pub on_partial: PartialUploadPolicy,

    /// Stop starting uploads after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<LogLevel>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply command line overrides to the job settings from the params file
    pub fn apply_overrides(&self, job: JobConfig) -> JobConfig {
        let mut job = job
            .with_output_root(&self.output_root)
            .with_layout(self.layout)
            .with_empty_result(self.empty_result)
            .with_on_partial(self.on_partial)
            .with_fail_fast(self.fail_fast);

        if let Some(max_rows) = self.max_rows {
            job = job.with_max_rows_per_file(max_rows);
        }
        if let Some(concurrency) = self.concurrency {
            job = job.with_upload_concurrency(concurrency);
        }
        job
    }

    /// Level requested on the command line, if any
    pub fn requested_log_level(&self) -> Option<LogLevel> {
        self.log_level
            .or_else(|| self.verbose.then_some(LogLevel::Debug))
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig::builder()
            .log_file_prefix("dbsnap-export")
            .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn")
            .build()
    }
}
