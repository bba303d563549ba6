//! dbsnap-export - Main entry point

use anyhow::Context;
use clap::Parser;
use dbsnap_common::logging::{init_logging, LogGuard};
use dbsnap_export::catalog::QueryCatalog;
use dbsnap_export::cli::Cli;
use dbsnap_export::config::{ConfigProvider, ExportConfig, FileConfigProvider, S3ConfigProvider};
use dbsnap_export::context::RunContext;
use dbsnap_export::extract::MySqlConnector;
use dbsnap_export::orchestrator::{Orchestrator, RunReport};
use dbsnap_export::storage::{S3Storage, StorageConfig};
use dbsnap_export::{ExportError, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // The export still runs without a subscriber; failures go to stderr below.
    let _guard = match init_tracing(&cli) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    let span = info_span!("export", table = %cli.table, load_type = %cli.load_type);

    match run(&cli).instrument(span.clone()).await {
        Ok(report) => ExitCode::from(report.outcome().exit_code()),
        Err(e) => {
            span.in_scope(|| error!(phase = e.phase(), error = %e, "Export failed"));
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<LogGuard> {
    let mut config = cli
        .log_config()
        .with_env_overrides()
        .context("Invalid LOG_* environment")?;

    if let Some(level) = cli.requested_log_level() {
        config.level = level;
    }

    init_logging(&config)
}

async fn run(cli: &Cli) -> Result<RunReport> {
    let mut storage = StorageConfig::from_env();
    if let Some(bucket) = &cli.bucket {
        storage = storage.with_bucket(bucket);
    }

    let provider: Box<dyn ConfigProvider> = match (&cli.config_file, &cli.config_s3) {
        (Some(path), _) => Box::new(FileConfigProvider::new(path)),
        (None, Some(url)) => Box::new(S3ConfigProvider::from_url(url, &storage).await?),
        (None, None) => {
            return Err(ExportError::config("one of --config-file or --config-s3 is required"));
        },
    };

    let mut config = ExportConfig::load(provider.as_ref(), storage).await?;
    config.job = cli.apply_overrides(config.job);
    config.validate()?;

    let catalog = QueryCatalog::from_file(&cli.catalog)?;
    let ctx = RunContext::new(
        cli.table.as_str(),
        cli.load_type,
        cli.run_date.clone(),
        cli.partition_key.as_str(),
        config.job.max_rows_per_file,
    )?;
    let statement = catalog.resolve(&ctx)?;

    info!(
        config = %provider.describe(),
        bucket = %config.storage.bucket,
        max_rows = config.job.max_rows_per_file,
        concurrency = config.job.upload_concurrency,
        "Configuration loaded"
    );

    let store = Arc::new(S3Storage::new(&config.storage).await?);
    let connector = MySqlConnector::new(config.database.clone(), statement);

    Orchestrator::new(config.job.clone(), store)
        .run(&ctx, &connector)
        .await
}
