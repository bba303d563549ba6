//! Run orchestration
//!
//! A run moves through `Init -> DirectoryReset -> Extracting -> Discovering
//! -> Fanout -> Joining -> Done`. Anything failing before the fan-out aborts
//! the run with an [`ExportError`]. Upload tasks fail independently; their
//! results are joined into a [`RunReport`] instead of ending the process.
//!
//! Extraction is sequential: one open cursor, one open partition file. Only
//! after the database connection is closed does the directory listing become
//! the work list for the upload pool.

use crate::compress::compress;
use crate::config::{EmptyResultPolicy, JobConfig, PartialUploadPolicy};
use crate::context::{LoadType, RunContext};
use crate::error::{ExportError, Result};
use crate::extract::{RowSource, SourceConnector};
use crate::layout::{Destination, OutputLayout, PARTITION_EXTENSION};
use crate::storage::ObjectStore;
use crate::upload::{UploadResult, Uploader};
use crate::writer::PartitionWriter;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    DirectoryReset,
    Extracting,
    Discovering,
    Fanout,
    Joining,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::DirectoryReset => "directory-reset",
            RunPhase::Extracting => "extracting",
            RunPhase::Discovering => "discovering",
            RunPhase::Fanout => "fanout",
            RunPhase::Joining => "joining",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Uploaded(UploadResult),
    Failed {
        phase: &'static str,
        error: String,
        /// Set when the object reached the store before the task failed
        delivered: Option<Destination>,
    },
    /// Not started because an earlier task failed under fail-fast
    Cancelled,
}

/// Result of the upload task for one partition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub file_name: String,
    pub status: TaskStatus,
}

impl TaskReport {
    pub fn is_uploaded(&self) -> bool {
        matches!(self.status, TaskStatus::Uploaded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing to upload
    Empty,
    AllSucceeded,
    Partial,
    AllFailed,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Empty | RunOutcome::AllSucceeded => 0,
            RunOutcome::AllFailed => 1,
            RunOutcome::Partial => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub table: String,
    pub load_type: LoadType,
    pub partitions_written: usize,
    pub rows_written: usize,
    pub tasks: Vec<TaskReport>,
    /// Keys deleted by [`PartialUploadPolicy::Rollback`]
    pub rolled_back: Vec<String>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        let uploaded = self.uploaded_count();
        if self.tasks.is_empty() {
            RunOutcome::Empty
        } else if uploaded == self.tasks.len() {
            RunOutcome::AllSucceeded
        } else if uploaded == 0 {
            RunOutcome::AllFailed
        } else {
            RunOutcome::Partial
        }
    }

    pub fn uploaded_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_uploaded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Cancelled))
            .count()
    }

    pub fn uploads(&self) -> impl Iterator<Item = &UploadResult> {
        self.tasks.iter().filter_map(|t| match &t.status {
            TaskStatus::Uploaded(result) => Some(result),
            _ => None,
        })
    }

    /// Every object this run put into the store, including those of failed tasks
    pub fn delivered(&self) -> impl Iterator<Item = &Destination> {
        self.tasks.iter().filter_map(|t| match &t.status {
            TaskStatus::Uploaded(result) => Some(&result.destination),
            TaskStatus::Failed { delivered, .. } => delivered.as_ref(),
            TaskStatus::Cancelled => None,
        })
    }
}

struct WriteSummary {
    partitions: usize,
    rows: usize,
}

pub struct Orchestrator {
    job: JobConfig,
    uploader: Uploader,
}

impl Orchestrator {
    pub fn new(job: JobConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            job,
            uploader: Uploader::new(store),
        }
    }

    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    /// Execute one export run
    pub async fn run(&self, ctx: &RunContext, connector: &dyn SourceConnector) -> Result<RunReport> {
        let started = Instant::now();

        let layout = OutputLayout::resolve(ctx, &self.job.output_root, self.job.layout)?;
        info!(
            phase = %RunPhase::Init,
            table = ctx.table(),
            load_type = %ctx.load_type(),
            run_date = ctx.run_date().unwrap_or("-"),
            local_dir = %layout.local_dir().display(),
            remote_prefix = layout.remote_prefix(),
            "Starting export"
        );

        info!(phase = %RunPhase::DirectoryReset, "Resetting output directory");
        reset_directory(layout.local_dir()).await?;

        info!(phase = %RunPhase::Extracting, "Extracting rows");
        let written = self.extract(ctx, &layout, connector).await?;
        info!(
            partitions = written.partitions,
            rows = written.rows,
            "Extraction finished"
        );

        info!(phase = %RunPhase::Discovering, "Discovering partition files");
        let files = discover(layout.local_dir()).await?;

        let mut report = RunReport {
            table: ctx.table().to_string(),
            load_type: ctx.load_type(),
            partitions_written: written.partitions,
            rows_written: written.rows,
            tasks: Vec::new(),
            rolled_back: Vec::new(),
            elapsed: Duration::ZERO,
        };

        if files.is_empty() {
            info!(phase = %RunPhase::Done, "Nothing to upload");
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        info!(
            phase = %RunPhase::Fanout,
            files = files.len(),
            concurrency = self.job.upload_concurrency,
            fail_fast = self.job.fail_fast,
            "Uploading partitions"
        );
        report.tasks = self.fan_out(&layout, files).await;

        info!(
            phase = %RunPhase::Joining,
            uploaded = report.uploaded_count(),
            failed = report.failed_count(),
            cancelled = report.cancelled_count(),
            "All upload tasks joined"
        );

        let failed = matches!(report.outcome(), RunOutcome::Partial | RunOutcome::AllFailed);
        if failed && self.job.on_partial == PartialUploadPolicy::Rollback {
            report.rolled_back = self.rollback(&report).await;
        }

        report.elapsed = started.elapsed();
        match report.outcome() {
            RunOutcome::Empty | RunOutcome::AllSucceeded => info!(
                phase = %RunPhase::Done,
                uploaded = report.uploaded_count(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Export complete"
            ),
            outcome => error!(
                phase = %RunPhase::Failed,
                ?outcome,
                uploaded = report.uploaded_count(),
                failed = report.failed_count(),
                rolled_back = report.rolled_back.len(),
                "Export finished with failed uploads"
            ),
        }

        Ok(report)
    }

    /// Open the source, write every batch, and close the source on every path
    async fn extract(
        &self,
        ctx: &RunContext,
        layout: &OutputLayout,
        connector: &dyn SourceConnector,
    ) -> Result<WriteSummary> {
        let mut source = connector.open(ctx).await?;

        let written = write_partitions(ctx, layout, source.as_mut(), self.job.empty_result).await;
        let closed = source.close().await;

        let summary = written?;
        if let Err(e) = closed {
            warn!(error = %e, "Failed to close database connection");
        }
        Ok(summary)
    }

    async fn fan_out(&self, layout: &OutputLayout, files: Vec<PathBuf>) -> Vec<TaskReport> {
        let cancel = CancellationToken::new();
        let fail_fast = self.job.fail_fast;

        stream::iter(files)
            .map(|path| {
                let file_name = file_name_of(&path);
                let handle = tokio::spawn(upload_partition(
                    self.uploader.clone(),
                    layout.clone(),
                    path,
                    cancel.clone(),
                    fail_fast,
                ));
                async move {
                    match handle.await {
                        Ok(report) => report,
                        Err(e) => TaskReport {
                            file_name,
                            status: TaskStatus::Failed {
                                phase: "task",
                                error: e.to_string(),
                                delivered: None,
                            },
                        },
                    }
                }
            })
            .buffer_unordered(self.job.upload_concurrency.max(1))
            .collect()
            .await
    }

    async fn rollback(&self, report: &RunReport) -> Vec<String> {
        let store = self.uploader.store();
        let mut deleted = Vec::new();

        for destination in report.delivered() {
            let key = &destination.key;
            match store.delete(key).await {
                Ok(()) => deleted.push(key.clone()),
                Err(e) => warn!(key = %key, error = %e, "Rollback failed to delete object"),
            }
        }

        info!(deleted = deleted.len(), "Rolled back delivered objects");
        deleted
    }
}

/// Compress and upload one partition file
async fn upload_partition(
    uploader: Uploader,
    layout: OutputLayout,
    path: PathBuf,
    cancel: CancellationToken,
    fail_fast: bool,
) -> TaskReport {
    let file_name = file_name_of(&path);

    if cancel.is_cancelled() {
        debug!(file = %file_name, "Skipping upload after earlier failure");
        return TaskReport {
            file_name,
            status: TaskStatus::Cancelled,
        };
    }

    let result = async {
        let artifact = compress(path).await?;
        let destination = uploader.destination(&layout, &artifact);
        uploader.upload(&artifact, &destination).await
    }
    .await;

    let status = match result {
        Ok(uploaded) => TaskStatus::Uploaded(uploaded),
        Err(e) => {
            error!(file = %file_name, phase = e.phase(), error = %e, "Upload task failed");
            if fail_fast {
                cancel.cancel();
            }
            TaskStatus::Failed {
                phase: e.phase(),
                error: e.to_string(),
                delivered: e.delivered().cloned(),
            }
        },
    };

    TaskReport { file_name, status }
}

async fn write_partitions(
    ctx: &RunContext,
    layout: &OutputLayout,
    source: &mut dyn RowSource,
    empty_result: EmptyResultPolicy,
) -> Result<WriteSummary> {
    let mut writer = PartitionWriter::new(ctx, layout, source.columns().to_vec());

    let mut batches = source.batches(ctx.max_rows_per_file());
    while let Some(batch) = batches.try_next().await? {
        if batch.is_empty() {
            continue;
        }
        let file = writer.write_batch(batch).await?;
        info!(partition = file.index, rows = file.rows, "Partition written");
    }
    drop(batches);

    if writer.files_written() == 0 {
        match empty_result {
            EmptyResultPolicy::Skip => info!("Query returned no rows"),
            EmptyResultPolicy::HeaderOnly => {
                writer.write_header_only().await?;
                info!("Query returned no rows, wrote header-only partition");
            },
        }
    }

    Ok(WriteSummary {
        partitions: writer.files_written(),
        rows: writer.rows_written(),
    })
}

/// Remove `dir` with everything in it and recreate it empty
async fn reset_directory(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed previous output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => return Err(ExportError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ExportError::io(dir, e))
}

/// Partition files in `dir`, ordered by partition index
async fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ExportError::io(dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| ExportError::io(dir, e))? {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map_err(|e| ExportError::io(&path, e))?
            .is_file();
        if is_file && path.extension().is_some_and(|ext| ext == PARTITION_EXTENSION) {
            files.push(path);
        }
    }

    files.sort_by_key(|path| (partition_index(path), path.clone()));
    debug!(count = files.len(), "Discovered partition files");
    Ok(files)
}

fn partition_index(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .rsplit_once("_part")?
        .1
        .parse()
        .ok()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
