//! Common test utilities for dbsnap-export integration tests
//!
//! In-memory stand-ins for the two external systems of a run:
//!
//! - [`StaticConnector`]: a [`SourceConnector`] serving fixed rows, recording
//!   whether the source was closed
//! - [`RecordingStore`]: an [`ObjectStore`] keeping objects in memory, with
//!   injectable failures and an in-flight counter
#![allow(dead_code)]

use async_trait::async_trait;
use dbsnap_export::config::JobConfig;
use dbsnap_export::context::RunContext;
use dbsnap_export::extract::{RowBatch, RowSource, SourceConnector};
use dbsnap_export::storage::ObjectStore;
use dbsnap_export::{ExportError, Result};
use flate2::read::GzDecoder;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_BUCKET: &str = "dbsnap-test";

// ============================================================================
// Row source
// ============================================================================

/// Serves `rows` under `columns`, optionally failing after some rows
#[derive(Clone)]
pub struct StaticConnector {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    fail_after_rows: Option<usize>,
    fail_on_open: bool,
    closed: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

impl StaticConnector {
    pub fn new(columns: &[&str], rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            fail_after_rows: None,
            fail_on_open: false,
            closed: Arc::new(AtomicBool::new(false)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `count` rows of `(id, name)` where every third name is NULL
    pub fn numbered(count: usize) -> Self {
        let rows = (0..count)
            .map(|i| {
                let name = (i % 3 != 2).then(|| format!("name-{}", i));
                vec![Some(i.to_string()), name]
            })
            .collect();
        Self::new(&["id", "name"], rows)
    }

    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after_rows = Some(rows);
        self
    }

    pub fn failing_on_open(mut self) -> Self {
        self.fail_on_open = true;
        self
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }
}

#[async_trait]
impl SourceConnector for StaticConnector {
    async fn open(&self, ctx: &RunContext) -> Result<Box<dyn RowSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_open {
            return Err(ExportError::Connection {
                host: "localhost".to_string(),
                port: 3306,
                database: "test".to_string(),
                source: sqlx::Error::PoolTimedOut,
            });
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(StaticSource {
            table: ctx.table().to_string(),
            connector: self.clone(),
        }))
    }
}

struct StaticSource {
    table: String,
    connector: StaticConnector,
}

#[async_trait]
impl RowSource for StaticSource {
    fn columns(&self) -> &[String] {
        &self.connector.columns
    }

    fn batches(&mut self, batch_size: usize) -> BoxStream<'_, Result<RowBatch>> {
        let limit = self.connector.fail_after_rows.unwrap_or(usize::MAX);
        let served: Vec<_> = self.connector.rows.iter().take(limit).cloned().collect();
        let fails = self.connector.fail_after_rows.is_some();

        let batches: Vec<Result<RowBatch>> = served
            .chunks(batch_size)
            .map(|rows| Ok(RowBatch { rows: rows.to_vec() }))
            .chain(fails.then(|| {
                Err(ExportError::query(
                    self.table.as_str(),
                    sqlx::Error::Protocol("connection lost".to_string()),
                ))
            }))
            .collect();

        stream::iter(batches).boxed()
    }

    async fn close(&mut self) -> Result<()> {
        self.connector.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Object store
// ============================================================================

/// In-memory bucket
#[derive(Default)]
pub struct RecordingStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    failing_suffixes: Vec<String>,
    consuming_suffixes: Vec<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    puts: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every put whose key ends with `suffix`
    pub fn failing_on(mut self, suffix: impl Into<String>) -> Self {
        self.failing_suffixes.push(suffix.into());
        self
    }

    /// Accept puts whose key ends with `suffix`, then delete the local file
    /// so the uploader cannot clean it up
    pub fn consuming_local_on(mut self, suffix: impl Into<String>) -> Self {
        self.consuming_suffixes.push(suffix.into());
        self
    }

    /// Hold every put for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    fn bucket(&self) -> &str {
        TEST_BUCKET
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<u64> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.failing_suffixes.iter().any(|s| key.ends_with(s.as_str())) {
            Err(ExportError::Upload {
                path: path.to_path_buf(),
                bucket: TEST_BUCKET.to_string(),
                key: key.to_string(),
                message: "injected failure".to_string(),
            })
        } else {
            tokio::fs::read(path)
                .await
                .map_err(|e| ExportError::io(path, e))
                .map(|data| {
                    let size = data.len() as u64;
                    self.objects.lock().unwrap().insert(key.to_string(), data);
                    size
                })
        };

        if result.is_ok() && self.consuming_suffixes.iter().any(|s| key.ends_with(s.as_str())) {
            std::fs::remove_file(path).unwrap();
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.object(key)
            .ok_or_else(|| ExportError::storage(format!("no such key {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn job(output_root: &Path, max_rows: usize) -> JobConfig {
    JobConfig::new(max_rows).with_output_root(output_root)
}

pub fn gunzip(data: &[u8]) -> String {
    let mut text = String::new();
    GzDecoder::new(data).read_to_string(&mut text).unwrap();
    text
}

/// Parse a partition file back into rows, empty fields as NULL
pub fn parse_rows(text: &str) -> Vec<Vec<Option<String>>> {
    text.lines()
        .skip(1)
        .map(|line| {
            line.split('|')
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect()
        })
        .collect()
}

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,dbsnap_export=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
