//! Streaming row extraction
//!
//! A [`RowSource`] yields the result set as bounded batches so memory stays
//! proportional to one batch, never the whole table. Every cell is rendered
//! to its text form here; `None` is SQL NULL.

use crate::config::DatabaseConfig;
use crate::context::RunContext;
use crate::error::{ExportError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::mysql::types::MySqlTime;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::Row as _;
use sqlx::{Column, ConnectOptions, Connection, Executor, Statement, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One rendered row
pub type Row = Vec<Option<String>>;

/// Up to `max_rows_per_file` rows fetched in one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBatch {
    pub rows: Vec<Row>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An open result set
#[async_trait]
pub trait RowSource: Send {
    /// Column names in select order
    fn columns(&self) -> &[String];

    /// Remaining rows in batches of at most `batch_size`, never empty
    fn batches(&mut self, batch_size: usize) -> BoxStream<'_, Result<RowBatch>>;

    /// Release the underlying connection. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Opens a [`RowSource`] for a run
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn open(&self, ctx: &RunContext) -> Result<Box<dyn RowSource>>;
}

/// Connects to MySQL and runs one catalog statement
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    database: DatabaseConfig,
    statement: String,
}

impl MySqlConnector {
    pub fn new(database: DatabaseConfig, statement: impl Into<String>) -> Self {
        Self {
            database,
            statement: statement.into(),
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.database.host)
            .port(self.database.port)
            .username(&self.database.user)
            .password(&self.database.password)
            .database(&self.database.database)
    }

    fn connection_error(&self, source: sqlx::Error) -> ExportError {
        ExportError::Connection {
            host: self.database.host.clone(),
            port: self.database.port,
            database: self.database.database.clone(),
            source,
        }
    }
}

#[async_trait]
impl SourceConnector for MySqlConnector {
    async fn open(&self, ctx: &RunContext) -> Result<Box<dyn RowSource>> {
        let timeout = Duration::from_secs(self.database.connect_timeout_secs);
        debug!(host = %self.database.host, port = self.database.port, ?timeout, "Connecting to MySQL");

        let mut conn = tokio::time::timeout(timeout, self.connect_options().connect())
            .await
            .map_err(|_| {
                self.connection_error(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no connection after {}s", timeout.as_secs()),
                )))
            })?
            .map_err(|e| self.connection_error(e))?;

        let columns = match (&mut conn).prepare(self.statement.as_str()).await {
            Ok(prepared) => prepared
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>(),
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "Failed to close connection");
                }
                return Err(ExportError::query(ctx.table(), e));
            },
        };

        info!(
            table = ctx.table(),
            database = %self.database.database,
            columns = columns.len(),
            "Connected and prepared statement"
        );

        Ok(Box::new(MySqlRowSource {
            table: ctx.table().to_string(),
            statement: self.statement.clone(),
            columns,
            conn: Some(conn),
        }))
    }
}

struct MySqlRowSource {
    table: String,
    statement: String,
    columns: Vec<String>,
    conn: Option<MySqlConnection>,
}

#[async_trait]
impl RowSource for MySqlRowSource {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn batches(&mut self, batch_size: usize) -> BoxStream<'_, Result<RowBatch>> {
        let table = self.table.as_str();
        let Some(conn) = self.conn.as_mut() else {
            let err = ExportError::query(table, sqlx::Error::PoolClosed);
            return stream::once(async move { Err(err) }).boxed();
        };

        sqlx::query(self.statement.as_str())
            .fetch(conn)
            .map_err(move |e| ExportError::query(table, e))
            .and_then(move |row| async move { render_row(&row).map_err(|e| ExportError::query(table, e)) })
            .try_chunks(batch_size.max(1))
            .map_ok(|rows| RowBatch { rows })
            .map_err(|e| e.1)
            .boxed()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| ExportError::query(self.table.as_str(), e))?;
            debug!(table = %self.table, "Connection closed");
        }
        Ok(())
    }
}

fn render_row(row: &MySqlRow) -> std::result::Result<Row, sqlx::Error> {
    (0..row.len()).map(|index| render_cell(row, index)).collect()
}

/// Text form of one cell, dispatched on the column's MySQL type
fn render_cell(row: &MySqlRow, index: usize) -> std::result::Result<Option<String>, sqlx::Error> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(None);
        }
        raw.type_info().name().to_string()
    };

    let text = match type_name.as_str() {
        "BOOLEAN" => u8::from(row.try_get::<bool, _>(index)?).to_string(),
        t if t.ends_with("UNSIGNED") => row.try_get::<u64, _>(index)?.to_string(),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index)?.to_string()
        },
        "YEAR" => row.try_get_unchecked::<u16, _>(index)?.to_string(),
        "FLOAT" => row.try_get::<f32, _>(index)?.to_string(),
        "DOUBLE" => row.try_get::<f64, _>(index)?.to_string(),
        "DECIMAL" => row.try_get::<sqlx::types::BigDecimal, _>(index)?.to_string(),
        "DATE" => match row.try_get::<chrono::NaiveDate, _>(index) {
            Ok(date) => date.to_string(),
            Err(_) => return Ok(raw_temporal(&row.try_get_unchecked::<Vec<u8>, _>(index)?)),
        },
        "TIME" => format_time(&row.try_get::<MySqlTime, _>(index)?),
        "DATETIME" | "TIMESTAMP" => match row.try_get::<chrono::NaiveDateTime, _>(index) {
            Ok(datetime) => datetime.to_string(),
            Err(_) => return Ok(raw_temporal(&row.try_get_unchecked::<Vec<u8>, _>(index)?)),
        },
        "JSON" => row.try_get::<serde_json::Value, _>(index)?.to_string(),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => lossy(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        _ => match row.try_get::<String, _>(index) {
            Ok(text) => text,
            Err(_) => lossy(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        },
    };

    Ok(Some(text))
}

/// `[-]HH:MM:SS[.ffffff]`, covering the whole `-838:59:59..=838:59:59` range
fn format_time(time: &MySqlTime) -> String {
    let sign = if time.is_negative() { "-" } else { "" };
    let mut text = format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        time.hours(),
        time.minutes(),
        time.seconds()
    );
    if time.microseconds() != 0 {
        text.push_str(&format!(".{:06}", time.microseconds()));
    }
    text
}

/// Fallback for DATE/DATETIME values chrono rejects, such as `0000-00-00`
/// or a zero month/day
///
/// Binary protocol values start with their length byte (0, 4, 7 or 11).
/// An all-zero date renders as NULL.
fn raw_temporal(bytes: &[u8]) -> Option<String> {
    let text = match bytes.split_first() {
        None | Some((0, [])) => return None,
        Some((&len, rest)) if usize::from(len) == rest.len() && matches!(len, 4 | 7 | 11) => {
            let year = u16::from_le_bytes([rest[0], rest[1]]);
            let mut text = format!("{:04}-{:02}-{:02}", year, rest[2], rest[3]);
            if len >= 7 {
                text.push_str(&format!(" {:02}:{:02}:{:02}", rest[4], rest[5], rest[6]));
            }
            if len == 11 {
                let micros = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]);
                if micros != 0 {
                    text.push_str(&format!(".{:06}", micros));
                }
            }
            text
        },
        Some(_) => lossy(bytes.to_vec()),
    };

    if text.starts_with("0000-00-00") {
        None
    } else {
        Some(text)
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_row_batch_len() {
        let batch = RowBatch {
            rows: vec![vec![Some("1".into())], vec![None]],
        };
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert!(RowBatch::default().is_empty());
    }

    #[test]
    fn test_lossy_replaces_invalid_utf8() {
        assert_eq!(lossy(b"plain".to_vec()), "plain");
        assert_eq!(lossy(vec![0x66, 0xff, 0x6f]), "f\u{fffd}o");
    }

    #[test]
    fn test_time_keeps_full_range_and_sign() {
        use sqlx::mysql::types::MySqlTimeSign;

        let long = MySqlTime::new(MySqlTimeSign::Positive, 36, 0, 0, 0).unwrap();
        assert_eq!(format_time(&long), "36:00:00");

        let negative = MySqlTime::new(MySqlTimeSign::Negative, 0, 30, 0, 0).unwrap();
        assert_eq!(format_time(&negative), "-00:30:00");

        let max = MySqlTime::new(MySqlTimeSign::Negative, 838, 59, 59, 0).unwrap();
        assert_eq!(format_time(&max), "-838:59:59");

        let fractional = MySqlTime::new(MySqlTimeSign::Positive, 9, 5, 7, 120).unwrap();
        assert_eq!(format_time(&fractional), "09:05:07.000120");
    }

    #[test]
    fn test_zero_dates_render_as_null() {
        // Binary protocol sends zero dates as a bare length byte.
        assert_eq!(raw_temporal(&[0]), None);
        assert_eq!(raw_temporal(&[]), None);
        assert_eq!(raw_temporal(&[4, 0, 0, 0, 0]), None);
        assert_eq!(raw_temporal(b"0000-00-00 00:00:00"), None);
    }

    #[test]
    fn test_partial_dates_keep_their_text() {
        // 2024-00-00
        assert_eq!(raw_temporal(&[4, 0xe8, 0x07, 0, 0]).as_deref(), Some("2024-00-00"));
        // 2024-05-00 13:04:05
        assert_eq!(
            raw_temporal(&[7, 0xe8, 0x07, 5, 0, 13, 4, 5]).as_deref(),
            Some("2024-05-00 13:04:05")
        );
        // 2024-05-00 13:04:05.250000
        assert_eq!(
            raw_temporal(&[11, 0xe8, 0x07, 5, 0, 13, 4, 5, 0x90, 0xd0, 0x03, 0x00]).as_deref(),
            Some("2024-05-00 13:04:05.250000")
        );
        assert_eq!(raw_temporal(b"2024-05-00").as_deref(), Some("2024-05-00"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let database = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "nobody".to_string(),
            password: "nothing".to_string(),
            database: "none".to_string(),
            connect_timeout_secs: 2,
        };
        let ctx = RunContext::new("orders", crate::context::LoadType::Full, None, "dt", 10).unwrap();

        let result = MySqlConnector::new(database, "SELECT 1").open(&ctx).await;
        match result {
            Err(ExportError::Connection { port, .. }) => assert_eq!(port, 1),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
