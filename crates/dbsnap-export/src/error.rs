//! Error types for the export pipeline
//!
//! Every variant is fatal to the phase that raised it. Pre-flight errors
//! (`Config`, `Catalog`) stop the run before any database I/O; `Compression`
//! and `Upload` are scoped to one upload task and are aggregated by the
//! orchestrator instead of aborting the process.

use crate::layout::Destination;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Error, Debug)]
pub enum ExportError {
    /// Missing or unreadable credentials/parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// No statement for the requested table, or a malformed catalog
    #[error("Query catalog error: {0}")]
    Catalog(String),

    /// Database unreachable, authentication failure, or connect timeout
    #[error("Database connection failed ({host}:{port}/{database}): {source}")]
    Connection {
        host: String,
        port: u16,
        database: String,
        #[source]
        source: sqlx::Error,
    },

    /// Statement execution or fetch failure
    #[error("Query failed for table '{table}': {source}")]
    Query {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// Local disk failure while writing a partition file
    #[error("Failed to write partition {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure compressing one partition file
    #[error("Failed to compress {}: {source}", path.display())]
    Compression {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure transferring one artifact to the object store
    #[error("Failed to upload {} to s3://{bucket}/{key}: {message}", path.display())]
    Upload {
        path: PathBuf,
        bucket: String,
        key: String,
        message: String,
    },

    /// The store accepted the artifact but its local copy could not be removed
    #[error("Uploaded {} to {destination} but could not remove it locally: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        destination: Destination,
        #[source]
        source: std::io::Error,
    },

    /// Object store operation other than an artifact upload
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task failed: {0}")]
    Task(String),
}

impl ExportError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub fn query(table: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Query {
            table: table.into(),
            source,
        }
    }

    /// Pipeline phase the error belongs to, used as a structured log field
    pub fn phase(&self) -> &'static str {
        match self {
            ExportError::Config(_) => "config",
            ExportError::Catalog(_) => "catalog",
            ExportError::Connection { .. } => "connect",
            ExportError::Query { .. } => "extract",
            ExportError::Write { .. } => "write",
            ExportError::Compression { .. } => "compress",
            ExportError::Upload { .. } | ExportError::Cleanup { .. } | ExportError::Storage(_) => {
                "upload"
            },
            ExportError::Io { .. } => "io",
            ExportError::Task(_) => "task",
        }
    }

    /// Remote object that exists despite this error
    pub fn delivered(&self) -> Option<&Destination> {
        match self {
            ExportError::Cleanup { destination, .. } => Some(destination),
            _ => None,
        }
    }
}
