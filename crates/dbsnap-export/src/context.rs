//! Run identity
//!
//! A [`RunContext`] is built once from validated inputs and never mutated.
//! Table and partition values end up in local paths and object keys, so
//! they are restricted to a conservative character set here.

use crate::error::{ExportError, Result};
use serde::{Deserialize, Serialize};

/// Partition key used when none is given
pub const DEFAULT_PARTITION_KEY: &str = "dt";

/// Whether the run exports the whole table or one partition value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    Full,
    Incremental,
}

impl LoadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::Full => "full",
            LoadType::Incremental => "incremental",
        }
    }
}

impl std::str::FromStr for LoadType {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(LoadType::Full),
            "incremental" | "incr" => Ok(LoadType::Incremental),
            other => Err(ExportError::config(format!(
                "invalid load type '{}', expected 'full' or 'incremental'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable parameters of one export run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    table: String,
    load_type: LoadType,
    run_date: Option<String>,
    partition_key: String,
    max_rows_per_file: usize,
}

impl RunContext {
    /// Validate inputs and build the context
    ///
    /// `run_date` is required for incremental loads; for full loads it is
    /// kept for logging only.
    pub fn new(
        table: impl Into<String>,
        load_type: LoadType,
        run_date: Option<String>,
        partition_key: impl Into<String>,
        max_rows_per_file: usize,
    ) -> Result<Self> {
        let table = table.into();
        let partition_key = partition_key.into();
        let run_date = run_date.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());

        validate_segment("table", &table)?;
        validate_segment("partition key", &partition_key)?;

        if max_rows_per_file == 0 {
            return Err(ExportError::config("max rows per file must be greater than 0"));
        }

        match (&load_type, &run_date) {
            (LoadType::Incremental, None) => {
                return Err(ExportError::config(
                    "incremental loads require a run date / partition value",
                ));
            },
            (_, Some(date)) => validate_segment("run date", date)?,
            _ => {},
        }

        Ok(Self {
            table,
            load_type,
            run_date,
            partition_key,
            max_rows_per_file,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn load_type(&self) -> LoadType {
        self.load_type
    }

    pub fn run_date(&self) -> Option<&str> {
        self.run_date.as_deref()
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn max_rows_per_file(&self) -> usize {
        self.max_rows_per_file
    }

    /// Partition value for incremental loads
    ///
    /// Always present for incremental contexts; `new` rejects the rest.
    pub fn partition_value(&self) -> Option<&str> {
        match self.load_type {
            LoadType::Incremental => self.run_date.as_deref(),
            LoadType::Full => None,
        }
    }
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ExportError::config(format!("{} must not be empty", what)));
    }
    if value == "." || value == ".." {
        return Err(ExportError::config(format!("{} '{}' is not allowed", what, value)));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(ExportError::config(format!(
            "{} '{}' contains unsupported character '{}'",
            what, value, bad
        )));
    }
    Ok(())
}
