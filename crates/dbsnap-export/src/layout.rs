//! Local and remote naming policy
//!
//! Everything here is a pure function of the [`RunContext`]: no directory is
//! created and nothing is read from disk.
//!
//! | load        | style      | local directory                 | remote prefix               |
//! |-------------|------------|---------------------------------|-----------------------------|
//! | full        | any        | `out/{table}`                   | `{table}/`                  |
//! | incremental | `Hive`     | `out/{table}/{value}`           | `{table}/{key}={value}/`    |
//! | incremental | `DatePath` | `out/{table}/{yyyy}/{mm}/{dd}`  | `{table}/{yyyy}/{mm}/{dd}/` |

use crate::context::{LoadType, RunContext};
use crate::error::{ExportError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root directory for local partition files
pub const DEFAULT_OUTPUT_ROOT: &str = "out";

/// Extension of partition files
pub const PARTITION_EXTENSION: &str = "csv";

/// Suffix appended to a partition file name by the compressor
pub const COMPRESSION_SUFFIX: &str = ".gz";

/// How incremental partitions are namespaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutStyle {
    /// `{key}={value}` remote prefix
    #[default]
    Hive,
    /// `{yyyy}/{mm}/{dd}` both locally and remotely
    DatePath,
}

impl std::str::FromStr for LayoutStyle {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hive" => Ok(LayoutStyle::Hive),
            "date-path" | "date_path" | "datepath" => Ok(LayoutStyle::DatePath),
            other => Err(ExportError::config(format!("invalid layout style '{}'", other))),
        }
    }
}

/// Where one run's files live, locally and remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    local_dir: PathBuf,
    remote_prefix: String,
}

impl OutputLayout {
    /// Layout for `ctx` under `output_root`
    pub fn resolve(ctx: &RunContext, output_root: &Path, style: LayoutStyle) -> Result<Self> {
        let table = ctx.table();

        let (local_dir, remote_prefix) = match (ctx.load_type(), ctx.partition_value()) {
            (LoadType::Incremental, Some(value)) => match style {
                LayoutStyle::Hive => (
                    output_root.join(table).join(value),
                    format!("{}/{}={}/", table, ctx.partition_key(), value),
                ),
                LayoutStyle::DatePath => {
                    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
                        ExportError::config(format!(
                            "date-path layout needs a YYYY-MM-DD run date, got '{}': {}",
                            value, e
                        ))
                    })?;
                    let year = format!("{:04}", date.year());
                    let month = format!("{:02}", date.month());
                    let day = format!("{:02}", date.day());
                    (
                        output_root.join(table).join(&year).join(&month).join(&day),
                        format!("{}/{}/{}/{}/", table, year, month, day),
                    )
                },
            },
            (LoadType::Incremental, None) => {
                return Err(ExportError::config("incremental load without a partition value"));
            },
            (LoadType::Full, _) => (output_root.join(table), format!("{}/", table)),
        };

        Ok(Self {
            local_dir,
            remote_prefix,
        })
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn remote_prefix(&self) -> &str {
        &self.remote_prefix
    }

    /// Object key for a local file name, e.g. `orders/orders_part0.csv.gz`
    pub fn remote_key(&self, file_name: &str) -> String {
        format!("{}{}{}", self.remote_prefix, file_name, COMPRESSION_SUFFIX)
    }
}

/// Stem of partition `index`: `{table}_part{n}` or `{value}_part{n}`
pub fn partition_stem(ctx: &RunContext, index: usize) -> String {
    match ctx.partition_value() {
        Some(value) => format!("{}_part{}", value, index),
        None => format!("{}_part{}", ctx.table(), index),
    }
}

/// File name of partition `index`, e.g. `orders_part0.csv`
pub fn partition_file_name(ctx: &RunContext, index: usize) -> String {
    format!("{}.{}", partition_stem(ctx, index), PARTITION_EXTENSION)
}

/// Compressed sibling of a partition file
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(COMPRESSION_SUFFIX);
    PathBuf::from(name)
}

/// Remote location of one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
