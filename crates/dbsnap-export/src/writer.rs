//! Partition file writer
//!
//! Each batch becomes exactly one `|`-delimited file with a header row.
//! Partition indices start at 0 and grow by one per file, so a run always
//! produces a gap-free `part0..partN` sequence. File I/O runs on the
//! blocking pool so the database stream's worker is never held up by disk.

use crate::context::RunContext;
use crate::error::{ExportError, Result};
use crate::extract::RowBatch;
use crate::layout::{partition_file_name, OutputLayout};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Field delimiter of partition files
pub const FIELD_DELIMITER: u8 = b'|';

/// A partition file on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    pub index: usize,
    pub path: PathBuf,
    pub rows: usize,
}

pub struct PartitionWriter<'a> {
    ctx: &'a RunContext,
    dir: PathBuf,
    columns: Arc<[String]>,
    next_index: usize,
    rows_written: usize,
}

impl<'a> PartitionWriter<'a> {
    pub fn new(ctx: &'a RunContext, layout: &OutputLayout, columns: Vec<String>) -> Self {
        Self {
            ctx,
            dir: layout.local_dir().to_path_buf(),
            columns: columns.into(),
            next_index: 0,
            rows_written: 0,
        }
    }

    /// Write one batch as the next partition
    pub async fn write_batch(&mut self, batch: RowBatch) -> Result<PartitionFile> {
        let path = self.next_path();

        if batch.len() > self.ctx.max_rows_per_file() {
            return Err(ExportError::write(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "batch of {} rows exceeds the per-file limit of {}",
                        batch.len(),
                        self.ctx.max_rows_per_file()
                    ),
                ),
            ));
        }

        self.write_file(path, batch).await
    }

    /// Write a partition holding only the header row
    pub async fn write_header_only(&mut self) -> Result<PartitionFile> {
        let path = self.next_path();
        self.write_file(path, RowBatch::default()).await
    }

    pub fn files_written(&self) -> usize {
        self.next_index
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn next_path(&self) -> PathBuf {
        self.dir.join(partition_file_name(self.ctx, self.next_index))
    }

    async fn write_file(&mut self, path: PathBuf, batch: RowBatch) -> Result<PartitionFile> {
        let rows = batch.len();
        let columns = Arc::clone(&self.columns);
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_delimited(&target, &columns, &batch))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))?
            .map_err(|e| ExportError::write(&path, e))?;

        debug!(index = self.next_index, rows, path = %path.display(), "Wrote partition");
        let file = PartitionFile {
            index: self.next_index,
            path,
            rows,
        };

        self.next_index += 1;
        self.rows_written += rows;
        Ok(file)
    }
}

fn write_delimited(path: &Path, columns: &[String], batch: &RowBatch) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(BufWriter::new(file));

    writer.write_record(columns)?;
    for row in &batch.rows {
        writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
    }

    let mut inner = writer.into_inner().map_err(|e| e.into_error())?;
    inner.flush()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::LoadType;
    use crate::layout::LayoutStyle;

    fn setup(dir: &Path, max_rows: usize) -> (RunContext, OutputLayout) {
        let ctx = RunContext::new("orders", LoadType::Full, None, "dt", max_rows).unwrap();
        let layout = OutputLayout::resolve(&ctx, dir, LayoutStyle::Hive).unwrap();
        std::fs::create_dir_all(layout.local_dir()).unwrap();
        (ctx, layout)
    }

    fn batch(rows: &[&[Option<&str>]]) -> RowBatch {
        RowBatch {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.map(String::from)).collect())
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, layout) = setup(dir.path(), 10);
        let mut writer = PartitionWriter::new(&ctx, &layout, vec!["id".into(), "note".into()]);

        let file = writer
            .write_batch(batch(&[&[Some("1"), Some("a")], &[Some("2"), None]]))
            .await
            .unwrap();

        assert_eq!(file.index, 0);
        assert_eq!(file.rows, 2);
        assert!(file.path.ends_with("orders/orders_part0.csv"));
        assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "id|note\n1|a\n2|\n");
    }

    #[tokio::test]
    async fn test_indices_are_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, layout) = setup(dir.path(), 1);
        let mut writer = PartitionWriter::new(&ctx, &layout, vec!["id".into()]);

        let mut indices = Vec::new();
        for i in 0..3 {
            let value = i.to_string();
            let file = writer.write_batch(batch(&[&[Some(value.as_str())]])).await.unwrap();
            indices.push(file.index);
        }

        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(writer.files_written(), 3);
        assert_eq!(writer.rows_written(), 3);
    }

    #[tokio::test]
    async fn test_quotes_fields_containing_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, layout) = setup(dir.path(), 10);
        let mut writer = PartitionWriter::new(&ctx, &layout, vec!["id".into(), "note".into()]);

        let file = writer
            .write_batch(batch(&[&[Some("1"), Some("a|b")]]))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "id|note\n1|\"a|b\"\n");
    }

    #[tokio::test]
    async fn test_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, layout) = setup(dir.path(), 10);
        let mut writer = PartitionWriter::new(&ctx, &layout, vec!["id".into(), "note".into()]);

        let file = writer.write_header_only().await.unwrap();
        assert_eq!(file.rows, 0);
        assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "id|note\n");
    }

    #[tokio::test]
    async fn test_rejects_oversized_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, layout) = setup(dir.path(), 1);
        let mut writer = PartitionWriter::new(&ctx, &layout, vec!["id".into()]);

        let err = writer
            .write_batch(batch(&[&[Some("1")], &[Some("2")]]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Write { .. }));
        assert_eq!(writer.files_written(), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new("orders", LoadType::Full, None, "dt", 10).unwrap();
        let layout = OutputLayout::resolve(&ctx, &dir.path().join("absent"), LayoutStyle::Hive).unwrap();
        let mut writer = PartitionWriter::new(&ctx, &layout, vec!["id".into()]);

        assert!(matches!(writer.write_header_only().await, Err(ExportError::Write { .. })));
    }
}
