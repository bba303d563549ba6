//! Gzip compression of partition files
//!
//! On success the source file is gone and `{name}.gz` is complete and
//! synced. On failure any partial `.gz` is removed so a later step can
//! never pick up a truncated artifact.

use crate::error::{ExportError, Result};
use crate::layout::compressed_path;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A finished `.gz` file ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedArtifact {
    pub path: PathBuf,
    /// Name of the uncompressed partition, e.g. `orders_part0.csv`
    pub source_name: String,
    pub size: u64,
}

/// Compress `path` on the blocking pool
pub async fn compress(path: PathBuf) -> Result<CompressedArtifact> {
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || compress_file(&task_path, Compression::default()))
        .await
        .map_err(|e| ExportError::Compression {
            path,
            source: io::Error::other(e.to_string()),
        })?
}

pub fn compress_file(path: &Path, level: Compression) -> Result<CompressedArtifact> {
    let source_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ExportError::Compression {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
    let target = compressed_path(path);

    let size = match gzip(path, &target, level) {
        Ok(size) => size,
        Err(e) => {
            discard(&target);
            return Err(ExportError::Compression {
                path: path.to_path_buf(),
                source: e,
            });
        },
    };

    if let Err(e) = fs::remove_file(path) {
        discard(&target);
        return Err(ExportError::Compression {
            path: path.to_path_buf(),
            source: e,
        });
    }

    debug!(path = %target.display(), size, "Compressed partition");

    Ok(CompressedArtifact {
        path: target,
        source_name,
        size,
    })
}

fn gzip(source: &Path, target: &Path, level: Compression) -> io::Result<u64> {
    let mut input = BufReader::new(File::open(source)?);
    let output = File::create(target)?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), level);
    io::copy(&mut input, &mut encoder)?;

    let mut writer = encoder.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(file.metadata()?.len())
}

fn discard(target: &Path) {
    match fs::remove_file(target) {
        Ok(()) => debug!(path = %target.display(), "Removed partial artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %target.display(), error = %e, "Failed to remove partial artifact"),
    }
}
