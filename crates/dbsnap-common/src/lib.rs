//! dbsnap Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient utilities shared by the dbsnap workspace members:
//!
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Checksums**: streaming SHA-256 of local artifacts
//! - **Errors**: the [`CommonError`] type used by the helpers in this crate
//!
//! # Example
//!
//! ```no_run
//! use dbsnap_common::checksum::sha256_file;
//!
//! fn describe(path: &str) -> dbsnap_common::Result<()> {
//!     let digest = sha256_file(path)?;
//!     tracing::info!(%digest, "artifact checksum");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
