//! Chunkflow Common Library
//!
//! Shared utilities and error handling for the chunkflow workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the shared error type and result alias
//! - **Checksums**: SHA-256 digests used to pin stored chunk payloads
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use chunkflow_common::checksum::{sha256_hex, verify_sha256};
//!
//! fn check(payload: &[u8], expected: &str) -> chunkflow_common::Result<()> {
//!     verify_sha256(payload, expected)?;
//!     tracing::debug!(digest = %sha256_hex(payload), "payload verified");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{ChunkflowError, Result};
