//! # Riptide Core
//!
//! Parallel BLAKE3 streaming hasher.
//!
//! This crate provides:
//! - A subtree planner that maps an input length onto the BLAKE3 tree
//! - A streaming dispatcher with dual backpressure (slots and workers)
//! - A pool of OS-thread hashing workers fed through reusable leaf buffers
//! - A bubble-up combiner that finalizes the root as results arrive
//!
//! The input is consumed in a single pass while workers hash independent
//! subtrees in parallel; the digest is byte-for-byte identical to a serial
//! BLAKE3 hash of the same input.
//!
//! ```no_run
//! use riptide_core::{HasherConfig, MemoryStream, ParallelHasher};
//!
//! # async fn example() -> riptide_core::Result<()> {
//! let mut hasher = ParallelHasher::new(HasherConfig::default())?;
//! hasher.init().await?;
//! let data = std::fs::read("large.bin").expect("read input");
//! let total = data.len() as u64;
//! let output = hasher.hash_file(&mut MemoryStream::new(data), total).await?;
//! println!("{}", output.digest);
//! hasher.terminate();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod combine;
pub mod config;
pub mod error;
pub mod plan;
pub mod pool;
pub mod stream;

mod dispatch;
mod hasher;
mod worker;

pub use config::HasherConfig;
pub use error::{HashError, Result};
pub use hasher::{HashOutput, ParallelHasher};
pub use stream::{ChunkStream, MemoryStream, ReaderStream};
pub use worker::WorkerStats;

// The digest type is part of the public API surface.
pub use riptide_primitives::Digest;
