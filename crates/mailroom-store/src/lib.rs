//! # mailroom-store
//!
//! Access to the single embedded `SQLite` database.
//!
//! The file has exactly one writer. Every mutation goes through the
//! [`WriteQueue`], whose dedicated worker thread owns the only write
//! connection, runs operations strictly in arrival order (one transaction
//! each) and checkpoints the WAL periodically. Callers normally go through
//! the [`RetryingWriter`] façade, which adds exponential backoff for
//! transient contention and a bound on how long a caller waits.
//!
//! Reads never touch the writer: [`ReadAccessor`] opens a fresh connection
//! per call on a blocking thread, so any number of lookups run concurrently.
//!
//! - [`connection`]: pragmas, connection opening, [`ReadAccessor`]
//! - [`schema`]: the relational contract and its idempotent bootstrap
//! - [`operation`]: [`WriteOperation`] and [`QueryResult`]
//! - [`checkpoint`]: when the writer checkpoints
//! - [`write_queue`]: the single-writer queue
//! - [`retry`]: the retrying façade

#![deny(unsafe_code)]

pub mod checkpoint;
pub mod connection;
pub mod errors;
pub mod operation;
pub mod retry;
pub mod schema;
pub mod write_queue;

pub use checkpoint::CheckpointPolicy;
pub use connection::{ConnectionConfig, ReadAccessor, open_connection};
pub use errors::{Result, StoreError};
pub use operation::{Params, QueryResult, WriteOperation};
pub use retry::RetryingWriter;
pub use write_queue::{WriteQueue, WriteQueueConfig, WriterStats};

/// Re-exported so callers can build [`Params`] without naming `rusqlite`.
pub use rusqlite::types::Value;
