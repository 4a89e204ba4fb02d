//! Zoolock Client - distributed locks over a ZooKeeper-like store
//!
//! This crate provides:
//! - The `CoordinationStore` contract and an embedded `MemoryStore`
//! - FIFO locks built from ephemeral sequential nodes, watching only the
//!   immediate predecessor
//! - Optional admission cap, acquisition timeout and hold lease per lock
//! - An injectable logger with a no-op default

pub mod config;
pub mod error;
pub mod lock;
pub mod logger;
pub mod store;

pub use config::{LockClientConfig, LockOptions};
pub use error::{LockError, Result, StoreError};
pub use lock::{LockClient, LockDirectory, LockHandle, Phase};
pub use logger::{FnLogger, LockLogger, NoopLogger, SharedLogger, TracingLogger};
pub use store::{CoordinationStore, MemoryStore};
