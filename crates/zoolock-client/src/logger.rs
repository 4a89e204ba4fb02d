//! Logging capability injected into the lock components
//!
//! The lock protocol never writes to a process-wide sink on its own. Callers
//! hand a [`LockLogger`] to the [`LockDirectory`](crate::LockDirectory); the
//! default discards everything.

use std::sync::Arc;

use tracing::{error, info};

/// Two-level, fire-and-forget logging sink.
pub trait LockLogger: Send + Sync + 'static {
    fn info(&self, message: &str);

    fn error(&self, message: &str);
}

/// Shared logger handle passed between components.
pub type SharedLogger = Arc<dyn LockLogger>;

/// Logger that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl LockLogger for NoopLogger {
    fn info(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}

/// Logger that forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl LockLogger for TracingLogger {
    fn info(&self, message: &str) {
        info!(target: "zoolock_client", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "zoolock_client", "{}", message);
    }
}

/// Severity passed to [`FnLogger`] closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// A logger that invokes a closure.
pub struct FnLogger<F>
where
    F: Fn(LogLevel, &str) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnLogger<F>
where
    F: Fn(LogLevel, &str) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> LockLogger for FnLogger<F>
where
    F: Fn(LogLevel, &str) + Send + Sync + 'static,
{
    fn info(&self, message: &str) {
        (self.f)(LogLevel::Info, message);
    }

    fn error(&self, message: &str) {
        (self.f)(LogLevel::Error, message);
    }
}

pub fn noop() -> SharedLogger {
    Arc::new(NoopLogger)
}
