//! Lock namespace binding
//!
//! A [`LockDirectory`] wraps a store connection and a logger. Binding it to a
//! root with [`LockDirectory::set_dir`] yields a [`LockClient`] that places
//! every contender node under that root.

use std::sync::Arc;

use super::contender::{AbandonGuard, Contender};
use super::handle::LockHandle;
use super::request::LockRequest;
use super::timer::TimerKind;
use crate::config::{LockClientConfig, LockOptions};
use crate::error::{LockError, Result};
use crate::logger::{SharedLogger, noop};
use crate::store::{CoordinationStore, SEPARATOR, split_path};

/// Where the contender node for one resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContenderPath {
    /// Logical resource path, e.g. `/hello`
    pub resource: String,
    /// `root + resource`, passed to sequential creation
    pub physical: String,
    /// Parent node whose children are the siblings
    pub parent: String,
    /// Name prefix shared by every contender of this resource
    pub prefix: String,
}

/// Check that a root or resource path is absolute and has no empty segments.
pub fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with(SEPARATOR) {
        return Err(LockError::invalid_path(path, "must start with '/'"));
    }
    if path.len() > 1 && path.ends_with(SEPARATOR) {
        return Err(LockError::invalid_path(path, "must not end with '/'"));
    }
    if path.len() > 1 && path[1..].split(SEPARATOR).any(str::is_empty) {
        return Err(LockError::invalid_path(path, "must not contain empty segments"));
    }
    Ok(())
}

/// Resolve `resource` under `root` by concatenation.
pub fn resolve(root: &str, resource: &str) -> Result<ContenderPath> {
    validate_path(root)?;
    validate_path(resource)?;
    if resource.len() == 1 {
        return Err(LockError::invalid_path(resource, "must name a resource"));
    }

    let physical = if root.len() == 1 {
        resource.to_string()
    } else {
        format!("{}{}", root, resource)
    };
    let (parent, prefix) = split_path(&physical)
        .ok_or_else(|| LockError::invalid_path(physical.as_str(), "must start with '/'"))?;

    Ok(ContenderPath {
        resource: resource.to_string(),
        parent: parent.to_string(),
        prefix: prefix.to_string(),
        physical: physical.clone(),
    })
}

/// Entry point: a store connection plus the logger shared by all locks.
#[derive(Clone)]
pub struct LockDirectory {
    store: Arc<dyn CoordinationStore>,
    logger: SharedLogger,
    config: LockClientConfig,
}

impl LockDirectory {
    /// Create a directory with the no-op logger and default configuration.
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            logger: noop(),
            config: LockClientConfig::default(),
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_config(mut self, config: LockClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind to `dir`. Fails without touching the store if `dir` is not an
    /// absolute node path.
    pub fn set_dir(&self, dir: &str) -> Result<LockClient> {
        validate_path(dir)?;
        Ok(LockClient {
            store: self.store.clone(),
            logger: self.logger.clone(),
            config: self.config.clone(),
            root: dir.to_string(),
        })
    }

    /// Bind to the root named in the configuration.
    pub fn client(&self) -> Result<LockClient> {
        self.set_dir(&self.config.root)
    }
}

/// Lock client bound to one root.
#[derive(Clone)]
pub struct LockClient {
    store: Arc<dyn CoordinationStore>,
    logger: SharedLogger,
    config: LockClientConfig,
    root: String,
}

impl LockClient {
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolve a resource path against this client's root.
    pub fn resolve(&self, resource: &str) -> Result<ContenderPath> {
        resolve(&self.root, resource)
    }

    /// Acquire the lock on `resource`.
    ///
    /// Waits behind earlier contenders in creation order. Fails with
    /// `AdmissionLimitExceeded` when `max_child_lock_limit` contenders are
    /// already ahead, and with `AcquisitionTimedOut` when `timeout` elapses
    /// first. On any failure the contender node has been removed.
    pub async fn lock(&self, resource: &str, options: LockOptions) -> Result<LockHandle> {
        let target = self.resolve(resource)?;
        let options = self.config.resolve(options);

        let contender = Contender::new(self.store.clone(), self.logger.clone(), resource);
        let timeout = options.effective_timeout();
        if let Some(timeout) = timeout {
            contender.arm_timer(timeout, TimerKind::Acquisition);
        }

        let mut guard = AbandonGuard::new(contender.clone());
        let mut request = LockRequest::new(
            contender.clone(),
            target,
            options.effective_limit(),
            timeout,
            self.config.listing_retries,
            self.config.listing_retry_delay(),
        );
        let outcome = request.acquire().await;
        guard.disarm();
        outcome?;

        contender.disarm_timer();
        if let Some(lease) = options.effective_lease() {
            contender.arm_timer(lease, TimerKind::Lease);
        }

        let path = contender.path().unwrap_or_default().to_string();
        let sequence = request.sequence().unwrap_or_default();
        Ok(LockHandle::new(contender, path, sequence))
    }
}
