//! Configuration management for the zoolock binary
//!
//! Sources, lowest precedence first: `conf/zoolock.yml` (optional),
//! `ZOOLOCK_*` environment variables (`__` separates nesting, e.g.
//! `ZOOLOCK_LOCK__TIMEOUT_MS`), then command line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};
use tracing::Level;
use zoolock_client::LockClientConfig;
use zoolock_client::config::{DEFAULT_LISTING_RETRIES, DEFAULT_LISTING_RETRY_DELAY_MS, DEFAULT_ROOT};

use crate::logging::{LogRotation, LoggingConfig};
use crate::scenario::ScenarioConfig;

pub const ROOT: &str = "root";
pub const LISTING_RETRIES: &str = "listing.retries";
pub const LISTING_RETRY_DELAY_MS: &str = "listing.retry_delay_ms";
pub const LOCK_TIMEOUT_MS: &str = "lock.timeout_ms";
pub const LOCK_MAX_CHILD_LOCK_LIMIT: &str = "lock.max_child_lock_limit";
pub const LOCK_LEASE_MS: &str = "lock.lease_ms";
pub const LOGGING_LEVEL: &str = "logging.level";
pub const LOGGING_CONSOLE: &str = "logging.console";
pub const LOGGING_FILE: &str = "logging.file";
pub const LOGGING_DIR: &str = "logging.dir";
pub const LOGGING_ROTATION: &str = "logging.rotation";
pub const SCENARIO_WORKERS: &str = "scenario.workers";
pub const SCENARIO_RESOURCE: &str = "scenario.resource";
pub const SCENARIO_HOLD_MS: &str = "scenario.hold_ms";

const DEFAULT_WORKERS: usize = 5;
const DEFAULT_RESOURCE: &str = "/hello";
const DEFAULT_HOLD_MS: u64 = 20;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "zoolock", about = "Run a lock contention scenario against an embedded store")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", env = "ZOOLOCK_CONFIG", default_value = "conf/zoolock.yml")]
    pub config: PathBuf,
    /// Lock root
    #[arg(long = "root")]
    pub root: Option<String>,
    /// Resource every worker contends for
    #[arg(short = 'r', long = "resource")]
    pub resource: Option<String>,
    /// Number of concurrent workers
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,
    /// How long each worker holds the lock
    #[arg(long = "hold-ms")]
    pub hold_ms: Option<u64>,
    /// Acquisition timeout (0 = none)
    #[arg(short = 't', long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
    /// Admission cap (0 = unlimited)
    #[arg(short = 'l', long = "limit")]
    pub limit: Option<usize>,
    /// Maximum hold time after acquisition (0 = none)
    #[arg(long = "lease-ms")]
    pub lease_ms: Option<u64>,
    /// Console and file log level
    #[arg(long = "log-level", env = "ZOOLOCK_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Application configuration loaded from the config file, environment and arguments
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new(args: Cli) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(config::File::from(args.config.clone()).required(false))
            .add_source(
                Environment::with_prefix("ZOOLOCK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = args.root {
            config_builder = config_builder.set_override(ROOT, v)?;
        }
        if let Some(v) = args.resource {
            config_builder = config_builder.set_override(SCENARIO_RESOURCE, v)?;
        }
        if let Some(v) = args.workers {
            config_builder = config_builder.set_override(SCENARIO_WORKERS, v as u64)?;
        }
        if let Some(v) = args.hold_ms {
            config_builder = config_builder.set_override(SCENARIO_HOLD_MS, v)?;
        }
        if let Some(v) = args.timeout_ms {
            config_builder = config_builder.set_override(LOCK_TIMEOUT_MS, v)?;
        }
        if let Some(v) = args.limit {
            config_builder = config_builder.set_override(LOCK_MAX_CHILD_LOCK_LIMIT, v as u64)?;
        }
        if let Some(v) = args.lease_ms {
            config_builder = config_builder.set_override(LOCK_LEASE_MS, v)?;
        }
        if let Some(v) = args.log_level {
            config_builder = config_builder.set_override(LOGGING_LEVEL, v)?;
        }

        Ok(Configuration {
            config: config_builder.build()?,
        })
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }

    // ========================================================================
    // Lock client
    // ========================================================================

    pub fn root(&self) -> String {
        self.config
            .get_string(ROOT)
            .unwrap_or(DEFAULT_ROOT.to_string())
    }

    pub fn client_config(&self) -> LockClientConfig {
        let retries = u32::try_from(self.get_u64(LISTING_RETRIES, DEFAULT_LISTING_RETRIES.into()))
            .unwrap_or(DEFAULT_LISTING_RETRIES);

        LockClientConfig::new(&self.root())
            .with_listing_retries(
                retries,
                self.get_u64(LISTING_RETRY_DELAY_MS, DEFAULT_LISTING_RETRY_DELAY_MS),
            )
            .with_default_timeout_ms(self.get_u64(LOCK_TIMEOUT_MS, 0))
            .with_default_max_child_lock_limit(self.get_u64(LOCK_MAX_CHILD_LOCK_LIMIT, 0) as usize)
            .with_default_lease_ms(self.get_u64(LOCK_LEASE_MS, 0))
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        let defaults = LoggingConfig::default();
        LoggingConfig {
            log_dir: self
                .config
                .get_string(LOGGING_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            console_output: self
                .config
                .get_bool(LOGGING_CONSOLE)
                .unwrap_or(defaults.console_output),
            file_logging: self
                .config
                .get_bool(LOGGING_FILE)
                .unwrap_or(defaults.file_logging),
            level: self
                .config
                .get_string(LOGGING_LEVEL)
                .ok()
                .and_then(|v| v.parse::<Level>().ok())
                .unwrap_or(defaults.level),
            rotation: self
                .config
                .get_string(LOGGING_ROTATION)
                .ok()
                .and_then(|v| v.parse::<LogRotation>().ok())
                .unwrap_or(defaults.rotation),
        }
    }

    // ========================================================================
    // Scenario
    // ========================================================================

    pub fn scenario_config(&self) -> ScenarioConfig {
        ScenarioConfig {
            workers: self.get_u64(SCENARIO_WORKERS, DEFAULT_WORKERS as u64) as usize,
            resource: self
                .config
                .get_string(SCENARIO_RESOURCE)
                .unwrap_or(DEFAULT_RESOURCE.to_string()),
            hold: Duration::from_millis(self.get_u64(SCENARIO_HOLD_MS, DEFAULT_HOLD_MS)),
        }
    }
}
