//! Scheduler configuration
//!
//! Drivers configure their transaction manager from two places: a TOML file
//! shipped with the application, and options embedded in the connection
//! string. Both end up in a [`SchedulerConfig`], which builds the manager.
//!
//! ```toml
//! concurrent_requests = 4
//! trace_transactions = true
//!
//! [executor]
//! kind = "elastic"
//! workers = 8
//! queue_depth = 50
//! idle_threshold_ms = 30000
//! ```

use plcflow_core::{Error, Result};
use plcflow_pool::{ElasticSettings, Executor, WorkerPool, DEFAULT_QUEUE_DEPTH};
use plcflow_transactions::{TransactionManager, DEFAULT_CONCURRENT_REQUESTS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Connection option toggling per-worker logging.
pub const OPTION_TRACE_WORKERS: &str = "traceTransactionManagerWorkers";
/// Connection option toggling per-transaction logging.
pub const OPTION_TRACE_TRANSACTIONS: &str = "traceTransactionManagerTransactions";
/// Connection option setting the concurrency cap.
pub const OPTION_MAX_CONCURRENT_REQUESTS: &str = "maxConcurrentRequests";

/// Shape of a dedicated executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Static worker set
    #[default]
    Fixed,
    /// Worker set scaling between one and `workers`
    Elastic,
}

/// Dedicated executor for one manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Fixed or elastic
    pub kind: ExecutorKind,
    /// Worker count (fixed) or upper bound (elastic)
    pub workers: usize,
    /// Capacity of the work queue
    pub queue_depth: usize,
    /// Grower period in milliseconds (elastic only)
    pub grow_interval_ms: u64,
    /// Shrinker period in milliseconds (elastic only)
    pub shrink_interval_ms: u64,
    /// Idle time before a worker is retired, in milliseconds (elastic only)
    pub idle_threshold_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let elastic = ElasticSettings::new(1);
        Self {
            kind: ExecutorKind::Fixed,
            workers: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            grow_interval_ms: elastic.grow_interval.as_millis() as u64,
            shrink_interval_ms: elastic.shrink_interval.as_millis() as u64,
            idle_threshold_ms: elastic.idle_threshold.as_millis() as u64,
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "executor.workers must be at least 1".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(Error::InvalidConfig(
                "executor.queue_depth must be at least 1".to_string(),
            ));
        }
        if self.kind == ExecutorKind::Elastic
            && (self.grow_interval_ms == 0 || self.shrink_interval_ms == 0)
        {
            return Err(Error::InvalidConfig(
                "executor control intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the (not yet started) pool this section describes.
    pub fn build_pool(&self, trace_workers: bool) -> WorkerPool {
        let builder = WorkerPool::builder()
            .queue_depth(self.queue_depth)
            .trace_workers(trace_workers);
        match self.kind {
            ExecutorKind::Fixed => builder.workers(self.workers).build(),
            ExecutorKind::Elastic => builder
                .elastic(
                    ElasticSettings::new(self.workers)
                        .with_grow_interval(Duration::from_millis(self.grow_interval_ms))
                        .with_shrink_interval(Duration::from_millis(self.shrink_interval_ms))
                        .with_idle_threshold(Duration::from_millis(self.idle_threshold_ms)),
                )
                .build(),
        }
    }
}

/// Configuration of a transaction manager and, optionally, its executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently running transactions
    pub concurrent_requests: usize,
    /// Verbose per-worker logging
    pub trace_workers: bool,
    /// Verbose per-transaction logging
    pub trace_transactions: bool,
    /// Dedicated executor; the shared one is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            trace_workers: false,
            trace_transactions: false,
            executor: None,
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Apply one connection-string option.
    ///
    /// Keys not owned by the scheduler are ignored, they belong to the
    /// protocol driver.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            OPTION_TRACE_WORKERS => self.trace_workers = parse_bool(key, value)?,
            OPTION_TRACE_TRANSACTIONS => self.trace_transactions = parse_bool(key, value)?,
            OPTION_MAX_CONCURRENT_REQUESTS => {
                let n = value.trim().parse::<usize>().map_err(|e| {
                    Error::InvalidConfig(format!("{}={:?}: {}", key, value, e))
                })?;
                if n == 0 {
                    return Err(Error::InvalidConfig(format!(
                        "{} must be at least 1",
                        key
                    )));
                }
                self.concurrent_requests = n;
            }
            _ => {
                debug!(key, "Ignoring option not owned by the scheduler");
            }
        }
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_requests == 0 {
            return Err(Error::InvalidConfig(
                "concurrent_requests must be at least 1".to_string(),
            ));
        }
        match &self.executor {
            Some(executor) => executor.validate(),
            None => Ok(()),
        }
    }

    /// Build the manager, starting a dedicated executor if one is configured.
    pub fn build(&self) -> Result<TransactionManager> {
        self.validate()?;
        let mut builder = TransactionManager::builder()
            .concurrent_requests(self.concurrent_requests)
            .trace_transactions(self.trace_transactions)
            .trace_workers(self.trace_workers);
        if let Some(executor) = &self.executor {
            let pool = executor.build_pool(self.trace_workers);
            pool.start();
            info!(
                kind = ?executor.kind,
                workers = executor.workers,
                queue_depth = executor.queue_depth,
                "Started dedicated executor"
            );
            builder = builder.executor(Arc::new(pool));
        }
        Ok(builder.build())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(Error::InvalidConfig(format!(
            "{}={:?}: expected a boolean",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrent_requests, 1);
        assert!(!config.trace_workers);
        assert!(config.executor.is_none());
        assert_eq!(SchedulerConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn test_parse_full_document() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            concurrent_requests = 4
            trace_transactions = true

            [executor]
            kind = "elastic"
            workers = 8
            queue_depth = 50
            idle_threshold_ms = 30000
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrent_requests, 4);
        assert!(config.trace_transactions);
        let executor = config.executor.unwrap();
        assert_eq!(executor.kind, ExecutorKind::Elastic);
        assert_eq!(executor.workers, 8);
        assert_eq!(executor.queue_depth, 50);
        assert_eq!(executor.grow_interval_ms, 100);
        assert_eq!(executor.shrink_interval_ms, 5000);
        assert_eq!(executor.idle_threshold_ms, 30000);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = SchedulerConfig::from_toml_str("concurent_requests = 4").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        assert!(SchedulerConfig::from_toml_str("concurrent_requests = 0").is_err());
        assert!(SchedulerConfig::from_toml_str("[executor]\nqueue_depth = 0").is_err());
        assert!(SchedulerConfig::from_toml_str("[executor]\nworkers = 0").is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_executor() {
        let mut config = SchedulerConfig::default();
        config.executor = Some(ExecutorConfig {
            kind: ExecutorKind::Elastic,
            workers: 3,
            ..ExecutorConfig::default()
        });
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("kind = \"elastic\""));
        assert_eq!(SchedulerConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_apply_option() {
        let mut config = SchedulerConfig::default();
        config.apply_option(OPTION_TRACE_WORKERS, "true").unwrap();
        config.apply_option(OPTION_TRACE_TRANSACTIONS, "1").unwrap();
        config.apply_option(OPTION_MAX_CONCURRENT_REQUESTS, "7").unwrap();
        config.apply_option("remote-rack", "0").unwrap();
        assert!(config.trace_workers);
        assert!(config.trace_transactions);
        assert_eq!(config.concurrent_requests, 7);

        assert!(matches!(
            config.apply_option(OPTION_TRACE_WORKERS, "maybe"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(config
            .apply_option(OPTION_MAX_CONCURRENT_REQUESTS, "-1")
            .is_err());
        assert!(config
            .apply_option(OPTION_MAX_CONCURRENT_REQUESTS, "0")
            .is_err());
        assert_eq!(config.concurrent_requests, 7);
    }

    #[test]
    fn test_build_with_dedicated_executor() {
        let config = SchedulerConfig {
            concurrent_requests: 2,
            executor: Some(ExecutorConfig {
                workers: 2,
                queue_depth: 8,
                ..ExecutorConfig::default()
            }),
            ..SchedulerConfig::default()
        };
        let manager = config.build().unwrap();
        assert_eq!(manager.number_of_concurrent_requests(), 2);
        assert!(manager.executor().is_running());

        manager.close().unwrap();
        assert!(!manager.executor().is_running());
    }

    #[test]
    fn test_build_elastic_pool() {
        let executor = ExecutorConfig {
            kind: ExecutorKind::Elastic,
            workers: 6,
            grow_interval_ms: 20,
            ..ExecutorConfig::default()
        };
        let pool = executor.build_pool(false);
        assert_eq!(pool.worker_count(), 1);
        let settings = pool.elastic_settings().unwrap();
        assert_eq!(settings.max_workers, 6);
        assert_eq!(settings.grow_interval, Duration::from_millis(20));
    }
}
