use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// Policy knobs for the scheduling core.
///
/// The liveness defaults (5 minute timeout, 1 minute sweep) are starting
/// points, not tuned values. Deployments with short heartbeat intervals
/// should lower both.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// A worker silent for longer than this is presumed lost.
    pub worker_timeout: Duration,
    /// How often the stale-worker sweep runs. Must be shorter than the timeout.
    pub sweep_interval: Duration,
    /// Requeues allowed after worker loss before a task is failed.
    pub max_retries: u32,
    /// Completed and failed tasks older than this are dropped by the sweep.
    pub finished_task_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            max_retries: 3,
            finished_task_retention: Duration::from_secs(60 * 60),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_timeout.is_zero() {
            return Err(SchedulerError::Config(
                "worker timeout must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(SchedulerError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval >= self.worker_timeout {
            return Err(SchedulerError::Config(format!(
                "sweep interval ({:?}) must be shorter than worker timeout ({:?})",
                self.sweep_interval, self.worker_timeout
            )));
        }
        Ok(())
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Configuration for running task commands on a worker.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Shell used as `<shell> -c <command>`
    pub shell: String,
    /// Kill the command and report failure after this long
    pub timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    /// Number of in-process workers started alongside the master
    pub local_workers: usize,
    pub worker_id_prefix: String,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            local_workers: 0,
            worker_id_prefix: "local".to_string(),
            heartbeat_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_local_workers(mut self, count: usize) -> Self {
        self.local_workers = count;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        if self.local_workers > 0 && self.heartbeat_interval >= self.scheduler.worker_timeout {
            return Err(SchedulerError::Config(format!(
                "heartbeat interval ({:?}) must be shorter than worker timeout ({:?})",
                self.heartbeat_interval, self.scheduler.worker_timeout
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.worker_timeout, Duration::from_secs(300));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.max_retries, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn scheduler_config_rejects_zero_timeout() {
        let cfg = SchedulerConfig::default().with_worker_timeout(Duration::ZERO);
        assert!(matches!(cfg.validate(), Err(SchedulerError::Config(_))));
    }

    #[test]
    fn scheduler_config_rejects_sweep_not_shorter_than_timeout() {
        let cfg = SchedulerConfig::default()
            .with_worker_timeout(Duration::from_secs(30))
            .with_sweep_interval(Duration::from_secs(30));
        assert!(matches!(cfg.validate(), Err(SchedulerError::Config(_))));

        let cfg = cfg.with_sweep_interval(Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn executor_config_default() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.shell, "sh");
        assert!(cfg.timeout.is_none());
    }

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.local_workers, 0);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn node_config_rejects_heartbeat_slower_than_timeout() {
        let mut cfg = NodeConfig::default().with_local_workers(2).with_scheduler(
            SchedulerConfig::default()
                .with_worker_timeout(Duration::from_secs(5))
                .with_sweep_interval(Duration::from_secs(1)),
        );
        cfg.heartbeat_interval = Duration::from_secs(5);
        assert!(cfg.validate().is_err());

        cfg.heartbeat_interval = Duration::from_secs(1);
        assert!(cfg.validate().is_ok());
    }
}
