use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::scheduler::events::FanoutSink;
use crate::scheduler::{Scheduler, SchedulerStats, TracingEventSink, WorkerId};
use crate::worker::{ShellExecutor, WorkerRunner};

/// The master process: scheduler, stale-worker sweep, optional local
/// workers and the HTTP API.
pub struct Node {
    pub config: NodeConfig,
    pub scheduler: Arc<Scheduler>,
    pub stats: Arc<SchedulerStats>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(SchedulerStats::new());
        let events = FanoutSink::new()
            .with(Arc::new(TracingEventSink))
            .with(stats.clone());
        let scheduler = Scheduler::with_events(config.scheduler.clone(), Arc::new(events))?;

        Ok(Self {
            config,
            scheduler: Arc::new(scheduler),
            stats,
        })
    }

    /// Run every subsystem until `shutdown` fires.
    ///
    /// 1. Spawns the sweep loop (evicts silent workers, prunes old tasks)
    /// 2. Spawns `local_workers` in-process workers
    /// 3. Serves the HTTP API (blocking until shutdown)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server cannot bind or fails. Spawned
    /// loops log their own errors.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let sweep_scheduler = self.scheduler.clone();
        let sweep_shutdown = shutdown.clone();
        let sweep = tokio::spawn(async move {
            Self::sweep_loop(sweep_scheduler, sweep_shutdown).await;
        });

        let mut workers = Vec::with_capacity(self.config.local_workers);
        for n in 1..=self.config.local_workers {
            let runner = WorkerRunner::new(
                WorkerId::from(format!("{}-{}", self.config.worker_id_prefix, n)),
                self.scheduler.clone(),
                ShellExecutor::new(self.config.executor.clone()),
                self.config.heartbeat_interval,
                self.config.poll_interval,
            );
            let token = shutdown.child_token();
            workers.push(tokio::spawn(runner.run(token)));
        }

        let state = ApiState {
            scheduler: self.scheduler.clone(),
            stats: Some(self.stats.clone()),
        };
        let served = api::serve(self.config.listen_addr, state, shutdown.clone()).await;

        // Also covers the server failing before shutdown was requested
        shutdown.cancel();
        for handle in workers {
            let _ = handle.await;
        }
        let _ = sweep.await;
        served
    }

    /// Evict silent workers and prune finished tasks every `sweep_interval`.
    ///
    /// Eviction is idempotent, so an extra tick right after another is harmless.
    async fn sweep_loop(scheduler: Arc<Scheduler>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(scheduler.config().sweep_interval);
        // The first tick completes immediately; nothing can be stale yet
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = scheduler.evict_stale().await;
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "Sweep evicted workers");
                    }
                    scheduler.prune_finished().await;
                }
            }
        }
        tracing::debug!("Sweep loop stopped");
    }
}
