use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::scheduler::WorkerId;
use crate::worker::link::SchedulerLink;

/// Keeps a worker registered by heartbeating on a fixed interval.
pub struct HeartbeatSender {
    worker_id: WorkerId,
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(worker_id: WorkerId, interval: Duration) -> Self {
        Self {
            worker_id,
            interval,
        }
    }

    /// Heartbeat until `cancel` fires. The first beat goes out immediately.
    pub async fn run<L: SchedulerLink>(&self, scheduler: Arc<L>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = scheduler.heartbeat(&self.worker_id).await {
                        tracing::warn!(worker_id = %self.worker_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
        tracing::debug!(worker_id = %self.worker_id, "Heartbeat stopped");
    }
}
