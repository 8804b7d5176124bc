use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lock::LeaseStore;
use crate::worker::WorkerId;

/// Heartbeat sender that periodically marks this worker alive in the lease
/// store.
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Run the heartbeat sender until `shutdown` is cancelled
    pub async fn run(
        &self,
        worker: WorkerId,
        leases: Arc<dyn LeaseStore>,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = leases.heartbeat(worker).await {
                        tracing::warn!(worker = %worker, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }
}
