use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lock::LeaseStore;

/// Background task that frees claims left behind by crashed workers.
pub struct RecoverySweeper {
    leases: Arc<dyn LeaseStore>,
    interval: Duration,
}

impl RecoverySweeper {
    pub fn new(leases: Arc<dyn LeaseStore>, interval_ms: u64) -> Self {
        Self {
            leases,
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Sweep once. Returns how many claims were removed.
    pub async fn sweep_once(&self) -> usize {
        match self.leases.sweep().await {
            Ok(removed) => {
                for claim in &removed {
                    tracing::warn!(
                        claim = %claim.key(),
                        holder = %claim.holder,
                        admitted = claim.admitted,
                        "Released stale claim"
                    );
                }
                removed.len()
            }
            Err(e) => {
                tracing::error!(error = %e, "Claim sweep failed");
                0
            }
        }
    }

    /// Sweep on a fixed interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Recovery sweep stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}
