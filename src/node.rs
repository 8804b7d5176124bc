use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalEngine;
use crate::config::EngineConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::engine::ExecutionEngine;
use crate::lock::{LeaseStore, MemoryLeaseStore, RecoverySweeper};
use crate::scheduler::{Instance, MemoryJobStore};
use crate::worker::heartbeat::HeartbeatSender;

/// A worker process: the execution engine plus its background tasks.
pub struct Node {
    pub config: EngineConfig,
    pub engine: Arc<ExecutionEngine>,
    pub jobs: Arc<MemoryJobStore>,
    pub leases: Arc<MemoryLeaseStore>,
    pub dashboard_addr: Option<SocketAddr>,
}

impl Node {
    /// Build a node backed by in-memory stores.
    pub async fn new(
        config: EngineConfig,
        instances: Vec<Instance>,
        approvals: Arc<dyn ApprovalEngine>,
        dashboard_addr: Option<SocketAddr>,
    ) -> Self {
        let jobs = Arc::new(MemoryJobStore::new());
        for instance in instances {
            tracing::info!(instance = %instance.id, name = %instance.name, "Registered instance");
            jobs.add_instance(instance).await;
        }
        let leases = Arc::new(MemoryLeaseStore::new(config.lease.worker_timeout()));

        let engine = Arc::new(ExecutionEngine::new(
            config.clone(),
            jobs.clone(),
            leases.clone(),
            approvals,
        ));

        Self {
            config,
            engine,
            jobs,
            leases,
            dashboard_addr,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Spawns the heartbeat sender and the claim sweeper, then serves the
    /// dashboard when an address is configured. Benchmarks already running
    /// are left to finish on their own tasks.
    pub async fn run(self, shutdown: CancellationToken) {
        let worker = self.config.worker_id;
        tracing::info!(worker = %worker, "Node starting");

        let leases: Arc<dyn LeaseStore> = self.leases.clone();

        let heartbeat = HeartbeatSender::new(self.config.lease.heartbeat_interval_ms);
        let heartbeat_leases = leases.clone();
        let heartbeat_shutdown = shutdown.clone();
        let heartbeat_handle = tokio::spawn(async move {
            heartbeat
                .run(worker, heartbeat_leases, heartbeat_shutdown)
                .await;
        });

        let sweeper = RecoverySweeper::new(leases, self.config.lease.sweep_interval_ms);
        let sweep_shutdown = shutdown.clone();
        let sweep_handle = tokio::spawn(async move {
            sweeper.run(sweep_shutdown).await;
        });

        match self.dashboard_addr {
            Some(addr) => {
                let state = DashboardState {
                    engine: self.engine.clone(),
                };
                run_dashboard(addr, state, shutdown.clone()).await;
            }
            None => shutdown.cancelled().await,
        }

        // The dashboard may exit on a bind failure; stop the rest with it.
        shutdown.cancel();
        let (heartbeat_result, sweep_result) = tokio::join!(heartbeat_handle, sweep_handle);
        if let Err(e) = heartbeat_result {
            tracing::error!(worker = %worker, error = %e, "Heartbeat task failed");
        }
        if let Err(e) = sweep_result {
            tracing::error!(worker = %worker, error = %e, "Claim sweeper task failed");
        }
        tracing::info!(worker = %worker, "Node stopped");
    }
}
