use std::path::PathBuf;
use std::time::Duration;

use crate::worker::WorkerId;

/// Where sysbench lives and where generated driver scripts go.
///
/// Scripts are written under `script_dir` and never cleaned up here; the
/// system temp directory is the default so that normal temp reclamation
/// removes them.
#[derive(Debug, Clone)]
pub struct SysbenchConfig {
    /// Path to (or name of) the sysbench executable
    pub program: PathBuf,
    /// Directory for generated Lua scripts
    pub script_dir: PathBuf,
}

impl Default for SysbenchConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("sysbench"),
            script_dir: std::env::temp_dir(),
        }
    }
}

/// Claim and liveness timing.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// How long a claim may wait in the queue before the job times out.
    pub claim_ttl_secs: u64,
    /// Fairness re-check interval while queued.
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// A worker silent for this long loses its claims at the next sweep.
    pub worker_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            claim_ttl_secs: 86_400,
            poll_interval_ms: 1_000,
            heartbeat_interval_ms: 5_000,
            worker_timeout_ms: 30_000,
            sweep_interval_ms: 10_000,
        }
    }
}

impl LeaseConfig {
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_id: WorkerId,
    pub sysbench: SysbenchConfig,
    pub lease: LeaseConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::new(),
            sysbench: SysbenchConfig::default(),
            lease: LeaseConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.sysbench.program = program.into();
        self
    }

    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sysbench.script_dir = dir.into();
        self
    }

    pub fn with_claim_ttl_secs(mut self, secs: u64) -> Self {
        self.lease.claim_ttl_secs = secs;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.lease.poll_interval_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysbench_config_default() {
        let cfg = SysbenchConfig::default();
        assert_eq!(cfg.program, PathBuf::from("sysbench"));
        assert_eq!(cfg.script_dir, std::env::temp_dir());
    }

    #[test]
    fn lease_config_default() {
        let cfg = LeaseConfig::default();
        assert_eq!(cfg.claim_ttl(), Duration::from_secs(86_400));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_interval_ms, 5_000);
        assert_eq!(cfg.worker_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval_ms, 10_000);
    }

    #[test]
    fn heartbeat_outpaces_worker_timeout() {
        let cfg = LeaseConfig::default();
        assert!(cfg.heartbeat_interval_ms * 2 < cfg.worker_timeout_ms);
    }

    #[test]
    fn engine_config_new_keeps_worker_id() {
        let worker = WorkerId::new();
        let cfg = EngineConfig::new(worker);
        assert_eq!(cfg.worker_id, worker);
        assert_eq!(cfg.lease.claim_ttl_secs, 86_400);
    }

    #[test]
    fn engine_config_builders() {
        let cfg = EngineConfig::default()
            .with_program("/opt/sysbench/bin/sysbench")
            .with_script_dir("/var/tmp/bench")
            .with_claim_ttl_secs(5)
            .with_poll_interval_ms(20);
        assert_eq!(cfg.sysbench.program, PathBuf::from("/opt/sysbench/bin/sysbench"));
        assert_eq!(cfg.sysbench.script_dir, PathBuf::from("/var/tmp/bench"));
        assert_eq!(cfg.lease.claim_ttl_secs, 5);
        assert_eq!(cfg.lease.poll_interval_ms, 20);
    }
}
