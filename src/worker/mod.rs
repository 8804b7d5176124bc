//! Worker-side execution of benchmark jobs.
//!
//! - **Process supervision**: spawns the sysbench process, tracks its pid,
//!   captures stdout/stderr and can kill it on cancellation
//! - **Command line**: allow-listed sysbench flags, escaped for display
//! - **Script generation**: renders the Lua driver sysbench runs
//! - **Result parsing**: latency metrics out of sysbench's report
//! - **Heartbeat**: keeps this worker's claims from being swept
//!
//! # Components
//!
//! - [`ProcessSupervisor`]: spawn, wait and kill benchmark processes
//! - [`SysbenchCommand`](command::SysbenchCommand): the command line
//! - [`LuaScriptGenerator`](script::LuaScriptGenerator): default script generator
//! - [`parse_metrics`](parser::parse_metrics): best-effort metric extraction
//! - [`heartbeat`]: periodic liveness signal to the lease store

pub mod command;
pub mod executor;
pub mod heartbeat;
pub mod parser;
pub mod script;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use command::SysbenchCommand;
pub use executor::{ProcessOutcome, ProcessSupervisor, RunningProcess};
pub use parser::{parse_metrics, BenchMetrics};
pub use script::{LuaScriptGenerator, ScriptGenerator, ScriptRequest};

/// Identity of a worker process. Claims are held by workers, and a worker
/// that stops heartbeating loses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
