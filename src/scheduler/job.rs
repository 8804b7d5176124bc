use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::lifecycle::JobStatus;
use crate::worker::parser::BenchMetrics;

/// Job identifier. Assigned by the job store in strictly increasing
/// submission order; queue fairness depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target database instance identifier. This is the resource jobs are
/// serialized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a job is queued as soon as it is approved or waits for an
/// external timer to trigger it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Immediate,
    Deferred,
}

/// Benchmark parameters supplied by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchParams {
    pub threads: u32,
    pub duration_secs: u64,
    pub db_name: String,
    /// Statement with `?` placeholders, executed once per benchmark event.
    pub sql_template: String,
    /// One entry per placeholder; each entry is a delimited list of values.
    #[serde(default)]
    pub sql_params: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub param_delimiter: String,
    /// Draw one shared random index per event instead of one per parameter.
    #[serde(default)]
    pub params_sync: bool,
}

fn default_delimiter() -> String {
    ",".to_string()
}

/// A submission before the store has assigned it an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub instance_id: InstanceId,
    pub owner: String,
    pub params: BenchParams,
    #[serde(default)]
    pub schedule: Schedule,
    /// Approval-workflow identifier, when the workflow assigns its own.
    #[serde(default)]
    pub audit_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub audit_id: u64,
    pub instance_id: InstanceId,
    pub owner: String,
    pub status: JobStatus,
    pub params: BenchParams,
    pub schedule: Schedule,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, submission: NewJob) -> Self {
        Self {
            id,
            audit_id: submission.audit_id.unwrap_or(id.0),
            instance_id: submission.instance_id,
            owner: submission.owner,
            status: JobStatus::PendingApproval,
            params: submission.params,
            schedule: submission.schedule,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `status`, keeping `finished_at` set exactly when the status is
    /// terminal. Legality is checked by the caller.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = if status.is_terminal() {
            Some(Utc::now())
        } else {
            None
        };
    }
}

/// Connection details of a target database instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Captured output of a finished benchmark process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPayload {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub metrics: BenchMetrics,
}

/// Execution bookkeeping, created when a job is admitted.
///
/// `pid` is only set while the benchmark process is alive; `payload` only
/// once the job reached a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub job_id: JobId,
    pub pid: Option<u32>,
    pub command: Option<String>,
    pub payload: Option<RunPayload>,
    pub started_at: DateTime<Utc>,
}

impl JobRunRecord {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            pid: None,
            command: None,
            payload: None,
            started_at: Utc::now(),
        }
    }
}
