use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{QueueError, Result};
use crate::scheduler::audit::{AuditLogEntry, AuditOperation};
use crate::scheduler::job::{Instance, InstanceId, Job, JobId, JobRunRecord, NewJob, RunPayload};
use crate::scheduler::lifecycle::{JobStatus, Transition};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Persistent job state: jobs, run records, instances and the audit trail.
///
/// Status changes go through [`JobStore::transition`] and
/// [`JobStore::complete`], which apply a [`Transition`] only if the job is in
/// one of its expected statuses and write the matching audit entry in the
/// same atomic step.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new submission in `PendingApproval`, assigning the next id.
    async fn insert(&self, submission: NewJob) -> Result<Job>;

    async fn get(&self, id: JobId) -> Result<Job>;

    /// All jobs, ascending by id.
    async fn list(&self) -> Result<Vec<Job>>;

    /// Conditionally change status. Fails with `InvalidTransition` carrying
    /// the current status when the job is not in an expected one.
    async fn transition(&self, id: JobId, transition: &Transition) -> Result<Job>;

    /// Conditionally apply a completion: status, payload and cleared pid.
    /// Returns `None` without changing anything but the pid when the job is
    /// already terminal.
    async fn complete(
        &self,
        id: JobId,
        transition: &Transition,
        payload: RunPayload,
    ) -> Result<Option<Job>>;

    /// Create the run record for an admitted job, with no pid yet.
    async fn begin_run(&self, id: JobId) -> Result<JobRunRecord>;

    async fn record_pid(&self, id: JobId, pid: Option<u32>, command: Option<String>) -> Result<()>;

    async fn run_record(&self, id: JobId) -> Result<Option<JobRunRecord>>;

    async fn instance(&self, id: InstanceId) -> Result<Instance>;

    /// Audit entries for a job, in creation order.
    async fn audit_log(&self, id: JobId) -> Result<Vec<AuditLogEntry>>;
}

#[derive(Debug)]
struct StoreState {
    jobs: BTreeMap<JobId, Job>,
    runs: HashMap<JobId, JobRunRecord>,
    instances: HashMap<InstanceId, Instance>,
    audit: Vec<AuditLogEntry>,
    next_id: u64,
    next_seq: u64,
}

impl StoreState {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs.get_mut(&id).ok_or(QueueError::JobNotFound(id))
    }

    fn append_audit(
        &mut self,
        job: &Job,
        operation: AuditOperation,
        operator: &str,
        description: &str,
    ) {
        self.next_seq += 1;
        self.audit.push(AuditLogEntry {
            seq: self.next_seq,
            audit_id: job.audit_id,
            job_id: job.id,
            operation,
            description: description.to_string(),
            operator: operator.to_string(),
            created_at: Utc::now(),
        });
    }

    fn apply(&mut self, id: JobId, transition: &Transition) -> Result<Job> {
        let job = self.job_mut(id)?;
        if !transition.applies_to(job.status) {
            return Err(QueueError::InvalidTransition {
                job_id: id,
                from: job.status,
                to: transition.to,
            });
        }
        job.set_status(transition.to);
        let job = job.clone();
        self.append_audit(
            &job,
            transition.operation,
            &transition.operator,
            &transition.description,
        );
        Ok(job)
    }
}

/// In-memory [`JobStore`]. One lock covers jobs, runs and the audit log, so
/// a reader never sees a status without its audit entry.
#[derive(Debug)]
pub struct MemoryJobStore {
    state: RwLock<StoreState>,
    max_jobs: usize,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                jobs: BTreeMap::new(),
                runs: HashMap::new(),
                instances: HashMap::new(),
                audit: Vec::new(),
                next_id: 0,
                next_seq: 0,
            }),
            max_jobs,
        }
    }

    /// Register or replace a target instance.
    pub async fn add_instance(&self, instance: Instance) {
        self.state
            .write()
            .await
            .instances
            .insert(instance.id, instance);
    }

    /// Returns the current number of jobs
    pub async fn len(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    /// Returns true if no job was ever stored
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.jobs.is_empty()
    }

    /// Returns true if the store is at capacity
    pub async fn is_full(&self) -> bool {
        self.state.read().await.jobs.len() >= self.max_jobs
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, submission: NewJob) -> Result<Job> {
        let mut state = self.state.write().await;
        if state.jobs.len() >= self.max_jobs {
            return Err(QueueError::QueueFull);
        }

        state.next_id += 1;
        let job = Job::new(JobId(state.next_id), submission);
        state.jobs.insert(job.id, job.clone());
        state.append_audit(&job, AuditOperation::Submit, &job.owner, "submitted");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        self.state
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(QueueError::JobNotFound(id))
    }

    async fn list(&self) -> Result<Vec<Job>> {
        Ok(self.state.read().await.jobs.values().cloned().collect())
    }

    async fn transition(&self, id: JobId, transition: &Transition) -> Result<Job> {
        self.state.write().await.apply(id, transition)
    }

    async fn complete(
        &self,
        id: JobId,
        transition: &Transition,
        payload: RunPayload,
    ) -> Result<Option<Job>> {
        let mut state = self.state.write().await;
        let current = state.job_mut(id)?.status;

        if current.is_terminal() {
            // The process is gone either way.
            if let Some(run) = state.runs.get_mut(&id) {
                run.pid = None;
            }
            return Ok(None);
        }

        let job = state.apply(id, transition)?;
        let run = state
            .runs
            .entry(id)
            .or_insert_with(|| JobRunRecord::new(id));
        run.pid = None;
        run.payload = Some(payload);
        Ok(Some(job))
    }

    async fn begin_run(&self, id: JobId) -> Result<JobRunRecord> {
        let mut state = self.state.write().await;
        state.job_mut(id)?;
        let run = JobRunRecord::new(id);
        state.runs.insert(id, run.clone());
        Ok(run)
    }

    async fn record_pid(&self, id: JobId, pid: Option<u32>, command: Option<String>) -> Result<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| QueueError::Store(format!("no run record for job {}", id)))?;
        run.pid = pid;
        if command.is_some() {
            run.command = command;
        }
        Ok(())
    }

    async fn run_record(&self, id: JobId) -> Result<Option<JobRunRecord>> {
        let state = self.state.read().await;
        if !state.jobs.contains_key(&id) {
            return Err(QueueError::JobNotFound(id));
        }
        Ok(state.runs.get(&id).cloned())
    }

    async fn instance(&self, id: InstanceId) -> Result<Instance> {
        self.state
            .read()
            .await
            .instances
            .get(&id)
            .cloned()
            .ok_or(QueueError::InstanceNotFound(id))
    }

    async fn audit_log(&self, id: JobId) -> Result<Vec<AuditLogEntry>> {
        let state = self.state.read().await;
        if !state.jobs.contains_key(&id) {
            return Err(QueueError::JobNotFound(id));
        }
        Ok(state
            .audit
            .iter()
            .filter(|entry| entry.job_id == id)
            .cloned()
            .collect())
    }
}
