//! Execution engine: admission, queueing, execution and cancellation of
//! benchmark jobs.
//!
//! # Execution flow
//!
//! 1. [`ExecutionEngine::execute`] places a claim for the job's instance; a
//!    second concurrent call for the same job finds the claim and is rejected
//! 2. The [`FairnessArbiter`] polls until the job is admitted, cancelled, or
//!    its claim expires
//! 3. On admission the job moves to `executing`, the driver script is
//!    generated and sysbench is spawned; its pid is recorded right away
//! 4. When the process exits the claim is released before anything else
//! 5. The outcome is persisted through [`ExecutionEngine::on_complete`], which
//!    leaves a job that was cancelled meanwhile untouched
//!
//! Cancellation ([`ExecutionEngine::cancel`]) writes the status first and then
//! releases the claim or kills the process, so the executing side always
//! observes `cancelled` through the store.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::approval::{trigger_name, ApprovalEngine, DeferredTriggers, NoDeferredTriggers};
use crate::config::EngineConfig;
use crate::error::{QueueError, Result};
use crate::lock::{claim_key, ClaimToken, FairnessArbiter, LeaseStore, QueueExit, ResourceId};
use crate::scheduler::{
    AuditLogEntry, AuditOperation, Instance, Job, JobId, JobStatus, JobStore, NewJob, RunPayload,
    Schedule, Transition, SYSTEM_OPERATOR,
};
use crate::worker::{
    parse_metrics, BenchMetrics, LuaScriptGenerator, ProcessOutcome, ProcessSupervisor,
    ScriptGenerator, ScriptRequest, SysbenchCommand,
};

/// What one `execute` call ended with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub message: String,
    pub payload: Option<RunPayload>,
}

impl ExecutionOutcome {
    /// The job ended without a process being started.
    fn not_run(job_id: JobId, status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            exit_code: None,
            message: message.into(),
            payload: None,
        }
    }

    fn failed(job_id: JobId, reason: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            exit_code: None,
            message: format!("execution result: failed, {}", reason),
            payload: Some(RunPayload {
                stderr: reason,
                ..RunPayload::default()
            }),
        }
    }

    fn from_process(job_id: JobId, process: ProcessOutcome) -> Self {
        if process.success() {
            let metrics = parse_metrics(&process.stdout);
            Self {
                job_id,
                status: JobStatus::Finished,
                exit_code: process.exit_code,
                message: "execution result: finished".to_string(),
                payload: Some(RunPayload {
                    exit_code: process.exit_code,
                    stdout: process.stdout,
                    stderr: process.stderr,
                    metrics,
                }),
            }
        } else {
            let reason = match process.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            let stderr = process.error_text();
            Self {
                job_id,
                status: JobStatus::Failed,
                exit_code: process.exit_code,
                message: format!("execution result: failed, {}", reason),
                payload: Some(RunPayload {
                    exit_code: process.exit_code,
                    stdout: process.stdout,
                    stderr,
                    metrics: BenchMetrics::default(),
                }),
            }
        }
    }
}

/// What a cancellation did besides changing the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub job_id: JobId,
    /// Status the job was cancelled from.
    pub previous: JobStatus,
    pub killed_pid: Option<u32>,
    /// Set when the status changed but the process could not be killed.
    pub kill_error: Option<String>,
}

/// Status of a job as seen by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub can_review: bool,
    pub can_execute: bool,
    pub can_cancel: bool,
    pub last_operation_info: String,
}

pub struct ExecutionEngine {
    config: EngineConfig,
    jobs: Arc<dyn JobStore>,
    leases: Arc<dyn LeaseStore>,
    approvals: Arc<dyn ApprovalEngine>,
    scripts: Arc<dyn ScriptGenerator>,
    triggers: Arc<dyn DeferredTriggers>,
    supervisor: ProcessSupervisor,
    arbiter: FairnessArbiter,
}

fn describe(action: &str, remark: &str) -> String {
    if remark.trim().is_empty() {
        action.to_string()
    } else {
        format!("{}: {}", action, remark.trim())
    }
}

/// Database names come from submitters; keep them to one path component.
fn script_file_name(db_name: &str, job_id: JobId) -> String {
    let safe: String = db_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}_{}.lua", safe, job_id, Utc::now().timestamp_millis())
}

impl ExecutionEngine {
    pub fn new(
        config: EngineConfig,
        jobs: Arc<dyn JobStore>,
        leases: Arc<dyn LeaseStore>,
        approvals: Arc<dyn ApprovalEngine>,
    ) -> Self {
        let arbiter = FairnessArbiter::new(leases.clone(), config.lease.poll_interval());
        Self {
            config,
            jobs,
            leases,
            approvals,
            scripts: Arc::new(LuaScriptGenerator),
            triggers: Arc::new(NoDeferredTriggers),
            supervisor: ProcessSupervisor::new(),
            arbiter,
        }
    }

    pub fn with_script_generator(mut self, scripts: Arc<dyn ScriptGenerator>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_deferred_triggers(mut self, triggers: Arc<dyn DeferredTriggers>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn leases(&self) -> &Arc<dyn LeaseStore> {
        &self.leases
    }

    // =========================================================================
    // Submission and approval
    // =========================================================================

    pub async fn submit(&self, submission: NewJob) -> Result<Job> {
        self.jobs.instance(submission.instance_id).await?;
        let job = self.jobs.insert(submission).await?;
        tracing::info!(job_id = %job.id, instance = %job.instance_id, owner = %job.owner, "Job submitted");
        Ok(job)
    }

    /// Grant approval. Deferred jobs become `scheduled`, others `approved`.
    pub async fn approve(&self, job_id: JobId, actor: &str, remark: &str) -> Result<Job> {
        let job = self.jobs.get(job_id).await?;
        if !self.approvals.can_review(actor, &job).await? {
            return Err(QueueError::Unauthorized(format!(
                "{} may not review job {}",
                actor, job_id
            )));
        }

        let to = match job.schedule {
            Schedule::Immediate => JobStatus::Approved,
            Schedule::Deferred => JobStatus::Scheduled,
        };
        let transition = Transition::new(
            &[JobStatus::PendingApproval],
            to,
            AuditOperation::Approve,
            actor,
            describe("approved", remark),
        );
        self.commit(job_id, &transition).await
    }

    pub async fn reject(&self, job_id: JobId, actor: &str, remark: &str) -> Result<Job> {
        let job = self.jobs.get(job_id).await?;
        if !self.approvals.can_review(actor, &job).await? {
            return Err(QueueError::Unauthorized(format!(
                "{} may not review job {}",
                actor, job_id
            )));
        }

        let transition = Transition::new(
            &[JobStatus::PendingApproval],
            JobStatus::Cancelled,
            AuditOperation::Reject,
            actor,
            describe("rejected", remark),
        );
        self.commit(job_id, &transition).await
    }

    /// Request execution of an approved job. The job is `queued` afterwards
    /// and waits for a task runner to call [`ExecutionEngine::execute`].
    pub async fn enqueue(&self, job_id: JobId, actor: &str) -> Result<Job> {
        let job = self.jobs.get(job_id).await?;
        if !job.status.is_runnable() {
            return Err(QueueError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Queued,
            });
        }

        let decision = self.approvals.can_execute(actor, &job).await?;
        if !decision.allowed {
            return Err(QueueError::Unauthorized(decision.reason));
        }
        if !self.approvals.is_approved(&job).await? {
            return Err(QueueError::Unauthorized(format!(
                "job {} is not approved",
                job_id
            )));
        }

        let transition = Transition::new(
            &[JobStatus::Approved, JobStatus::Scheduled],
            JobStatus::Queued,
            AuditOperation::Queue,
            actor,
            "queued for execution",
        );
        let job = self.commit(job_id, &transition).await?;
        self.remove_trigger(job_id).await;
        Ok(job)
    }

    /// Enqueue and hand the run to the tokio runtime.
    pub async fn enqueue_and_spawn(
        self: &Arc<Self>,
        job_id: JobId,
        actor: &str,
    ) -> Result<JoinHandle<Result<ExecutionOutcome>>> {
        self.enqueue(job_id, actor).await?;
        Ok(self.spawn_execute(job_id, actor.to_string()))
    }

    pub fn spawn_execute(
        self: &Arc<Self>,
        job_id: JobId,
        actor: String,
    ) -> JoinHandle<Result<ExecutionOutcome>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = engine.execute(job_id, &actor).await;
            if let Err(ref e) = result {
                tracing::warn!(job_id = %job_id, error = %e, "Execution rejected");
            }
            result
        })
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run one job to completion. Called once per job by the task runner, or
    /// by the external timer for scheduled jobs.
    pub async fn execute(&self, job_id: JobId, actor: &str) -> Result<ExecutionOutcome> {
        let job = self.jobs.get(job_id).await?;
        if job.status == JobStatus::PendingApproval || job.status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Executing,
            });
        }
        let instance = self.jobs.instance(job.instance_id).await?;
        let resource = job.instance_id;

        let claimed = self
            .leases
            .try_claim(
                resource,
                job_id,
                self.config.worker_id,
                self.config.lease.claim_ttl(),
            )
            .await?;
        let Some(token) = claimed else {
            tracing::warn!(job_id = %job_id, claim = %claim_key(resource, job_id), "Duplicate execution rejected");
            return Err(QueueError::DuplicateClaim(job_id));
        };
        tracing::info!(job_id = %job_id, claim = %token, "Claim placed");

        // Every early return releases this invocation's claim, and only it.
        let job = match self.ensure_queued(job_id, actor).await {
            Ok(job) => job,
            Err(e) => {
                self.release(&token).await;
                return Err(e);
            }
        };

        let exit = match self
            .arbiter
            .wait_for_turn(&token, self.jobs.as_ref())
            .await
        {
            Ok(exit) => exit,
            Err(e) => {
                self.release(&token).await;
                return Err(e);
            }
        };

        match exit {
            QueueExit::Admitted => {}
            QueueExit::Cancelled => {
                self.release(&token).await;
                return Ok(ExecutionOutcome::not_run(
                    job_id,
                    JobStatus::Cancelled,
                    "queue wait aborted: job cancelled",
                ));
            }
            QueueExit::TimedOut => {
                self.release(&token).await;
                return self.time_out(job_id).await;
            }
        }

        let description = if actor == SYSTEM_OPERATOR {
            "execution started by timer"
        } else {
            "execution started"
        };
        let start = Transition::new(
            &[JobStatus::Queued],
            JobStatus::Executing,
            AuditOperation::Start,
            actor,
            description,
        );
        match self.commit(job_id, &start).await {
            Ok(_) => {}
            Err(QueueError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => {
                self.release(&token).await;
                return Ok(ExecutionOutcome::not_run(
                    job_id,
                    JobStatus::Cancelled,
                    "cancelled before start",
                ));
            }
            Err(e) => {
                self.release(&token).await;
                return Err(e);
            }
        }

        tracing::info!(job_id = %job_id, instance = %instance.name, "Executing job");
        let mut outcome = self.run_admitted(&job, &instance, &token).await;
        if outcome.status == JobStatus::Cancelled {
            return Ok(outcome);
        }

        if !self.on_complete(&outcome).await? {
            let current = self.jobs.get(job_id).await?.status;
            outcome.status = current;
            outcome.message = format!("completion ignored: job already {}", current);
        }
        Ok(outcome)
    }

    /// Persist a finished run. Returns `false` when the job had already been
    /// moved to a terminal status (cancelled) and nothing was changed.
    pub async fn on_complete(&self, outcome: &ExecutionOutcome) -> Result<bool> {
        if !matches!(outcome.status, JobStatus::Finished | JobStatus::Failed) {
            return Ok(false);
        }

        let transition = Transition::system(
            &[JobStatus::Executing],
            outcome.status,
            AuditOperation::Finish,
            outcome.message.clone(),
        );
        let payload = outcome.payload.clone().unwrap_or_default();

        match self
            .jobs
            .complete(outcome.job_id, &transition, payload)
            .await?
        {
            Some(job) => {
                tracing::info!(job_id = %job.id, status = %job.status, exit_code = ?outcome.exit_code, "Job completed");
                self.notify(&job).await;
                Ok(true)
            }
            None => {
                tracing::info!(job_id = %outcome.job_id, "Completion ignored, job already terminal");
                Ok(false)
            }
        }
    }

    /// Bring a claimed job into `queued`. Approved and scheduled jobs are
    /// queued here when a timer triggers them directly.
    async fn ensure_queued(&self, job_id: JobId, actor: &str) -> Result<Job> {
        let job = self.jobs.get(job_id).await?;
        if job.status.is_runnable() {
            let description = if actor == SYSTEM_OPERATOR {
                "queued by timer"
            } else {
                "queued for execution"
            };
            let transition = Transition::new(
                &[JobStatus::Approved, JobStatus::Scheduled],
                JobStatus::Queued,
                AuditOperation::Queue,
                actor,
                description,
            );
            let job = self.commit(job_id, &transition).await?;
            self.remove_trigger(job_id).await;
            return Ok(job);
        }
        if job.status != JobStatus::Queued {
            return Err(QueueError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Executing,
            });
        }
        Ok(job)
    }

    async fn time_out(&self, job_id: JobId) -> Result<ExecutionOutcome> {
        let transition = Transition::system(
            &[JobStatus::Queued],
            JobStatus::QueueTimedOut,
            AuditOperation::Finish,
            "queue wait exceeded claim ttl",
        );
        match self.commit(job_id, &transition).await {
            Ok(_) => Ok(ExecutionOutcome::not_run(
                job_id,
                JobStatus::QueueTimedOut,
                "queue wait exceeded claim ttl",
            )),
            Err(QueueError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => Ok(ExecutionOutcome::not_run(
                job_id,
                JobStatus::Cancelled,
                "queue wait aborted: job cancelled",
            )),
            Err(e) => Err(e),
        }
    }

    /// Generate, spawn and wait. The claim is released as soon as the process
    /// is gone, or on any failure to start it.
    async fn run_admitted(
        &self,
        job: &Job,
        instance: &Instance,
        token: &ClaimToken,
    ) -> ExecutionOutcome {
        if let Err(e) = self.jobs.begin_run(job.id).await {
            self.release(token).await;
            return ExecutionOutcome::failed(job.id, format!("run record: {}", e));
        }

        let request = ScriptRequest {
            sql_template: job.params.sql_template.clone(),
            sql_params: job.params.sql_params.clone(),
            delimiter: job.params.param_delimiter.clone(),
            params_sync: job.params.params_sync,
            output_path: self
                .config
                .sysbench
                .script_dir
                .join(script_file_name(&job.params.db_name, job.id)),
        };
        let script = match self.scripts.materialize(request).await {
            Ok(path) => path,
            Err(e) => {
                self.release(token).await;
                return ExecutionOutcome::failed(job.id, e.to_string());
            }
        };

        // Cancelled while the script was written: never start sysbench.
        if self.is_cancelled(job.id).await {
            self.release(token).await;
            tracing::info!(job_id = %job.id, "Cancelled before spawn");
            return ExecutionOutcome::not_run(job.id, JobStatus::Cancelled, "cancelled before spawn");
        }

        let command =
            SysbenchCommand::for_job(&self.config.sysbench.program, script, &job.params, instance);
        let process = match self.supervisor.spawn(&command) {
            Ok(process) => process,
            Err(e) => {
                self.release(token).await;
                return ExecutionOutcome::failed(job.id, e.to_string());
            }
        };
        let pid = process.pid;

        if let Err(e) = self
            .jobs
            .record_pid(job.id, Some(pid), Some(command.display()))
            .await
        {
            tracing::error!(job_id = %job.id, pid, error = %e, "Failed to record pid, cancellation cannot reach this run");
        }
        // A cancel that landed before the pid was recorded had nothing to kill.
        if self.is_cancelled(job.id).await {
            match self.supervisor.terminate(pid) {
                Ok(()) => tracing::info!(job_id = %job.id, pid, "Killed run cancelled during spawn"),
                Err(e) => {
                    tracing::warn!(job_id = %job.id, pid, error = %e, "Failed to kill cancelled run")
                }
            }
        }

        let waited = self.supervisor.wait(process).await;
        self.release_after_run(token).await;

        match waited {
            Ok(process) => ExecutionOutcome::from_process(job.id, process),
            Err(e) => ExecutionOutcome::failed(job.id, e.to_string()),
        }
    }

    // =========================================================================
    // Cancellation and queries
    // =========================================================================

    /// Cancel a job that has not reached a terminal status. Queued jobs lose
    /// their claim; executing jobs have their process killed.
    pub async fn cancel(&self, job_id: JobId, actor: &str, remark: &str) -> Result<CancelOutcome> {
        // Statuses only move forward, so this settles within a few rounds.
        loop {
            let job = self.jobs.get(job_id).await?;
            if job.status.is_terminal() {
                return Err(QueueError::InvalidTransition {
                    job_id,
                    from: job.status,
                    to: JobStatus::Cancelled,
                });
            }

            let decision = self.approvals.can_cancel(actor, &job).await?;
            if !decision.allowed {
                return Err(QueueError::Unauthorized(decision.reason));
            }

            let (operation, action) =
                if job.status == JobStatus::PendingApproval && actor != job.owner {
                    (AuditOperation::Reject, "rejected")
                } else {
                    (AuditOperation::Cancel, "cancelled")
                };
            let transition = Transition::new(
                &[job.status],
                JobStatus::Cancelled,
                operation,
                actor,
                describe(action, remark),
            );

            match self.commit(job_id, &transition).await {
                Ok(_) => {
                    tracing::info!(job_id = %job_id, previous = %job.status, actor, "Job cancelled");
                    return Ok(self.after_cancel(&job).await);
                }
                Err(QueueError::InvalidTransition { from, .. }) => {
                    tracing::debug!(job_id = %job_id, status = %from, "Status moved during cancel, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn after_cancel(&self, previous: &Job) -> CancelOutcome {
        let mut outcome = CancelOutcome {
            job_id: previous.id,
            previous: previous.status,
            killed_pid: None,
            kill_error: None,
        };

        match previous.status {
            JobStatus::Approved | JobStatus::Scheduled => self.remove_trigger(previous.id).await,
            JobStatus::Queued => self.revoke(previous.instance_id, previous.id).await,
            JobStatus::Executing => match self.jobs.run_record(previous.id).await {
                Ok(Some(run)) => {
                    if let Some(pid) = run.pid {
                        match self.supervisor.terminate(pid) {
                            Ok(()) => outcome.killed_pid = Some(pid),
                            Err(e) => outcome.kill_error = Some(e.to_string()),
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => outcome.kill_error = Some(e.to_string()),
            },
            _ => {}
        }

        if let Some(ref e) = outcome.kill_error {
            tracing::error!(job_id = %previous.id, error = %e, "Job cancelled but its process could not be killed");
        }
        outcome
    }

    pub async fn status(&self, job_id: JobId, user: &str) -> Result<JobStatusView> {
        let job = self.jobs.get(job_id).await?;

        let can_review = job.status == JobStatus::PendingApproval
            && self.approvals.can_review(user, &job).await?;
        let can_execute =
            job.status.is_runnable() && self.approvals.can_execute(user, &job).await?.allowed;
        let can_cancel =
            !job.status.is_terminal() && self.approvals.can_cancel(user, &job).await?.allowed;
        let last_operation_info = self
            .jobs
            .audit_log(job_id)
            .await?
            .last()
            .map(|entry| entry.description.clone())
            .unwrap_or_default();

        Ok(JobStatusView {
            job_id,
            status: job.status,
            can_review,
            can_execute,
            can_cancel,
            last_operation_info,
        })
    }

    /// Parsed metrics of a finished run, `None` before the run has an outcome.
    pub async fn result(&self, job_id: JobId) -> Result<Option<BenchMetrics>> {
        Ok(self
            .jobs
            .run_record(job_id)
            .await?
            .and_then(|run| run.payload)
            .map(|payload| payload.metrics))
    }

    pub async fn audit_log(&self, job_id: JobId) -> Result<Vec<AuditLogEntry>> {
        self.jobs.audit_log(job_id).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn commit(&self, job_id: JobId, transition: &Transition) -> Result<Job> {
        let job = self.jobs.transition(job_id, transition).await?;
        tracing::debug!(job_id = %job_id, status = %job.status, operator = %transition.operator, "Transition committed");
        self.notify(&job).await;
        Ok(job)
    }

    /// Forward the latest audit entry to the approval workflow. Failures are
    /// logged; the local audit trail already holds the record.
    async fn notify(&self, job: &Job) {
        let entry = match self.jobs.audit_log(job.id).await {
            Ok(mut log) => log.pop(),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to read audit log");
                None
            }
        };
        if let Some(entry) = entry {
            if let Err(e) = self.approvals.record_transition(job, &entry).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to forward transition");
            }
        }
    }

    async fn remove_trigger(&self, job_id: JobId) {
        match self.triggers.remove_trigger(job_id).await {
            Ok(()) => tracing::debug!(trigger = %trigger_name(job_id), "Deferred trigger removed"),
            Err(e) => tracing::warn!(
                trigger = %trigger_name(job_id),
                error = %e,
                "Failed to remove deferred trigger"
            ),
        }
    }

    async fn is_cancelled(&self, job_id: JobId) -> bool {
        matches!(self.jobs.get(job_id).await, Ok(job) if job.status == JobStatus::Cancelled)
    }

    async fn release(&self, token: &ClaimToken) {
        if let Err(e) = self.leases.release(token).await {
            tracing::warn!(claim = %token, error = %e, "Failed to release claim");
        }
    }

    async fn revoke(&self, resource: ResourceId, job_id: JobId) {
        if let Err(e) = self.leases.revoke(resource, job_id).await {
            tracing::warn!(claim = %claim_key(resource, job_id), error = %e, "Failed to revoke claim");
        }
    }

    async fn release_after_run(&self, token: &ClaimToken) {
        match self.leases.release(token).await {
            Ok(()) => tracing::debug!(claim = %token, "Claim released"),
            Err(e) => tracing::error!(
                critical = true,
                claim = %token,
                error = %e,
                "Claim still held after the run ended; the instance queue is blocked until the claim is swept"
            ),
        }
    }
}
