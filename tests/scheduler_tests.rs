use sysbench_queue::error::QueueError;
use sysbench_queue::scheduler::{
    AuditOperation, BenchParams, Instance, InstanceId, JobId, JobStatus, JobStore, MemoryJobStore,
    NewJob, RunPayload, Schedule, Transition,
};

fn submission(owner: &str) -> NewJob {
    NewJob {
        instance_id: InstanceId(1),
        owner: owner.to_string(),
        params: BenchParams {
            threads: 1,
            duration_secs: 10,
            db_name: "shop".to_string(),
            sql_template: "SELECT 1".to_string(),
            sql_params: Vec::new(),
            param_delimiter: ",".to_string(),
            params_sync: false,
        },
        schedule: Schedule::Immediate,
        audit_id: None,
    }
}

fn step(from: JobStatus, to: JobStatus, operation: AuditOperation) -> Transition {
    Transition::new(&[from], to, operation, "bob", format!("{} -> {}", from, to))
}

async fn executing_job(store: &MemoryJobStore) -> JobId {
    let id = store.insert(submission("alice")).await.unwrap().id;
    for (from, to, op) in [
        (JobStatus::PendingApproval, JobStatus::Approved, AuditOperation::Approve),
        (JobStatus::Approved, JobStatus::Queued, AuditOperation::Queue),
        (JobStatus::Queued, JobStatus::Executing, AuditOperation::Start),
    ] {
        store.transition(id, &step(from, to, op)).await.unwrap();
    }
    id
}

#[tokio::test]
async fn test_ids_are_monotonic() {
    let store = MemoryJobStore::new();
    let a = store.insert(submission("alice")).await.unwrap();
    let b = store.insert(submission("alice")).await.unwrap();
    let c = store.insert(submission("carol")).await.unwrap();

    assert!(a.id < b.id && b.id < c.id);
    assert_eq!(a.status, JobStatus::PendingApproval);
    assert_eq!(a.audit_id, a.id.0);

    let listed: Vec<JobId> = store.list().await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(listed, vec![a.id, b.id, c.id]);
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn test_submit_writes_audit_entry() {
    let store = MemoryJobStore::new();
    let mut new = submission("alice");
    new.audit_id = Some(4242);
    let job = store.insert(new).await.unwrap();
    assert_eq!(job.audit_id, 4242);

    let log = store.audit_log(job.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].operation, AuditOperation::Submit);
    assert_eq!(log[0].operator, "alice");
    assert_eq!(log[0].audit_id, 4242);
}

#[tokio::test]
async fn test_capacity_limit() {
    let store = MemoryJobStore::with_capacity(2);
    store.insert(submission("a")).await.unwrap();
    store.insert(submission("b")).await.unwrap();
    assert!(store.is_full().await);

    let err = store.insert(submission("c")).await.unwrap_err();
    assert!(matches!(err, QueueError::QueueFull));
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_transition_is_compare_and_swap() {
    let store = MemoryJobStore::new();
    let id = store.insert(submission("alice")).await.unwrap().id;

    // Wrong expected status: nothing changes, the error carries the truth.
    let err = store
        .transition(
            id,
            &step(JobStatus::Approved, JobStatus::Queued, AuditOperation::Queue),
        )
        .await
        .unwrap_err();
    match err {
        QueueError::InvalidTransition { job_id, from, to } => {
            assert_eq!(job_id, id);
            assert_eq!(from, JobStatus::PendingApproval);
            assert_eq!(to, JobStatus::Queued);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.audit_log(id).await.unwrap().len(), 1);

    // Expected matches but the table forbids the jump.
    let err = store
        .transition(
            id,
            &step(
                JobStatus::PendingApproval,
                JobStatus::Executing,
                AuditOperation::Start,
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));

    let job = store
        .transition(
            id,
            &step(
                JobStatus::PendingApproval,
                JobStatus::Approved,
                AuditOperation::Approve,
            ),
        )
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Approved);
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn test_terminal_status_sets_finished_at() {
    let store = MemoryJobStore::new();
    let id = store.insert(submission("alice")).await.unwrap().id;
    let job = store
        .transition(
            id,
            &step(
                JobStatus::PendingApproval,
                JobStatus::Cancelled,
                AuditOperation::Reject,
            ),
        )
        .await
        .unwrap();
    assert!(job.finished_at.is_some());

    // Nothing leaves a terminal status.
    let err = store
        .transition(
            id,
            &Transition::new(
                &[JobStatus::Cancelled],
                JobStatus::Approved,
                AuditOperation::Approve,
                "bob",
                "",
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_complete_stores_payload() {
    let store = MemoryJobStore::new();
    let id = executing_job(&store).await;
    store.begin_run(id).await.unwrap();
    store
        .record_pid(id, Some(4321), Some("sysbench x.lua run".to_string()))
        .await
        .unwrap();

    let payload = RunPayload {
        exit_code: Some(0),
        stdout: "avg: 1.00".to_string(),
        ..RunPayload::default()
    };
    let job = store
        .complete(
            id,
            &Transition::system(
                &[JobStatus::Executing],
                JobStatus::Finished,
                AuditOperation::Finish,
                "execution result: finished",
            ),
            payload.clone(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Finished);

    let run = store.run_record(id).await.unwrap().unwrap();
    assert_eq!(run.pid, None);
    assert_eq!(run.command.as_deref(), Some("sysbench x.lua run"));
    assert_eq!(run.payload, Some(payload));
}

#[tokio::test]
async fn test_complete_after_cancel_is_noop() {
    let store = MemoryJobStore::new();
    let id = executing_job(&store).await;
    store.begin_run(id).await.unwrap();
    store.record_pid(id, Some(4321), None).await.unwrap();

    store
        .transition(
            id,
            &step(
                JobStatus::Executing,
                JobStatus::Cancelled,
                AuditOperation::Cancel,
            ),
        )
        .await
        .unwrap();
    let entries_before = store.audit_log(id).await.unwrap().len();

    let applied = store
        .complete(
            id,
            &Transition::system(
                &[JobStatus::Executing],
                JobStatus::Finished,
                AuditOperation::Finish,
                "execution result: finished",
            ),
            RunPayload::default(),
        )
        .await
        .unwrap();

    assert!(applied.is_none());
    assert_eq!(store.get(id).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(store.audit_log(id).await.unwrap().len(), entries_before);
    let run = store.run_record(id).await.unwrap().unwrap();
    assert_eq!(run.pid, None);
    assert!(run.payload.is_none());
}

#[tokio::test]
async fn test_record_pid_requires_run() {
    let store = MemoryJobStore::new();
    let id = store.insert(submission("alice")).await.unwrap().id;

    let err = store.record_pid(id, Some(1), None).await.unwrap_err();
    assert!(matches!(err, QueueError::Store(_)));
    assert!(store.run_record(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_audit_log_is_per_job_and_ordered() {
    let store = MemoryJobStore::new();
    let a = store.insert(submission("alice")).await.unwrap().id;
    let b = store.insert(submission("carol")).await.unwrap().id;
    store
        .transition(
            a,
            &step(
                JobStatus::PendingApproval,
                JobStatus::Approved,
                AuditOperation::Approve,
            ),
        )
        .await
        .unwrap();

    let log_a = store.audit_log(a).await.unwrap();
    let log_b = store.audit_log(b).await.unwrap();
    assert_eq!(log_a.len(), 2);
    assert_eq!(log_b.len(), 1);
    assert!(log_a.iter().all(|e| e.job_id == a));
    assert!(log_a[0].seq < log_a[1].seq);
    assert_eq!(log_a[1].operator, "bob");
    assert_eq!(log_a[1].description, "pending_approval -> approved");
}

#[tokio::test]
async fn test_unknown_ids() {
    let store = MemoryJobStore::new();
    assert!(matches!(
        store.get(JobId(9)).await.unwrap_err(),
        QueueError::JobNotFound(JobId(9))
    ));
    assert!(matches!(
        store.audit_log(JobId(9)).await.unwrap_err(),
        QueueError::JobNotFound(_)
    ));
    assert!(matches!(
        store.instance(InstanceId(3)).await.unwrap_err(),
        QueueError::InstanceNotFound(InstanceId(3))
    ));
}

#[tokio::test]
async fn test_instance_password_stays_private() {
    let store = MemoryJobStore::new();
    store
        .add_instance(Instance {
            id: InstanceId(1),
            name: "primary".to_string(),
            host: "db.internal".to_string(),
            port: 3306,
            user: "bench".to_string(),
            password: "hunter2".to_string(),
        })
        .await;

    let instance = store.instance(InstanceId(1)).await.unwrap();
    assert_eq!(instance.password, "hunter2");

    let json = serde_json::to_string(&instance).unwrap();
    assert!(!json.contains("hunter2"));
    assert!(!format!("{:?}", instance).contains("hunter2"));
}
