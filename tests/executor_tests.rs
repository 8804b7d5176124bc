use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use sysbench_queue::error::QueueError;
use sysbench_queue::scheduler::{BenchParams, Instance, InstanceId};
use sysbench_queue::worker::{ProcessSupervisor, SysbenchCommand};

fn params() -> BenchParams {
    BenchParams {
        threads: 2,
        duration_secs: 5,
        db_name: "bench".to_string(),
        sql_template: "SELECT 1".to_string(),
        sql_params: Vec::new(),
        param_delimiter: ",".to_string(),
        params_sync: false,
    }
}

fn instance() -> Instance {
    Instance {
        id: InstanceId(1),
        name: "primary".to_string(),
        host: "10.0.0.5".to_string(),
        port: 3307,
        user: "bench".to_string(),
        password: "hunter2".to_string(),
    }
}

/// A command running `body` through `/bin/sh`, with the sysbench flags as
/// positional arguments.
fn shell_command(dir: &Path, body: &str) -> SysbenchCommand {
    let script: PathBuf = dir.join("stub.sh");
    std::fs::write(&script, body).unwrap();
    SysbenchCommand::for_job("/bin/sh", script, &params(), &instance())
}

#[tokio::test]
async fn test_captures_stdout_and_exit_code() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new();
    let command = shell_command(dir.path(), "echo hello\n");

    let process = supervisor.spawn(&command).unwrap();
    assert!(process.pid > 0);
    let outcome = supervisor.wait(process).await.unwrap();

    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.success());
    assert_eq!(outcome.stdout, "hello\n");
    assert!(outcome.stderr.is_empty());
}

#[tokio::test]
async fn test_flags_reach_the_process() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new();
    let command = shell_command(dir.path(), "for a in \"$@\"; do echo \"$a\"; done\n");

    let outcome = supervisor
        .wait(supervisor.spawn(&command).unwrap())
        .await
        .unwrap();

    let args: Vec<&str> = outcome.stdout.lines().collect();
    assert_eq!(
        args,
        vec![
            "--threads=2",
            "--time=5",
            "--mysql-db=bench",
            "--mysql-user=bench",
            "--mysql-password=hunter2",
            "--mysql-host=10.0.0.5",
            "--mysql-port=3307",
            "run",
        ]
    );
}

#[tokio::test]
async fn test_failure_keeps_stderr() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new();
    let command = shell_command(dir.path(), "echo partial\necho boom >&2\nexit 7\n");

    let outcome = supervisor
        .wait(supervisor.spawn(&command).unwrap())
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, Some(7));
    assert!(!outcome.success());
    assert_eq!(outcome.stdout, "partial\n");
    assert_eq!(outcome.error_text(), "boom\n");
}

#[tokio::test]
async fn test_silent_failure_reports_exit_code() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new();
    let command = shell_command(dir.path(), "exit 2\n");

    let outcome = supervisor
        .wait(supervisor.spawn(&command).unwrap())
        .await
        .unwrap();

    assert_eq!(outcome.error_text(), "Exit code: 2");
}

#[tokio::test]
async fn test_large_output() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new();
    let command = shell_command(dir.path(), "seq 1 20000\n");

    let outcome = supervisor
        .wait(supervisor.spawn(&command).unwrap())
        .await
        .unwrap();

    assert_eq!(outcome.stdout.lines().count(), 20000);
}

#[tokio::test]
async fn test_terminate_kills_process_group() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new();
    // The forked sleep inherits stdout; only a group kill lets wait return.
    let command = shell_command(dir.path(), "sleep 30 &\nwait\n");

    let process = supervisor.spawn(&command).unwrap();
    let pid = process.pid;
    tokio::time::sleep(Duration::from_millis(100)).await;
    supervisor.terminate(pid).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor.wait(process))
        .await
        .expect("process group survived the kill")
        .unwrap();

    assert_eq!(outcome.exit_code, None);
    assert_eq!(outcome.error_text(), "Terminated by signal");
}

#[tokio::test]
async fn test_terminate_exited_process_is_ok() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new();
    let command = shell_command(dir.path(), "true\n");

    let process = supervisor.spawn(&command).unwrap();
    let pid = process.pid;
    supervisor.wait(process).await.unwrap();

    assert!(supervisor.terminate(pid).is_ok());
}

#[tokio::test]
async fn test_missing_program_is_spawn_error() {
    let supervisor = ProcessSupervisor::new();
    let command = SysbenchCommand::for_job(
        "/nonexistent/sysbench",
        "/tmp/unused.lua",
        &params(),
        &instance(),
    );

    let err = supervisor.spawn(&command).unwrap_err();
    assert!(matches!(err, QueueError::Spawn(_)));
}
