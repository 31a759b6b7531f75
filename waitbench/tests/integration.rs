//! Integration tests for Waitbench
//!
//! These tests drive the public API and the real `waitbench` binary, which
//! doubles as the process pool's worker.

use std::process::{Command, Stdio};
use std::time::Duration;
use waitbench::{
    ExecutionConfig, FailureCause, RecordingSink, RunError, Strategy, StrategyRunner, TaskBatch,
    TaskFailed, WaitTask, run_benchmark, run_strategy,
};

const WAITBENCH: &str = env!("CARGO_BIN_EXE_waitbench");
const D: f64 = 0.1;

fn process_config(tasks: usize, workers: Option<usize>) -> ExecutionConfig {
    let mut config =
        ExecutionConfig::new(Strategy::ProcessPool, tasks, D).with_worker_binary(WAITBENCH);
    config.worker_count = workers;
    config
}

/// Sequential takes the sum of the waits, the concurrent strategies take one wait.
#[test]
fn test_sequential_vs_concurrent() {
    let sequential = run_strategy(Strategy::Sequential, 4, D, None).unwrap();
    assert!(sequential.elapsed_seconds >= 4.0 * D * 0.95, "{sequential:?}");

    for strategy in [Strategy::Cooperative, Strategy::CooperativeList, Strategy::ThreadPool] {
        let concurrent = run_strategy(strategy, 4, D, None).unwrap();
        assert!(concurrent.elapsed_seconds >= D * 0.9, "{concurrent:?}");
        assert!(concurrent.elapsed_seconds < 2.5 * D, "{concurrent:?}");
    }

    let distributed = run_strategy(Strategy::Distributed, 4, D, Some(4)).unwrap();
    assert!(distributed.elapsed_seconds < 2.5 * D, "{distributed:?}");
}

/// Distributed with one CPU runs like sequential.
#[test]
fn test_distributed_capacity_one() {
    let config = ExecutionConfig::new(Strategy::Distributed, 5, D).with_cpus(1);
    let result = run_benchmark(&config, None).unwrap();
    assert!(result.elapsed_seconds >= 5.0 * D * 0.95, "{result:?}");
}

#[test]
fn test_negative_duration_rejected_at_entry() {
    for strategy in Strategy::ALL {
        let config = ExecutionConfig::new(strategy, 3, -1.0).with_cpus(1);
        let err = run_benchmark(&config, None).unwrap_err();
        assert!(matches!(err, RunError::InvalidArgument(_)), "{strategy}: {err}");
    }
}

#[test]
fn test_process_pool_overlaps_waits() {
    let result = run_benchmark(&process_config(4, None), None).unwrap();
    assert_eq!(result.strategy, "process-pool");
    assert!(result.elapsed_seconds >= D * 0.9, "{result:?}");
    // Spawning workers costs something, but far less than running in series.
    assert!(result.elapsed_seconds < 4.0 * D, "{result:?}");
}

#[test]
fn test_process_pool_respects_worker_limit() {
    // 4 tasks on 2 workers need two rounds.
    let result = run_benchmark(&process_config(4, Some(2)), None).unwrap();
    assert!(result.elapsed_seconds >= 2.0 * D * 0.95, "{result:?}");
}

#[test]
fn test_process_pool_progress_events() {
    let mut sink = RecordingSink::default();
    run_benchmark(&process_config(5, Some(3)), Some(&mut sink)).unwrap();

    assert_eq!(sink.started, Some(5));
    assert_eq!(sink.events.len(), 5);
    assert!(sink.is_monotonic());
    assert!(sink.last().unwrap().is_final());
    assert!(sink.finished);
}

#[test]
fn test_process_pool_collects_worker_failures() {
    let batch = TaskBatch::from_tasks(vec![
        WaitTask::new(0.01),
        WaitTask::new(-2.0),
        WaitTask::new(0.01),
        WaitTask::new(f64::NAN),
    ]);
    let mut sink = RecordingSink::default();
    let err = waitbench::ProcessPoolRunner
        .run(&batch, &process_config(4, Some(2)), Some(&mut sink))
        .unwrap_err();

    let mut failed: Vec<usize> = err.failures().iter().map(|f| f.task_id).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![1, 3]);
    assert!(err
        .failures()
        .iter()
        .all(|f| f.cause == FailureCause::InvalidArgument));
    // Siblings of the failed tasks still completed.
    assert_eq!(sink.events.len(), 2);
}

#[test]
fn test_worker_handle_protocol() {
    let mut worker = waitbench::WorkerHandle::spawn(std::path::Path::new(WAITBENCH)).unwrap();
    let caps = worker.capabilities().unwrap();
    assert_eq!(caps.protocol_version, waitbench::PROTOCOL_VERSION);
    assert_eq!(caps.pid, worker.pid());

    worker.ping(Duration::from_secs(5)).unwrap();
    let outcome = worker.run_task(3, 0.02, Duration::from_secs(5)).unwrap();
    match outcome {
        waitbench::TaskOutcome::Completed { task_id, waited } => {
            assert_eq!(task_id, 3);
            assert!(waited >= Duration::from_millis(20));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(worker.is_alive());
    worker.shutdown().unwrap();
}

#[test]
fn test_dead_worker_is_a_lost_worker() {
    let mut worker = waitbench::WorkerHandle::spawn(std::path::Path::new(WAITBENCH)).unwrap();
    worker.kill().unwrap();

    let err = worker.run_task(0, 0.01, Duration::from_secs(5)).unwrap_err();
    let failed = TaskFailed::from_supervisor_error(0, &err);
    assert_eq!(failed.cause, FailureCause::WorkerLost, "{err}");
}

#[test]
fn test_cli_json_report() {
    let output = Command::new(WAITBENCH)
        .args([
            "run", "-s", "sequential", "-s", "thread-pool", "-n", "3", "-d", "20ms", "--format",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["task_count"], 3);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["strategy"], "sequential");
    assert_eq!(results[1]["strategy"], "thread-pool");
    assert!(results[0]["elapsed_seconds"].as_f64().unwrap() >= 0.055);
}

#[test]
fn test_cli_human_report_and_process_workers() {
    let output = Command::new(WAITBENCH)
        .args(["-s", "process-pool", "-s", "cooperative", "-n", "2", "-d", "10ms", "-w", "2"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "{stdout}");
    assert!(lines[0].starts_with("process-pool       "), "{stdout}");
    assert!(lines[0].ends_with(" s"), "{stdout}");
    assert!(lines[1].starts_with("cooperative        "), "{stdout}");
}

#[test]
fn test_cli_failure_exits_nonzero() {
    let output = Command::new(WAITBENCH)
        .args(["run", "-s", "distributed", "--cpus", "0", "-n", "1", "-d", "0s"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("strategies failed"), "{stderr}");
}

#[test]
fn test_cli_init_prints_config() {
    let output = Command::new(WAITBENCH).arg("init").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[runner]"));
    assert!(stdout.contains("[heartbeat]"));
}

fn interrupt_heartbeat(context: &str) -> std::process::Output {
    let child = Command::new(WAITBENCH)
        .args([
            "heartbeat", "--context", context, "--tick", "100ms", "--announce", "150ms",
            "--message", "still waiting",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(800));
    let ret = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
    assert_eq!(ret, 0);
    child.wait_with_output().unwrap()
}

#[test]
fn test_heartbeat_threads_stop_on_interrupt() {
    let output = interrupt_heartbeat("thread");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0 seconds elapsed"), "{stdout}");
    assert!(stdout.contains("still waiting"), "{stdout}");
}

#[test]
fn test_heartbeat_processes_stop_on_interrupt() {
    let output = interrupt_heartbeat("process");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("seconds elapsed"), "{stdout}");
    assert!(stdout.contains("still waiting"), "{stdout}");
}
