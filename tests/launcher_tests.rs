
use std::time::{Duration, Instant};

use solver_farm::config::SolverConfig;
use solver_farm::error::RunnerError;
use solver_farm::scheduler::{JobDescriptor, JobStatus, ProcessRegistry};
use solver_farm::worker::ProcessLauncher;
use test_harness::{drain_registry, WorkDir};

fn job(id: &str) -> JobDescriptor {
    JobDescriptor::new(id, format!("{}.inp", id))
}

#[tokio::test]
async fn test_launch_returns_before_job_finishes() {
    let work = WorkDir::new();
    work.add_job("slow", "sleep 5");
    let launcher = ProcessLauncher::new(work.config(1, 50));

    let started = Instant::now();
    let running = launcher.launch(&job("slow")).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(running.id.as_str(), "slow");
    assert!(running.pid().is_some());

    let mut registry = ProcessRegistry::new(1);
    registry.admit(running).unwrap();
    let outcomes = registry.terminate_all().await;
    assert_eq!(outcomes[0].status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_log_captures_stdout_and_stderr() {
    let work = WorkDir::new();
    work.add_job("a", "echo 'to stdout'\necho 'to stderr' >&2\necho 'done'");
    let launcher = ProcessLauncher::new(work.config(1, 50));

    let mut registry = ProcessRegistry::new(1);
    registry.admit(launcher.launch(&job("a")).unwrap()).unwrap();
    let outcomes = drain_registry(&mut registry, Duration::from_secs(10)).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, JobStatus::Succeeded);
    assert_eq!(outcomes[0].log_path, work.log_path("a"));
    assert_eq!(work.read_log("a"), "to stdout\nto stderr\ndone\n");
}

#[tokio::test]
async fn test_log_is_overwritten_on_relaunch() {
    let work = WorkDir::new();
    work.add_job("a", "echo fresh");
    std::fs::write(work.log_path("a"), "stale output from an earlier run\n").unwrap();
    let launcher = ProcessLauncher::new(work.config(1, 50));

    for _ in 0..2 {
        let mut registry = ProcessRegistry::new(1);
        registry.admit(launcher.launch(&job("a")).unwrap()).unwrap();
        drain_registry(&mut registry, Duration::from_secs(10)).await;
    }

    assert_eq!(work.read_log("a"), "fresh\n");
}

#[tokio::test]
async fn test_job_runs_in_work_dir() {
    let work = WorkDir::new();
    work.add_job("a", "pwd\n: > a.odb");
    let launcher = ProcessLauncher::new(work.config(1, 50));

    let mut registry = ProcessRegistry::new(1);
    registry.admit(launcher.launch(&job("a")).unwrap()).unwrap();
    drain_registry(&mut registry, Duration::from_secs(10)).await;

    let cwd = std::fs::canonicalize(work.read_log("a").trim()).unwrap();
    assert_eq!(cwd, std::fs::canonicalize(work.path()).unwrap());
    assert!(work.path().join("a.odb").exists());
}

#[tokio::test]
async fn test_job_id_is_passed_as_named_argument() {
    let work = WorkDir::new();
    let config = work.config(1, 50).with_solver(SolverConfig::new(
        "sh",
        vec![
            "-c".to_string(),
            "echo \"$1\"".to_string(),
            "solver".to_string(),
            "job={job}".to_string(),
        ],
    ));
    let launcher = ProcessLauncher::new(config);

    let mut registry = ProcessRegistry::new(1);
    registry
        .admit(launcher.launch(&job("pressure_bin_007")).unwrap())
        .unwrap();
    drain_registry(&mut registry, Duration::from_secs(10)).await;

    assert_eq!(work.read_log("pressure_bin_007"), "job=pressure_bin_007\n");
}

#[tokio::test]
async fn test_environment_is_passed_explicitly() {
    let work = WorkDir::new();
    work.add_job("a", "echo \"$LC_ALL $SOLVER_SCRATCH\"");
    let solver = SolverConfig::new("sh", vec!["{input}".to_string()])
        .with_env("LC_ALL", "en_US.UTF-8")
        .with_env("SOLVER_SCRATCH", "/tmp/scratch");
    let launcher = ProcessLauncher::new(work.config(1, 50).with_solver(solver));

    let mut registry = ProcessRegistry::new(1);
    registry.admit(launcher.launch(&job("a")).unwrap()).unwrap();
    drain_registry(&mut registry, Duration::from_secs(10)).await;

    assert_eq!(work.read_log("a"), "en_US.UTF-8 /tmp/scratch\n");
    // The runner's own environment is untouched
    assert_ne!(
        std::env::var("SOLVER_SCRATCH").ok().as_deref(),
        Some("/tmp/scratch")
    );
}

#[tokio::test]
async fn test_nonzero_exit_is_failure() {
    let work = WorkDir::new();
    work.add_job("bad", "echo 'element distortion' >&2\nexit 7");
    let launcher = ProcessLauncher::new(work.config(1, 50));

    let mut registry = ProcessRegistry::new(1);
    registry.admit(launcher.launch(&job("bad")).unwrap()).unwrap();
    let outcomes = drain_registry(&mut registry, Duration::from_secs(10)).await;

    assert_eq!(
        outcomes[0].status,
        JobStatus::Failed {
            exit_code: Some(7),
            signal: None
        }
    );
    assert!(work.read_log("bad").contains("element distortion"));
}

#[tokio::test]
async fn test_signal_termination_is_failure() {
    let work = WorkDir::new();
    work.add_job("killed", "kill -9 $$");
    let launcher = ProcessLauncher::new(work.config(1, 50));

    let mut registry = ProcessRegistry::new(1);
    registry.admit(launcher.launch(&job("killed")).unwrap()).unwrap();
    let outcomes = drain_registry(&mut registry, Duration::from_secs(10)).await;

    assert_eq!(
        outcomes[0].status,
        JobStatus::Failed {
            exit_code: None,
            signal: Some(9)
        }
    );
    assert!(outcomes[0].status.is_failure());
}

#[tokio::test]
async fn test_missing_program_is_launch_error() {
    let work = WorkDir::new();
    work.add_job("a", "exit 0");
    let config = work
        .config(1, 50)
        .with_solver(SolverConfig::new("nonexistent_solver_12345", Vec::new()));
    let launcher = ProcessLauncher::new(config);

    let err = launcher.launch(&job("a")).unwrap_err();
    match err {
        RunnerError::Launch { job, reason } => {
            assert_eq!(job.as_str(), "a");
            assert!(reason.contains("nonexistent_solver_12345"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
