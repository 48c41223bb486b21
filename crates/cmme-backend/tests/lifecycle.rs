//! Round trips through a worker whose child is a shell stand-in: it answers
//! every job with a results file prepared up front.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cmme_backend::{BackendError, Worker, WorkerConfig, WorkerState, run_drex_on, run_ppm_on};
use cmme_core::{
    DrexBuilder, PoissonPrior, PpmInstructions, PpmSimpleBuilder, Prior, normalize, run_drex,
    run_ppm,
};
use cmme_store::{write_drex_results, write_ppm_results};
use tempfile::TempDir;

fn canned_worker(reply: &str, auto_stop: Duration) -> Arc<Worker> {
    let script = format!(r#"echo ready; while read p; do echo "{reply}"; done"#);
    let mut config = WorkerConfig::new(vec!["sh".into(), "-c".into(), script], auto_stop);
    config.min_poll = Duration::from_millis(50);
    Worker::new("canned", config)
}

fn wait_for(worker: &Worker, state: WorkerState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if worker.state() == state {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn ppm_instructions() -> PpmInstructions {
    PpmSimpleBuilder::new(normalize(vec![1.0, 2.0, 1.0, 2.0, 1.0]).unwrap())
        .to_instructions_file()
        .unwrap()
}

fn prepared_ppm(dir: &Path) -> PathBuf {
    let meta = dir.join("prepared-meta.sqlite");
    let data = dir.join("prepared-data.sqlite");
    write_ppm_results(&meta, &data, &run_ppm(&ppm_instructions())).unwrap();
    meta
}

#[test]
fn ppm_round_trip_through_worker() {
    let dir = TempDir::new().unwrap();
    let meta = prepared_ppm(dir.path());
    let io_dir = dir.path().join("io");
    let worker = canned_worker(&format!("ok {}", meta.display()), Duration::from_secs(30));

    assert_eq!(worker.state(), WorkerState::Down);
    let results = run_ppm_on(&worker, &io_dir, &ppm_instructions()).unwrap();
    assert_eq!(results.observed_symbols(), vec![1.0, 2.0, 1.0, 2.0, 1.0]);
    assert_eq!(worker.state(), WorkerState::Up);
    assert_eq!(worker.work_count(), 0);

    // the instructions file was minted under io_dir
    let minted: Vec<_> = std::fs::read_dir(&io_dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        minted
            .iter()
            .any(|n| n.starts_with("ppm-instructions-") && n.ends_with(".sqlite")),
        "minted: {minted:?}"
    );
    worker.stop();
    assert_eq!(worker.state(), WorkerState::Down);
}

#[test]
fn drex_round_trip_then_idle_stop() {
    let dir = TempDir::new().unwrap();
    let prior = Prior::Poisson(PoissonPrior::new(vec![2.0], vec![5.0], 1).unwrap());
    let inst = DrexBuilder::new(prior, normalize(vec![1.0, 3.0, 2.0, 4.0]).unwrap())
        .to_instructions_file()
        .unwrap();
    let prepared = dir.path().join("prepared.json");
    write_drex_results(&prepared, &run_drex(&inst).unwrap()).unwrap();

    let worker = canned_worker(
        &format!("ok {}", prepared.display()),
        Duration::from_millis(250),
    );
    let results = run_drex_on(&worker, dir.path(), &inst).unwrap();
    assert_eq!(results.time_steps(), 4);
    assert!(wait_for(&worker, WorkerState::Down, Duration::from_secs(3)));

    // a later job brings the session back
    let again = run_drex_on(&worker, dir.path(), &inst).unwrap();
    assert_eq!(again.time_steps(), 4);
}

#[test]
fn failed_job_surfaces_message() {
    let dir = TempDir::new().unwrap();
    let worker = canned_worker("err model exploded", Duration::from_secs(30));
    match run_ppm_on(&worker, dir.path(), &ppm_instructions()) {
        Err(BackendError::Failed(msg)) => assert_eq!(msg, "model exploded"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(worker.work_count(), 0);
    assert_eq!(worker.state(), WorkerState::Down);
}

#[test]
fn reply_naming_missing_file_is_store_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nowhere.sqlite");
    let worker = canned_worker(&format!("ok {}", missing.display()), Duration::from_secs(30));
    assert!(matches!(
        run_ppm_on(&worker, dir.path(), &ppm_instructions()),
        Err(BackendError::Store(_))
    ));
    // the session itself is healthy
    assert_eq!(worker.state(), WorkerState::Up);
    worker.stop();
}
