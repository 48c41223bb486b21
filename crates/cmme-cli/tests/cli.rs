//! CLI command integration tests.
//! Each test points CMME_CONFIG at a profile inside its own temp directory.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use cmme_core::{
    DrexBuilder, IdyomBuilder, ModelKind, PoissonPrior, PpmSimpleBuilder, Prior, Viewpoint,
    normalize,
};
use cmme_store::{write_drex_instructions, write_idyom_instructions, write_ppm_instructions};
use predicates::prelude::*;
use tempfile::TempDir;

const SERIES: [f64; 6] = [1.0, 3.0, 2.0, 1.0, 3.0, 2.0];

fn cmme_cmd(dir: &TempDir) -> Command {
    let config = dir.path().join("config.toml");
    if !config.exists() {
        let io_dir = dir.path().join("io");
        std::fs::write(
            &config,
            format!(
                "active = \"test\"\n[profiles.test]\nio_dir = {:?}\nauto_stop_secs = 5\n",
                io_dir.to_string_lossy()
            ),
        )
        .unwrap();
    }
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("cmme").unwrap();
    cmd.env("CMME_CONFIG", &config);
    cmd
}

fn ppm_instructions(dir: &Path) -> PathBuf {
    let path = dir.join("ppm.sqlite");
    let inst = PpmSimpleBuilder::new(normalize(SERIES.to_vec()).unwrap())
        .order_bound(2)
        .to_instructions_file()
        .unwrap();
    write_ppm_instructions(&path, &inst).unwrap();
    path
}

fn drex_instructions(dir: &Path) -> PathBuf {
    let path = dir.join("drex.json");
    let prior = Prior::Poisson(PoissonPrior::new(vec![2.0], vec![5.0], 1).unwrap());
    let inst = DrexBuilder::new(prior, normalize(SERIES.to_vec()).unwrap())
        .to_instructions_file()
        .unwrap();
    write_drex_instructions(&path, &inst).unwrap();
    path
}

fn stdout_line(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    cmme_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("aggregate"))
        .stdout(predicate::str::contains("idyom-command"));
}

#[test]
fn serve_rejects_unknown_backend() {
    let dir = TempDir::new().unwrap();
    cmme_cmd(&dir)
        .args(["serve", "--backend", "hmm"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown backend"));
}

#[test]
fn serve_speaks_line_protocol() {
    let dir = TempDir::new().unwrap();
    let inst = ppm_instructions(dir.path());
    let missing = dir.path().join("missing.sqlite");

    let output = cmme_cmd(&dir)
        .args(["serve", "--backend", "ppm"])
        .write_stdin(format!("{}\n{}\n", inst.display(), missing.display()))
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3, "unexpected transcript: {stdout}");
    assert_eq!(lines[0], "ready");
    assert_eq!(
        lines[1],
        format!("ok {}", dir.path().join("ppm-results.sqlite").display())
    );
    assert!(lines[2].starts_with("err "));
}

#[test]
fn ppm_runs_through_backend() {
    let dir = TempDir::new().unwrap();
    let inst = ppm_instructions(dir.path());
    let out = dir.path().join("out").join("ppm-meta.sqlite");

    let output = cmme_cmd(&dir)
        .arg("ppm")
        .arg(&inst)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(stdout_line(&output), out.display().to_string());

    let results = cmme_store::read_ppm_results(&out).unwrap();
    assert_eq!(results.last_trial().len(), SERIES.len());
    assert_eq!(results.observed_symbols(), SERIES.to_vec());
}

#[test]
fn ppm_missing_instructions_fails() {
    let dir = TempDir::new().unwrap();
    cmme_cmd(&dir)
        .args(["ppm", "/nonexistent/ppm.sqlite"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn drex_then_aggregate() {
    let dir = TempDir::new().unwrap();
    let ppm_inst = ppm_instructions(dir.path());
    let drex_inst = drex_instructions(dir.path());

    let ppm_out = cmme_cmd(&dir).arg("ppm").arg(&ppm_inst).output().unwrap();
    assert!(ppm_out.status.success());
    let ppm_meta = stdout_line(&ppm_out);
    assert_eq!(
        PathBuf::from(&ppm_meta),
        dir.path().join("ppm-results.sqlite")
    );

    let drex_out = cmme_cmd(&dir).arg("drex").arg(&drex_inst).output().unwrap();
    assert!(
        drex_out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&drex_out.stderr)
    );
    let drex_results = stdout_line(&drex_out);
    assert_eq!(
        PathBuf::from(&drex_results),
        dir.path().join("drex-results.json")
    );

    let output = cmme_cmd(&dir)
        .args(["aggregate", "--ppm", &ppm_meta, "--drex", &drex_results])
        .output()
        .unwrap();
    assert!(output.status.success());
    let frame: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(frame["drex_feature"], 0);
    let rows = frame["rows"].as_array().unwrap();
    assert_eq!(rows.len(), SERIES.len());
    assert_eq!(rows[1]["observation"], serde_json::json!([3.0]));
    assert_eq!(rows[0]["ppm_alphabet_size"], 3);
}

#[test]
fn aggregate_rejects_negative_tolerance() {
    let dir = TempDir::new().unwrap();
    cmme_cmd(&dir)
        .args([
            "aggregate",
            "--ppm",
            "a.sqlite",
            "--drex",
            "b.json",
            "--tolerance=-1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("non-negative"));
}

#[test]
fn idyom_command_prints_lisp() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idyom.json");
    let inst = IdyomBuilder::new()
        .dataset(7)
        .target(Viewpoint::basic("cpitch"))
        .model(ModelKind::Stm)
        .output_dir(dir.path().join("idyom-out"))
        .to_instructions_file()
        .unwrap();
    write_idyom_instructions(&path, &inst).unwrap();

    cmme_cmd(&dir)
        .arg("idyom-command")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("(idyom:idyom 7"))
        .stdout(predicate::str::contains("cpitch"));
}
