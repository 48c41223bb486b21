//! Process-wide backends and the write → run → read round trip.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use cmme_core::{
    DrexInstructions, DrexResults, IdyomInstructions, IdyomResults, PpmInstructions, PpmResults,
};
use cmme_store::{
    Config, mint_path, read_drex_results, read_idyom_results_with, read_ppm_results,
    write_drex_instructions, write_idyom_instructions, write_ppm_instructions,
};

use crate::error::{BackendError, Result};
use crate::worker::{BackendKind, Worker, WorkerConfig};

static CONFIG: OnceLock<Config> = OnceLock::new();
static PPM: OnceLock<Arc<Worker>> = OnceLock::new();
static DREX: OnceLock<Arc<Worker>> = OnceLock::new();
static IDYOM: OnceLock<Arc<Worker>> = OnceLock::new();

/// Configuration read on first use and kept for the life of the process.
pub fn config() -> Result<&'static Config> {
    if let Some(c) = CONFIG.get() {
        return Ok(c);
    }
    let loaded = Config::load()?;
    Ok(CONFIG.get_or_init(|| loaded))
}

/// Child command for a backend: the configured one, or this executable's
/// native runtime.
pub fn command_for(config: &Config, kind: BackendKind) -> Result<Vec<String>> {
    if let Some(cmd) = config.command_for(kind.as_str()) {
        return Ok(cmd.to_vec());
    }
    let exe = std::env::current_exe()?;
    Ok(vec![
        exe.to_string_lossy().into_owned(),
        "serve".into(),
        "--backend".into(),
        kind.as_str().into(),
    ])
}

pub fn worker_config(config: &Config, kind: BackendKind) -> Result<WorkerConfig> {
    let mut wc = WorkerConfig::new(command_for(config, kind)?, config.auto_stop);
    wc.runtime_root = config.runtime_root.clone();
    Ok(wc)
}

/// The singleton worker for `kind`.
pub fn backend(kind: BackendKind) -> Result<Arc<Worker>> {
    let cell = match kind {
        BackendKind::Ppm => &PPM,
        BackendKind::Drex => &DREX,
        BackendKind::Idyom => &IDYOM,
    };
    if let Some(w) = cell.get() {
        return Ok(Arc::clone(w));
    }
    let wc = worker_config(config()?, kind)?;
    Ok(Arc::clone(cell.get_or_init(|| Worker::new(kind.as_str(), wc))))
}

/// Stop every backend that has been created.
pub fn shutdown_all() {
    for cell in [&PPM, &DREX, &IDYOM] {
        if let Some(w) = cell.get() {
            w.stop();
        }
    }
}

// --- Round trips on an explicit worker ---

pub fn run_ppm_on(worker: &Worker, io_dir: &Path, inst: &PpmInstructions) -> Result<PpmResults> {
    let inst = match inst.results_file_path() {
        Some(_) => inst.clone(),
        None => inst
            .clone()
            .with_results_file_path(mint_path(io_dir, "ppm-results", "sqlite")?),
    };
    let path = mint_path(io_dir, "ppm-instructions", "sqlite")?;
    write_ppm_instructions(&path, &inst)?;
    let out = worker.run(&path)?;
    Ok(read_ppm_results(&out)?)
}

pub fn run_drex_on(worker: &Worker, io_dir: &Path, inst: &DrexInstructions) -> Result<DrexResults> {
    let inst = match inst.results_file_path() {
        Some(_) => inst.clone(),
        None => inst
            .clone()
            .with_results_file_path(mint_path(io_dir, "drex-results", "json")?),
    };
    let path = mint_path(io_dir, "drex-instructions", "json")?;
    write_drex_instructions(&path, &inst)?;
    let out = worker.run(&path)?;
    Ok(read_drex_results(&out)?)
}

pub fn run_idyom_on(worker: &Worker, io_dir: &Path, inst: &IdyomInstructions) -> Result<IdyomResults> {
    let path = mint_path(io_dir, "idyom-instructions", "json")?;
    write_idyom_instructions(&path, inst)?;
    let out = worker.run(&path)?;
    let expected: Option<PathBuf> = inst.results_file_path();
    if let Some(expected) = expected
        && expected != out
    {
        tracing::warn!(
            expected = %expected.display(),
            actual = %out.display(),
            "IDyOM wrote results somewhere unexpected"
        );
    }
    Ok(read_idyom_results_with(&out, &inst.output().separator)?)
}

// --- Round trips on the process-wide backends ---

pub fn run_ppm(inst: &PpmInstructions) -> Result<PpmResults> {
    run_ppm_on(&*backend(BackendKind::Ppm)?, &config()?.io_dir, inst)
}

pub fn run_drex(inst: &DrexInstructions) -> Result<DrexResults> {
    run_drex_on(&*backend(BackendKind::Drex)?, &config()?.io_dir, inst)
}

/// Installation paths and the output directory are filled from the active
/// profile where the instructions leave them unset.
pub fn run_idyom(inst: &IdyomInstructions) -> Result<IdyomResults> {
    let config = config()?;
    let inst = inst.clone().with_runtime_paths(
        config.idyom_root.clone(),
        config.idyom_database.clone(),
        Some(config.io_dir.join("idyom")),
    );
    if inst.idyom_root().is_none() {
        return Err(BackendError::NotReady(
            "IDyOM root is not configured (idyom_root)".into(),
        ));
    }
    run_idyom_on(&*backend(BackendKind::Idyom)?, &config.io_dir, &inst)
}
