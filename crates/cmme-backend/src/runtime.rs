//! Native child runtime: the other end of the line protocol.
//!
//! PPM and DREX jobs run in-process on the reference engines. IDyOM needs an
//! external runtime, so native IDyOM sessions answer every job with `err`.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use cmme_core::{run_drex, run_ppm};
use cmme_store::{
    read_drex_instructions, read_ppm_instructions, write_drex_results, write_ppm_results,
};

use crate::error::{BackendError, Result};
use crate::session::{ERR_PREFIX, OK_PREFIX, READY};
use crate::worker::BackendKind;

/// Serve jobs until `input` reaches EOF.
pub fn serve<R: BufRead, W: Write>(kind: BackendKind, input: R, mut output: W) -> io::Result<()> {
    writeln!(output, "{READY}")?;
    output.flush()?;
    tracing::info!(backend = %kind, "runtime ready");

    for line in input.lines() {
        let line = line?;
        let path = line.trim();
        if path.is_empty() {
            continue;
        }
        match handle(kind, Path::new(path)) {
            Ok(out) => writeln!(output, "{OK_PREFIX}{}", out.display())?,
            Err(e) => {
                tracing::warn!(backend = %kind, path, error = %e, "job failed");
                // replies are single lines
                let msg = e.to_string().replace(['\n', '\r'], " ");
                writeln!(output, "{ERR_PREFIX}{msg}")?;
            }
        }
        output.flush()?;
    }
    tracing::info!(backend = %kind, "runtime input closed");
    Ok(())
}

/// Run one job and return where its results were written.
pub fn handle(kind: BackendKind, instructions: &Path) -> Result<PathBuf> {
    match kind {
        BackendKind::Ppm => handle_ppm(instructions),
        BackendKind::Drex => handle_drex(instructions),
        BackendKind::Idyom => Err(BackendError::Failed(
            "no native IDyOM runtime; set idyom_command in the active profile".into(),
        )),
    }
}

/// Results path from the instructions, or one next to them.
fn results_path(instructions: &Path, stored: Option<&PathBuf>, suffix: &str) -> PathBuf {
    match stored {
        Some(p) => p.clone(),
        None => sibling(instructions, suffix),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    path.with_file_name(format!("{stem}{suffix}"))
}

fn handle_ppm(instructions: &Path) -> Result<PathBuf> {
    let inst = read_ppm_instructions(instructions)?;
    let meta = results_path(instructions, inst.results_file_path(), "-results.sqlite");
    let data = sibling(&meta, "-data.sqlite");
    let mut results = run_ppm(&inst);
    results.instructions_file_path = Some(instructions.to_path_buf());
    write_ppm_results(&meta, &data, &results)?;
    tracing::debug!(meta = %meta.display(), "PPM job done");
    Ok(meta)
}

fn handle_drex(instructions: &Path) -> Result<PathBuf> {
    let inst = read_drex_instructions(instructions)?;
    let out = results_path(instructions, inst.results_file_path(), "-results.json");
    let mut results = run_drex(&inst).map_err(cmme_store::StoreError::from)?;
    results.instructions_file_path = Some(instructions.to_path_buf());
    write_drex_results(&out, &results)?;
    tracing::debug!(path = %out.display(), "DREX job done");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmme_core::{DrexBuilder, PoissonPrior, PpmSimpleBuilder, Prior, normalize};
    use cmme_store::{read_drex_results, read_ppm_results, write_drex_instructions, write_ppm_instructions};
    use std::io::Cursor;

    fn transcript(kind: BackendKind, input: &str) -> Vec<String> {
        let mut out = Vec::new();
        serve(kind, Cursor::new(input.to_string()), &mut out).unwrap();
        String::from_utf8(out).unwrap().lines().map(String::from).collect()
    }

    #[test]
    fn test_ppm_job() {
        let dir = tempfile::tempdir().unwrap();
        let inst_path = dir.path().join("job.sqlite");
        let inst = PpmSimpleBuilder::new(normalize(vec![1.0, 2.0, 1.0, 2.0]).unwrap())
            .to_instructions_file()
            .unwrap();
        write_ppm_instructions(&inst_path, &inst).unwrap();

        let lines = transcript(BackendKind::Ppm, &format!("{}\n", inst_path.display()));
        assert_eq!(lines[0], "ready");
        let out = lines[1].strip_prefix("ok ").unwrap();
        assert_eq!(PathBuf::from(out), dir.path().join("job-results.sqlite"));
        let results = read_ppm_results(Path::new(out)).unwrap();
        assert_eq!(results.instructions_file_path, Some(inst_path));
        assert_eq!(results.last_trial().len(), 4);
    }

    #[test]
    fn test_drex_job_uses_stored_results_path() {
        let dir = tempfile::tempdir().unwrap();
        let inst_path = dir.path().join("job.json");
        let out_path = dir.path().join("custom.json");
        let prior = Prior::Poisson(PoissonPrior::new(vec![2.0], vec![5.0], 1).unwrap());
        let inst = DrexBuilder::new(prior, normalize(vec![1.0, 3.0, 2.0]).unwrap())
            .to_instructions_file()
            .unwrap()
            .with_results_file_path(&out_path);
        write_drex_instructions(&inst_path, &inst).unwrap();

        let lines = transcript(BackendKind::Drex, &format!("\n{}\n", inst_path.display()));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], format!("ok {}", out_path.display()));
        assert_eq!(read_drex_results(&out_path).unwrap().time_steps(), 3);
    }

    #[test]
    fn test_bad_job_reports_err_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.sqlite");
        let input = format!("{0}\n{0}\n", missing.display());
        let lines = transcript(BackendKind::Ppm, &input);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("err "));
        assert!(lines[2].starts_with("err "));
    }

    #[test]
    fn test_idyom_has_no_native_runtime() {
        let lines = transcript(BackendKind::Idyom, "/tmp/x.json\n");
        assert!(lines[1].starts_with("err "));
    }
}
