use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cmme_backend::BackendKind;
use cmme_core::{AlignmentPolicy, aggregate};
use cmme_store::{
    read_drex_instructions, read_drex_results, read_idyom_instructions, read_ppm_instructions,
    read_ppm_results,
};

#[derive(Parser)]
#[command(name = "cmme", about = "PPM, DREX and IDyOM model runner")]
struct Cli {
    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a native backend runtime on stdin/stdout
    Serve {
        /// Model family: ppm, drex or idyom
        #[arg(long, value_parser = parse_backend)]
        backend: BackendKind,
    },

    /// Run a PPM instructions file through the PPM backend
    Ppm {
        /// Instructions file (.sqlite)
        instructions: PathBuf,

        /// Results meta file; defaults to `<instructions>-results.sqlite`
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run a DREX instructions file through the DREX backend
    Drex {
        /// Instructions file (.json)
        instructions: PathBuf,

        /// Results file; defaults to `<instructions>-results.json`
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Align PPM and DREX results and print the frame as JSON
    Aggregate {
        /// PPM results meta file
        #[arg(long)]
        ppm: PathBuf,

        /// DREX results file
        #[arg(long)]
        drex: PathBuf,

        /// Match observations within this distance instead of exactly
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Print the Lisp command for an IDyOM instructions file
    IdyomCommand {
        /// Instructions file (.json)
        instructions: PathBuf,
    },
}

fn parse_backend(s: &str) -> std::result::Result<BackendKind, String> {
    BackendKind::from_tag(s).ok_or_else(|| format!("unknown backend '{s}' (ppm, drex, idyom)"))
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match &cli.command {
        Commands::Serve { backend } => cmd_serve(*backend),
        Commands::Ppm { instructions, out } => cmd_ppm(&cli, instructions, out.as_deref()),
        Commands::Drex { instructions, out } => cmd_drex(&cli, instructions, out.as_deref()),
        Commands::Aggregate {
            ppm,
            drex,
            tolerance,
        } => cmd_aggregate(ppm, drex, *tolerance),
        Commands::IdyomCommand { instructions } => cmd_idyom_command(instructions),
    };

    cmme_backend::shutdown_all();
    outcome
}

fn cmd_serve(kind: BackendKind) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    cmme_backend::serve(kind, stdin.lock(), stdout.lock())
        .with_context(|| format!("{kind} runtime failed"))
}

fn default_out(instructions: &Path, suffix: &str) -> PathBuf {
    let stem = instructions
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("job");
    instructions.with_file_name(format!("{stem}{suffix}"))
}

fn cmd_ppm(cli: &Cli, instructions: &Path, out: Option<&Path>) -> Result<()> {
    let inst = read_ppm_instructions(instructions)
        .with_context(|| format!("failed to read {}", instructions.display()))?;
    let out = match (out, inst.results_file_path()) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(p)) => p.clone(),
        (None, None) => default_out(instructions, "-results.sqlite"),
    };
    let inst = inst.with_results_file_path(&out);

    let results = cmme_backend::run_ppm(&inst).context("PPM run failed")?;
    let events: usize = results.trials.iter().map(Vec::len).sum();
    let mean_ic = results
        .trials
        .iter()
        .flatten()
        .map(|e| e.information_content)
        .sum::<f64>()
        / events.max(1) as f64;

    println!("{}", out.display());
    if cli.verbose {
        eprintln!(
            "--- trials={}, events={events}, mean IC={mean_ic:.4} bits ---",
            results.trial_count()
        );
    }
    Ok(())
}

fn cmd_drex(cli: &Cli, instructions: &Path, out: Option<&Path>) -> Result<()> {
    let inst = read_drex_instructions(instructions)
        .with_context(|| format!("failed to read {}", instructions.display()))?;
    let out = match (out, inst.results_file_path()) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(p)) => p.clone(),
        (None, None) => default_out(instructions, "-results.json"),
    };
    let inst = inst.with_results_file_path(&out);

    let results = cmme_backend::run_drex(&inst).context("DREX run failed")?;
    println!("{}", out.display());
    if cli.verbose {
        eprintln!(
            "--- steps={}, changepoint={:?} ---",
            results.time_steps(),
            results.changepoint
        );
    }
    Ok(())
}

fn cmd_aggregate(ppm: &Path, drex: &Path, tolerance: Option<f64>) -> Result<()> {
    let policy = match tolerance {
        Some(eps) if eps.is_finite() && eps >= 0.0 => AlignmentPolicy::Tolerance(eps),
        Some(eps) => bail!("tolerance must be a non-negative number, got {eps}"),
        None => AlignmentPolicy::Exact,
    };
    let ppm_results =
        read_ppm_results(ppm).with_context(|| format!("failed to read {}", ppm.display()))?;
    let drex_results =
        read_drex_results(drex).with_context(|| format!("failed to read {}", drex.display()))?;

    let frame = aggregate(
        &ppm_results,
        &drex_results,
        &drex_results.input_sequence,
        policy,
    )
    .context("results do not align")?;
    println!("{}", serde_json::to_string_pretty(&frame)?);
    Ok(())
}

fn cmd_idyom_command(instructions: &Path) -> Result<()> {
    let inst = read_idyom_instructions(instructions)
        .with_context(|| format!("failed to read {}", instructions.display()))?;
    println!("{}", inst.to_lisp());
    Ok(())
}
