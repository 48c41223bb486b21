//! IDyOM instruction files (JSON plus the Lisp payload) and result tables.

use std::path::Path;

use cmme_core::{IdyomInstructions, IdyomResults};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::paths::{read_to_string, write_string};

pub const CURRENT_VERSION: &str = "1";

#[derive(Serialize, Deserialize, Debug)]
pub struct WireIdyomInstructions {
    pub version: String,
    pub instructions: IdyomInstructions,
    /// Derived fields, written for readers that cannot evaluate the builder.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub filename_query: String,
    #[serde(default)]
    pub output_filename: String,
}

pub fn write_idyom_instructions(path: &Path, inst: &IdyomInstructions) -> Result<()> {
    let wire = WireIdyomInstructions {
        version: CURRENT_VERSION.to_string(),
        instructions: inst.clone(),
        command: inst.to_lisp(),
        filename_query: inst.filename_query(),
        output_filename: inst.output_filename(),
    };
    write_string(path, &serde_json::to_string_pretty(&wire)?)?;
    tracing::debug!(path = %path.display(), dataset = inst.dataset_id(), "wrote IDyOM instructions");
    Ok(())
}

pub fn read_idyom_instructions(path: &Path) -> Result<IdyomInstructions> {
    let wire: WireIdyomInstructions = serde_json::from_str(&read_to_string(path)?)?;
    if wire.version != CURRENT_VERSION {
        return Err(StoreError::parse(
            path,
            "version",
            format!("unsupported version {:?}", wire.version),
        ));
    }
    wire.instructions
        .validate()
        .map_err(|e| StoreError::parse(path, "instructions", e.to_string()))?;
    Ok(wire.instructions)
}

/// Write the command payload on its own, for runtimes that load source files.
pub fn write_idyom_command(path: &Path, inst: &IdyomInstructions) -> Result<()> {
    write_string(path, &format!("{}\n", inst.to_lisp()))
}

// --- Result tables ---

fn split_line<'a>(line: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.trim().is_empty() {
        line.split_whitespace().collect()
    } else {
        line.split(separator).map(str::trim).collect()
    }
}

pub fn parse_idyom_table(path: &Path, text: &str, separator: &str) -> Result<IdyomResults> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| StoreError::parse(path, "header", "result table is empty"))?;
    let columns: Vec<String> = split_line(header, separator)
        .into_iter()
        .map(String::from)
        .collect();
    let rows: Vec<Vec<String>> = lines
        .map(|l| split_line(l, separator).into_iter().map(String::from).collect())
        .collect();
    let results = IdyomResults::from_table(columns, rows)
        .map_err(|e| StoreError::parse(path, "rows", e.to_string()))?;
    tracing::debug!(
        path = %path.display(),
        rows = results.row_count(),
        targets = results.targets.len(),
        "parsed IDyOM results"
    );
    Ok(results)
}

/// Read a whitespace-separated result table.
pub fn read_idyom_results(path: &Path) -> Result<IdyomResults> {
    read_idyom_results_with(path, " ")
}

pub fn read_idyom_results_with(path: &Path, separator: &str) -> Result<IdyomResults> {
    parse_idyom_table(path, &read_to_string(path)?, separator)
}

pub fn write_idyom_results(path: &Path, results: &IdyomResults) -> Result<()> {
    let mut out = results.columns.join(" ");
    out.push('\n');
    for row in &results.rows {
        out.push_str(&row.join(" "));
        out.push('\n');
    }
    write_string(path, &out)
}
