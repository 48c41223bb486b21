//! Cell encodings shared by the tabular files.
//!
//! Lists are joined with `", "`, booleans are `TRUE`/`FALSE`, and trials of a
//! multi-trial sequence are joined with a newline inside one cell.

pub const LIST_SEPARATOR: &str = ", ";
pub const TRIAL_SEPARATOR: &str = "\n";

pub fn join_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// Inverse of [`join_floats`]. Also accepts bare commas. Empty input is an empty list.
pub fn split_floats(cell: &str) -> std::result::Result<Vec<f64>, String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(Vec::new());
    }
    cell.split(',')
        .map(|s| {
            let s = s.trim();
            s.parse::<f64>()
                .map_err(|_| format!("{s:?} is not a number"))
        })
        .collect()
}

pub fn join_trials(trials: &[Vec<f64>]) -> String {
    trials
        .iter()
        .map(|t| join_floats(t))
        .collect::<Vec<_>>()
        .join(TRIAL_SEPARATOR)
}

pub fn split_trials(cell: &str) -> std::result::Result<Vec<Vec<f64>>, String> {
    cell.split(TRIAL_SEPARATOR).map(split_floats).collect()
}

pub fn bool_cell(b: bool) -> &'static str {
    if b { "TRUE" } else { "FALSE" }
}

pub fn parse_bool(cell: &str) -> std::result::Result<bool, String> {
    match cell.trim() {
        "TRUE" | "true" | "T" | "1" => Ok(true),
        "FALSE" | "false" | "F" | "0" => Ok(false),
        other => Err(format!("{other:?} is not a boolean")),
    }
}

/// JSON has no NaN or infinity; those travel as `null`.
pub fn to_nullable(values: &[f64]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|&v| if v.is_finite() { Some(v) } else { None })
        .collect()
}

pub fn from_nullable(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

pub fn to_nullable_matrix(rows: &[Vec<f64>]) -> Vec<Vec<Option<f64>>> {
    rows.iter().map(|r| to_nullable(r)).collect()
}

pub fn from_nullable_matrix(rows: &[Vec<Option<f64>>]) -> Vec<Vec<f64>> {
    rows.iter().map(|r| from_nullable(r)).collect()
}
