//! Column inference over an IDyOM result table.
//!
//! Targets, their value columns and the sources used per target are all
//! recovered from column names, so tables from any viewpoint set parse.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ModelError, Result};

static TARGET_PROBABILITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<target>[^.\s]+)\.probability$").unwrap());

static SOURCE_STAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<target>[^.\s]+)\.(?P<stat>order|weight)\.(?P<model>stm|ltm)\.(?P<source>\S+)$")
        .unwrap()
});

/// Suffixes after `<target>.` that are summaries rather than symbol values.
const SUMMARY_SUFFIXES: &[&str] = &["probability", "entropy", "information.content"];
const SUBMODEL_PREFIXES: &[&str] = &["order.", "weight.", "stm.", "ltm."];

#[derive(Clone, Debug, PartialEq)]
pub struct IdyomTarget {
    pub name: String,
    /// Symbol values the target's distribution columns cover, in table order.
    pub values: Vec<String>,
    /// Source viewpoints with order or weight columns for this target.
    pub sources: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IdyomResults {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub targets: Vec<IdyomTarget>,
}

impl IdyomResults {
    pub fn from_table(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(ModelError::input(format!(
                "row {i} has {} cells, header has {}",
                row.len(),
                columns.len()
            )));
        }
        let targets = infer_targets(&columns);
        Ok(Self {
            columns,
            rows,
            targets,
        })
    }

    pub fn target(&self, name: &str) -> Option<&IdyomTarget> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Parse a column as floats; `NA`/`nil` cells become NaN.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name)
            .map(|cells| cells.into_iter().map(parse_cell).collect())
    }

    pub fn probability(&self, target: &str) -> Option<Vec<f64>> {
        self.numeric_column(&format!("{target}.probability"))
    }

    pub fn information_content(&self, target: &str) -> Option<Vec<f64>> {
        self.numeric_column(&format!("{target}.information.content"))
    }

    pub fn entropy(&self, target: &str) -> Option<Vec<f64>> {
        self.numeric_column(&format!("{target}.entropy"))
    }

    /// Full predictive distribution of `target` at each row, ordered as
    /// [`IdyomTarget::values`].
    pub fn distributions(&self, target: &str) -> Option<Vec<Vec<f64>>> {
        let t = self.target(target)?;
        let indices: Vec<usize> = t
            .values
            .iter()
            .filter_map(|v| self.column_index(&format!("{target}.{v}")))
            .collect();
        Some(
            self.rows
                .iter()
                .map(|r| indices.iter().map(|&i| parse_cell(&r[i])).collect())
                .collect(),
        )
    }

    /// Per-source order or weight for one target and sub-model.
    pub fn source_stat(&self, target: &str, stat: &str, model: &str, source: &str) -> Option<Vec<f64>> {
        self.numeric_column(&format!("{target}.{stat}.{model}.{source}"))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

fn parse_cell(cell: &str) -> f64 {
    cell.parse().unwrap_or(f64::NAN)
}

fn infer_targets(columns: &[String]) -> Vec<IdyomTarget> {
    let names: Vec<String> = columns
        .iter()
        .filter_map(|c| TARGET_PROBABILITY.captures(c))
        .map(|caps| caps["target"].to_string())
        .collect();

    names
        .into_iter()
        .map(|name| {
            let prefix = format!("{name}.");
            let values = columns
                .iter()
                .filter_map(|c| c.strip_prefix(&prefix))
                .filter(|rest| {
                    !SUMMARY_SUFFIXES.contains(rest)
                        && !SUBMODEL_PREFIXES.iter().any(|p| rest.starts_with(p))
                })
                .map(str::to_string)
                .collect();
            let mut sources: Vec<String> = Vec::new();
            for caps in columns.iter().filter_map(|c| SOURCE_STAT.captures(c)) {
                if caps["target"] == *name && !sources.iter().any(|s| s == &caps["source"]) {
                    sources.push(caps["source"].to_string());
                }
            }
            IdyomTarget {
                name,
                values,
                sources,
            }
        })
        .collect()
}
