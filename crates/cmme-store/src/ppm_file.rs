//! PPM instruction and result files: single-table SQLite databases.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cmme_core::{
    Alphabet, EscapeMethod, InputSequence, PpmDecayBuilder, PpmEvent, PpmInstructions,
    PpmModelType, PpmResults, PpmSimpleBuilder, PpmVariant,
};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use crate::codec::{bool_cell, join_floats, join_trials, parse_bool, split_floats, split_trials};
use crate::error::{Result, StoreError};
use crate::paths::resolve_data_path;
use crate::schema::{self, FileKind};

fn open(path: &Path, kind: FileKind) -> Result<Connection> {
    let conn = Connection::open(path)?;
    schema::initialize(&conn, kind)?;
    Ok(conn)
}

fn open_existing(path: &Path, kind: FileKind) -> Result<Connection> {
    if !path.exists() {
        return Err(StoreError::MissingFile(path.to_path_buf()));
    }
    let conn = Connection::open(path)?;
    schema::check_kind(&conn, kind)?;
    Ok(conn)
}

fn path_value(path: Option<&PathBuf>) -> Value {
    match path {
        Some(p) => Value::Text(p.to_string_lossy().into_owned()),
        None => Value::Null,
    }
}

// --- Cells ---

/// One row read by column name, with typed accessors that report the
/// offending field on failure.
struct Cells<'a> {
    path: &'a Path,
    values: HashMap<String, Value>,
}

impl<'a> Cells<'a> {
    fn read(conn: &Connection, path: &'a Path, table: &str, columns: &[&str]) -> Result<Self> {
        let sql = format!("SELECT {} FROM {table} LIMIT 1", columns.join(", "));
        let row = conn
            .query_row(&sql, [], |r| {
                (0..columns.len())
                    .map(|i| r.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::parse(path, table, "table has no rows")
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(Self {
            path,
            values: columns.iter().map(|c| c.to_string()).zip(row).collect(),
        })
    }

    fn err(&self, field: &str, message: impl Into<String>) -> StoreError {
        StoreError::parse(self.path, field, message)
    }

    fn get(&self, field: &str) -> Result<&Value> {
        self.values
            .get(field)
            .ok_or_else(|| self.err(field, "column missing"))
    }

    fn text(&self, field: &str) -> Result<&str> {
        match self.get(field)? {
            Value::Text(s) => Ok(s),
            other => Err(self.err(field, format!("expected text, found {other:?}"))),
        }
    }

    fn opt_path(&self, field: &str) -> Result<Option<PathBuf>> {
        match self.get(field)? {
            Value::Null => Ok(None),
            Value::Text(s) if s.is_empty() => Ok(None),
            Value::Text(s) => Ok(Some(PathBuf::from(s))),
            other => Err(self.err(field, format!("expected path, found {other:?}"))),
        }
    }

    fn real(&self, field: &str) -> Result<f64> {
        match self.get(field)? {
            Value::Real(v) => Ok(*v),
            Value::Integer(v) => Ok(*v as f64),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| self.err(field, format!("{s:?} is not a number"))),
            other => Err(self.err(field, format!("expected number, found {other:?}"))),
        }
    }

    fn integer(&self, field: &str) -> Result<i64> {
        match self.get(field)? {
            Value::Integer(v) => Ok(*v),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| self.err(field, format!("{s:?} is not an integer"))),
            other => Err(self.err(field, format!("expected integer, found {other:?}"))),
        }
    }

    fn count(&self, field: &str) -> Result<usize> {
        let v = self.integer(field)?;
        usize::try_from(v).map_err(|_| self.err(field, format!("{v} is negative")))
    }

    fn boolean(&self, field: &str) -> Result<bool> {
        parse_bool(self.text(field)?).map_err(|m| self.err(field, m))
    }

    fn floats(&self, field: &str) -> Result<Vec<f64>> {
        split_floats(self.text(field)?).map_err(|m| self.err(field, m))
    }

    fn trials(&self, field: &str) -> Result<Vec<Vec<f64>>> {
        split_trials(self.text(field)?).map_err(|m| self.err(field, m))
    }
}

// --- Instructions ---

pub fn write_ppm_instructions(path: &Path, inst: &PpmInstructions) -> Result<()> {
    let conn = open(path, FileKind::PpmInstructions)?;
    let model_type = inst.model_type();
    schema::create_ppm_instructions(&conn, model_type)?;

    let trials = inst.input_sequence().univariate_trials().ok_or_else(|| {
        StoreError::parse(path, "input_sequence", "PPM input must be univariate")
    })?;
    let mut values = vec![
        Value::Text(model_type.as_str().to_string()),
        Value::Text(join_floats(inst.alphabet().levels())),
        Value::Integer(inst.order_bound() as i64),
        Value::Text(join_trials(&trials)),
        path_value(inst.results_file_path()),
    ];
    match inst.variant() {
        PpmVariant::Simple(o) => values.extend([
            Value::Text(bool_cell(o.shortest_deterministic).to_string()),
            Value::Text(bool_cell(o.exclusion).to_string()),
            Value::Text(bool_cell(o.update_exclusion).to_string()),
            Value::Text(o.escape.as_str().to_string()),
        ]),
        PpmVariant::Decay(o) => values.extend([
            Value::Text(join_trials(&o.input_time_sequence)),
            Value::Real(o.buffer_weight),
            Value::Real(o.buffer_length_time),
            Value::Integer(o.buffer_length_items as i64),
            Value::Real(o.stm_weight),
            Value::Real(o.stm_duration),
            Value::Text(bool_cell(o.only_learn_from_buffer).to_string()),
            Value::Text(bool_cell(o.only_predict_from_buffer).to_string()),
            Value::Real(o.ltm_weight),
            Value::Real(o.ltm_half_life),
            Value::Real(o.ltm_asymptote),
            Value::Real(o.noise),
            // bit-preserving: seeds above i64::MAX come back unchanged
            Value::Integer(o.seed as i64),
        ]),
    }

    let columns = schema::ppm_instruction_columns(model_type);
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    conn.execute(
        &format!(
            "INSERT INTO instructions ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values),
    )?;
    tracing::debug!(path = %path.display(), model_type = %model_type, "wrote PPM instructions");
    Ok(())
}

pub fn read_ppm_instructions(path: &Path) -> Result<PpmInstructions> {
    let conn = open_existing(path, FileKind::PpmInstructions)?;
    let tag: String = conn.query_row("SELECT model_type FROM instructions", [], |r| r.get(0))?;
    let model_type = PpmModelType::from_tag(&tag)
        .ok_or_else(|| StoreError::parse(path, "model_type", format!("unknown model type {tag:?}")))?;
    let cells = Cells::read(
        &conn,
        path,
        "instructions",
        &schema::ppm_instruction_columns(model_type),
    )?;

    let input_sequence = univariate_sequence(cells.trials("input_sequence")?)
        .map_err(|e| cells.err("input_sequence", e.to_string()))?;
    let alphabet = cells.floats("alphabet_levels")?;
    let order_bound = cells.count("order_bound")?;
    let results_file_path = cells.opt_path("results_file_path")?;

    let inst = match model_type {
        PpmModelType::Simple => {
            let escape_tag = cells.text("escape")?;
            let mut b = PpmSimpleBuilder::new(input_sequence)
                .alphabet(alphabet)
                .order_bound(order_bound)
                .escape(EscapeMethod::from_tag(escape_tag).ok_or_else(|| {
                    cells.err("escape", format!("unknown escape method {escape_tag:?}"))
                })?);
            b.shortest_deterministic = cells.boolean("shortest_deterministic")?;
            b.exclusion = cells.boolean("exclusion")?;
            b.update_exclusion = cells.boolean("update_exclusion")?;
            b.results_file_path = results_file_path;
            b.to_instructions_file()?
        }
        PpmModelType::Decay => {
            let mut b = PpmDecayBuilder::new(input_sequence)
                .alphabet(alphabet)
                .order_bound(order_bound);
            b.input_time_sequence = Some(cells.trials("input_time_sequence")?);
            b.buffer_weight = cells.real("buffer_weight")?;
            b.buffer_length_time = cells.real("buffer_length_time")?;
            b.buffer_length_items = cells.count("buffer_length_items")?;
            b.stm_weight = cells.real("stm_weight")?;
            b.stm_duration = cells.real("stm_duration")?;
            b.only_learn_from_buffer = cells.boolean("only_learn_from_buffer")?;
            b.only_predict_from_buffer = cells.boolean("only_predict_from_buffer")?;
            b.ltm_weight = cells.real("ltm_weight")?;
            b.ltm_half_life = cells.real("ltm_half_life")?;
            b.ltm_asymptote = cells.real("ltm_asymptote")?;
            b.noise = cells.real("noise")?;
            b.seed = cells.integer("seed")? as u64;
            b.results_file_path = results_file_path;
            b.to_instructions_file()?
        }
    };
    tracing::debug!(path = %path.display(), model_type = %model_type, "read PPM instructions");
    Ok(inst)
}

fn univariate_sequence(trials: Vec<Vec<f64>>) -> cmme_core::Result<InputSequence> {
    InputSequence::from_trials(
        trials
            .into_iter()
            .map(|t| t.into_iter().map(|v| vec![v]).collect())
            .collect(),
    )
}

// --- Results ---

/// Write the meta file and the data file it points at.
pub fn write_ppm_results(meta_path: &Path, data_path: &Path, results: &PpmResults) -> Result<()> {
    let data = open(data_path, FileKind::PpmResultsData)?;
    schema::create_ppm_results_data(&data)?;
    let tx = data.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO events (trial_idx, symbol, position, time, model_order,
                                 information_content, entropy, distribution)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (trial_idx, trial) in results.trials.iter().enumerate() {
            for e in trial {
                stmt.execute(params![
                    trial_idx as i64,
                    e.symbol,
                    e.position as i64,
                    e.time,
                    e.model_order as i64,
                    e.information_content,
                    e.entropy,
                    join_floats(&e.distribution),
                ])?;
            }
        }
    }
    tx.commit()?;

    let meta = open(meta_path, FileKind::PpmResultsMeta)?;
    schema::create_ppm_results_meta(&meta)?;
    meta.execute(
        "INSERT INTO results_meta (model_type, alphabet_levels, instructions_file_path,
                                   results_file_data_path)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            results.model_type.as_str(),
            join_floats(results.alphabet.levels()),
            path_value(results.instructions_file_path.as_ref()),
            data_path.to_string_lossy().into_owned(),
        ],
    )?;
    tracing::debug!(
        meta = %meta_path.display(),
        data = %data_path.display(),
        trials = results.trials.len(),
        "wrote PPM results"
    );
    Ok(())
}

pub fn read_ppm_results(meta_path: &Path) -> Result<PpmResults> {
    let meta = open_existing(meta_path, FileKind::PpmResultsMeta)?;
    let cells = Cells::read(&meta, meta_path, "results_meta", &schema::PPM_META_COLUMNS)?;
    let tag = cells.text("model_type")?;
    let model_type = PpmModelType::from_tag(tag)
        .ok_or_else(|| cells.err("model_type", format!("unknown model type {tag:?}")))?;
    let alphabet = Alphabet::new(cells.floats("alphabet_levels")?)
        .map_err(|e| cells.err("alphabet_levels", e.to_string()))?;
    let instructions_file_path = cells.opt_path("instructions_file_path")?;
    let stored = cells
        .opt_path("results_file_data_path")?
        .ok_or_else(|| cells.err("results_file_data_path", "empty path"))?;
    let data_path = resolve_data_path(meta_path, &stored)?;

    let data = open_existing(&data_path, FileKind::PpmResultsData)?;
    let mut stmt = data.prepare(
        "SELECT trial_idx, symbol, position, time, model_order,
                information_content, entropy, distribution
         FROM events ORDER BY trial_idx, position",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, Option<f64>>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<f64>>(5)?,
                r.get::<_, Option<f64>>(6)?,
                r.get::<_, String>(7)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut trials: Vec<Vec<PpmEvent>> = Vec::new();
    for (trial_idx, symbol, position, time, model_order, ic, entropy, dist) in rows {
        let (Ok(trial_idx), Ok(position), Ok(model_order)) = (
            usize::try_from(trial_idx),
            usize::try_from(position),
            usize::try_from(model_order),
        ) else {
            return Err(StoreError::parse(
                &data_path,
                "events",
                format!("negative index in trial {trial_idx}"),
            ));
        };
        let distribution = split_floats(&dist)
            .map_err(|m| StoreError::parse(&data_path, "distribution", m))?;
        if trials.len() <= trial_idx {
            trials.resize_with(trial_idx + 1, Vec::new);
        }
        trials[trial_idx].push(PpmEvent {
            symbol,
            position,
            time,
            model_order,
            information_content: ic.unwrap_or(f64::NAN),
            entropy: entropy.unwrap_or(f64::NAN),
            distribution,
        });
    }
    tracing::debug!(
        meta = %meta_path.display(),
        trials = trials.len(),
        events = trials.iter().map(|t| t.len()).sum::<usize>(),
        "read PPM results"
    );

    Ok(PpmResults {
        model_type,
        alphabet,
        instructions_file_path,
        data_file_path: Some(data_path),
        trials,
    })
}
