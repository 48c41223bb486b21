use cmme_core::PpmModelType;
use rusqlite::{Connection, params};

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

// Column order is part of the file format.
pub const PPM_BASE_COLUMNS: [&str; 5] = [
    "model_type",
    "alphabet_levels",
    "order_bound",
    "input_sequence",
    "results_file_path",
];

pub const PPM_SIMPLE_COLUMNS: [&str; 4] = [
    "shortest_deterministic",
    "exclusion",
    "update_exclusion",
    "escape",
];

pub const PPM_DECAY_COLUMNS: [&str; 13] = [
    "input_time_sequence",
    "buffer_weight",
    "buffer_length_time",
    "buffer_length_items",
    "stm_weight",
    "stm_duration",
    "only_learn_from_buffer",
    "only_predict_from_buffer",
    "ltm_weight",
    "ltm_half_life",
    "ltm_asymptote",
    "noise",
    "seed",
];

pub const PPM_META_COLUMNS: [&str; 4] = [
    "model_type",
    "alphabet_levels",
    "instructions_file_path",
    "results_file_data_path",
];

pub const PPM_DATA_COLUMNS: [&str; 8] = [
    "trial_idx",
    "symbol",
    "position",
    "time",
    "model_order",
    "information_content",
    "entropy",
    "distribution",
];

/// Which table a PPM database file holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    PpmInstructions,
    PpmResultsMeta,
    PpmResultsData,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::PpmInstructions => "ppm_instructions",
            FileKind::PpmResultsMeta => "ppm_results_meta",
            FileKind::PpmResultsData => "ppm_results_data",
        }
    }
}

/// Every column of the instruction table for a model type, in file order.
pub fn ppm_instruction_columns(model_type: PpmModelType) -> Vec<&'static str> {
    let mut columns = PPM_BASE_COLUMNS.to_vec();
    match model_type {
        PpmModelType::Simple => columns.extend(PPM_SIMPLE_COLUMNS),
        PpmModelType::Decay => columns.extend(PPM_DECAY_COLUMNS),
    }
    columns
}

pub fn initialize(conn: &Connection, kind: FileKind) -> Result<()> {
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('kind', ?1)",
        params![kind.as_str()],
    )?;
    Ok(())
}

pub fn create_ppm_instructions(conn: &Connection, model_type: PpmModelType) -> Result<()> {
    let mut ddl = String::from("DROP TABLE IF EXISTS instructions;\nCREATE TABLE instructions (\n");
    let columns: Vec<String> = ppm_instruction_columns(model_type)
        .into_iter()
        .map(|c| format!("    {c} {}", instruction_column_type(c)))
        .collect();
    ddl.push_str(&columns.join(",\n"));
    ddl.push_str("\n);");
    conn.execute_batch(&ddl)?;
    Ok(())
}

fn instruction_column_type(column: &str) -> &'static str {
    match column {
        "order_bound" | "buffer_length_items" | "seed" => "INTEGER NOT NULL",
        "results_file_path" => "TEXT",
        "buffer_weight" | "buffer_length_time" | "stm_weight" | "stm_duration" | "ltm_weight"
        | "ltm_half_life" | "ltm_asymptote" | "noise" => "REAL NOT NULL",
        _ => "TEXT NOT NULL",
    }
}

pub fn create_ppm_results_meta(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        DROP TABLE IF EXISTS results_meta;
        CREATE TABLE results_meta (
            model_type             TEXT NOT NULL,
            alphabet_levels        TEXT NOT NULL,
            instructions_file_path TEXT,
            results_file_data_path TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_ppm_results_data(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        DROP TABLE IF EXISTS events;
        CREATE TABLE events (
            trial_idx           INTEGER NOT NULL,
            symbol              REAL NOT NULL,
            position            INTEGER NOT NULL,
            time                REAL,
            model_order         INTEGER NOT NULL,
            information_content REAL NOT NULL,
            entropy             REAL NOT NULL,
            distribution        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_trial ON events(trial_idx, position);
        ",
    )?;
    Ok(())
}

/// Check that a database was written for the expected table kind.
pub fn check_kind(conn: &Connection, kind: FileKind) -> Result<()> {
    let stored: Option<String> = conn
        .query_row("SELECT value FROM metadata WHERE key = 'kind'", [], |row| {
            row.get(0)
        })
        .ok();
    match stored {
        Some(k) if k == kind.as_str() => Ok(()),
        Some(k) => Err(StoreError::parse(
            conn.path().unwrap_or_default(),
            "kind",
            format!("expected {}, found {k}", kind.as_str()),
        )),
        None => Err(StoreError::parse(
            conn.path().unwrap_or_default(),
            "kind",
            "file has no metadata table",
        )),
    }
}

/// Column names of a table in declaration order.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_column_order() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn, FileKind::PpmInstructions).unwrap();
        create_ppm_instructions(&conn, PpmModelType::Simple).unwrap();
        let cols = table_columns(&conn, "instructions").unwrap();
        assert_eq!(cols.len(), 9);
        assert_eq!(cols[0], "model_type");
        assert_eq!(cols[4], "results_file_path");
        assert_eq!(cols[8], "escape");

        create_ppm_instructions(&conn, PpmModelType::Decay).unwrap();
        let cols = table_columns(&conn, "instructions").unwrap();
        assert_eq!(cols.len(), 18);
        assert_eq!(cols[5], "input_time_sequence");
        assert_eq!(cols[17], "seed");
    }

    #[test]
    fn test_data_column_order() {
        let conn = Connection::open_in_memory().unwrap();
        create_ppm_results_data(&conn).unwrap();
        assert_eq!(table_columns(&conn, "events").unwrap(), PPM_DATA_COLUMNS);
        create_ppm_results_meta(&conn).unwrap();
        assert_eq!(table_columns(&conn, "results_meta").unwrap(), PPM_META_COLUMNS);
    }

    #[test]
    fn test_kind_check() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn, FileKind::PpmResultsMeta).unwrap();
        assert!(check_kind(&conn, FileKind::PpmResultsMeta).is_ok());
        assert!(check_kind(&conn, FileKind::PpmInstructions).is_err());
    }
}
