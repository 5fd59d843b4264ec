//! SQLite result store: one row per run, one per iteration.

#![allow(missing_docs)]

use std::path::Path;

use rusqlite::{Connection, params};

use crate::core::errors::Result;
use crate::exec::results::{ResultSink, RunSummary};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    finished_at TEXT NOT NULL,
    experiment TEXT NOT NULL,
    strategy TEXT NOT NULL,
    visual_id TEXT NOT NULL,
    bucket TEXT NOT NULL,
    total_completed INTEGER NOT NULL,
    pass_count INTEGER NOT NULL,
    fail_count INTEGER NOT NULL,
    valid_tests INTEGER NOT NULL,
    pass_rate REAL NOT NULL,
    matrix_json TEXT NOT NULL,
    legend_json TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS iterations (
    run_id INTEGER NOT NULL REFERENCES runs(id),
    iteration INTEGER NOT NULL,
    status TEXT NOT NULL,
    name TEXT NOT NULL,
    scratchpad TEXT NOT NULL,
    seed TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_iterations_run ON iterations(run_id);
";

/// WAL-mode SQLite sink for finished runs.
pub struct SqliteResultStore {
    conn: Connection,
}

impl SqliteResultStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Number of stored runs, for reporting and tests.
    pub fn run_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl ResultSink for SqliteResultStore {
    fn store(&mut self, summary: &RunSummary) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (finished_at, experiment, strategy, visual_id, bucket, \
             total_completed, pass_count, fail_count, valid_tests, pass_rate, \
             matrix_json, legend_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                summary.finished_at.to_rfc3339(),
                summary.experiment,
                summary.strategy,
                summary.visual_id,
                summary.bucket,
                summary.stats.total_completed as i64,
                summary.stats.pass_count as i64,
                summary.stats.fail_count as i64,
                summary.stats.valid_tests as i64,
                summary.stats.pass_rate,
                serde_json::to_string(&summary.table.matrix)?,
                serde_json::to_string(&summary.table.legend)?,
            ],
        )?;
        let run_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO iterations (run_id, iteration, status, name, scratchpad, seed, \
                 recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for result in &summary.results {
                stmt.execute(params![
                    run_id,
                    result.iteration as i64,
                    result.outcome.as_str(),
                    result.name,
                    result.scratchpad,
                    result.seed,
                    result.timestamp.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
