//! SQLite persistence for simulation runs.
//!
//! One `simulations` row per run (parameters, summary, metadata) and one
//! `simulation_results` row per iteration. Results cascade on delete.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::debug;

use crate::config::{EngineConfig, MAX_PAGE_LIMIT};
use crate::error::{StoreError, StoreResult};
use crate::params::SimulationParameters;
use crate::simulation::ScenarioResult;
use crate::stats::SimulationSummary;
use crate::types::{Bounds, SimulationId};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS simulations (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        asset_value           REAL    NOT NULL,
        tef_min               REAL    NOT NULL,
        tef_max               REAL    NOT NULL,
        vulnerability         REAL    NOT NULL,
        vulnerability_percent REAL    NOT NULL,
        primary_loss_min      REAL    NOT NULL,
        primary_loss_max      REAL    NOT NULL,
        secondary_loss_min    REAL    NOT NULL,
        secondary_loss_max    REAL    NOT NULL,
        num_iterations        INTEGER NOT NULL,
        mean_loss             REAL    NOT NULL,
        median_loss           REAL    NOT NULL,
        min_loss              REAL    NOT NULL,
        max_loss              REAL    NOT NULL,
        percentile_90         REAL    NOT NULL,
        percentile_95         REAL    NOT NULL,
        percentile_99         REAL    NOT NULL,
        notes                 TEXT    NOT NULL DEFAULT '',
        tags                  TEXT    NOT NULL DEFAULT '',
        seed                  INTEGER,
        created_at            TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_simulations_created_at ON simulations (created_at);

    CREATE TABLE IF NOT EXISTS simulation_results (
        simulation_id       INTEGER NOT NULL REFERENCES simulations (id) ON DELETE CASCADE,
        iteration_number    INTEGER NOT NULL,
        tef_value           REAL    NOT NULL,
        vulnerability_value REAL    NOT NULL,
        loss_magnitude      REAL    NOT NULL,
        annual_loss         REAL    NOT NULL,
        PRIMARY KEY (simulation_id, iteration_number)
    );
";

/// Columns read back for a stored simulation, in `SimulationRow` order.
const SIMULATION_COLUMNS: &str = "id, asset_value, tef_min, tef_max, vulnerability,
     vulnerability_percent, primary_loss_min, primary_loss_max, secondary_loss_min,
     secondary_loss_max, num_iterations, mean_loss, median_loss, min_loss, max_loss,
     percentile_90, percentile_95, percentile_99, notes, tags, seed, created_at";

/// A finished run, ready to persist.
#[derive(Debug, Clone, Copy)]
pub struct NewSimulation<'a> {
    pub params: &'a SimulationParameters,
    pub summary: &'a SimulationSummary,
    pub results: &'a [ScenarioResult],
    pub notes: &'a str,
    pub tags: &'a str,
    pub seed: Option<u64>,
}

/// Summary-level view of a persisted run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSimulation {
    pub id: SimulationId,
    pub created_at: DateTime<Utc>,
    pub params: SimulationParameters,
    pub summary: SimulationSummary,
    pub notes: String,
    pub tags: String,
    pub seed: Option<u64>,
}

impl StoredSimulation {
    /// Tags split on commas, trimmed, empties dropped.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags.split(',').map(str::trim).filter(|t| !t.is_empty()).collect()
    }
}

/// Paginated, filtered listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    /// Substring of notes or tags.
    pub search: Option<String>,
    /// Substring of tags.
    pub tag: Option<String>,
}

impl ListQuery {
    /// First page at the configured page size, unfiltered.
    pub fn new(config: &EngineConfig) -> Self {
        ListQuery { page: 1, limit: config.page_size, search: None, tag: None }
    }

    /// Page clamped to at least 1, limit to `[1, 100]`, blank filters dropped.
    pub fn normalized(&self) -> Self {
        let nonblank = |s: &Option<String>| {
            s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
        };
        ListQuery {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
            search: nonblank(&self.search),
            tag: nonblank(&self.tag),
        }
    }

    fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

pub struct SimulationStore {
    conn: Connection,
}

impl SimulationStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(SimulationStore { conn })
    }

    /// Persist a run and all of its iteration rows in one transaction.
    pub fn save(&mut self, run: &NewSimulation<'_>) -> StoreResult<SimulationId> {
        let p = run.params;
        let s = run.summary;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO simulations (
                asset_value, tef_min, tef_max, vulnerability, vulnerability_percent,
                primary_loss_min, primary_loss_max, secondary_loss_min, secondary_loss_max,
                num_iterations, mean_loss, median_loss, min_loss, max_loss,
                percentile_90, percentile_95, percentile_99, notes, tags, seed, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                p.asset_value(),
                p.tef().min,
                p.tef().max,
                p.vulnerability(),
                p.vulnerability_percent(),
                p.primary_loss().min,
                p.primary_loss().max,
                p.secondary_loss().min,
                p.secondary_loss().max,
                p.iterations(),
                s.mean,
                s.median,
                s.min,
                s.max,
                s.p90,
                s.p95,
                s.p99,
                run.notes,
                run.tags,
                run.seed.map(|seed| seed as i64),
                created_at,
            ],
        )?;
        let id = SimulationId(tx.last_insert_rowid());

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO simulation_results (
                    simulation_id, iteration_number, tef_value, vulnerability_value,
                    loss_magnitude, annual_loss
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in run.results {
                stmt.execute(params![
                    id.0,
                    r.index,
                    r.tef,
                    r.vulnerability_draw,
                    r.loss_magnitude,
                    r.annual_loss
                ])?;
            }
        }
        tx.commit()?;

        debug!(%id, rows = run.results.len(), "simulation persisted");
        Ok(id)
    }

    pub fn get(&self, id: SimulationId) -> StoreResult<StoredSimulation> {
        let sql = format!("SELECT {SIMULATION_COLUMNS} FROM simulations WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, [id.0], SimulationRow::read)
            .optional()?
            .ok_or(StoreError::NotFound { id })?;
        row.into_stored()
    }

    pub fn exists(&self, id: SimulationId) -> StoreResult<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM simulations WHERE id = ?1", [id.0], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Every iteration row of a run, in iteration order.
    pub fn results(&self, id: SimulationId) -> StoreResult<Vec<ScenarioResult>> {
        if !self.exists(id)? {
            return Err(StoreError::NotFound { id });
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT iteration_number, tef_value, vulnerability_value, loss_magnitude, annual_loss
             FROM simulation_results WHERE simulation_id = ?1 ORDER BY iteration_number",
        )?;
        let rows = stmt.query_map([id.0], |row| {
            Ok(ScenarioResult {
                index: row.get(0)?,
                tef: row.get(1)?,
                vulnerability_draw: row.get(2)?,
                loss_magnitude: row.get(3)?,
                annual_loss: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Annual losses of a run, ascending.
    pub fn annual_losses(&self, id: SimulationId) -> StoreResult<Vec<f64>> {
        if !self.exists(id)? {
            return Err(StoreError::NotFound { id });
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT annual_loss FROM simulation_results WHERE simulation_id = ?1 ORDER BY annual_loss",
        )?;
        let rows = stmt.query_map([id.0], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<f64>, _>>()?)
    }

    /// Newest first, filtered by `search` (notes or tags) and `tag`.
    pub fn list(&self, query: &ListQuery) -> StoreResult<Page<StoredSimulation>> {
        let query = query.normalized();

        let mut conditions: Vec<&str> = Vec::new();
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(search) = &query.search {
            conditions.push("(notes LIKE ? ESCAPE '\\' OR tags LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            args.push(Box::new(pattern.clone()));
            args.push(Box::new(pattern));
        }
        if let Some(tag) = &query.tag {
            conditions.push("tags LIKE ? ESCAPE '\\'");
            args.push(Box::new(like_pattern(tag)));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let arg_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM simulations {where_clause}"),
            arg_refs.as_slice(),
            |row| row.get(0),
        )?;

        args.push(Box::new(i64::from(query.limit)));
        args.push(Box::new(query.offset() as i64));
        let arg_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();

        let sql = format!(
            "SELECT {SIMULATION_COLUMNS} FROM simulations {where_clause}
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(arg_refs.as_slice(), SimulationRow::read)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?.into_stored()?);
        }

        let total = total.max(0) as u64;
        Ok(Page {
            items,
            page: query.page,
            limit: query.limit,
            total,
            pages: total.div_ceil(u64::from(query.limit)),
        })
    }

    /// Remove a run; its iteration rows go with it.
    pub fn delete(&mut self, id: SimulationId) -> StoreResult<()> {
        let removed = self.conn.execute("DELETE FROM simulations WHERE id = ?1", [id.0])?;
        if removed == 0 {
            return Err(StoreError::NotFound { id });
        }
        debug!(%id, "simulation deleted");
        Ok(())
    }

    #[cfg(test)]
    fn result_row_count(&self, id: SimulationId) -> StoreResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM simulation_results WHERE simulation_id = ?1",
            [id.0],
            |row| row.get(0),
        )?)
    }
}

/// `%needle%` with LIKE metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

/// Raw column values of one `simulations` row.
struct SimulationRow {
    id: i64,
    asset_value: f64,
    tef: Bounds,
    vulnerability: f64,
    vulnerability_percent: f64,
    primary_loss: Bounds,
    secondary_loss: Bounds,
    iterations: i64,
    summary: SimulationSummary,
    notes: String,
    tags: String,
    seed: Option<i64>,
    created_at: String,
}

impl SimulationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SimulationRow {
            id: row.get(0)?,
            asset_value: row.get(1)?,
            tef: Bounds::new(row.get(2)?, row.get(3)?),
            vulnerability: row.get(4)?,
            vulnerability_percent: row.get(5)?,
            primary_loss: Bounds::new(row.get(6)?, row.get(7)?),
            secondary_loss: Bounds::new(row.get(8)?, row.get(9)?),
            iterations: row.get(10)?,
            summary: SimulationSummary {
                mean: row.get(11)?,
                median: row.get(12)?,
                min: row.get(13)?,
                max: row.get(14)?,
                p90: row.get(15)?,
                p95: row.get(16)?,
                p99: row.get(17)?,
            },
            notes: row.get(18)?,
            tags: row.get(19)?,
            seed: row.get(20)?,
            created_at: row.get(21)?,
        })
    }

    fn into_stored(self) -> StoreResult<StoredSimulation> {
        let corrupt = |reason: String| StoreError::Corrupt { reason: format!("simulation {}: {reason}", self.id) };

        let iterations = u32::try_from(self.iterations)
            .map_err(|_| corrupt(format!("iteration count {} out of range", self.iterations)))?;
        let params = SimulationParameters::new(
            self.asset_value,
            self.tef,
            self.vulnerability,
            self.primary_loss,
            self.secondary_loss,
            iterations,
        )
        .map_err(|e| corrupt(e.to_string()))?
        .with_vulnerability_percent(self.vulnerability_percent);
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("bad created_at {:?}: {e}", self.created_at)))?
            .with_timezone(&Utc);

        Ok(StoredSimulation {
            id: SimulationId(self.id),
            created_at,
            params,
            summary: self.summary,
            notes: self.notes,
            tags: self.tags,
            seed: self.seed.map(|seed| seed as u64),
        })
    }
}
