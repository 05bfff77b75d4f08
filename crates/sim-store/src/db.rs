use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_clock::{ClockMode, ClockState, ClockStore};
use market_core::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use synthetic_market::{ScenarioConfig, ScenarioStore, StoredScenario};
use tracing::debug;

/// Both tables hold a single row keyed by this id.
const SINGLETON_ID: i64 = 1;

/// Simulator state database
#[derive(Clone)]
pub struct SimDb {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{}: {} ({})", field, value, e)))
}

impl SimDb {
    /// Open (creating if needed) the database at `database_url` and ensure the schema exists.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // every in-memory connection is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sim_clock_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                mode TEXT NOT NULL,
                simulated_time TEXT NOT NULL,
                sim_start TEXT NOT NULL,
                speed REAL NOT NULL,
                running INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sim_scenario (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                preset_name TEXT,
                config_json TEXT,
                enabled INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ClockStore for SimDb {
    async fn load_clock(&self) -> Result<Option<ClockState>, StoreError> {
        let row: Option<(String, String, String, f64, bool)> = sqlx::query_as(
            "SELECT mode, simulated_time, sim_start, speed, running FROM sim_clock_state WHERE id = ?",
        )
        .bind(SINGLETON_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some((mode, simulated_time, sim_start, speed, running)) = row else {
            return Ok(None);
        };

        Ok(Some(ClockState {
            mode: ClockMode::from_str(&mode).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            simulated_time: parse_time("simulated_time", &simulated_time)?,
            sim_start: parse_time("sim_start", &sim_start)?,
            speed,
            running,
        }))
    }

    async fn save_clock(&self, state: &ClockState) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sim_clock_state (id, mode, simulated_time, sim_start, speed, running, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                mode = excluded.mode,
                simulated_time = excluded.simulated_time,
                sim_start = excluded.sim_start,
                speed = excluded.speed,
                running = excluded.running,
                updated_at = excluded.updated_at",
        )
        .bind(SINGLETON_ID)
        .bind(state.mode.to_string())
        .bind(state.simulated_time.to_rfc3339())
        .bind(state.sim_start.to_rfc3339())
        .bind(state.speed)
        .bind(state.running)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!("Saved clock state at {}", state.simulated_time.to_rfc3339());
        Ok(())
    }
}

#[async_trait]
impl ScenarioStore for SimDb {
    async fn load_scenario(&self) -> Result<Option<StoredScenario>, StoreError> {
        let row: Option<(Option<String>, Option<String>, bool)> = sqlx::query_as(
            "SELECT preset_name, config_json, enabled FROM sim_scenario WHERE id = ?",
        )
        .bind(SINGLETON_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some((preset_name, config_json, enabled)) = row else {
            return Ok(None);
        };

        let scenario = match config_json {
            Some(json) => Some(serde_json::from_str::<ScenarioConfig>(&json)?),
            None => None,
        };

        Ok(Some(StoredScenario {
            preset_name,
            scenario,
            enabled,
        }))
    }

    async fn save_scenario(&self, stored: &StoredScenario) -> Result<(), StoreError> {
        let config_json = stored.scenario.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO sim_scenario (id, preset_name, config_json, enabled, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                preset_name = excluded.preset_name,
                config_json = excluded.config_json,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
        )
        .bind(SINGLETON_ID)
        .bind(stored.preset_name.as_deref())
        .bind(config_json)
        .bind(stored.enabled)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}
