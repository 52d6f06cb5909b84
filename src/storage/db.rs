use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    error::{Result, SweepError},
    storage::models::{Configuration, DatabaseStats, SweepRun},
};

/// The part of the store the sweep worker depends on.
pub trait ConfigurationStore {
    fn enabled_configurations(&self) -> Result<Vec<Configuration>>;

    /// Persist resumption state after an account was swept successfully.
    fn update_refresh_token_and_cursor(&self, did: &str, cursor: &str, refresh_jwt: &str) -> Result<()>;
}

pub struct Database {
    conn: Connection,
}

const CONFIGURATION_COLUMNS: &str = "did, service, refresh_jwt, enabled, post_ttl, cursor, updated_at";

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn configuration_from_row(row: &Row<'_>) -> rusqlite::Result<Configuration> {
    Ok(Configuration {
        did: row.get(0)?,
        service: row.get(1)?,
        refresh_jwt: row.get(2)?,
        enabled: row.get(3)?,
        post_ttl: row.get(4)?,
        cursor: row.get(5)?,
        updated_at: parse_timestamp(6, row.get(6)?)?,
    })
}

fn sweep_run_from_row(row: &Row<'_>) -> rusqlite::Result<SweepRun> {
    Ok(SweepRun {
        id: row.get(0)?,
        started_at: parse_timestamp(1, row.get(1)?)?,
        spent_points: row.get(2)?,
        spent_time_ms: row.get(3)?,
        throttled: row.get(4)?,
        posts_deleted: row.get(5)?,
        accounts_processed: row.get(6)?,
        accounts_failed: row.get(7)?,
        dry_run: row.get(8)?,
    })
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS configurations (
                did TEXT PRIMARY KEY,
                service TEXT NOT NULL,
                refresh_jwt TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                post_ttl INTEGER NOT NULL,
                cursor TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sweep_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                spent_points INTEGER NOT NULL,
                spent_time_ms INTEGER NOT NULL,
                throttled INTEGER NOT NULL,
                posts_deleted INTEGER NOT NULL,
                accounts_processed INTEGER NOT NULL,
                accounts_failed INTEGER NOT NULL,
                dry_run INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_configurations_enabled ON configurations(enabled)",
            [],
        )?;

        Ok(())
    }

    /// Insert or replace an account's settings. The stored cursor survives updates.
    pub fn upsert_configuration(
        &self,
        did: &str,
        service: &str,
        refresh_jwt: &str,
        enabled: bool,
        post_ttl: u32,
    ) -> Result<Configuration> {
        self.conn.execute(
            "INSERT INTO configurations (did, service, refresh_jwt, enabled, post_ttl, cursor, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '', ?6)
             ON CONFLICT(did) DO UPDATE SET
                service = excluded.service,
                refresh_jwt = excluded.refresh_jwt,
                enabled = excluded.enabled,
                post_ttl = excluded.post_ttl,
                updated_at = excluded.updated_at",
            params![did, service, refresh_jwt, enabled, post_ttl, Utc::now().to_rfc3339()],
        )?;

        self.get_configuration(did)?
            .ok_or_else(|| SweepError::AccountNotFound(did.to_string()))
    }

    pub fn get_configuration(&self, did: &str) -> Result<Option<Configuration>> {
        let configuration = self
            .conn
            .query_row(
                &format!("SELECT {CONFIGURATION_COLUMNS} FROM configurations WHERE did = ?1"),
                [did],
                configuration_from_row,
            )
            .optional()?;

        Ok(configuration)
    }

    pub fn get_configurations(&self) -> Result<Vec<Configuration>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CONFIGURATION_COLUMNS} FROM configurations ORDER BY did"))?;

        let configurations = stmt
            .query_map([], configuration_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(configurations)
    }

    pub fn delete_configuration(&self, did: &str) -> Result<()> {
        let removed = self.conn.execute("DELETE FROM configurations WHERE did = ?1", [did])?;
        if removed == 0 {
            return Err(SweepError::AccountNotFound(did.to_string()));
        }
        Ok(())
    }

    /// Store a rotated refresh token without touching the cursor.
    pub fn update_refresh_token(&self, did: &str, refresh_jwt: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE configurations SET refresh_jwt = ?1, updated_at = ?2 WHERE did = ?3",
            params![refresh_jwt, Utc::now().to_rfc3339(), did],
        )?;
        Ok(())
    }

    /// Clear stored cursors so the next cycle starts from the oldest record.
    /// Returns the number of accounts reset.
    pub fn reset_cursor(&self, did: Option<&str>) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let reset = match did {
            Some(did) => self.conn.execute(
                "UPDATE configurations SET cursor = '', updated_at = ?1 WHERE did = ?2",
                params![now, did],
            )?,
            None => self
                .conn
                .execute("UPDATE configurations SET cursor = '', updated_at = ?1", params![now])?,
        };
        Ok(reset)
    }

    pub fn save_sweep_run(&self, run: &SweepRun) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sweep_runs
             (started_at, spent_points, spent_time_ms, throttled, posts_deleted,
              accounts_processed, accounts_failed, dry_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.started_at.to_rfc3339(),
                run.spent_points,
                run.spent_time_ms,
                run.throttled,
                run.posts_deleted,
                run.accounts_processed,
                run.accounts_failed,
                run.dry_run,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_sweep_history(&self, limit: Option<usize>) -> Result<Vec<SweepRun>> {
        let mut query = "SELECT id, started_at, spent_points, spent_time_ms, throttled, posts_deleted,
                    accounts_processed, accounts_failed, dry_run
             FROM sweep_runs
             ORDER BY id DESC"
            .to_string();
        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {lim}"));
        }

        let mut stmt = self.conn.prepare(&query)?;
        let runs = stmt
            .query_map([], sweep_run_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let total_accounts: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM configurations", [], |row| row.get(0))?;

        let enabled_accounts: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM configurations WHERE enabled = 1",
            [],
            |row| row.get(0),
        )?;

        let (total_runs, total_posts_deleted, total_points_spent): (i64, Option<i64>, Option<i64>) =
            self.conn.query_row(
                "SELECT COUNT(*), SUM(posts_deleted), SUM(spent_points) FROM sweep_runs WHERE dry_run = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let last_run_at = self
            .get_sweep_history(Some(1))?
            .into_iter()
            .next()
            .map(|run| run.started_at);

        Ok(DatabaseStats {
            total_accounts: total_accounts as usize,
            enabled_accounts: enabled_accounts as usize,
            total_runs: total_runs as usize,
            total_posts_deleted: total_posts_deleted.unwrap_or(0) as u64,
            total_points_spent: total_points_spent.unwrap_or(0) as u64,
            last_run_at,
        })
    }
}

impl ConfigurationStore for Database {
    fn enabled_configurations(&self) -> Result<Vec<Configuration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONFIGURATION_COLUMNS} FROM configurations WHERE enabled = 1 ORDER BY did"
        ))?;

        let configurations = stmt
            .query_map([], configuration_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(configurations)
    }

    fn update_refresh_token_and_cursor(&self, did: &str, cursor: &str, refresh_jwt: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE configurations SET cursor = ?1, refresh_jwt = ?2, updated_at = ?3 WHERE did = ?4",
            params![cursor, refresh_jwt, Utc::now().to_rfc3339(), did],
        )?;
        if updated == 0 {
            return Err(SweepError::AccountNotFound(did.to_string()));
        }
        Ok(())
    }
}
