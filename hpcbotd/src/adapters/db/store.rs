// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

use crate::app::types::{
    Calculation, CalculationStatus, NewCalculation, Quota, StatusUpdate, SubmitType, Timestamps,
    UserRecord, UserRef,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("unknown calculation status {0}")]
    UnknownStatus(i64),
    #[error("unknown submit type {0}")]
    UnknownSubmitType(i64),
    #[error("empty calculation name")]
    EmptyName,
    #[error("empty command")]
    EmptyCommand,
    #[error("empty cluster label")]
    EmptyLabel,
    #[error("calculation limit must not be negative, got {0}")]
    NegativeLimit(i64),
    #[error("user not found: {0}")]
    UserNotFound(i64),
    #[error("calculation not found: {0}")]
    CalculationNotFound(i64),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const CALCULATION_COLUMNS: &str = r#"
    SELECT c.id, c.name, c.command, c.start_at, c.end_at, c.job_id, c.status,
           c.submit_type, c.user_id, u.chat_id, cl.label
      FROM calculations c
      JOIN users u ON u.id = c.user_id
      JOIN clusters cl ON cl.id = c.cluster_id
"#;

/// Calculations, users and clusters in one SQLite database.
#[derive(Clone)]
pub struct CalculationStore {
    pool: SqlitePool,
}

impl CalculationStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let url = format!("sqlite://{}", path_ref.to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store. One connection, so every query sees the
    /// same database.
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        self.ensure_clusters_table().await?;
        self.ensure_users_table().await?;
        self.ensure_calculations_table().await?;
        Ok(())
    }

    async fn ensure_clusters_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT,
              label TEXT NOT NULL UNIQUE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_users_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
              id INTEGER PRIMARY KEY,
              calculation_limit INTEGER NOT NULL DEFAULT 0 CHECK (calculation_limit >= 0),
              blocked INTEGER NOT NULL DEFAULT 0,
              chat_id INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_calculations_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calculations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              command TEXT NOT NULL,
              start_at TEXT NOT NULL,
              end_at TEXT,
              job_id INTEGER,
              status INTEGER NOT NULL DEFAULT 0,
              submit_type INTEGER NOT NULL DEFAULT 0,
              user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
              cluster_id INTEGER NOT NULL REFERENCES clusters(id)
            );
            CREATE INDEX IF NOT EXISTS idx_calculations_status ON calculations(status);
            CREATE INDEX IF NOT EXISTS idx_calculations_user_start
              ON calculations(user_id, start_at);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get-or-create a cluster row by label.
    pub async fn ensure_cluster(&self, label: &str) -> Result<i64> {
        let label = label.trim();
        if label.is_empty() {
            return Err(StoreError::EmptyLabel);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO clusters (name, label) VALUES (?1, ?1)")
            .bind(label)
            .execute(&mut *tx)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT id FROM clusters WHERE label = ?1")
            .bind(label)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Insert or replace a user's quota, block flag and chat id.
    pub async fn upsert_user(
        &self,
        id: i64,
        calculation_limit: i64,
        blocked: bool,
        chat_id: Option<i64>,
    ) -> Result<UserRecord> {
        if calculation_limit < 0 {
            return Err(StoreError::NegativeLimit(calculation_limit));
        }
        sqlx::query(
            r#"
            INSERT INTO users (id, calculation_limit, blocked, chat_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
              calculation_limit = excluded.calculation_limit,
              blocked = excluded.blocked,
              chat_id = excluded.chat_id
            "#,
        )
        .bind(id)
        .bind(calculation_limit)
        .bind(blocked)
        .bind(chat_id)
        .execute(&self.pool)
        .await?;
        Ok(UserRecord {
            id,
            calculation_limit,
            blocked,
            chat_id,
        })
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, calculation_limit, blocked, chat_id FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_user))
    }

    /// Calculations of `user_id` started at or after `since`.
    pub async fn count_since(&self, user_id: i64, since: OffsetDateTime) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM calculations WHERE user_id = ?1 AND start_at >= ?2",
        )
        .bind(user_id)
        .bind(format_ts(since)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Inserts a not-started calculation, creating its cluster row on the
    /// way, and returns it as stored. With a quota, the row is only written
    /// while the user has fewer than `limit` calculations since `since`;
    /// otherwise nothing is inserted and `None` comes back.
    pub async fn create_calculation(
        &self,
        calc: &NewCalculation,
        quota: Option<Quota>,
    ) -> Result<Option<Calculation>> {
        if calc.name.trim().is_empty() {
            return Err(StoreError::EmptyName);
        }
        if calc.command.trim().is_empty() {
            return Err(StoreError::EmptyCommand);
        }
        let cluster_id = self.ensure_cluster(&calc.cluster_label).await?;

        let user_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?1")
            .bind(calc.user_id)
            .fetch_optional(&self.pool)
            .await?;
        if user_exists.is_none() {
            return Err(StoreError::UserNotFound(calc.user_id));
        }
        // Count and insert must stay one statement: SQLite holds the write
        // lock for all of it, so concurrent submissions see each other.
        let res = sqlx::query(
            r#"
            INSERT INTO calculations (name, command, start_at, status, submit_type, user_id, cluster_id)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
             WHERE ?8 IS NULL
                OR (SELECT COUNT(*) FROM calculations WHERE user_id = ?6 AND start_at >= ?8) < ?9
            "#,
        )
        .bind(&calc.name)
        .bind(&calc.command)
        .bind(format_ts(calc.started_at)?)
        .bind(CalculationStatus::NotStarted.value())
        .bind(calc.submit_type.value())
        .bind(calc.user_id)
        .bind(cluster_id)
        .bind(quota.map(|q| format_ts(q.since)).transpose()?)
        .bind(quota.map(|q| q.limit))
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Ok(None);
        }

        let id = res.last_insert_rowid();
        self.get_calculation(id)
            .await?
            .ok_or(StoreError::CalculationNotFound(id))
            .map(Some)
    }

    pub async fn get_calculation(&self, id: i64) -> Result<Option<Calculation>> {
        let row = sqlx::query(&format!("{CALCULATION_COLUMNS} WHERE c.id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_calculation).transpose()
    }

    pub async fn list_by_status(&self, status: CalculationStatus) -> Result<Vec<Calculation>> {
        let rows = sqlx::query(&format!(
            "{CALCULATION_COLUMNS} WHERE c.status = ?1 ORDER BY c.id"
        ))
        .bind(status.value())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_calculation).collect()
    }

    /// Calculations below finished, i.e. not yet released by the scheduler.
    pub async fn list_unfinished(&self) -> Result<Vec<Calculation>> {
        let rows = sqlx::query(&format!(
            "{CALCULATION_COLUMNS} WHERE c.status < ?1 ORDER BY c.id"
        ))
        .bind(CalculationStatus::FinishedOk.value())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_calculation).collect()
    }

    pub async fn list_for_notification(&self) -> Result<Vec<Calculation>> {
        let rows = sqlx::query(&format!(
            "{CALCULATION_COLUMNS} WHERE c.status IN (?1, ?2) AND c.submit_type = ?3 ORDER BY c.id"
        ))
        .bind(CalculationStatus::Clouded.value())
        .bind(CalculationStatus::FailedToUpload.value())
        .bind(SubmitType::Chat.value())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_calculation).collect()
    }

    /// Applies every update in a single transaction. Absent end time or job
    /// id keep the stored value.
    pub async fn apply_updates(&self, updates: &[StatusUpdate]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0usize;
        for update in updates {
            let finished_at = update.finished_at.map(format_ts).transpose()?;
            let res = sqlx::query(
                r#"
                UPDATE calculations
                   SET status = ?1,
                       end_at = COALESCE(?2, end_at),
                       job_id = COALESCE(?3, job_id)
                 WHERE id = ?4
                "#,
            )
            .bind(update.status.value())
            .bind(finished_at)
            .bind(update.job_id)
            .bind(update.id)
            .execute(&mut *tx)
            .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::CalculationNotFound(update.id));
            }
            changed += 1;
        }
        tx.commit().await?;
        Ok(changed)
    }
}

/// RFC 3339 in UTC at whole seconds, so stored values sort as text.
fn format_ts(ts: OffsetDateTime) -> Result<String> {
    let ts = ts.to_offset(UtcOffset::UTC);
    let ts = ts - time::Duration::nanoseconds(i64::from(ts.nanosecond()));
    ts.format(&Rfc3339)
        .map_err(|e| StoreError::Timestamp(e.to_string()))
}

fn parse_ts(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| StoreError::Timestamp(raw.to_string()))
}

fn row_to_user(row: SqliteRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        calculation_limit: row.get("calculation_limit"),
        blocked: row.get::<i64, _>("blocked") != 0,
        chat_id: row.get("chat_id"),
    }
}

fn row_to_calculation(row: SqliteRow) -> Result<Calculation> {
    let status: i64 = row.get("status");
    let submit_type: i64 = row.get("submit_type");
    let start_at: String = row.get("start_at");
    let end_at: Option<String> = row.get("end_at");
    Ok(Calculation {
        id: row.get("id"),
        name: row.get("name"),
        command: row.get("command"),
        timestamps: Timestamps {
            started_at: parse_ts(&start_at)?,
            finished_at: end_at.as_deref().map(parse_ts).transpose()?,
        },
        job_id: row.get("job_id"),
        status: CalculationStatus::from_value(status).ok_or(StoreError::UnknownStatus(status))?,
        submit_type: SubmitType::from_value(submit_type)
            .ok_or(StoreError::UnknownSubmitType(submit_type))?,
        user: UserRef {
            id: row.get("user_id"),
            chat_id: row.get("chat_id"),
        },
        cluster_label: row.get("label"),
    })
}
