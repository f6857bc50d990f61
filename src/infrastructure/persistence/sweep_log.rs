//! Rolling log of scheduler sweep executions.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepStats {
    pub expired_released: u64,
    pub orphans_released: u64,
    pub orders_cancelled: u64,
    pub payments_reconciled: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SweepRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub stats: SweepStats,
}

pub struct SweepLog;

impl SweepLog {
    /// Append one run and prune the log to the newest `retain` rows.
    pub async fn record(
        conn: &mut SqliteConnection,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        stats: &SweepStats,
        retain: usize,
    ) -> EngineResult<()> {
        let duration_ms = (finished_at - started_at).num_milliseconds();
        sqlx::query(
            r#"
            INSERT INTO sweep_run
                (started_at, finished_at, duration_ms,
                 expired_released, orphans_released, orders_cancelled, payments_reconciled)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(started_at)
        .bind(finished_at)
        .bind(duration_ms)
        .bind(stats.expired_released as i64)
        .bind(stats.orphans_released as i64)
        .bind(stats.orders_cancelled as i64)
        .bind(stats.payments_reconciled as i64)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM sweep_run
            WHERE id NOT IN (SELECT id FROM sweep_run ORDER BY id DESC LIMIT ?)
            "#,
        )
        .bind(retain as i64)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn latest(conn: &mut SqliteConnection) -> EngineResult<Option<SweepRun>> {
        let row = sqlx::query("SELECT * FROM sweep_run ORDER BY id DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(map_run).transpose()
    }

    pub async fn recent(conn: &mut SqliteConnection, limit: usize) -> EngineResult<Vec<SweepRun>> {
        let rows = sqlx::query("SELECT * FROM sweep_run ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(map_run).collect()
    }
}

fn map_run(row: &SqliteRow) -> EngineResult<SweepRun> {
    Ok(SweepRun {
        id: row.try_get("id").map_err(EngineError::Database)?,
        started_at: row.try_get("started_at").map_err(EngineError::Database)?,
        finished_at: row.try_get("finished_at").map_err(EngineError::Database)?,
        duration_ms: row.try_get("duration_ms").map_err(EngineError::Database)?,
        stats: SweepStats {
            expired_released: row.try_get::<i64, _>("expired_released").map_err(EngineError::Database)?
                as u64,
            orphans_released: row.try_get::<i64, _>("orphans_released").map_err(EngineError::Database)?
                as u64,
            orders_cancelled: row.try_get::<i64, _>("orders_cancelled").map_err(EngineError::Database)?
                as u64,
            payments_reconciled: row
                .try_get::<i64, _>("payments_reconciled")
                .map_err(EngineError::Database)? as u64,
        },
    })
}
