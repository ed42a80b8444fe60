use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use sheetsync_domain::entities::{Frequency, SyncSchedule};
use sheetsync_domain::repositories::ScheduleRepository;
use sheetsync_errors::{SyncError, SyncResult};

pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> SyncResult<SyncSchedule> {
        Ok(SyncSchedule {
            id: row.try_get("id")?,
            mapping_id: row.try_get("mapping_id")?,
            frequency: Frequency::parse(row.try_get("frequency")?)?,
            next_run: row.try_get("next_run")?,
            last_run: row.try_get("last_run")?,
            total_runs: row.try_get("total_runs")?,
            successful_runs: row.try_get("successful_runs")?,
            failed_runs: row.try_get("failed_runs")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    #[instrument(skip(self, schedule), fields(mapping_id = %schedule.mapping_id))]
    async fn create(&self, schedule: &SyncSchedule) -> SyncResult<SyncSchedule> {
        let row = sqlx::query(
            r#"
            INSERT INTO sync_schedules (
                mapping_id, frequency, next_run, last_run, total_runs,
                successful_runs, failed_runs, active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(schedule.mapping_id)
        .bind(schedule.frequency.as_str())
        .bind(schedule.next_run)
        .bind(schedule.last_run)
        .bind(schedule.total_runs)
        .bind(schedule.successful_runs)
        .bind(schedule.failed_runs)
        .bind(schedule.active)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_schedule(&row)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<SyncSchedule>> {
        let row = sqlx::query("SELECT * FROM sync_schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    async fn find_by_mapping(&self, mapping_id: i64) -> SyncResult<Option<SyncSchedule>> {
        let row = sqlx::query("SELECT * FROM sync_schedules WHERE mapping_id = ?")
            .bind(mapping_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    async fn find_due(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncSchedule>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_schedules WHERE active = 1 AND next_run IS NOT NULL AND next_run <= ? ORDER BY next_run",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_schedule).collect()
    }

    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
    async fn update(&self, schedule: &SyncSchedule) -> SyncResult<SyncSchedule> {
        let row = sqlx::query(
            r#"
            UPDATE sync_schedules SET
                frequency = ?, next_run = ?, last_run = ?, total_runs = ?,
                successful_runs = ?, failed_runs = ?, active = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(schedule.frequency.as_str())
        .bind(schedule.next_run)
        .bind(schedule.last_run)
        .bind(schedule.total_runs)
        .bind(schedule.successful_runs)
        .bind(schedule.failed_runs)
        .bind(schedule.active)
        .bind(schedule.updated_at)
        .bind(schedule.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SyncError::Internal(format!("调度记录不存在: id={}", schedule.id)))?;

        Self::row_to_schedule(&row)
    }
}
