use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use sheetsync_domain::entities::{Conflict, ConflictKind, ResolutionStatus};
use sheetsync_domain::repositories::ConflictRepository;
use sheetsync_errors::{SyncError, SyncResult};

use super::parse_json_column;

pub struct SqliteConflictRepository {
    pool: SqlitePool,
}

impl SqliteConflictRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_conflict(row: &sqlx::sqlite::SqliteRow) -> SyncResult<Conflict> {
        let sheet_data = parse_json_column("sheet_data", row.try_get("sheet_data")?)?;
        let existing_data = row
            .try_get::<Option<String>, _>("existing_data")?
            .map(|raw| parse_json_column("existing_data", raw.as_str()))
            .transpose()?;

        Ok(Conflict {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            kind: ConflictKind::parse(row.try_get("kind")?)?,
            row_number: row.try_get("row_number")?,
            sheet_data,
            existing_data,
            description: row.try_get("description")?,
            resolution: ResolutionStatus::parse(row.try_get("resolution")?)?,
            resolution_notes: row.try_get("resolution_notes")?,
            resolved_by: row.try_get("resolved_by")?,
            resolved_at: row.try_get("resolved_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ConflictRepository for SqliteConflictRepository {
    #[instrument(skip(self, conflict), fields(task_id = %conflict.task_id, kind = %conflict.kind.as_str(), row = %conflict.row_number))]
    async fn create(&self, conflict: &Conflict) -> SyncResult<Conflict> {
        let sheet_data = serde_json::to_string(&conflict.sheet_data)
            .map_err(|e| SyncError::serialization_error(format!("序列化sheet_data失败: {e}")))?;
        let existing_data = conflict
            .existing_data
            .as_ref()
            .map(|v| {
                serde_json::to_string(v).map_err(|e| {
                    SyncError::serialization_error(format!("序列化existing_data失败: {e}"))
                })
            })
            .transpose()?;

        let row = sqlx::query(
            r#"
            INSERT INTO sync_conflicts (
                task_id, kind, row_number, sheet_data, existing_data, description,
                resolution, resolution_notes, resolved_by, resolved_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(conflict.task_id)
        .bind(conflict.kind.as_str())
        .bind(conflict.row_number)
        .bind(&sheet_data)
        .bind(existing_data)
        .bind(&conflict.description)
        .bind(conflict.resolution.as_str())
        .bind(&conflict.resolution_notes)
        .bind(&conflict.resolved_by)
        .bind(conflict.resolved_at)
        .bind(conflict.created_at)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            "Recorded conflict for task {} at row {}",
            conflict.task_id, conflict.row_number
        );
        Self::row_to_conflict(&row)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<Conflict>> {
        let row = sqlx::query("SELECT * FROM sync_conflicts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_conflict).transpose()
    }

    async fn find_by_task(&self, task_id: i64) -> SyncResult<Vec<Conflict>> {
        let rows = sqlx::query("SELECT * FROM sync_conflicts WHERE task_id = ? ORDER BY row_number")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_conflict).collect()
    }

    async fn find_pending(&self) -> SyncResult<Vec<Conflict>> {
        let rows =
            sqlx::query("SELECT * FROM sync_conflicts WHERE resolution = 'PENDING' ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_conflict).collect()
    }

    #[instrument(skip(self, conflict), fields(conflict_id = %conflict.id))]
    async fn update(&self, conflict: &Conflict) -> SyncResult<Conflict> {
        let row = sqlx::query(
            r#"
            UPDATE sync_conflicts SET
                resolution = ?, resolution_notes = ?, resolved_by = ?, resolved_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(conflict.resolution.as_str())
        .bind(&conflict.resolution_notes)
        .bind(&conflict.resolved_by)
        .bind(conflict.resolved_at)
        .bind(conflict.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SyncError::ConflictNotFound { id: conflict.id })?;

        Self::row_to_conflict(&row)
    }
}
