use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use sheetsync_domain::entities::{SyncTask, TaskKind, TaskStatus};
use sheetsync_domain::repositories::SyncTaskRepository;
use sheetsync_errors::{SyncError, SyncResult};

pub struct SqliteSyncTaskRepository {
    pool: SqlitePool,
}

impl SqliteSyncTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> SyncResult<SyncTask> {
        let result = row
            .try_get::<Option<String>, _>("result")?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|e| {
                    SyncError::serialization_error(format!("解析任务result失败: {e}"))
                })
            })
            .transpose()?;

        Ok(SyncTask {
            id: row.try_get("id")?,
            mapping_id: row.try_get("mapping_id")?,
            kind: TaskKind::parse(row.try_get("kind")?)?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            total_rows: row.try_get("total_rows")?,
            processed_rows: row.try_get("processed_rows")?,
            successful_rows: row.try_get("successful_rows")?,
            failed_rows: row.try_get("failed_rows")?,
            result,
            error_message: row.try_get("error_message")?,
        })
    }

    fn result_to_json(task: &SyncTask) -> SyncResult<Option<String>> {
        task.result
            .as_ref()
            .map(|v| {
                serde_json::to_string(v).map_err(|e| {
                    SyncError::serialization_error(format!("序列化任务result失败: {e}"))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl SyncTaskRepository for SqliteSyncTaskRepository {
    #[instrument(skip(self, task), fields(mapping_id = %task.mapping_id, kind = %task.kind.as_str()))]
    async fn create(&self, task: &SyncTask) -> SyncResult<SyncTask> {
        let result = Self::result_to_json(task)?;

        let row = sqlx::query(
            r#"
            INSERT INTO sync_tasks (
                mapping_id, kind, status, created_at, started_at, completed_at,
                total_rows, processed_rows, successful_rows, failed_rows,
                result, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(task.mapping_id)
        .bind(task.kind.as_str())
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.total_rows)
        .bind(task.processed_rows)
        .bind(task.successful_rows)
        .bind(task.failed_rows)
        .bind(result)
        .bind(&task.error_message)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_task(&row)?;
        debug!("Created sync task {} for mapping {}", created.id, created.mapping_id);
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<SyncTask>> {
        let row = sqlx::query("SELECT * FROM sync_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_by_mapping(&self, mapping_id: i64) -> SyncResult<Vec<SyncTask>> {
        let rows = sqlx::query("SELECT * FROM sync_tasks WHERE mapping_id = ? ORDER BY id DESC")
            .bind(mapping_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_running(&self) -> SyncResult<Vec<SyncTask>> {
        let rows = sqlx::query("SELECT * FROM sync_tasks WHERE status = 'RUNNING' ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, status = %task.status.as_str()))]
    async fn update(&self, task: &SyncTask) -> SyncResult<SyncTask> {
        let result = Self::result_to_json(task)?;

        let row = sqlx::query(
            r#"
            UPDATE sync_tasks SET
                status = ?, started_at = ?, completed_at = ?,
                total_rows = ?, processed_rows = ?, successful_rows = ?, failed_rows = ?,
                result = ?, error_message = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.total_rows)
        .bind(task.processed_rows)
        .bind(task.successful_rows)
        .bind(task.failed_rows)
        .bind(result)
        .bind(&task.error_message)
        .bind(task.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SyncError::TaskNotFound { id: task.id })?;

        Self::row_to_task(&row)
    }
}
