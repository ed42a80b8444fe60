use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use sheetsync_domain::entities::{ColumnMapping, ColumnTag, ConflictPolicy, Mapping, MappingDefaults};
use sheetsync_domain::repositories::MappingRepository;
use sheetsync_errors::{SyncError, SyncResult};

use super::parse_json_column;

pub struct SqliteMappingRepository {
    pool: SqlitePool,
}

impl SqliteMappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_mapping(row: &sqlx::sqlite::SqliteRow) -> SyncResult<Mapping> {
        let column_mappings: Vec<ColumnMapping> =
            parse_json_column("column_mappings", row.try_get("column_mappings")?)?;
        let reverse_sync_fields: Vec<ColumnTag> =
            parse_json_column("reverse_sync_fields", row.try_get("reverse_sync_fields")?)?;
        let defaults: MappingDefaults = parse_json_column("defaults", row.try_get("defaults")?)?;
        let conflict_policy = ConflictPolicy::parse(row.try_get("conflict_policy")?)?;

        Ok(Mapping {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            spreadsheet_id: row.try_get("spreadsheet_id")?,
            sheet_name: row.try_get("sheet_name")?,
            header_row: row.try_get("header_row")?,
            start_row: row.try_get("start_row")?,
            last_row_processed: row.try_get("last_row_processed")?,
            last_sync: row.try_get("last_sync")?,
            active: row.try_get("active")?,
            column_mappings,
            auto_create_customers: row.try_get("auto_create_customers")?,
            auto_create_orders: row.try_get("auto_create_orders")?,
            auto_create_inspections: row.try_get("auto_create_inspections")?,
            auto_create_installations: row.try_get("auto_create_installations")?,
            update_existing: row.try_get("update_existing")?,
            conflict_policy,
            reverse_sync_enabled: row.try_get("reverse_sync_enabled")?,
            reverse_sync_fields,
            defaults,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn to_json<T: serde::Serialize>(field_name: &str, value: &T) -> SyncResult<String> {
        serde_json::to_string(value)
            .map_err(|e| SyncError::serialization_error(format!("序列化{field_name}失败: {e}")))
    }
}

#[async_trait]
impl MappingRepository for SqliteMappingRepository {
    #[instrument(skip(self, mapping), fields(mapping_name = %mapping.name))]
    async fn create(&self, mapping: &Mapping) -> SyncResult<Mapping> {
        let column_mappings = Self::to_json("column_mappings", &mapping.column_mappings)?;
        let reverse_sync_fields = Self::to_json("reverse_sync_fields", &mapping.reverse_sync_fields)?;
        let defaults = Self::to_json("defaults", &mapping.defaults)?;

        let row = sqlx::query(
            r#"
            INSERT INTO sheet_mappings (
                name, spreadsheet_id, sheet_name, header_row, start_row,
                last_row_processed, last_sync, active, column_mappings,
                auto_create_customers, auto_create_orders, auto_create_inspections,
                auto_create_installations, update_existing, conflict_policy,
                reverse_sync_enabled, reverse_sync_fields, defaults, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&mapping.name)
        .bind(&mapping.spreadsheet_id)
        .bind(&mapping.sheet_name)
        .bind(mapping.header_row)
        .bind(mapping.start_row)
        .bind(mapping.last_row_processed)
        .bind(mapping.last_sync)
        .bind(mapping.active)
        .bind(&column_mappings)
        .bind(mapping.auto_create_customers)
        .bind(mapping.auto_create_orders)
        .bind(mapping.auto_create_inspections)
        .bind(mapping.auto_create_installations)
        .bind(mapping.update_existing)
        .bind(mapping.conflict_policy.as_str())
        .bind(mapping.reverse_sync_enabled)
        .bind(&reverse_sync_fields)
        .bind(&defaults)
        .bind(mapping.created_at)
        .bind(mapping.updated_at)
        .fetch_one(&self.pool)
        .await?;

        debug!("Created sheet mapping: {}", mapping.name);
        Self::row_to_mapping(&row)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<Mapping>> {
        let row = sqlx::query("SELECT * FROM sheet_mappings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_mapping).transpose()
    }

    async fn find_all(&self) -> SyncResult<Vec<Mapping>> {
        let rows = sqlx::query("SELECT * FROM sheet_mappings ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_mapping).collect()
    }

    async fn find_active(&self) -> SyncResult<Vec<Mapping>> {
        let rows = sqlx::query("SELECT * FROM sheet_mappings WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_mapping).collect()
    }

    #[instrument(skip(self, mapping), fields(mapping_id = %mapping.id))]
    async fn update(&self, mapping: &Mapping) -> SyncResult<Mapping> {
        let column_mappings = Self::to_json("column_mappings", &mapping.column_mappings)?;
        let reverse_sync_fields = Self::to_json("reverse_sync_fields", &mapping.reverse_sync_fields)?;
        let defaults = Self::to_json("defaults", &mapping.defaults)?;

        let row = sqlx::query(
            r#"
            UPDATE sheet_mappings SET
                name = ?, spreadsheet_id = ?, sheet_name = ?, header_row = ?,
                start_row = ?, active = ?, column_mappings = ?,
                auto_create_customers = ?, auto_create_orders = ?,
                auto_create_inspections = ?, auto_create_installations = ?,
                update_existing = ?, conflict_policy = ?, reverse_sync_enabled = ?,
                reverse_sync_fields = ?, defaults = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&mapping.name)
        .bind(&mapping.spreadsheet_id)
        .bind(&mapping.sheet_name)
        .bind(mapping.header_row)
        .bind(mapping.start_row)
        .bind(mapping.active)
        .bind(&column_mappings)
        .bind(mapping.auto_create_customers)
        .bind(mapping.auto_create_orders)
        .bind(mapping.auto_create_inspections)
        .bind(mapping.auto_create_installations)
        .bind(mapping.update_existing)
        .bind(mapping.conflict_policy.as_str())
        .bind(mapping.reverse_sync_enabled)
        .bind(&reverse_sync_fields)
        .bind(&defaults)
        .bind(Utc::now())
        .bind(mapping.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SyncError::MappingNotFound { id: mapping.id })?;

        Self::row_to_mapping(&row)
    }

    #[instrument(skip(self))]
    async fn advance_watermark(
        &self,
        id: i64,
        last_row_processed: i64,
        last_sync: DateTime<Utc>,
    ) -> SyncResult<()> {
        let result = sqlx::query(
            "UPDATE sheet_mappings SET last_row_processed = ?, last_sync = ?, updated_at = ? WHERE id = ?",
        )
        .bind(last_row_processed)
        .bind(last_sync)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::MappingNotFound { id });
        }
        debug!(
            "Advanced watermark for mapping {}: last_row={}",
            id, last_row_processed
        );
        Ok(())
    }

    async fn delete(&self, id: i64) -> SyncResult<bool> {
        let result = sqlx::query("DELETE FROM sheet_mappings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
