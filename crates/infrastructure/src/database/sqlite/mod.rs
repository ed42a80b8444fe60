mod sqlite_conflict_repository;
mod sqlite_crm_store;
mod sqlite_mapping_repository;
mod sqlite_schedule_repository;
mod sqlite_task_repository;

pub use sqlite_conflict_repository::SqliteConflictRepository;
pub use sqlite_crm_store::SqliteCrmStore;
pub use sqlite_mapping_repository::SqliteMappingRepository;
pub use sqlite_schedule_repository::SqliteScheduleRepository;
pub use sqlite_task_repository::SqliteSyncTaskRepository;

use sheetsync_errors::{SyncError, SyncResult};

/// SQLite将JSON列存为TEXT，统一在这里做解析
pub(crate) fn parse_json_column<T: serde::de::DeserializeOwned>(
    field_name: &str,
    raw: &str,
) -> SyncResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| SyncError::serialization_error(format!("解析{field_name}失败: {e}")))
}
