//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{Conflict, Mapping, SyncSchedule, SyncTask};
use sheetsync_errors::SyncResult;

/// 映射配置仓储抽象
#[async_trait]
pub trait MappingRepository: Send + Sync {
    async fn create(&self, mapping: &Mapping) -> SyncResult<Mapping>;
    async fn find_by_id(&self, id: i64) -> SyncResult<Option<Mapping>>;
    async fn find_all(&self) -> SyncResult<Vec<Mapping>>;
    async fn find_active(&self) -> SyncResult<Vec<Mapping>>;
    async fn update(&self, mapping: &Mapping) -> SyncResult<Mapping>;
    /// 仅推进水位线；成功运行结束时在映射级锁下调用一次
    async fn advance_watermark(
        &self,
        id: i64,
        last_row_processed: i64,
        last_sync: DateTime<Utc>,
    ) -> SyncResult<()>;
    async fn delete(&self, id: i64) -> SyncResult<bool>;
}

/// 同步任务仓储抽象
#[async_trait]
pub trait SyncTaskRepository: Send + Sync {
    async fn create(&self, task: &SyncTask) -> SyncResult<SyncTask>;
    async fn find_by_id(&self, id: i64) -> SyncResult<Option<SyncTask>>;
    async fn find_by_mapping(&self, mapping_id: i64) -> SyncResult<Vec<SyncTask>>;
    async fn find_running(&self) -> SyncResult<Vec<SyncTask>>;
    async fn update(&self, task: &SyncTask) -> SyncResult<SyncTask>;
}

/// 冲突记录仓储抽象
#[async_trait]
pub trait ConflictRepository: Send + Sync {
    async fn create(&self, conflict: &Conflict) -> SyncResult<Conflict>;
    async fn find_by_id(&self, id: i64) -> SyncResult<Option<Conflict>>;
    async fn find_by_task(&self, task_id: i64) -> SyncResult<Vec<Conflict>>;
    async fn find_pending(&self) -> SyncResult<Vec<Conflict>>;
    async fn update(&self, conflict: &Conflict) -> SyncResult<Conflict>;
}

/// 调度仓储抽象
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &SyncSchedule) -> SyncResult<SyncSchedule>;
    async fn find_by_id(&self, id: i64) -> SyncResult<Option<SyncSchedule>>;
    async fn find_by_mapping(&self, mapping_id: i64) -> SyncResult<Option<SyncSchedule>>;
    async fn find_due(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncSchedule>>;
    async fn update(&self, schedule: &SyncSchedule) -> SyncResult<SyncSchedule>;
}
