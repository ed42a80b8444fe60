use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sheetsync_errors::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskKind {
    #[serde(rename = "IMPORT")]
    Import,
    #[serde(rename = "EXPORT")]
    Export,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Import => "IMPORT",
            TaskKind::Export => "EXPORT",
        }
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        match s {
            "IMPORT" => Ok(TaskKind::Import),
            "EXPORT" => Ok(TaskKind::Export),
            other => Err(SyncError::serialization_error(format!(
                "无效的任务类型: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(SyncError::serialization_error(format!(
                "无效的任务状态: {other}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        TaskStatus::parse(s).map_err(|e| e.to_string().into())
    }
}

/// 同步任务 - 一次同步执行的记录，也是可观测性和重试的最小单元
///
/// 状态机: PENDING →(start)→ RUNNING →(complete)→ COMPLETED
///                                   →(fail)→ FAILED
/// 终止状态不可变；从非法状态调用转换是编程错误，必须大声失败。
/// 任务由引擎终结，但从不由引擎删除（保留/清理是外部职责）。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncTask {
    pub id: i64,
    pub mapping_id: i64,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub successful_rows: i64,
    pub failed_rows: i64,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl SyncTask {
    pub fn new(mapping_id: i64, kind: TaskKind) -> Self {
        Self {
            id: 0,
            mapping_id,
            kind,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_rows: 0,
            processed_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            result: None,
            error_message: None,
        }
    }

    fn invalid_transition(&self, to: TaskStatus) -> SyncError {
        SyncError::InvalidStateTransition {
            entity: "SyncTask".to_string(),
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    /// PENDING → RUNNING，记录启动时间
    pub fn start(&mut self) -> SyncResult<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid_transition(TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING → COMPLETED，存储统计载荷
    pub fn complete(&mut self, result: serde_json::Value) -> SyncResult<()> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid_transition(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    /// PENDING/RUNNING → FAILED，存储错误文本
    pub fn fail(&mut self, error: String) -> SyncResult<()> {
        if self.status.is_terminal() {
            return Err(self.invalid_transition(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error);
        Ok(())
    }

    /// PENDING/RUNNING → CANCELLED
    pub fn cancel(&mut self) -> SyncResult<()> {
        if self.status.is_terminal() {
            return Err(self.invalid_transition(TaskStatus::Cancelled));
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// 运行期间可重复调用；计数器单调递增，回退视为编程错误
    pub fn update_progress(
        &mut self,
        processed: i64,
        successful: i64,
        failed: i64,
    ) -> SyncResult<()> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid_transition(self.status));
        }
        if processed < self.processed_rows
            || successful < self.successful_rows
            || failed < self.failed_rows
        {
            return Err(SyncError::Internal(format!(
                "任务 {} 的进度计数器不能回退: {} -> {}",
                self.id, self.processed_rows, processed
            )));
        }
        self.processed_rows = processed;
        self.successful_rows = successful;
        self.failed_rows = failed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_success_path() {
        let mut task = SyncTask::new(1, TaskKind::Import);
        assert_eq!(task.status, TaskStatus::Pending);

        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        task.update_progress(10, 8, 2).unwrap();
        task.complete(serde_json::json!({"orders_created": 3})).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut task = SyncTask::new(1, TaskKind::Import);
        task.start().unwrap();
        let err = task.start().unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_terminal_states_immutable() {
        let mut task = SyncTask::new(1, TaskKind::Import);
        task.start().unwrap();
        task.fail("boom".to_string()).unwrap();
        assert!(task.completed_at.is_some());

        assert!(task.complete(serde_json::json!({})).is_err());
        assert!(task.fail("again".to_string()).is_err());
        assert!(task.cancel().is_err());
        assert!(task.update_progress(1, 1, 0).is_err());
    }

    #[test]
    fn test_progress_must_be_monotonic() {
        let mut task = SyncTask::new(1, TaskKind::Import);
        task.start().unwrap();
        task.update_progress(5, 5, 0).unwrap();
        assert!(task.update_progress(3, 3, 0).is_err());
    }

    #[test]
    fn test_fail_always_sets_completed_at() {
        let mut task = SyncTask::new(1, TaskKind::Export);
        task.fail("没有可用凭证".to_string()).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.completed_at.is_some());
    }
}
