use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("映射配置未找到: id={id}")]
    MappingNotFound { id: i64 },
    #[error("同步任务未找到: id={id}")]
    TaskNotFound { id: i64 },
    #[error("冲突记录未找到: id={id}")]
    ConflictNotFound { id: i64 },
    #[error("映射配置验证失败: {0}")]
    MappingValidation(String),
    #[error("无效的状态转换: {entity} 从 {from} 到 {to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },
    #[error("表格API错误: {0}")]
    SheetApi(String),
    #[error("表格寻址失败: 工作表 {sheet_name} 的所有寻址策略均失败:\n{attempts}")]
    SheetAddressing {
        sheet_name: String,
        attempts: String,
    },
    #[error("无效的列标签: {0}")]
    InvalidColumnTag(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("同步任务执行超时: 任务 {task_id} 超过 {timeout_seconds} 秒")]
    TaskTimeout { task_id: i64, timeout_seconds: u64 },
    #[error("映射 {mapping_id} 已有同步任务在运行")]
    MappingBusy { mapping_id: i64 },
    #[error("反向同步错误: {0}")]
    ReverseSync(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn mapping_not_found(id: i64) -> Self {
        Self::MappingNotFound { id }
    }
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::MappingValidation(msg.into())
    }
    pub fn sheet_api_error<S: Into<String>>(msg: S) -> Self {
        Self::SheetApi(msg.into())
    }
    pub fn serialization_error<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 致命错误会中止整个同步任务，非致命错误只记录为行级错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Database(_)
                | SyncError::DatabaseOperation(_)
                | SyncError::MappingNotFound { .. }
                | SyncError::TaskNotFound { .. }
                | SyncError::SheetApi(_)
                | SyncError::SheetAddressing { .. }
                | SyncError::Configuration(_)
                | SyncError::TaskTimeout { .. }
                | SyncError::InvalidStateTransition { .. }
                | SyncError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SyncError::mapping_not_found(1).is_fatal());
        assert!(SyncError::sheet_api_error("401").is_fatal());
        assert!(!SyncError::InvalidColumnTag("foo".to_string()).is_fatal());
        assert!(!SyncError::validation_error("no columns").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::MappingBusy { mapping_id: 7 };
        assert!(err.to_string().contains('7'));
        let err = SyncError::InvalidStateTransition {
            entity: "SyncTask".to_string(),
            from: "COMPLETED".to_string(),
            to: "RUNNING".to_string(),
        };
        assert!(err.to_string().contains("COMPLETED"));
    }
}
