use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sheetsync_errors::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConflictKind {
    #[serde(rename = "DUPLICATE_CUSTOMER")]
    DuplicateCustomer,
    #[serde(rename = "DUPLICATE_ORDER")]
    DuplicateOrder,
    #[serde(rename = "DATA_MISMATCH")]
    DataMismatch,
    #[serde(rename = "MISSING_REFERENCE")]
    MissingReference,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::DuplicateCustomer => "DUPLICATE_CUSTOMER",
            ConflictKind::DuplicateOrder => "DUPLICATE_ORDER",
            ConflictKind::DataMismatch => "DATA_MISMATCH",
            ConflictKind::MissingReference => "MISSING_REFERENCE",
            ConflictKind::ValidationError => "VALIDATION_ERROR",
        }
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        match s {
            "DUPLICATE_CUSTOMER" => Ok(ConflictKind::DuplicateCustomer),
            "DUPLICATE_ORDER" => Ok(ConflictKind::DuplicateOrder),
            "DATA_MISMATCH" => Ok(ConflictKind::DataMismatch),
            "MISSING_REFERENCE" => Ok(ConflictKind::MissingReference),
            "VALIDATION_ERROR" => Ok(ConflictKind::ValidationError),
            other => Err(SyncError::serialization_error(format!(
                "无效的冲突类型: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolutionStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RESOLVED")]
    Resolved,
    #[serde(rename = "IGNORED")]
    Ignored,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "PENDING",
            ResolutionStatus::Resolved => "RESOLVED",
            ResolutionStatus::Ignored => "IGNORED",
        }
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        match s {
            "PENDING" => Ok(ResolutionStatus::Pending),
            "RESOLVED" => Ok(ResolutionStatus::Resolved),
            "IGNORED" => Ok(ResolutionStatus::Ignored),
            other => Err(SyncError::serialization_error(format!(
                "无效的解决状态: {other}"
            ))),
        }
    }
}

/// 冲突记录 - 处理单行时发现的、需要人工裁决的歧义
///
/// 冲突的存在从不阻塞批次的其余行；解决是对已提交数据的下游人工流程。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conflict {
    pub id: i64,
    pub task_id: i64,
    pub kind: ConflictKind,
    /// 表格中的行号（1起始，与操作员看到的一致）
    pub row_number: i64,
    /// 该行的原始单元格值
    pub sheet_data: serde_json::Value,
    /// 匹配到的既有记录快照（如有）
    pub existing_data: Option<serde_json::Value>,
    pub description: String,
    pub resolution: ResolutionStatus,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conflict {
    pub fn new(
        task_id: i64,
        kind: ConflictKind,
        row_number: i64,
        sheet_data: serde_json::Value,
        existing_data: Option<serde_json::Value>,
        description: String,
    ) -> Self {
        Self {
            id: 0,
            task_id,
            kind,
            row_number,
            sheet_data,
            existing_data,
            description,
            resolution: ResolutionStatus::Pending,
            resolution_notes: None,
            resolved_by: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    fn invalid_transition(&self, to: ResolutionStatus) -> SyncError {
        SyncError::InvalidStateTransition {
            entity: "Conflict".to_string(),
            from: self.resolution.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    /// 人工解决，记录解决人和时间
    pub fn resolve(&mut self, actor: String, notes: Option<String>) -> SyncResult<()> {
        if self.resolution != ResolutionStatus::Pending {
            return Err(self.invalid_transition(ResolutionStatus::Resolved));
        }
        self.resolution = ResolutionStatus::Resolved;
        self.resolved_by = Some(actor);
        self.resolution_notes = notes;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// 人工忽略
    pub fn ignore(&mut self, notes: Option<String>) -> SyncResult<()> {
        if self.resolution != ResolutionStatus::Pending {
            return Err(self.invalid_transition(ResolutionStatus::Ignored));
        }
        self.resolution = ResolutionStatus::Ignored;
        self.resolution_notes = notes;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_from_pending() {
        let mut conflict = Conflict::new(
            1,
            ConflictKind::DuplicateCustomer,
            12,
            serde_json::json!({"name": "Ali", "phone": "0100"}),
            Some(serde_json::json!({"id": 3, "name": "Ali"})),
            "电话号码匹配到多个客户".to_string(),
        );
        conflict
            .resolve("admin".to_string(), Some("保留既有客户".to_string()))
            .unwrap();
        assert_eq!(conflict.resolution, ResolutionStatus::Resolved);
        assert_eq!(conflict.resolved_by.as_deref(), Some("admin"));
        assert!(conflict.resolved_at.is_some());
    }

    #[test]
    fn test_double_resolve_rejected() {
        let mut conflict = Conflict::new(
            1,
            ConflictKind::DataMismatch,
            3,
            serde_json::json!({}),
            None,
            "金额不一致".to_string(),
        );
        conflict.ignore(None).unwrap();
        assert!(conflict.resolve("admin".to_string(), None).is_err());
        assert!(conflict.ignore(None).is_err());
    }
}
