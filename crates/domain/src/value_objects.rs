use serde::{Deserialize, Serialize};

/// 单行处理错误，行号与操作员在表格中看到的一致（1起始）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowError {
    pub row_number: i64,
    pub message: String,
}

impl RowError {
    pub fn new(row_number: i64, message: impl Into<String>) -> Self {
        Self {
            row_number,
            message: message.into(),
        }
    }
}

/// 一次同步运行的完整统计，最终序列化进任务的result载荷
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncStats {
    pub total_rows: i64,
    pub processed_rows: i64,
    pub successful_rows: i64,
    pub failed_rows: i64,
    pub skipped_rows: i64,
    pub customers_created: i64,
    pub customers_updated: i64,
    pub orders_created: i64,
    pub orders_updated: i64,
    pub inspections_created: i64,
    pub inspections_updated: i64,
    pub conflicts_recorded: i64,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowError>,
}

impl SyncStats {
    pub fn record_error(&mut self, row_number: i64, message: impl Into<String>) {
        self.failed_rows += 1;
        self.errors.push(RowError::new(row_number, message));
    }

    pub fn record_warning(&mut self, row_number: i64, message: impl Into<String>) {
        self.warnings.push(RowError::new(row_number, message));
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_round_trip() {
        let mut stats = SyncStats::default();
        stats.total_rows = 5;
        stats.record_error(3, "金额无法解析: abc");
        stats.record_warning(4, "客户未找到且禁止创建");

        let json = stats.to_json();
        let back: SyncStats = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
        assert_eq!(back.failed_rows, 1);
        assert_eq!(back.errors[0].row_number, 3);
    }
}
