//! 表格访问端口
//!
//! `SheetsApi` 是对外部电子表格API的最小抽象；`SheetSource` 是引擎
//! 消费的更高层契约，由基础设施层的弹性读取器实现（寻址降级策略）。

use async_trait::async_trait;

use sheetsync_errors::SyncResult;

/// 原始表格API契约。必须接受任意Unicode工作表名；
/// 空工作表返回 `[]` 而不是错误。
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn list_sheets(&self, spreadsheet_id: &str) -> SyncResult<Vec<String>>;
    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> SyncResult<Vec<Vec<String>>>;
    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> SyncResult<()>;
}

/// 引擎侧的取数契约：工作表名 + 可选行范围 → 字符串网格
#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        start_row: Option<u32>,
        end_row: Option<u32>,
    ) -> SyncResult<Vec<Vec<String>>>;

    async fn list_sheets(&self, spreadsheet_id: &str) -> SyncResult<Vec<String>>;
}
