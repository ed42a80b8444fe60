use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use sheetsync_domain::entities::{ColumnKey, ColumnTag, Mapping};
use sheetsync_domain::ports::sheets::SheetsApi;
use sheetsync_errors::{SyncError, SyncResult};

/// 一次回写的结果摘要；回写是尽力而为的，单格失败只计数不中止
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReversePushReport {
    pub cells_written: i64,
    pub cells_skipped: i64,
    pub errors: Vec<String>,
}

/// 反向同步服务 - 把CRM侧字段值回写到表格单元格
///
/// 只覆盖映射里白名单了的列标签，且该标签必须绑定在索引列上；
/// 按表头名绑定的列没有确定的字母坐标，跳过并计数。回写有损：
/// 不保证原子性，不更新水位线，不产生任务记录。
pub struct ReverseSyncService {
    api: Arc<dyn SheetsApi>,
}

impl ReverseSyncService {
    pub fn new(api: Arc<dyn SheetsApi>) -> Self {
        Self { api }
    }

    /// 把若干行的字段值写回表格
    ///
    /// `updates` 的键是表格行号（1起始），值是标签→新值。
    #[instrument(skip(self, mapping, updates), fields(mapping_id = %mapping.id))]
    pub async fn push(
        &self,
        mapping: &Mapping,
        updates: &[(i64, HashMap<ColumnTag, String>)],
    ) -> SyncResult<ReversePushReport> {
        if !mapping.reverse_sync_enabled {
            return Err(SyncError::ReverseSync(format!(
                "映射 {} 未启用反向同步",
                mapping.id
            )));
        }

        // 标签 → 0起始列索引；只认索引键
        let mut columns: HashMap<ColumnTag, usize> = HashMap::new();
        for cm in &mapping.column_mappings {
            if let ColumnKey::Index(idx) = cm.key {
                columns.insert(cm.tag, idx);
            }
        }

        let mut report = ReversePushReport::default();
        for (row_number, fields) in updates {
            for (tag, value) in fields {
                if !mapping.reverse_sync_fields.contains(tag) {
                    report.cells_skipped += 1;
                    continue;
                }
                let Some(&col) = columns.get(tag) else {
                    // 表头绑定的列无坐标可写
                    report.cells_skipped += 1;
                    continue;
                };
                let range = cell_range(&mapping.sheet_name, col, *row_number);
                match self
                    .api
                    .write_range(
                        &mapping.spreadsheet_id,
                        &range,
                        &[vec![value.clone()]],
                    )
                    .await
                {
                    Ok(()) => {
                        report.cells_written += 1;
                        debug!("Wrote {} to {}", tag.as_str(), range);
                    }
                    Err(e) => {
                        warn!("Reverse write to {} failed: {}", range, e);
                        report.errors.push(format!("{range}: {e}"));
                    }
                }
            }
        }
        Ok(report)
    }
}

/// 0起始列索引 → A1字母坐标 (0→A, 25→Z, 26→AA)
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

fn cell_range(sheet_name: &str, col: usize, row: i64) -> String {
    let quoted = format!("'{}'", sheet_name.replace('\'', "''"));
    format!("{}!{}{}", quoted, column_letter(col), row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_cell_range_quotes_sheet_name() {
        assert_eq!(cell_range("عملاء 2025", 2, 14), "'عملاء 2025'!C14");
        assert_eq!(cell_range("Ali's sheet", 0, 2), "'Ali''s sheet'!A2");
    }
}
