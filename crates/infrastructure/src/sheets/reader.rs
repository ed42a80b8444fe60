use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use sheetsync_domain::ports::sheets::{SheetSource, SheetsApi};
use sheetsync_errors::{SyncError, SyncResult};

/// A1范围语法的引号形式：内嵌单引号加倍转义
pub fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// 弹性表格读取器
///
/// 外部API对工作表名的解析并不稳定：含空格、引号、方括号、连字符
/// 或RTL文字的名字会让朴素的范围寻址失败。按固定顺序独立尝试
/// 四种寻址策略，全部失败时抛出聚合错误，列出每次尝试及其原因，
/// 调用方不必猜测哪种策略"本应"生效。
///
/// 读取器从不修改表格内容，每次尝试都是无状态的。
pub struct ResilientSheetReader {
    api: Arc<dyn SheetsApi>,
}

impl ResilientSheetReader {
    pub fn new(api: Arc<dyn SheetsApi>) -> Self {
        Self { api }
    }

    /// 按行号（1起始，含端点）裁剪网格；整表取回后在本地裁剪，
    /// 避免行范围语法成为第五种可能失败的寻址变体
    fn slice_rows(
        grid: Vec<Vec<String>>,
        start_row: Option<u32>,
        end_row: Option<u32>,
    ) -> Vec<Vec<String>> {
        let start = start_row.map_or(0, |s| s.saturating_sub(1) as usize);
        let end = end_row.map_or(usize::MAX, |e| e as usize);
        grid.into_iter()
            .enumerate()
            .filter(|(i, _)| *i >= start && *i < end)
            .map(|(_, row)| row)
            .collect()
    }

    async fn try_strategies(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> SyncResult<Vec<Vec<String>>> {
        let mut attempts: Vec<String> = Vec::new();

        // 策略1: 原始名字直接作为范围
        match self.api.read_range(spreadsheet_id, sheet_name).await {
            Ok(grid) => return Ok(grid),
            Err(e) => attempts.push(format!("原始名字 {sheet_name:?}: {e}")),
        }

        // 策略2: 引号形式
        let quoted = quote_sheet_name(sheet_name);
        match self.api.read_range(spreadsheet_id, &quoted).await {
            Ok(grid) => {
                debug!("Sheet {:?} resolved via quoted range", sheet_name);
                return Ok(grid);
            }
            Err(e) => attempts.push(format!("引号形式 {quoted}: {e}")),
        }

        // 策略3/4: 枚举工作表列表按标题解析，再退化为位置寻址
        match self.api.list_sheets(spreadsheet_id).await {
            Ok(titles) => {
                let matched = titles
                    .iter()
                    .enumerate()
                    .find(|(_, title)| title.as_str() == sheet_name || title.trim() == sheet_name.trim());

                match matched {
                    Some((index, title)) => {
                        let resolved = quote_sheet_name(title);
                        match self.api.read_range(spreadsheet_id, &resolved).await {
                            Ok(grid) => {
                                debug!("Sheet {:?} resolved via title lookup", sheet_name);
                                return Ok(grid);
                            }
                            Err(e) => attempts.push(format!("标题解析 {resolved}: {e}")),
                        }

                        let positional = format!("Sheet{}", index + 1);
                        match self.api.read_range(spreadsheet_id, &positional).await {
                            Ok(grid) => {
                                warn!(
                                    "Sheet {:?} resolved via positional fallback {}",
                                    sheet_name, positional
                                );
                                return Ok(grid);
                            }
                            Err(e) => attempts.push(format!("位置寻址 {positional}: {e}")),
                        }
                    }
                    None => {
                        attempts.push(format!(
                            "标题解析: 工作表 {sheet_name:?} 不在表格中 (可用: {titles:?})"
                        ));
                    }
                }
            }
            Err(e) => attempts.push(format!("枚举工作表列表: {e}")),
        }

        Err(SyncError::SheetAddressing {
            sheet_name: sheet_name.to_string(),
            attempts: attempts
                .iter()
                .enumerate()
                .map(|(i, a)| format!("  {}. {}", i + 1, a))
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }
}

#[async_trait]
impl SheetSource for ResilientSheetReader {
    async fn fetch(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        start_row: Option<u32>,
        end_row: Option<u32>,
    ) -> SyncResult<Vec<Vec<String>>> {
        let grid = self.try_strategies(spreadsheet_id, sheet_name).await?;
        Ok(Self::slice_rows(grid, start_row, end_row))
    }

    async fn list_sheets(&self, spreadsheet_id: &str) -> SyncResult<Vec<String>> {
        self.api.list_sheets(spreadsheet_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// 桩API：只认特定范围写法，模拟外部API的挑剔寻址
    struct PickySheetsApi {
        /// 接受的范围 → 网格
        ranges: HashMap<String, Vec<Vec<String>>>,
        titles: Vec<String>,
        list_fails: bool,
    }

    impl PickySheetsApi {
        fn new(titles: Vec<&str>) -> Self {
            Self {
                ranges: HashMap::new(),
                titles: titles.into_iter().map(str::to_string).collect(),
                list_fails: false,
            }
        }

        fn accept(mut self, range: &str, grid: Vec<Vec<&str>>) -> Self {
            self.ranges.insert(
                range.to_string(),
                grid.into_iter()
                    .map(|row| row.into_iter().map(str::to_string).collect())
                    .collect(),
            );
            self
        }
    }

    #[async_trait]
    impl SheetsApi for PickySheetsApi {
        async fn list_sheets(&self, _spreadsheet_id: &str) -> SyncResult<Vec<String>> {
            if self.list_fails {
                return Err(SyncError::sheet_api_error("HTTP 500"));
            }
            Ok(self.titles.clone())
        }

        async fn read_range(
            &self,
            _spreadsheet_id: &str,
            range: &str,
        ) -> SyncResult<Vec<Vec<String>>> {
            self.ranges
                .get(range)
                .cloned()
                .ok_or_else(|| SyncError::sheet_api_error(format!("Unable to parse range: {range}")))
        }

        async fn write_range(
            &self,
            _spreadsheet_id: &str,
            _range: &str,
            _values: &[Vec<String>],
        ) -> SyncResult<()> {
            Ok(())
        }
    }

    fn reader(api: PickySheetsApi) -> ResilientSheetReader {
        ResilientSheetReader::new(Arc::new(api))
    }

    #[tokio::test]
    async fn test_raw_name_works_first() {
        let api = PickySheetsApi::new(vec!["Sheet1"]).accept("Sheet1", vec![vec!["a", "b"]]);
        let grid = reader(api).fetch("sp", "Sheet1", None, None).await.unwrap();
        assert_eq!(grid, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[tokio::test]
    async fn test_arabic_name_with_space_via_quoting() {
        // "عملاء 2025"（阿拉伯语+空格）只有引号形式可解析
        let api = PickySheetsApi::new(vec!["عملاء 2025"])
            .accept("'عملاء 2025'", vec![vec!["الاسم", "الهاتف"]]);
        let grid = reader(api).fetch("sp", "عملاء 2025", None, None).await.unwrap();
        assert_eq!(grid[0][0], "الاسم");
    }

    #[tokio::test]
    async fn test_embedded_quote_doubled() {
        assert_eq!(quote_sheet_name("Ali's data"), "'Ali''s data'");
        let api = PickySheetsApi::new(vec![]).accept("'Ali''s data'", vec![vec!["x"]]);
        let grid = reader(api).fetch("sp", "Ali's data", None, None).await.unwrap();
        assert_eq!(grid[0][0], "x");
    }

    #[tokio::test]
    async fn test_positional_fallback() {
        // 原始、引号、标题解析都失败，位置寻址命中
        let api = PickySheetsApi::new(vec!["first", "تقارير [2024]"])
            .accept("Sheet2", vec![vec!["data"]]);
        let grid = reader(api)
            .fetch("sp", "تقارير [2024]", None, None)
            .await
            .unwrap();
        assert_eq!(grid[0][0], "data");
    }

    #[tokio::test]
    async fn test_aggregated_error_names_every_attempt() {
        let api = PickySheetsApi::new(vec!["other"]);
        let err = reader(api)
            .fetch("sp", "missing-sheet", None, None)
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("原始名字"));
        assert!(text.contains("引号形式"));
        assert!(text.contains("标题解析"));
        assert!(text.contains("missing-sheet"));
    }

    #[tokio::test]
    async fn test_list_failure_reported_in_aggregate() {
        let mut api = PickySheetsApi::new(vec![]);
        api.list_fails = true;
        let err = reader(api).fetch("sp", "x y", None, None).await.unwrap_err();
        assert!(err.to_string().contains("枚举工作表列表"));
    }

    #[tokio::test]
    async fn test_row_slicing() {
        let api = PickySheetsApi::new(vec![])
            .accept("data", vec![vec!["h"], vec!["r1"], vec!["r2"], vec!["r3"]]);
        let grid = reader(api).fetch("sp", "data", Some(2), Some(3)).await.unwrap();
        assert_eq!(grid, vec![vec!["r1".to_string()], vec!["r2".to_string()]]);
    }

    #[tokio::test]
    async fn test_empty_sheet_is_empty_grid_not_error() {
        let api = PickySheetsApi::new(vec!["empty"]).accept("empty", vec![]);
        let grid = reader(api).fetch("sp", "empty", None, None).await.unwrap();
        assert!(grid.is_empty());
    }
}
