use std::collections::HashMap;

use chrono::NaiveDate;

use sheetsync_domain::entities::{ColumnKey, ColumnTag, Mapping};
use sheetsync_errors::{SyncError, SyncResult};

/// 行→字段映射器
///
/// 把映射配置中的列定义（表头文本或列索引）解析为具体列号，
/// 之后每行通过封闭标签词汇表的穷尽匹配转成 字段→值 字典。
pub struct RowMapper {
    /// 已解析的 (列索引, 标签)，保持配置顺序
    columns: Vec<(usize, ColumnTag)>,
}

impl RowMapper {
    /// 用表头行解析按文本定位的列；找不到的表头是配置错误
    pub fn from_mapping(mapping: &Mapping, header: Option<&[String]>) -> SyncResult<Self> {
        let mut columns = Vec::new();

        for cm in &mapping.column_mappings {
            if cm.tag == ColumnTag::Ignore {
                continue;
            }
            let index = match &cm.key {
                ColumnKey::Index(i) => *i,
                ColumnKey::Header(text) => {
                    let header = header.ok_or_else(|| {
                        SyncError::validation_error(format!(
                            "列 {text:?} 按表头文本定位，但表格缺少表头行"
                        ))
                    })?;
                    header
                        .iter()
                        .position(|h| h.trim() == text.trim())
                        .ok_or_else(|| {
                            SyncError::validation_error(format!(
                                "表头行中找不到列 {text:?}"
                            ))
                        })?
                }
            };
            columns.push((index, cm.tag));
        }

        Ok(Self { columns })
    }

    /// 一行单元格 → 字段字典；空白单元格映射为空字符串而不是缺失，
    /// 未映射的列被丢弃
    pub fn map_row(&self, row: &[String]) -> HashMap<ColumnTag, String> {
        let mut fields = HashMap::new();
        for (index, tag) in &self.columns {
            let value = row.get(*index).map(|c| c.trim().to_string()).unwrap_or_default();
            fields.insert(*tag, value);
        }
        fields
    }
}

/// 严格的表格日期解析：只接受 YYYY-MM-DD 和 DD/MM/YYYY 两种格式。
/// 勘测日期门控依赖这里的严格性：解析失败绝不退化为"尽力猜测"。
pub fn parse_sheet_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

/// 金额解析：容忍千位分隔符，无法解析是行级数据错误
pub fn parse_amount(value: &str) -> SyncResult<Option<f64>> {
    let cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        return Ok(None);
    }
    cleaned
        .parse::<f64>()
        .map(Some)
        .map_err(|_| SyncError::validation_error(format!("金额无法解析: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sheetsync_domain::entities::{ColumnMapping, ConflictPolicy, MappingDefaults};

    fn mapping_with(columns: Vec<(ColumnKey, ColumnTag)>) -> Mapping {
        Mapping {
            id: 1,
            name: "m".to_string(),
            spreadsheet_id: "sp".to_string(),
            sheet_name: "s".to_string(),
            header_row: 0,
            start_row: 1,
            last_row_processed: None,
            last_sync: None,
            active: true,
            column_mappings: columns
                .into_iter()
                .map(|(key, tag)| ColumnMapping { key, tag })
                .collect(),
            auto_create_customers: true,
            auto_create_orders: true,
            auto_create_inspections: false,
            auto_create_installations: false,
            update_existing: false,
            conflict_policy: ConflictPolicy::Skip,
            reverse_sync_enabled: false,
            reverse_sync_fields: vec![],
            defaults: MappingDefaults::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_header_resolution() {
        let mapping = mapping_with(vec![
            (ColumnKey::Header("الاسم".to_string()), ColumnTag::CustomerName),
            (ColumnKey::Index(2), ColumnTag::InvoiceNumber),
        ]);
        let header = strings(&["الاسم", "الهاتف", "الفاتورة"]);
        let mapper = RowMapper::from_mapping(&mapping, Some(&header)).unwrap();

        let fields = mapper.map_row(&strings(&["Ali", "0100", "INV-1"]));
        assert_eq!(fields[&ColumnTag::CustomerName], "Ali");
        assert_eq!(fields[&ColumnTag::InvoiceNumber], "INV-1");
    }

    #[test]
    fn test_unknown_header_is_error() {
        let mapping = mapping_with(vec![(
            ColumnKey::Header("nonexistent".to_string()),
            ColumnTag::CustomerName,
        )]);
        let header = strings(&["a", "b"]);
        assert!(RowMapper::from_mapping(&mapping, Some(&header)).is_err());
    }

    #[test]
    fn test_blank_cells_become_empty_string_not_omission() {
        let mapping = mapping_with(vec![
            (ColumnKey::Index(0), ColumnTag::CustomerName),
            (ColumnKey::Index(1), ColumnTag::CustomerPhone),
            (ColumnKey::Index(5), ColumnTag::Notes),
        ]);
        let mapper = RowMapper::from_mapping(&mapping, None).unwrap();

        // 第1列是纯空白，第5列超出行宽
        let fields = mapper.map_row(&strings(&["Ali", "   "]));
        assert_eq!(fields[&ColumnTag::CustomerPhone], "");
        assert_eq!(fields[&ColumnTag::Notes], "");
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_ignore_columns_dropped() {
        let mapping = mapping_with(vec![
            (ColumnKey::Index(0), ColumnTag::Ignore),
            (ColumnKey::Index(1), ColumnTag::CustomerPhone),
        ]);
        let mapper = RowMapper::from_mapping(&mapping, None).unwrap();
        let fields = mapper.map_row(&strings(&["junk", "0100"]));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[&ColumnTag::CustomerPhone], "0100");
    }

    #[test]
    fn test_parse_sheet_date_two_formats_only() {
        assert_eq!(
            parse_sheet_date("2025-03-15"),
            NaiveDate::from_ymd_opt(2025, 3, 15)
        );
        assert_eq!(
            parse_sheet_date("15/03/2025"),
            NaiveDate::from_ymd_opt(2025, 3, 15)
        );
        assert_eq!(parse_sheet_date(""), None);
        assert_eq!(parse_sheet_date("not-a-date"), None);
        assert_eq!(parse_sheet_date("03/15/2025"), None); // 月日颠倒的美式写法不接受
        assert_eq!(parse_sheet_date("2025/03/15"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,250.50").unwrap(), Some(1250.5));
        assert_eq!(parse_amount("  ").unwrap(), None);
        assert!(parse_amount("abc").is_err());
    }
}
