use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sheetsync_errors::{SyncError, SyncResult};

/// 列语义标签 - 封闭的字段词汇表
///
/// 词汇表是映射Schema的一部分：新增标签是向后兼容的变更，删除标签不是。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnTag {
    CustomerName,
    CustomerPhone,
    CustomerPhone2,
    CustomerEmail,
    CustomerAddress,
    CustomerCode,
    OrderNumber,
    InvoiceNumber,
    ContractNumber,
    OrderDate,
    OrderType,
    TrackingStatus,
    TotalAmount,
    PaidAmount,
    DeliveryType,
    DeliveryAddress,
    InstallationStatus,
    InspectionDate,
    InspectionResult,
    Notes,
    Branch,
    Salesperson,
    WindowsCount,
    Ignore,
}

impl ColumnTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnTag::CustomerName => "customer_name",
            ColumnTag::CustomerPhone => "customer_phone",
            ColumnTag::CustomerPhone2 => "customer_phone2",
            ColumnTag::CustomerEmail => "customer_email",
            ColumnTag::CustomerAddress => "customer_address",
            ColumnTag::CustomerCode => "customer_code",
            ColumnTag::OrderNumber => "order_number",
            ColumnTag::InvoiceNumber => "invoice_number",
            ColumnTag::ContractNumber => "contract_number",
            ColumnTag::OrderDate => "order_date",
            ColumnTag::OrderType => "order_type",
            ColumnTag::TrackingStatus => "tracking_status",
            ColumnTag::TotalAmount => "total_amount",
            ColumnTag::PaidAmount => "paid_amount",
            ColumnTag::DeliveryType => "delivery_type",
            ColumnTag::DeliveryAddress => "delivery_address",
            ColumnTag::InstallationStatus => "installation_status",
            ColumnTag::InspectionDate => "inspection_date",
            ColumnTag::InspectionResult => "inspection_result",
            ColumnTag::Notes => "notes",
            ColumnTag::Branch => "branch",
            ColumnTag::Salesperson => "salesperson",
            ColumnTag::WindowsCount => "windows_count",
            ColumnTag::Ignore => "ignore",
        }
    }

    /// 客户相关标签，用于判断是否允许自动创建客户
    pub fn is_customer_field(&self) -> bool {
        matches!(
            self,
            ColumnTag::CustomerName
                | ColumnTag::CustomerPhone
                | ColumnTag::CustomerPhone2
                | ColumnTag::CustomerEmail
                | ColumnTag::CustomerAddress
                | ColumnTag::CustomerCode
        )
    }

    /// 订单相关标签，用于判断是否允许自动创建订单
    pub fn is_order_field(&self) -> bool {
        matches!(
            self,
            ColumnTag::OrderNumber
                | ColumnTag::InvoiceNumber
                | ColumnTag::ContractNumber
                | ColumnTag::OrderDate
                | ColumnTag::OrderType
                | ColumnTag::TrackingStatus
                | ColumnTag::TotalAmount
                | ColumnTag::PaidAmount
                | ColumnTag::DeliveryType
                | ColumnTag::DeliveryAddress
        )
    }

    /// 可作为客户匹配键的标签
    pub fn is_customer_key(&self) -> bool {
        matches!(
            self,
            ColumnTag::CustomerName | ColumnTag::CustomerPhone | ColumnTag::CustomerCode
        )
    }

    /// 可作为订单去重键的标签
    pub fn is_order_key(&self) -> bool {
        matches!(
            self,
            ColumnTag::OrderNumber | ColumnTag::InvoiceNumber | ColumnTag::ContractNumber
        )
    }
}

impl FromStr for ColumnTag {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| SyncError::InvalidColumnTag(s.to_string()))
    }
}

/// 列定位方式：按表头文本或按0起始的列索引
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ColumnKey {
    Index(usize),
    Header(String),
}

/// 单条列映射，顺序有意义（按表格中出现顺序）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMapping {
    pub key: ColumnKey,
    pub tag: ColumnTag,
}

/// 冲突处理策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Skip,
    Overwrite,
    Manual,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        match s {
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(SyncError::validation_error(format!(
                "无效的冲突策略: {other}"
            ))),
        }
    }
}

/// 行内缺省值，在表格单元格为空时生效
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MappingDefaults {
    pub customer_category: Option<String>,
    pub customer_type: Option<String>,
    pub branch: Option<String>,
    /// 创建记录时使用当前时间戳而不是行内日期
    pub use_current_timestamp: bool,
}

/// 映射配置 - 描述一个(电子表格, 工作表, 行布局)三元组如何同步
///
/// 由操作员创建和编辑；引擎只修改 `last_sync` 和 `last_row_processed` 水位线。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mapping {
    pub id: i64,
    pub name: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// 表头行索引（0起始）
    pub header_row: i64,
    /// 首个数据行索引（0起始），必须大于 header_row
    pub start_row: i64,
    pub last_row_processed: Option<i64>,
    pub last_sync: Option<DateTime<Utc>>,
    pub active: bool,
    pub column_mappings: Vec<ColumnMapping>,
    pub auto_create_customers: bool,
    pub auto_create_orders: bool,
    pub auto_create_inspections: bool,
    pub auto_create_installations: bool,
    pub update_existing: bool,
    pub conflict_policy: ConflictPolicy,
    pub reverse_sync_enabled: bool,
    pub reverse_sync_fields: Vec<ColumnTag>,
    pub defaults: MappingDefaults,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    /// 校验映射配置，返回所有违反的规则；空列表表示可以启动任务
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.start_row <= self.header_row {
            errors.push(format!(
                "数据起始行({})必须大于表头行({})",
                self.start_row, self.header_row
            ));
        }

        let effective: Vec<&ColumnMapping> = self
            .column_mappings
            .iter()
            .filter(|m| m.tag != ColumnTag::Ignore)
            .collect();

        if effective.is_empty() {
            errors.push("至少需要一个非ignore的列映射".to_string());
        }

        if self.auto_create_customers && !effective.iter().any(|m| m.tag.is_customer_key()) {
            errors.push(
                "启用自动创建客户时必须映射 customer_name、customer_phone 或 customer_code 之一"
                    .to_string(),
            );
        }

        if self.auto_create_orders && !effective.iter().any(|m| m.tag.is_order_key()) {
            errors.push(
                "启用自动创建订单时必须映射 order_number、invoice_number 或 contract_number 之一"
                    .to_string(),
            );
        }

        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// 客户相关的已映射标签子集
    pub fn customer_columns(&self) -> Vec<ColumnTag> {
        self.column_mappings
            .iter()
            .filter(|m| m.tag.is_customer_field())
            .map(|m| m.tag)
            .collect()
    }

    /// 订单相关的已映射标签子集
    pub fn order_columns(&self) -> Vec<ColumnTag> {
        self.column_mappings
            .iter()
            .filter(|m| m.tag.is_order_field())
            .map(|m| m.tag)
            .collect()
    }

    /// 是否映射了某个标签
    pub fn has_tag(&self, tag: ColumnTag) -> bool {
        self.column_mappings.iter().any(|m| m.tag == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_mapping(columns: Vec<(ColumnKey, ColumnTag)>) -> Mapping {
        Mapping {
            id: 1,
            name: "test_mapping".to_string(),
            spreadsheet_id: "sheet-abc".to_string(),
            sheet_name: "Sheet1".to_string(),
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

    #[test]
    fn test_validate_ok() {
        let mapping = create_test_mapping(vec![
            (ColumnKey::Header("الاسم".to_string()), ColumnTag::CustomerName),
            (ColumnKey::Index(1), ColumnTag::CustomerPhone),
            (ColumnKey::Index(2), ColumnTag::InvoiceNumber),
        ]);
        assert!(mapping.validate().is_empty());
    }

    #[test]
    fn test_validate_rejects_missing_order_key() {
        let mapping = create_test_mapping(vec![
            (ColumnKey::Index(0), ColumnTag::CustomerName),
            (ColumnKey::Index(1), ColumnTag::CustomerPhone),
        ]);
        let errors = mapping.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("invoice_number"));
    }

    #[test]
    fn test_validate_rejects_only_ignore_columns() {
        let mapping = create_test_mapping(vec![(ColumnKey::Index(0), ColumnTag::Ignore)]);
        let errors = mapping.validate();
        assert!(errors.iter().any(|e| e.contains("非ignore")));
    }

    #[test]
    fn test_validate_rejects_start_row_before_header() {
        let mut mapping = create_test_mapping(vec![
            (ColumnKey::Index(0), ColumnTag::CustomerName),
            (ColumnKey::Index(1), ColumnTag::CustomerPhone),
            (ColumnKey::Index(2), ColumnTag::InvoiceNumber),
        ]);
        mapping.start_row = 0;
        assert!(!mapping.is_valid());
    }

    #[test]
    fn test_column_tag_round_trip() {
        for s in ["customer_phone2", "invoice_number", "windows_count", "ignore"] {
            let tag: ColumnTag = s.parse().unwrap();
            assert_eq!(tag.as_str(), s);
        }
        assert!("not_a_tag".parse::<ColumnTag>().is_err());
    }

    #[test]
    fn test_column_key_serde_untagged() {
        let json = r#"[{"key":3,"tag":"total_amount"},{"key":"رقم الفاتورة","tag":"invoice_number"}]"#;
        let parsed: Vec<ColumnMapping> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed[0].key, ColumnKey::Index(3));
        assert_eq!(parsed[1].key, ColumnKey::Header("رقم الفاتورة".to_string()));
    }
}
