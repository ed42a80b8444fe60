//! CRM领域实体端口
//!
//! CRM本身的领域模型是外部协作者，同步引擎对每种实体只依赖
//! find_one / create / update 三个操作加上必要的关联字段
//! (customer→order, order→inspection)，从不触碰实体内部。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use sheetsync_errors::SyncResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub phone2: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub code: Option<String>,
    pub category: Option<String>,
    pub customer_type: Option<String>,
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 部分字段更新/创建载荷；None 表示不触碰该字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerFields {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub phone2: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub code: Option<String>,
    pub category: Option<String>,
    pub customer_type: Option<String>,
    pub branch: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// 精确匹配条件；一次只按一个键查询
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerQuery {
    pub code: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
}

impl CustomerQuery {
    pub fn by_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Default::default()
        }
    }
    pub fn by_phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Default::default()
        }
    }
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_one(&self, query: &CustomerQuery) -> SyncResult<Option<Customer>>;
    async fn create(&self, fields: CustomerFields) -> SyncResult<Customer>;
    async fn update(&self, id: i64, fields: CustomerFields) -> SyncResult<Customer>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub invoice_number: String,
    pub order_number: Option<String>,
    pub contract_number: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub order_type: Option<String>,
    pub tracking_status: Option<String>,
    pub total_amount: Option<f64>,
    pub paid_amount: Option<f64>,
    pub delivery_type: Option<String>,
    pub delivery_address: Option<String>,
    pub branch: Option<String>,
    pub salesperson: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFields {
    pub customer_id: Option<i64>,
    pub invoice_number: Option<String>,
    pub order_number: Option<String>,
    pub contract_number: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub order_type: Option<String>,
    pub tracking_status: Option<String>,
    pub total_amount: Option<f64>,
    pub paid_amount: Option<f64>,
    pub delivery_type: Option<String>,
    pub delivery_address: Option<String>,
    pub branch: Option<String>,
    pub salesperson: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQuery {
    pub invoice_number: Option<String>,
    pub order_number: Option<String>,
}

impl OrderQuery {
    pub fn by_invoice(invoice: impl Into<String>) -> Self {
        Self {
            invoice_number: Some(invoice.into()),
            ..Default::default()
        }
    }
    pub fn by_order_number(number: impl Into<String>) -> Self {
        Self {
            order_number: Some(number.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_one(&self, query: &OrderQuery) -> SyncResult<Option<Order>>;
    async fn create(&self, fields: OrderFields) -> SyncResult<Order>;
    async fn update(&self, id: i64, fields: OrderFields) -> SyncResult<Order>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inspection {
    pub id: i64,
    pub order_id: i64,
    pub scheduled_date: NaiveDate,
    pub result: Option<String>,
    pub notes: Option<String>,
    pub windows_count: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionFields {
    pub order_id: Option<i64>,
    pub scheduled_date: Option<NaiveDate>,
    pub result: Option<String>,
    pub notes: Option<String>,
    pub windows_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionQuery {
    pub order_id: Option<i64>,
}

impl InspectionQuery {
    pub fn by_order(order_id: i64) -> Self {
        Self {
            order_id: Some(order_id),
        }
    }
}

#[async_trait]
pub trait InspectionStore: Send + Sync {
    async fn find_one(&self, query: &InspectionQuery) -> SyncResult<Option<Inspection>>;
    async fn create(&self, fields: InspectionFields) -> SyncResult<Inspection>;
    async fn update(&self, id: i64, fields: InspectionFields) -> SyncResult<Inspection>;
}
