//! 测试替身 - 引擎与服务测试用的内存实现
//!
//! 全部用 `std::sync::Mutex` 保护的向量模拟存储，行为与SQLite
//! 实现保持一致：create 分配自增id，update 按id整体替换，
//! CRM侧的部分更新遵循 "None 不触碰" 语义。仅供测试使用。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sheetsync_domain::entities::{Conflict, Mapping, SyncSchedule, SyncTask};
use sheetsync_domain::ports::crm::{
    Customer, CustomerFields, CustomerQuery, CustomerStore, Inspection, InspectionFields,
    InspectionQuery, InspectionStore, Order, OrderFields, OrderQuery, OrderStore,
};
use sheetsync_domain::ports::sheets::{SheetSource, SheetsApi};
use sheetsync_domain::repositories::{
    ConflictRepository, MappingRepository, ScheduleRepository, SyncTaskRepository,
};
use sheetsync_errors::{SyncError, SyncResult};

/// 内存表格：(spreadsheet_id, sheet_name) → 网格
#[derive(Default)]
pub struct InMemorySheets {
    grids: Mutex<HashMap<(String, String), Vec<Vec<String>>>>,
    pub writes: Mutex<Vec<(String, String, Vec<Vec<String>>)>>,
}

impl InMemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_sheet(&self, spreadsheet_id: &str, sheet_name: &str, grid: Vec<Vec<String>>) {
        self.grids
            .lock()
            .unwrap()
            .insert((spreadsheet_id.to_string(), sheet_name.to_string()), grid);
    }
}

#[async_trait]
impl SheetSource for InMemorySheets {
    async fn fetch(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        _start_row: Option<u32>,
        _end_row: Option<u32>,
    ) -> SyncResult<Vec<Vec<String>>> {
        self.grids
            .lock()
            .unwrap()
            .get(&(spreadsheet_id.to_string(), sheet_name.to_string()))
            .cloned()
            .ok_or_else(|| SyncError::SheetAddressing {
                sheet_name: sheet_name.to_string(),
                attempts: "1. 内存表格中不存在".to_string(),
            })
    }

    async fn list_sheets(&self, spreadsheet_id: &str) -> SyncResult<Vec<String>> {
        Ok(self
            .grids
            .lock()
            .unwrap()
            .keys()
            .filter(|(sid, _)| sid == spreadsheet_id)
            .map(|(_, name)| name.clone())
            .collect())
    }
}

#[async_trait]
impl SheetsApi for InMemorySheets {
    async fn list_sheets(&self, spreadsheet_id: &str) -> SyncResult<Vec<String>> {
        SheetSource::list_sheets(self, spreadsheet_id).await
    }

    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> SyncResult<Vec<Vec<String>>> {
        let sheet = range.split('!').next().unwrap_or(range).trim_matches('\'');
        SheetSource::fetch(self, spreadsheet_id, sheet, None, None).await
    }

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> SyncResult<()> {
        self.writes.lock().unwrap().push((
            spreadsheet_id.to_string(),
            range.to_string(),
            values.to_vec(),
        ));
        Ok(())
    }
}

/// 内存CRM：三种实体共用一套自增id空间无妨，测试只看关联
#[derive(Default)]
pub struct InMemoryCrm {
    pub customers: Mutex<Vec<Customer>>,
    pub orders: Mutex<Vec<Order>>,
    pub inspections: Mutex<Vec<Inspection>>,
    next_id: Mutex<i64>,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }
}

#[async_trait]
impl CustomerStore for InMemoryCrm {
    async fn find_one(&self, query: &CustomerQuery) -> SyncResult<Option<Customer>> {
        let customers = self.customers.lock().unwrap();
        Ok(customers
            .iter()
            .find(|c| {
                if let Some(code) = &query.code {
                    return c.code.as_deref() == Some(code.as_str());
                }
                if let Some(phone) = &query.phone {
                    return &c.phone == phone || c.phone2.as_deref() == Some(phone.as_str());
                }
                if let Some(name) = &query.name {
                    return &c.name == name;
                }
                false
            })
            .cloned())
    }

    async fn create(&self, fields: CustomerFields) -> SyncResult<Customer> {
        let customer = Customer {
            id: self.alloc_id(),
            name: fields
                .name
                .ok_or_else(|| SyncError::validation_error("客户姓名为必填"))?,
            phone: fields
                .phone
                .ok_or_else(|| SyncError::validation_error("客户电话为必填"))?,
            phone2: fields.phone2,
            email: fields.email,
            address: fields.address,
            code: fields.code,
            category: fields.category,
            customer_type: fields.customer_type,
            branch: fields.branch,
            created_at: fields.created_at.unwrap_or_else(Utc::now),
        };
        self.customers.lock().unwrap().push(customer.clone());
        Ok(customer)
    }

    async fn update(&self, id: i64, fields: CustomerFields) -> SyncResult<Customer> {
        let mut customers = self.customers.lock().unwrap();
        let customer = customers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SyncError::database_error(format!("客户不存在: {id}")))?;
        if let Some(name) = fields.name {
            customer.name = name;
        }
        if let Some(phone) = fields.phone {
            customer.phone = phone;
        }
        customer.phone2 = fields.phone2.or(customer.phone2.take());
        customer.email = fields.email.or(customer.email.take());
        customer.address = fields.address.or(customer.address.take());
        customer.code = fields.code.or(customer.code.take());
        customer.category = fields.category.or(customer.category.take());
        customer.customer_type = fields.customer_type.or(customer.customer_type.take());
        customer.branch = fields.branch.or(customer.branch.take());
        Ok(customer.clone())
    }
}

#[async_trait]
impl OrderStore for InMemoryCrm {
    async fn find_one(&self, query: &OrderQuery) -> SyncResult<Option<Order>> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .find(|o| {
                if let Some(invoice) = &query.invoice_number {
                    return &o.invoice_number == invoice;
                }
                if let Some(number) = &query.order_number {
                    return o.order_number.as_deref() == Some(number.as_str());
                }
                false
            })
            .cloned())
    }

    async fn create(&self, fields: OrderFields) -> SyncResult<Order> {
        let order = Order {
            id: self.alloc_id(),
            customer_id: fields
                .customer_id
                .ok_or_else(|| SyncError::validation_error("订单客户为必填"))?,
            invoice_number: fields
                .invoice_number
                .ok_or_else(|| SyncError::validation_error("发票号为必填"))?,
            order_number: fields.order_number,
            contract_number: fields.contract_number,
            order_date: fields.order_date,
            order_type: fields.order_type,
            tracking_status: fields.tracking_status,
            total_amount: fields.total_amount,
            paid_amount: fields.paid_amount,
            delivery_type: fields.delivery_type,
            delivery_address: fields.delivery_address,
            branch: fields.branch,
            salesperson: fields.salesperson,
            notes: fields.notes,
            created_at: fields.created_at.unwrap_or_else(Utc::now),
        };
        self.orders.lock().unwrap().push(order.clone());
        Ok(order)
    }

    async fn update(&self, id: i64, fields: OrderFields) -> SyncResult<Order> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| SyncError::database_error(format!("订单不存在: {id}")))?;
        if let Some(customer_id) = fields.customer_id {
            order.customer_id = customer_id;
        }
        if let Some(invoice) = fields.invoice_number {
            order.invoice_number = invoice;
        }
        order.order_number = fields.order_number.or(order.order_number.take());
        order.contract_number = fields.contract_number.or(order.contract_number.take());
        order.order_date = fields.order_date.or(order.order_date.take());
        order.order_type = fields.order_type.or(order.order_type.take());
        order.tracking_status = fields.tracking_status.or(order.tracking_status.take());
        order.total_amount = fields.total_amount.or(order.total_amount.take());
        order.paid_amount = fields.paid_amount.or(order.paid_amount.take());
        order.delivery_type = fields.delivery_type.or(order.delivery_type.take());
        order.delivery_address = fields.delivery_address.or(order.delivery_address.take());
        order.branch = fields.branch.or(order.branch.take());
        order.salesperson = fields.salesperson.or(order.salesperson.take());
        order.notes = fields.notes.or(order.notes.take());
        Ok(order.clone())
    }
}

#[async_trait]
impl InspectionStore for InMemoryCrm {
    async fn find_one(&self, query: &InspectionQuery) -> SyncResult<Option<Inspection>> {
        let inspections = self.inspections.lock().unwrap();
        Ok(inspections
            .iter()
            .find(|i| Some(i.order_id) == query.order_id)
            .cloned())
    }

    async fn create(&self, fields: InspectionFields) -> SyncResult<Inspection> {
        let inspection = Inspection {
            id: self.alloc_id(),
            order_id: fields
                .order_id
                .ok_or_else(|| SyncError::validation_error("勘测订单为必填"))?,
            scheduled_date: fields
                .scheduled_date
                .ok_or_else(|| SyncError::validation_error("勘测日期为必填"))?,
            result: fields.result,
            notes: fields.notes,
            windows_count: fields.windows_count,
            created_at: Utc::now(),
        };
        self.inspections.lock().unwrap().push(inspection.clone());
        Ok(inspection)
    }

    async fn update(&self, id: i64, fields: InspectionFields) -> SyncResult<Inspection> {
        let mut inspections = self.inspections.lock().unwrap();
        let inspection = inspections
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| SyncError::database_error(format!("勘测不存在: {id}")))?;
        if let Some(date) = fields.scheduled_date {
            inspection.scheduled_date = date;
        }
        inspection.result = fields.result.or(inspection.result.take());
        inspection.notes = fields.notes.or(inspection.notes.take());
        inspection.windows_count = fields.windows_count.or(inspection.windows_count.take());
        Ok(inspection.clone())
    }
}

#[derive(Default)]
pub struct InMemoryMappings {
    pub rows: Mutex<Vec<Mapping>>,
}

impl InMemoryMappings {
    pub fn with(mappings: Vec<Mapping>) -> Self {
        Self {
            rows: Mutex::new(mappings),
        }
    }
}

#[async_trait]
impl MappingRepository for InMemoryMappings {
    async fn create(&self, mapping: &Mapping) -> SyncResult<Mapping> {
        let mut rows = self.rows.lock().unwrap();
        let mut created = mapping.clone();
        created.id = rows.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        rows.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<Mapping>> {
        Ok(self.rows.lock().unwrap().iter().find(|m| m.id == id).cloned())
    }

    async fn find_all(&self) -> SyncResult<Vec<Mapping>> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn find_active(&self) -> SyncResult<Vec<Mapping>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.active)
            .cloned()
            .collect())
    }

    async fn update(&self, mapping: &Mapping) -> SyncResult<Mapping> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows
            .iter_mut()
            .find(|m| m.id == mapping.id)
            .ok_or(SyncError::MappingNotFound { id: mapping.id })?;
        *slot = mapping.clone();
        Ok(slot.clone())
    }

    async fn advance_watermark(
        &self,
        id: i64,
        last_row_processed: i64,
        last_sync: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let mapping = rows
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(SyncError::MappingNotFound { id })?;
        mapping.last_row_processed = Some(last_row_processed);
        mapping.last_sync = Some(last_sync);
        Ok(())
    }

    async fn delete(&self, id: i64) -> SyncResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|m| m.id != id);
        Ok(rows.len() < before)
    }
}

#[derive(Default)]
pub struct InMemoryTasks {
    pub rows: Mutex<Vec<SyncTask>>,
}

#[async_trait]
impl SyncTaskRepository for InMemoryTasks {
    async fn create(&self, task: &SyncTask) -> SyncResult<SyncTask> {
        let mut rows = self.rows.lock().unwrap();
        let mut created = task.clone();
        created.id = rows.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        rows.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<SyncTask>> {
        Ok(self.rows.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_mapping(&self, mapping_id: i64) -> SyncResult<Vec<SyncTask>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.mapping_id == mapping_id)
            .cloned()
            .collect())
    }

    async fn find_running(&self) -> SyncResult<Vec<SyncTask>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn update(&self, task: &SyncTask) -> SyncResult<SyncTask> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or(SyncError::TaskNotFound { id: task.id })?;
        *slot = task.clone();
        Ok(slot.clone())
    }
}

#[derive(Default)]
pub struct InMemoryConflicts {
    pub rows: Mutex<Vec<Conflict>>,
}

#[async_trait]
impl ConflictRepository for InMemoryConflicts {
    async fn create(&self, conflict: &Conflict) -> SyncResult<Conflict> {
        let mut rows = self.rows.lock().unwrap();
        let mut created = conflict.clone();
        created.id = rows.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        rows.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<Conflict>> {
        Ok(self.rows.lock().unwrap().iter().find(|c| c.id == id).cloned())
    }

    async fn find_by_task(&self, task_id: i64) -> SyncResult<Vec<Conflict>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn find_pending(&self) -> SyncResult<Vec<Conflict>> {
        use sheetsync_domain::entities::ResolutionStatus;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.resolution == ResolutionStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update(&self, conflict: &Conflict) -> SyncResult<Conflict> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows
            .iter_mut()
            .find(|c| c.id == conflict.id)
            .ok_or(SyncError::ConflictNotFound { id: conflict.id })?;
        *slot = conflict.clone();
        Ok(slot.clone())
    }
}

#[derive(Default)]
pub struct InMemorySchedules {
    pub rows: Mutex<Vec<SyncSchedule>>,
}

#[async_trait]
impl ScheduleRepository for InMemorySchedules {
    async fn create(&self, schedule: &SyncSchedule) -> SyncResult<SyncSchedule> {
        let mut rows = self.rows.lock().unwrap();
        let mut created = schedule.clone();
        created.id = rows.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        rows.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> SyncResult<Option<SyncSchedule>> {
        Ok(self.rows.lock().unwrap().iter().find(|s| s.id == id).cloned())
    }

    async fn find_by_mapping(&self, mapping_id: i64) -> SyncResult<Option<SyncSchedule>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.mapping_id == mapping_id)
            .cloned())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncSchedule>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect())
    }

    async fn update(&self, schedule: &SyncSchedule) -> SyncResult<SyncSchedule> {
        let mut rows = self.rows.lock().unwrap();
        let slot = rows
            .iter_mut()
            .find(|s| s.id == schedule.id)
            .ok_or_else(|| SyncError::database_error(format!("排程不存在: {}", schedule.id)))?;
        *slot = schedule.clone();
        Ok(slot.clone())
    }
}
