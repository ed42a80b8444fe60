use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use sheetsync_domain::ports::crm::{
    Customer, CustomerFields, CustomerQuery, CustomerStore, Inspection, InspectionFields,
    InspectionQuery, InspectionStore, Order, OrderFields, OrderQuery, OrderStore,
};
use sheetsync_errors::{SyncError, SyncResult};

/// 嵌入式部署时在本地SQLite中承载CRM实体的实现
///
/// 同步引擎只通过 find_one / create / update 契约访问，换成真实CRM
/// 后端时替换这一个类型即可。
#[derive(Clone)]
pub struct SqliteCrmStore {
    pool: SqlitePool,
}

impl SqliteCrmStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_customer(row: &sqlx::sqlite::SqliteRow) -> SyncResult<Customer> {
        Ok(Customer {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            phone2: row.try_get("phone2")?,
            email: row.try_get("email")?,
            address: row.try_get("address")?,
            code: row.try_get("code")?,
            category: row.try_get("category")?,
            customer_type: row.try_get("customer_type")?,
            branch: row.try_get("branch")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> SyncResult<Order> {
        Ok(Order {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            invoice_number: row.try_get("invoice_number")?,
            order_number: row.try_get("order_number")?,
            contract_number: row.try_get("contract_number")?,
            order_date: row.try_get("order_date")?,
            order_type: row.try_get("order_type")?,
            tracking_status: row.try_get("tracking_status")?,
            total_amount: row.try_get("total_amount")?,
            paid_amount: row.try_get("paid_amount")?,
            delivery_type: row.try_get("delivery_type")?,
            delivery_address: row.try_get("delivery_address")?,
            branch: row.try_get("branch")?,
            salesperson: row.try_get("salesperson")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_inspection(row: &sqlx::sqlite::SqliteRow) -> SyncResult<Inspection> {
        Ok(Inspection {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            scheduled_date: row.try_get("scheduled_date")?,
            result: row.try_get("result")?,
            notes: row.try_get("notes")?,
            windows_count: row.try_get("windows_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl CustomerStore for SqliteCrmStore {
    async fn find_one(&self, query: &CustomerQuery) -> SyncResult<Option<Customer>> {
        let row = if let Some(code) = &query.code {
            sqlx::query("SELECT * FROM customers WHERE code = ? LIMIT 1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?
        } else if let Some(phone) = &query.phone {
            sqlx::query("SELECT * FROM customers WHERE phone = ? OR phone2 = ? LIMIT 1")
                .bind(phone)
                .bind(phone)
                .fetch_optional(&self.pool)
                .await?
        } else if let Some(name) = &query.name {
            sqlx::query("SELECT * FROM customers WHERE name = ? LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
        } else {
            return Err(SyncError::Internal("客户查询条件为空".to_string()));
        };
        row.as_ref().map(Self::row_to_customer).transpose()
    }

    #[instrument(skip(self, fields))]
    async fn create(&self, fields: CustomerFields) -> SyncResult<Customer> {
        let name = fields
            .name
            .ok_or_else(|| SyncError::Internal("创建客户缺少name".to_string()))?;
        let phone = fields
            .phone
            .ok_or_else(|| SyncError::Internal("创建客户缺少phone".to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO customers (name, phone, phone2, email, address, code,
                                   category, customer_type, branch, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&name)
        .bind(&phone)
        .bind(&fields.phone2)
        .bind(&fields.email)
        .bind(&fields.address)
        .bind(&fields.code)
        .bind(&fields.category)
        .bind(&fields.customer_type)
        .bind(&fields.branch)
        .bind(fields.created_at.unwrap_or_else(Utc::now))
        .fetch_one(&self.pool)
        .await?;

        debug!("Created customer: {}", name);
        Self::row_to_customer(&row)
    }

    async fn update(&self, id: i64, fields: CustomerFields) -> SyncResult<Customer> {
        let current = sqlx::query("SELECT * FROM customers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SyncError::Internal(format!("客户不存在: id={id}")))?;
        let current = Self::row_to_customer(&current)?;

        // None表示不触碰该字段，既有值从不被空值覆盖
        let row = sqlx::query(
            r#"
            UPDATE customers SET name = ?, phone = ?, phone2 = ?, email = ?,
                address = ?, code = ?, category = ?, customer_type = ?, branch = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(fields.name.unwrap_or(current.name))
        .bind(fields.phone.unwrap_or(current.phone))
        .bind(fields.phone2.or(current.phone2))
        .bind(fields.email.or(current.email))
        .bind(fields.address.or(current.address))
        .bind(fields.code.or(current.code))
        .bind(fields.category.or(current.category))
        .bind(fields.customer_type.or(current.customer_type))
        .bind(fields.branch.or(current.branch))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_customer(&row)
    }
}

#[async_trait]
impl OrderStore for SqliteCrmStore {
    async fn find_one(&self, query: &OrderQuery) -> SyncResult<Option<Order>> {
        let row = if let Some(invoice) = &query.invoice_number {
            sqlx::query("SELECT * FROM orders WHERE invoice_number = ? LIMIT 1")
                .bind(invoice)
                .fetch_optional(&self.pool)
                .await?
        } else if let Some(number) = &query.order_number {
            sqlx::query("SELECT * FROM orders WHERE order_number = ? LIMIT 1")
                .bind(number)
                .fetch_optional(&self.pool)
                .await?
        } else {
            return Err(SyncError::Internal("订单查询条件为空".to_string()));
        };
        row.as_ref().map(Self::row_to_order).transpose()
    }

    #[instrument(skip(self, fields))]
    async fn create(&self, fields: OrderFields) -> SyncResult<Order> {
        let customer_id = fields
            .customer_id
            .ok_or_else(|| SyncError::Internal("创建订单缺少customer_id".to_string()))?;
        let invoice_number = fields
            .invoice_number
            .ok_or_else(|| SyncError::Internal("创建订单缺少invoice_number".to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (customer_id, invoice_number, order_number, contract_number,
                                order_date, order_type, tracking_status, total_amount,
                                paid_amount, delivery_type, delivery_address, branch,
                                salesperson, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(customer_id)
        .bind(&invoice_number)
        .bind(&fields.order_number)
        .bind(&fields.contract_number)
        .bind(fields.order_date)
        .bind(&fields.order_type)
        .bind(&fields.tracking_status)
        .bind(fields.total_amount)
        .bind(fields.paid_amount)
        .bind(&fields.delivery_type)
        .bind(&fields.delivery_address)
        .bind(&fields.branch)
        .bind(&fields.salesperson)
        .bind(&fields.notes)
        .bind(fields.created_at.unwrap_or_else(Utc::now))
        .fetch_one(&self.pool)
        .await?;

        debug!("Created order: {}", invoice_number);
        Self::row_to_order(&row)
    }

    async fn update(&self, id: i64, fields: OrderFields) -> SyncResult<Order> {
        let current = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SyncError::Internal(format!("订单不存在: id={id}")))?;
        let current = Self::row_to_order(&current)?;

        let row = sqlx::query(
            r#"
            UPDATE orders SET order_number = ?, contract_number = ?, order_date = ?,
                order_type = ?, tracking_status = ?, total_amount = ?, paid_amount = ?,
                delivery_type = ?, delivery_address = ?, branch = ?, salesperson = ?, notes = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(fields.order_number.or(current.order_number))
        .bind(fields.contract_number.or(current.contract_number))
        .bind(fields.order_date.or(current.order_date))
        .bind(fields.order_type.or(current.order_type))
        .bind(fields.tracking_status.or(current.tracking_status))
        .bind(fields.total_amount.or(current.total_amount))
        .bind(fields.paid_amount.or(current.paid_amount))
        .bind(fields.delivery_type.or(current.delivery_type))
        .bind(fields.delivery_address.or(current.delivery_address))
        .bind(fields.branch.or(current.branch))
        .bind(fields.salesperson.or(current.salesperson))
        .bind(fields.notes.or(current.notes))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_order(&row)
    }
}

#[async_trait]
impl InspectionStore for SqliteCrmStore {
    async fn find_one(&self, query: &InspectionQuery) -> SyncResult<Option<Inspection>> {
        let order_id = query
            .order_id
            .ok_or_else(|| SyncError::Internal("勘测查询条件为空".to_string()))?;
        let row = sqlx::query("SELECT * FROM inspections WHERE order_id = ? LIMIT 1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_inspection).transpose()
    }

    #[instrument(skip(self, fields))]
    async fn create(&self, fields: InspectionFields) -> SyncResult<Inspection> {
        let order_id = fields
            .order_id
            .ok_or_else(|| SyncError::Internal("创建勘测缺少order_id".to_string()))?;
        let scheduled_date = fields
            .scheduled_date
            .ok_or_else(|| SyncError::Internal("创建勘测缺少scheduled_date".to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO inspections (order_id, scheduled_date, result, notes, windows_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(scheduled_date)
        .bind(&fields.result)
        .bind(&fields.notes)
        .bind(fields.windows_count)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!("Created inspection for order {}", order_id);
        Self::row_to_inspection(&row)
    }

    async fn update(&self, id: i64, fields: InspectionFields) -> SyncResult<Inspection> {
        let current = sqlx::query("SELECT * FROM inspections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SyncError::Internal(format!("勘测不存在: id={id}")))?;
        let current = Self::row_to_inspection(&current)?;

        let row = sqlx::query(
            r#"
            UPDATE inspections SET scheduled_date = ?, result = ?, notes = ?, windows_count = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(fields.scheduled_date.unwrap_or(current.scheduled_date))
        .bind(fields.result.or(current.result))
        .bind(fields.notes.or(current.notes))
        .bind(fields.windows_count.or(current.windows_count))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_inspection(&row)
    }
}
