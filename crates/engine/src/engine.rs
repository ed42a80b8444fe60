use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::row_mapper::{parse_amount, parse_sheet_date, RowMapper};
use sheetsync_domain::entities::{
    ColumnTag, Conflict, ConflictKind, ConflictPolicy, Mapping, SyncTask,
};
use sheetsync_domain::ports::crm::{
    Customer, CustomerFields, CustomerQuery, CustomerStore, InspectionFields, InspectionQuery,
    InspectionStore, Order, OrderFields, OrderQuery, OrderStore,
};
use sheetsync_domain::ports::sheets::SheetSource;
use sheetsync_domain::repositories::{ConflictRepository, MappingRepository, SyncTaskRepository};
use sheetsync_domain::value_objects::SyncStats;
use sheetsync_errors::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 行处理批大小；批次边界冲刷一次进度
    pub batch_size: usize,
    /// 快速模式只放大批次，从不改变去重/幂等语义
    pub fast_mode: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: 20,
            fast_mode: false,
        }
    }
}

impl EngineOptions {
    fn effective_batch_size(&self) -> usize {
        if self.fast_mode {
            self.batch_size.max(50)
        } else {
            self.batch_size.clamp(5, 50)
        }
    }
}

/// 每次运行私有的累积状态，按表格行序填充，保证"首次出现获胜"
/// 的去重规则是确定性的
#[derive(Default)]
struct RunContext {
    /// (姓名, 电话) → 已解析客户，同一文件内重复客户不再查询
    customer_cache: HashMap<(String, String), Customer>,
    /// 本次运行已见过的发票号；同一(映射, 发票号)一次运行最多产生一个订单
    seen_invoices: HashSet<String>,
    stats: SyncStats,
}

enum RowOutcome {
    Synced,
    Skipped,
}

/// 同步引擎
///
/// 对一个映射：整表取数一次，逐行经列映射转成字段字典，驱动
/// 客户→订单→勘测的幂等解析，累积统计与冲突。单行的失败只记录
/// 该行，不中止批次；连接类致命错误立即终止任务。
///
/// 核心保证：同一张未变化的表重复同步，第二次不产生任何新的
/// 客户、订单或勘测记录。
pub struct SyncEngine {
    sheets: Arc<dyn SheetSource>,
    customers: Arc<dyn CustomerStore>,
    orders: Arc<dyn OrderStore>,
    inspections: Arc<dyn InspectionStore>,
    tasks: Arc<dyn SyncTaskRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    mappings: Arc<dyn MappingRepository>,
    options: EngineOptions,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sheets: Arc<dyn SheetSource>,
        customers: Arc<dyn CustomerStore>,
        orders: Arc<dyn OrderStore>,
        inspections: Arc<dyn InspectionStore>,
        tasks: Arc<dyn SyncTaskRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        mappings: Arc<dyn MappingRepository>,
        options: EngineOptions,
    ) -> Self {
        Self {
            sheets,
            customers,
            orders,
            inspections,
            tasks,
            conflicts,
            mappings,
            options,
        }
    }

    /// 执行一次导入同步；调用方必须持有该映射的咨询锁
    #[instrument(skip(self, mapping, task), fields(mapping_id = %mapping.id, task_id = %task.id))]
    pub async fn run(&self, mapping: &Mapping, task: &mut SyncTask) -> SyncResult<SyncStats> {
        task.start()?;
        *task = self.tasks.update(task).await?;

        // 阻塞的网络调用只有这一次整表取数
        let grid = match self
            .sheets
            .fetch(&mapping.spreadsheet_id, &mapping.sheet_name, None, None)
            .await
        {
            Ok(grid) => grid,
            Err(e) => {
                self.abort(task, e.to_string()).await?;
                return Err(e);
            }
        };

        let header = grid
            .get(usize::try_from(mapping.header_row).unwrap_or_default())
            .map(|r| r.as_slice());
        let mapper = match RowMapper::from_mapping(mapping, header) {
            Ok(m) => m,
            Err(e) => {
                self.abort(task, e.to_string()).await?;
                return Err(e);
            }
        };

        // 裁掉表头与数据起始行之前的部分；行号保持表格中的1起始编号
        let data_start = usize::try_from(mapping.start_row).unwrap_or_default();
        let rows: Vec<(i64, &Vec<String>)> = grid
            .iter()
            .enumerate()
            .skip(data_start)
            .map(|(i, row)| ((i + 1) as i64, row))
            .collect();

        let mut ctx = RunContext::default();
        ctx.stats.total_rows = rows.len() as i64;
        task.total_rows = ctx.stats.total_rows;

        for batch in rows.chunks(self.options.effective_batch_size()) {
            for (row_number, row) in batch {
                let fields = mapper.map_row(row);
                match self
                    .process_row(mapping, task.id, *row_number, &fields, &mut ctx)
                    .await
                {
                    Ok(RowOutcome::Synced) => ctx.stats.successful_rows += 1,
                    Ok(RowOutcome::Skipped) => ctx.stats.skipped_rows += 1,
                    Err(e) if e.is_fatal() => {
                        self.abort(task, e.to_string()).await?;
                        return Err(e);
                    }
                    // 行级错误在批次边界之外记录，批次回滚也不会丢失
                    Err(e) => ctx.stats.record_error(*row_number, e.to_string()),
                }
                ctx.stats.processed_rows += 1;
            }

            task.update_progress(
                ctx.stats.processed_rows,
                ctx.stats.successful_rows,
                ctx.stats.failed_rows,
            )?;
            *task = self.tasks.update(task).await?;
            debug!(
                "Batch flushed: {}/{} rows",
                ctx.stats.processed_rows, ctx.stats.total_rows
            );
        }

        // 水位线只在成功运行的最后写一次
        let last_row = rows.last().map_or(mapping.start_row, |(n, _)| *n);
        self.mappings
            .advance_watermark(mapping.id, last_row, Utc::now())
            .await?;

        task.complete(ctx.stats.to_json())?;
        *task = self.tasks.update(task).await?;

        info!(
            "Sync completed for mapping {}: {} rows, {} ok, {} failed, {} skipped",
            mapping.id,
            ctx.stats.processed_rows,
            ctx.stats.successful_rows,
            ctx.stats.failed_rows,
            ctx.stats.skipped_rows
        );
        Ok(ctx.stats)
    }

    async fn abort(&self, task: &mut SyncTask, error: String) -> SyncResult<()> {
        task.fail(error)?;
        *task = self.tasks.update(task).await?;
        Ok(())
    }

    async fn process_row(
        &self,
        mapping: &Mapping,
        task_id: i64,
        row_number: i64,
        fields: &HashMap<ColumnTag, String>,
        ctx: &mut RunContext,
    ) -> SyncResult<RowOutcome> {
        let customer = match self
            .resolve_customer(mapping, task_id, row_number, fields, ctx)
            .await?
        {
            Some(customer) => customer,
            // 警告已记录；没有客户就不再尝试订单/勘测
            None => return Ok(RowOutcome::Skipped),
        };

        let order = self
            .resolve_order(mapping, task_id, row_number, fields, &customer, ctx)
            .await?;

        if let Some(order) = order {
            self.resolve_inspection(mapping, row_number, fields, &order, ctx)
                .await?;
        }

        Ok(RowOutcome::Synced)
    }

    /// 客户解析顺序：客户编码精确匹配 → 电话精确匹配 → 姓名精确匹配
    async fn resolve_customer(
        &self,
        mapping: &Mapping,
        task_id: i64,
        row_number: i64,
        fields: &HashMap<ColumnTag, String>,
        ctx: &mut RunContext,
    ) -> SyncResult<Option<Customer>> {
        let name = non_empty(fields, ColumnTag::CustomerName);
        let phone = non_empty(fields, ColumnTag::CustomerPhone);
        let code = non_empty(fields, ColumnTag::CustomerCode);

        if let (Some(name), Some(phone)) = (name, phone) {
            if let Some(cached) = ctx
                .customer_cache
                .get(&(name.to_string(), phone.to_string()))
            {
                return Ok(Some(cached.clone()));
            }
        }

        let mut found = None;
        if let Some(code) = code {
            found = self.customers.find_one(&CustomerQuery::by_code(code)).await?;
        }
        if found.is_none() {
            if let Some(phone) = phone {
                found = self
                    .customers
                    .find_one(&CustomerQuery::by_phone(phone))
                    .await?;
            }
        }
        if found.is_none() {
            if let Some(name) = name {
                found = self.customers.find_one(&CustomerQuery::by_name(name)).await?;
            }
        }

        if let Some(existing) = found {
            // 按电话/编码命中但姓名对不上 → 歧义，交给冲突策略
            let ambiguous = matches!(name, Some(n) if n != existing.name && !existing.name.is_empty());

            if ambiguous {
                match mapping.conflict_policy {
                    ConflictPolicy::Manual => {
                        self.record_conflict(
                            task_id,
                            ConflictKind::DuplicateCustomer,
                            row_number,
                            fields,
                            Some(serde_json::to_value(&existing).unwrap_or_default()),
                            format!(
                                "行内姓名 {:?} 与匹配客户 {:?} 不一致",
                                name.unwrap_or_default(),
                                existing.name
                            ),
                            ctx,
                        )
                        .await?;
                        self.cache_customer(ctx, &existing);
                        return Ok(Some(existing));
                    }
                    ConflictPolicy::Skip => {
                        self.cache_customer(ctx, &existing);
                        return Ok(Some(existing));
                    }
                    ConflictPolicy::Overwrite => {}
                }
            }

            if mapping.update_existing {
                let patch = customer_patch(fields);
                if patch != CustomerFields::default() {
                    let updated = self.customers.update(existing.id, patch).await?;
                    ctx.stats.customers_updated += 1;
                    self.cache_customer(ctx, &updated);
                    return Ok(Some(updated));
                }
            }
            self.cache_customer(ctx, &existing);
            return Ok(Some(existing));
        }

        if !mapping.auto_create_customers {
            ctx.stats
                .record_warning(row_number, "客户未找到且禁止自动创建，跳过该行");
            return Ok(None);
        }

        // 必填是姓名+电话；仅当映射根本没有姓名/电话列时才允许按编码创建
        let code_only =
            !mapping.has_tag(ColumnTag::CustomerName) && !mapping.has_tag(ColumnTag::CustomerPhone);
        let (create_name, create_phone) = match (name, phone) {
            (Some(n), Some(p)) => (n.to_string(), p.to_string()),
            _ if code_only && code.is_some() => {
                (code.unwrap_or_default().to_string(), String::new())
            }
            _ => {
                ctx.stats
                    .record_warning(row_number, "客户必填字段缺失(姓名/电话)，跳过该行");
                return Ok(None);
            }
        };

        let created = self
            .customers
            .create(CustomerFields {
                name: Some(create_name),
                phone: Some(create_phone),
                phone2: owned(fields, ColumnTag::CustomerPhone2),
                email: owned(fields, ColumnTag::CustomerEmail),
                address: owned(fields, ColumnTag::CustomerAddress),
                code: code.map(str::to_string),
                category: mapping.defaults.customer_category.clone(),
                customer_type: mapping.defaults.customer_type.clone(),
                branch: owned(fields, ColumnTag::Branch).or_else(|| mapping.defaults.branch.clone()),
                created_at: mapping.defaults.use_current_timestamp.then(Utc::now),
            })
            .await?;
        ctx.stats.customers_created += 1;
        self.cache_customer(ctx, &created);
        Ok(Some(created))
    }

    /// 订单键优先用发票号；缺失时由订单号/合同号合成占位发票号。
    /// 三者全缺是该行的硬错误（无法创建也无法匹配），但不影响批次。
    async fn resolve_order(
        &self,
        mapping: &Mapping,
        task_id: i64,
        row_number: i64,
        fields: &HashMap<ColumnTag, String>,
        customer: &Customer,
        ctx: &mut RunContext,
    ) -> SyncResult<Option<Order>> {
        let invoice = non_empty(fields, ColumnTag::InvoiceNumber);
        let order_no = non_empty(fields, ColumnTag::OrderNumber);
        let contract = non_empty(fields, ColumnTag::ContractNumber);

        let Some(invoice_key) = invoice
            .map(str::to_string)
            .or_else(|| order_no.map(|n| format!("INV-{n}")))
            .or_else(|| contract.map(|c| format!("INV-{c}")))
        else {
            if mapping.auto_create_orders || mapping.has_tag(ColumnTag::InvoiceNumber) {
                return Err(SyncError::validation_error(
                    "行缺少发票号/订单号/合同号，无法创建或匹配订单",
                ));
            }
            return Ok(None);
        };

        let first_occurrence = ctx.seen_invoices.insert(invoice_key.clone());

        let mut found = self
            .orders
            .find_one(&OrderQuery::by_invoice(&invoice_key))
            .await?;
        if found.is_none() {
            if let Some(order_no) = order_no {
                found = self
                    .orders
                    .find_one(&OrderQuery::by_order_number(order_no))
                    .await?;
            }
        }

        if let Some(existing) = found {
            // 发票号命中但归属另一个客户 → 歧义
            if existing.customer_id != customer.id {
                match mapping.conflict_policy {
                    ConflictPolicy::Manual => {
                        self.record_conflict(
                            task_id,
                            ConflictKind::DataMismatch,
                            row_number,
                            fields,
                            Some(serde_json::to_value(&existing).unwrap_or_default()),
                            format!(
                                "发票号 {invoice_key} 已属于客户 {}，行内客户为 {}",
                                existing.customer_id, customer.id
                            ),
                            ctx,
                        )
                        .await?;
                        return Ok(Some(existing));
                    }
                    ConflictPolicy::Skip => return Ok(Some(existing)),
                    ConflictPolicy::Overwrite => {}
                }
            }

            if mapping.update_existing {
                let patch = order_patch(mapping, fields)?;
                let updated = self.orders.update(existing.id, patch).await?;
                ctx.stats.orders_updated += 1;
                return Ok(Some(updated));
            }
            return Ok(Some(existing));
        }

        // 首次出现之外的字面重复行绝不二次创建
        if !first_occurrence {
            ctx.stats.record_warning(
                row_number,
                format!("发票号 {invoice_key} 在本次运行中重复出现，已按首次出现处理"),
            );
            return Ok(None);
        }

        if !mapping.auto_create_orders {
            ctx.stats
                .record_warning(row_number, "订单未找到且禁止自动创建");
            return Ok(None);
        }

        let mut order_fields = order_patch(mapping, fields)?;
        order_fields.customer_id = Some(customer.id);
        order_fields.invoice_number = Some(invoice_key.clone());
        order_fields.order_number = order_no.map(str::to_string);
        order_fields.contract_number = contract.map(str::to_string);
        order_fields.created_at = mapping.defaults.use_current_timestamp.then(Utc::now);

        let created = self.orders.create(order_fields).await?;
        ctx.stats.orders_created += 1;
        debug!("Created order {} at row {}", invoice_key, row_number);
        Ok(Some(created))
    }

    /// 勘测门控是刻意严格的：日期单元格必须按两种认可格式之一
    /// 解析成功才会创建勘测，缺失或畸形日期绝不创建
    async fn resolve_inspection(
        &self,
        mapping: &Mapping,
        row_number: i64,
        fields: &HashMap<ColumnTag, String>,
        order: &Order,
        ctx: &mut RunContext,
    ) -> SyncResult<()> {
        if !mapping.auto_create_inspections {
            return Ok(());
        }

        let raw = fields
            .get(&ColumnTag::InspectionDate)
            .map(String::as_str)
            .unwrap_or_default();
        let Some(date) = parse_sheet_date(raw) else {
            if !raw.trim().is_empty() {
                ctx.stats.record_warning(
                    row_number,
                    format!("勘测日期无法解析: {raw:?}，不创建勘测"),
                );
            }
            return Ok(());
        };

        let windows_count = match non_empty(fields, ColumnTag::WindowsCount) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    ctx.stats
                        .record_warning(row_number, format!("窗数无法解析: {raw:?}"));
                    None
                }
            },
            None => None,
        };

        let existing = self
            .inspections
            .find_one(&InspectionQuery::by_order(order.id))
            .await?;

        match existing {
            None => {
                self.inspections
                    .create(InspectionFields {
                        order_id: Some(order.id),
                        scheduled_date: Some(date),
                        result: owned(fields, ColumnTag::InspectionResult),
                        notes: owned(fields, ColumnTag::Notes),
                        windows_count,
                    })
                    .await?;
                ctx.stats.inspections_created += 1;
            }
            Some(existing) if mapping.update_existing => {
                self.inspections
                    .update(
                        existing.id,
                        InspectionFields {
                            order_id: None,
                            scheduled_date: Some(date),
                            result: owned(fields, ColumnTag::InspectionResult),
                            notes: owned(fields, ColumnTag::Notes),
                            windows_count,
                        },
                    )
                    .await?;
                ctx.stats.inspections_updated += 1;
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn cache_customer(&self, ctx: &mut RunContext, customer: &Customer) {
        ctx.customer_cache.insert(
            (customer.name.clone(), customer.phone.clone()),
            customer.clone(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_conflict(
        &self,
        task_id: i64,
        kind: ConflictKind,
        row_number: i64,
        fields: &HashMap<ColumnTag, String>,
        existing: Option<serde_json::Value>,
        description: String,
        ctx: &mut RunContext,
    ) -> SyncResult<()> {
        let sheet_data: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(tag, value)| (tag.as_str().to_string(), serde_json::Value::String(value.clone())))
            .collect();
        let conflict = Conflict::new(
            task_id,
            kind,
            row_number,
            serde_json::Value::Object(sheet_data),
            existing,
            description,
        );
        self.conflicts.create(&conflict).await?;
        ctx.stats.conflicts_recorded += 1;
        Ok(())
    }
}

fn non_empty(fields: &HashMap<ColumnTag, String>, tag: ColumnTag) -> Option<&str> {
    fields
        .get(&tag)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

fn owned(fields: &HashMap<ColumnTag, String>, tag: ColumnTag) -> Option<String> {
    non_empty(fields, tag).map(str::to_string)
}

/// 只包含行内非空字段的客户更新载荷；空单元格从不清掉既有值
fn customer_patch(fields: &HashMap<ColumnTag, String>) -> CustomerFields {
    CustomerFields {
        name: None,
        phone: None,
        phone2: owned(fields, ColumnTag::CustomerPhone2),
        email: owned(fields, ColumnTag::CustomerEmail),
        address: owned(fields, ColumnTag::CustomerAddress),
        code: owned(fields, ColumnTag::CustomerCode),
        category: None,
        customer_type: None,
        branch: owned(fields, ColumnTag::Branch),
        created_at: None,
    }
}

/// 行内映射到的订单字段；金额解析失败是行级数据错误
fn order_patch(mapping: &Mapping, fields: &HashMap<ColumnTag, String>) -> SyncResult<OrderFields> {
    let order_date = non_empty(fields, ColumnTag::OrderDate).and_then(parse_sheet_date);
    let total_amount = parse_amount(fields.get(&ColumnTag::TotalAmount).map(String::as_str).unwrap_or_default())?;
    let paid_amount = parse_amount(fields.get(&ColumnTag::PaidAmount).map(String::as_str).unwrap_or_default())?;

    Ok(OrderFields {
        customer_id: None,
        invoice_number: None,
        order_number: None,
        contract_number: None,
        order_date,
        order_type: owned(fields, ColumnTag::OrderType),
        tracking_status: owned(fields, ColumnTag::TrackingStatus),
        total_amount,
        paid_amount,
        delivery_type: owned(fields, ColumnTag::DeliveryType),
        delivery_address: owned(fields, ColumnTag::DeliveryAddress),
        branch: owned(fields, ColumnTag::Branch).or_else(|| mapping.defaults.branch.clone()),
        salesperson: owned(fields, ColumnTag::Salesperson),
        notes: owned(fields, ColumnTag::Notes),
        created_at: None,
    })
}
