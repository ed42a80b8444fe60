//! 同步引擎端到端测试：内存表格 + 内存CRM + 内存仓储

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use sheetsync_domain::entities::{
    ColumnKey, ColumnMapping, ColumnTag, ConflictKind, ConflictPolicy, Frequency, Mapping,
    MappingDefaults, SyncSchedule, TaskStatus,
};
use sheetsync_domain::ports::crm::{CustomerFields, CustomerStore};
use sheetsync_engine::test_utils::{
    InMemoryConflicts, InMemoryCrm, InMemoryMappings, InMemorySchedules, InMemorySheets,
    InMemoryTasks,
};
use sheetsync_engine::{EngineOptions, ReverseSyncService, SyncEngine, SyncService};

const SPREADSHEET: &str = "sheet-abc";
const SHEET: &str = "عملاء 2025";

fn index_mapping() -> Mapping {
    let now = Utc::now();
    Mapping {
        id: 1,
        name: "订单导入".to_string(),
        spreadsheet_id: SPREADSHEET.to_string(),
        sheet_name: SHEET.to_string(),
        header_row: 0,
        start_row: 1,
        last_row_processed: None,
        last_sync: None,
        active: true,
        column_mappings: vec![
            ColumnMapping {
                key: ColumnKey::Index(0),
                tag: ColumnTag::CustomerName,
            },
            ColumnMapping {
                key: ColumnKey::Index(1),
                tag: ColumnTag::CustomerPhone,
            },
            ColumnMapping {
                key: ColumnKey::Index(2),
                tag: ColumnTag::InvoiceNumber,
            },
            ColumnMapping {
                key: ColumnKey::Index(3),
                tag: ColumnTag::TotalAmount,
            },
            ColumnMapping {
                key: ColumnKey::Index(4),
                tag: ColumnTag::InspectionDate,
            },
        ],
        auto_create_customers: true,
        auto_create_orders: true,
        auto_create_inspections: true,
        auto_create_installations: false,
        update_existing: false,
        conflict_policy: ConflictPolicy::Skip,
        reverse_sync_enabled: false,
        reverse_sync_fields: vec![],
        defaults: MappingDefaults {
            customer_category: Some("表格导入".to_string()),
            customer_type: None,
            branch: Some("القاهرة".to_string()),
            use_current_timestamp: true,
        },
        created_at: now,
        updated_at: now,
    }
}

fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect()
}

struct Harness {
    sheets: Arc<InMemorySheets>,
    crm: Arc<InMemoryCrm>,
    mappings: Arc<InMemoryMappings>,
    tasks: Arc<InMemoryTasks>,
    conflicts: Arc<InMemoryConflicts>,
    schedules: Arc<InMemorySchedules>,
    service: SyncService,
}

fn harness(mapping: Mapping) -> Harness {
    let sheets = Arc::new(InMemorySheets::new());
    let crm = Arc::new(InMemoryCrm::new());
    let mappings = Arc::new(InMemoryMappings::with(vec![mapping]));
    let tasks = Arc::new(InMemoryTasks::default());
    let conflicts = Arc::new(InMemoryConflicts::default());
    let schedules = Arc::new(InMemorySchedules::default());

    let engine = Arc::new(SyncEngine::new(
        sheets.clone(),
        crm.clone(),
        crm.clone(),
        crm.clone(),
        tasks.clone(),
        conflicts.clone(),
        mappings.clone(),
        EngineOptions::default(),
    ));
    let service = SyncService::new(
        engine,
        mappings.clone(),
        tasks.clone(),
        conflicts.clone(),
        schedules.clone(),
        1800,
    );

    Harness {
        sheets,
        crm,
        mappings,
        tasks,
        conflicts,
        schedules,
        service,
    }
}

#[tokio::test]
async fn test_basic_import_creates_entities() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["الاسم", "الهاتف", "فاتورة", "المبلغ", "المعاينة"],
            &["Ali Hassan", "0100200300", "INV-1", "1,500.50", "2025-03-15"],
            &["Mona Adel", "0111222333", "INV-2", "800", "20/03/2025"],
        ]),
    );

    let task = h.service.run_sync(1).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_rows, 2);
    assert_eq!(task.processed_rows, 2);
    assert_eq!(task.successful_rows, 2);
    assert_eq!(h.crm.customers.lock().unwrap().len(), 2);

    let orders = h.crm.orders.lock().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].invoice_number, "INV-1");
    assert_eq!(orders[0].total_amount, Some(1500.50));
    assert_eq!(orders[0].branch.as_deref(), Some("القاهرة"));
    drop(orders);

    let inspections = h.crm.inspections.lock().unwrap();
    assert_eq!(inspections.len(), 2);
    assert_eq!(
        inspections[1].scheduled_date,
        chrono::NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()
    );
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali Hassan", "0100200300", "INV-1", "1500", "2025-03-15"],
            &["Mona Adel", "0111222333", "INV-2", "800", ""],
        ]),
    );

    let first = h.service.run_sync(1).await.unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    let second = h.service.run_sync(1).await.unwrap();
    assert_eq!(second.status, TaskStatus::Completed);

    // 第二次运行不得新建任何记录
    assert_eq!(h.crm.customers.lock().unwrap().len(), 2);
    assert_eq!(h.crm.orders.lock().unwrap().len(), 2);
    assert_eq!(h.crm.inspections.lock().unwrap().len(), 1);
    assert_eq!(second.successful_rows, 2);
    assert_eq!(second.failed_rows, 0);
}

#[tokio::test]
async fn test_duplicate_invoice_rows_create_one_order() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali", "0100", "INV-1", "100", ""],
            &["Ali", "0100", "INV-1", "100", ""],
        ]),
    );

    let task = h.service.run_sync(1).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.processed_rows, 2);
    assert_eq!(h.crm.customers.lock().unwrap().len(), 1);
    assert_eq!(h.crm.orders.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unparseable_inspection_date_gates_creation() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali", "0100", "INV-1", "100", "not-a-date"],
        ]),
    );

    let task = h.service.run_sync(1).await.unwrap();

    // 订单照常创建，勘测因日期畸形而被门控掉
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(h.crm.orders.lock().unwrap().len(), 1);
    assert_eq!(h.crm.inspections.lock().unwrap().len(), 0);

    let result = task.result.unwrap();
    let warnings = result["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["row_number"], 2);
}

#[tokio::test]
async fn test_row_error_does_not_abort_run() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali", "0100", "INV-1", "abc", ""],
            &["Mona", "0111", "INV-2", "250", ""],
        ]),
    );

    let task = h.service.run_sync(1).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.failed_rows, 1);
    assert_eq!(task.successful_rows, 1);
    assert_eq!(h.crm.orders.lock().unwrap().len(), 1);
    assert_eq!(h.crm.orders.lock().unwrap()[0].invoice_number, "INV-2");

    let result = task.result.unwrap();
    let errors = result["errors"].as_array().unwrap();
    assert_eq!(errors[0]["row_number"], 2);
}

#[tokio::test]
async fn test_invalid_mapping_starts_no_task() {
    let mut mapping = index_mapping();
    mapping.start_row = 0; // 等于表头行，非法
    let h = harness(mapping);

    let err = h.service.run_sync(1).await.unwrap_err();
    assert!(err.to_string().contains("校验失败"));
    assert!(h.tasks.rows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_existing_never_blanks_fields() {
    let mut mapping = index_mapping();
    mapping.update_existing = true;
    mapping.conflict_policy = ConflictPolicy::Overwrite;
    mapping.column_mappings.push(ColumnMapping {
        key: ColumnKey::Index(5),
        tag: ColumnTag::CustomerEmail,
    });
    let h = harness(mapping);

    h.crm
        .create(CustomerFields {
            name: Some("Ali".to_string()),
            phone: Some("0100".to_string()),
            email: Some("ali@example.com".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    // 行里邮箱列为空，不得清掉既有值
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date", "email"],
            &["Ali", "0100", "INV-9", "100", "", ""],
        ]),
    );
    let task = h.service.run_sync(1).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    let customers = h.crm.customers.lock().unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].email.as_deref(), Some("ali@example.com"));
}

#[tokio::test]
async fn test_name_mismatch_records_conflict_under_manual_policy() {
    let mut mapping = index_mapping();
    mapping.conflict_policy = ConflictPolicy::Manual;
    let h = harness(mapping);

    h.crm
        .create(CustomerFields {
            name: Some("Ali Hassan".to_string()),
            phone: Some("0100".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    // 同一电话，不同姓名
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Omar Samir", "0100", "INV-1", "100", ""],
        ]),
    );
    let task = h.service.run_sync(1).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    // 不新建客户，订单挂在既有客户上
    assert_eq!(h.crm.customers.lock().unwrap().len(), 1);
    assert_eq!(h.crm.orders.lock().unwrap().len(), 1);

    let conflicts = h.conflicts.rows.lock().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, ConflictKind::DuplicateCustomer);
    assert_eq!(conflicts[0].row_number, 2);
    assert_eq!(conflicts[0].sheet_data["customer_name"], "Omar Samir");
}

#[tokio::test]
async fn test_missing_order_key_is_row_error() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali", "0100", "", "100", ""],
        ]),
    );

    let task = h.service.run_sync(1).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.failed_rows, 1);
    assert_eq!(h.crm.orders.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn test_watermark_advances_only_on_success() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali", "0100", "INV-1", "100", ""],
            &["Mona", "0111", "INV-2", "100", ""],
        ]),
    );

    h.service.run_sync(1).await.unwrap();
    let mapping = h.mappings.rows.lock().unwrap()[0].clone();
    assert_eq!(mapping.last_row_processed, Some(3));
    assert!(mapping.last_sync.is_some());
}

#[tokio::test]
async fn test_fetch_failure_fails_task() {
    let h = harness(index_mapping());
    // 不放表格，取数直接失败

    let err = h.service.run_sync(1).await;
    // 服务返回任务而非错误：失败被记录在任务上
    let task = err.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.is_some());
    // 水位线不得前进
    assert!(h.mappings.rows.lock().unwrap()[0].last_row_processed.is_none());
}

#[tokio::test]
async fn test_mapping_not_found() {
    let h = harness(index_mapping());
    let err = h.service.run_sync(99).await.unwrap_err();
    assert!(matches!(
        err,
        sheetsync_errors::SyncError::MappingNotFound { id: 99 }
    ));
}

#[tokio::test]
async fn test_schedule_tick_runs_due_mappings() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali", "0100", "INV-1", "100", ""],
        ]),
    );

    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let schedule = SyncSchedule::new(1, Frequency::Daily, now - Duration::minutes(5));
    h.schedules
        .rows
        .lock()
        .unwrap()
        .push(with_id(schedule, 1));

    let started = h.service.tick(now).await.unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].status, TaskStatus::Completed);

    let schedule = h.schedules.rows.lock().unwrap()[0].clone();
    assert_eq!(schedule.total_runs, 1);
    assert_eq!(schedule.successful_runs, 1);
    assert!(schedule.next_run.unwrap() > now);

    // 同一时刻再tick一次：next_run已推进，不再到期
    let started = h.service.tick(now).await.unwrap();
    assert!(started.is_empty());
}

#[tokio::test]
async fn test_once_schedule_deactivates_after_run() {
    let h = harness(index_mapping());
    h.sheets.put_sheet(
        SPREADSHEET,
        SHEET,
        grid(&[
            &["name", "phone", "invoice", "amount", "date"],
            &["Ali", "0100", "INV-1", "100", ""],
        ]),
    );

    let now = Utc::now();
    let schedule = SyncSchedule::new(1, Frequency::Once, now - Duration::minutes(1));
    h.schedules
        .rows
        .lock()
        .unwrap()
        .push(with_id(schedule, 1));

    h.service.tick(now).await.unwrap();

    let schedule = h.schedules.rows.lock().unwrap()[0].clone();
    assert!(!schedule.active);
    assert_eq!(schedule.total_runs, 1);
}

#[tokio::test]
async fn test_reverse_push_writes_whitelisted_index_columns() {
    let mut mapping = index_mapping();
    mapping.reverse_sync_enabled = true;
    mapping.reverse_sync_fields = vec![ColumnTag::TotalAmount];

    let sheets = Arc::new(InMemorySheets::new());
    let reverse = ReverseSyncService::new(sheets.clone());

    let mut fields = HashMap::new();
    fields.insert(ColumnTag::TotalAmount, "1750".to_string());
    fields.insert(ColumnTag::CustomerName, "Ali".to_string()); // 不在白名单

    let report = reverse.push(&mapping, &[(5, fields)]).await.unwrap();

    assert_eq!(report.cells_written, 1);
    assert_eq!(report.cells_skipped, 1);
    let writes = sheets.writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1, format!("'{SHEET}'!D5"));
    assert_eq!(writes[0].2, vec![vec!["1750".to_string()]]);
}

#[tokio::test]
async fn test_reverse_push_requires_enablement() {
    let sheets = Arc::new(InMemorySheets::new());
    let reverse = ReverseSyncService::new(sheets);
    let err = reverse.push(&index_mapping(), &[]).await.unwrap_err();
    assert!(matches!(err, sheetsync_errors::SyncError::ReverseSync(_)));
}

fn with_id(mut schedule: SyncSchedule, id: i64) -> SyncSchedule {
    schedule.id = id;
    schedule
}
