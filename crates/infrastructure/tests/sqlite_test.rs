//! SQLite仓储集成测试：真实数据库文件 + 完整迁移

use chrono::{Duration, TimeZone, Utc};

use sheetsync_domain::entities::{
    ColumnKey, ColumnMapping, ColumnTag, Conflict, ConflictKind, ConflictPolicy, Frequency,
    Mapping, MappingDefaults, ResolutionStatus, SyncSchedule, SyncTask, TaskKind, TaskStatus,
};
use sheetsync_domain::ports::crm::{
    CustomerFields, CustomerQuery, CustomerStore, OrderFields, OrderQuery, OrderStore,
};
use sheetsync_domain::repositories::{
    ConflictRepository, MappingRepository, ScheduleRepository, SyncTaskRepository,
};
use sheetsync_errors::SyncError;
use sheetsync_infrastructure::database::open_pool;
use sheetsync_infrastructure::{
    SqliteConflictRepository, SqliteCrmStore, SqliteMappingRepository, SqliteScheduleRepository,
    SqliteSyncTaskRepository,
};

async fn test_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = open_pool(&url, 5).await.unwrap();
    (dir, pool)
}

fn sample_mapping() -> Mapping {
    let now = Utc::now();
    Mapping {
        id: 0,
        name: "订单导入".to_string(),
        spreadsheet_id: "sheet-123".to_string(),
        sheet_name: "عملاء 2025".to_string(),
        header_row: 0,
        start_row: 1,
        last_row_processed: None,
        last_sync: None,
        active: true,
        column_mappings: vec![
            ColumnMapping {
                key: ColumnKey::Header("الاسم".to_string()),
                tag: ColumnTag::CustomerName,
            },
            ColumnMapping {
                key: ColumnKey::Index(3),
                tag: ColumnTag::InvoiceNumber,
            },
        ],
        auto_create_customers: true,
        auto_create_orders: true,
        auto_create_inspections: false,
        auto_create_installations: false,
        update_existing: false,
        conflict_policy: ConflictPolicy::Manual,
        reverse_sync_enabled: true,
        reverse_sync_fields: vec![ColumnTag::TrackingStatus],
        defaults: MappingDefaults {
            customer_category: Some("表格导入".to_string()),
            customer_type: None,
            branch: None,
            use_current_timestamp: true,
        },
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_mapping_round_trip_with_json_columns() {
    let (_dir, pool) = test_pool().await;
    let repo = SqliteMappingRepository::new(pool);

    let created = repo.create(&sample_mapping()).await.unwrap();
    assert!(created.id > 0);

    let loaded = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.sheet_name, "عملاء 2025");
    assert_eq!(loaded.column_mappings, created.column_mappings);
    assert_eq!(loaded.conflict_policy, ConflictPolicy::Manual);
    assert_eq!(loaded.reverse_sync_fields, vec![ColumnTag::TrackingStatus]);
    assert_eq!(
        loaded.defaults.customer_category.as_deref(),
        Some("表格导入")
    );
}

#[tokio::test]
async fn test_advance_watermark() {
    let (_dir, pool) = test_pool().await;
    let repo = SqliteMappingRepository::new(pool);
    let created = repo.create(&sample_mapping()).await.unwrap();

    let ts = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
    repo.advance_watermark(created.id, 42, ts).await.unwrap();

    let loaded = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.last_row_processed, Some(42));
    assert_eq!(loaded.last_sync, Some(ts));

    let err = repo.advance_watermark(999, 1, ts).await.unwrap_err();
    assert!(matches!(err, SyncError::MappingNotFound { id: 999 }));
}

#[tokio::test]
async fn test_task_lifecycle_persistence() {
    let (_dir, pool) = test_pool().await;
    let mappings = SqliteMappingRepository::new(pool.clone());
    let tasks = SqliteSyncTaskRepository::new(pool);

    let mapping = mappings.create(&sample_mapping()).await.unwrap();
    let mut task = tasks
        .create(&SyncTask::new(mapping.id, TaskKind::Import))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    task.start().unwrap();
    task.update_progress(10, 9, 1).unwrap();
    let task = tasks.update(&task).await.unwrap();
    assert_eq!(tasks.find_running().await.unwrap().len(), 1);

    let mut task = task;
    task.complete(serde_json::json!({"orders_created": 4})).unwrap();
    let task = tasks.update(&task).await.unwrap();

    let loaded = tasks.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Completed);
    assert_eq!(loaded.processed_rows, 10);
    assert_eq!(loaded.result.unwrap()["orders_created"], 4);
    assert!(tasks.find_running().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_conflict_resolution_workflow() {
    let (_dir, pool) = test_pool().await;
    let mappings = SqliteMappingRepository::new(pool.clone());
    let tasks = SqliteSyncTaskRepository::new(pool.clone());
    let conflicts = SqliteConflictRepository::new(pool);

    let mapping = mappings.create(&sample_mapping()).await.unwrap();
    let task = tasks
        .create(&SyncTask::new(mapping.id, TaskKind::Import))
        .await
        .unwrap();

    let conflict = Conflict::new(
        task.id,
        ConflictKind::DuplicateCustomer,
        7,
        serde_json::json!({"customer_name": "Ali", "customer_phone": "0100"}),
        Some(serde_json::json!({"id": 3, "name": "Aly"})),
        "电话命中但姓名不一致".to_string(),
    );
    let created = conflicts.create(&conflict).await.unwrap();
    assert_eq!(conflicts.find_pending().await.unwrap().len(), 1);

    let mut created = created;
    created
        .resolve("admin".to_string(), Some("保留既有客户".to_string()))
        .unwrap();
    let updated = conflicts.update(&created).await.unwrap();
    assert_eq!(updated.resolution, ResolutionStatus::Resolved);
    assert_eq!(updated.resolved_by.as_deref(), Some("admin"));

    assert!(conflicts.find_pending().await.unwrap().is_empty());
    assert_eq!(conflicts.find_by_task(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_schedule_find_due_boundary() {
    let (_dir, pool) = test_pool().await;
    let mappings = SqliteMappingRepository::new(pool.clone());
    let schedules = SqliteScheduleRepository::new(pool);

    let mapping = mappings.create(&sample_mapping()).await.unwrap();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
    let schedule = SyncSchedule::new(mapping.id, Frequency::Daily, now);
    let created = schedules.create(&schedule).await.unwrap();

    // next_run == now 是到期的（含边界）
    assert_eq!(schedules.find_due(now).await.unwrap().len(), 1);
    assert!(schedules
        .find_due(now - Duration::seconds(1))
        .await
        .unwrap()
        .is_empty());

    let mut created = created;
    created.record_run(true, now);
    let updated = schedules.update(&created).await.unwrap();
    assert_eq!(updated.total_runs, 1);
    assert_eq!(updated.successful_runs, 1);
    assert!(schedules.find_due(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_crm_update_never_blanks_fields() {
    let (_dir, pool) = test_pool().await;
    let crm = SqliteCrmStore::new(pool);

    let customer = CustomerStore::create(
        &crm,
        CustomerFields {
            name: Some("Ali".to_string()),
            phone: Some("0100200300".to_string()),
            email: Some("ali@example.com".to_string()),
            phone2: Some("0111".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // 只更新地址，其余字段必须原样保留
    let updated = CustomerStore::update(
        &crm,
        customer.id,
        CustomerFields {
            address: Some("شارع التحرير 12".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(updated.email.as_deref(), Some("ali@example.com"));
    assert_eq!(updated.address.as_deref(), Some("شارع التحرير 12"));
    assert_eq!(updated.name, "Ali");

    // phone2也参与电话匹配
    let by_phone2 = CustomerStore::find_one(&crm, &CustomerQuery::by_phone("0111"))
        .await
        .unwrap();
    assert_eq!(by_phone2.unwrap().id, customer.id);
}

#[tokio::test]
async fn test_duplicate_invoice_rejected_by_schema() {
    let (_dir, pool) = test_pool().await;
    let crm = SqliteCrmStore::new(pool);

    let customer = CustomerStore::create(
        &crm,
        CustomerFields {
            name: Some("Mona".to_string()),
            phone: Some("0122".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let fields = OrderFields {
        customer_id: Some(customer.id),
        invoice_number: Some("INV-77".to_string()),
        ..Default::default()
    };
    OrderStore::create(&crm, fields.clone()).await.unwrap();
    let err = OrderStore::create(&crm, fields).await.unwrap_err();
    assert!(matches!(err, SyncError::Database(_)));

    let found = OrderStore::find_one(&crm, &OrderQuery::by_invoice("INV-77"))
        .await
        .unwrap();
    assert!(found.is_some());
}
