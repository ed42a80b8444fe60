pub mod sqlite;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use sheetsync_errors::SyncResult;

/// 打开嵌入式SQLite连接池并初始化Schema
///
/// 启用外键约束和WAL模式；建表语句全部幂等，可重复执行。
pub async fn open_pool(database_url: &str, max_connections: u32) -> SyncResult<SqlitePool> {
    debug!("Opening embedded SQLite database at: {}", database_url);

    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .connect_with(connect_options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> SyncResult<()> {
    debug!("Running SQLite database migrations");

    // 映射配置表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sheet_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            spreadsheet_id TEXT NOT NULL,
            sheet_name TEXT NOT NULL,
            header_row INTEGER NOT NULL DEFAULT 0,
            start_row INTEGER NOT NULL DEFAULT 1,
            last_row_processed INTEGER,
            last_sync DATETIME,
            active INTEGER NOT NULL DEFAULT 1,
            column_mappings TEXT NOT NULL DEFAULT '[]',
            auto_create_customers INTEGER NOT NULL DEFAULT 0,
            auto_create_orders INTEGER NOT NULL DEFAULT 0,
            auto_create_inspections INTEGER NOT NULL DEFAULT 0,
            auto_create_installations INTEGER NOT NULL DEFAULT 0,
            update_existing INTEGER NOT NULL DEFAULT 0,
            conflict_policy TEXT NOT NULL DEFAULT 'skip',
            reverse_sync_enabled INTEGER NOT NULL DEFAULT 0,
            reverse_sync_fields TEXT NOT NULL DEFAULT '[]',
            defaults TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 同步任务表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mapping_id INTEGER NOT NULL,
            kind TEXT NOT NULL DEFAULT 'IMPORT',
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            started_at DATETIME,
            completed_at DATETIME,
            total_rows INTEGER NOT NULL DEFAULT 0,
            processed_rows INTEGER NOT NULL DEFAULT 0,
            successful_rows INTEGER NOT NULL DEFAULT 0,
            failed_rows INTEGER NOT NULL DEFAULT 0,
            result TEXT,
            error_message TEXT,
            FOREIGN KEY (mapping_id) REFERENCES sheet_mappings(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 冲突记录表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            row_number INTEGER NOT NULL,
            sheet_data TEXT NOT NULL DEFAULT '{}',
            existing_data TEXT,
            description TEXT NOT NULL DEFAULT '',
            resolution TEXT NOT NULL DEFAULT 'PENDING',
            resolution_notes TEXT,
            resolved_by TEXT,
            resolved_at DATETIME,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (task_id) REFERENCES sync_tasks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 调度表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mapping_id INTEGER NOT NULL UNIQUE,
            frequency TEXT NOT NULL DEFAULT 'DAILY',
            next_run DATETIME,
            last_run DATETIME,
            total_runs INTEGER NOT NULL DEFAULT 0,
            successful_runs INTEGER NOT NULL DEFAULT 0,
            failed_runs INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (mapping_id) REFERENCES sheet_mappings(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // CRM实体表（嵌入式部署时本地承载客户/订单/勘测记录）
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone TEXT NOT NULL,
            phone2 TEXT,
            email TEXT,
            address TEXT,
            code TEXT,
            category TEXT,
            customer_type TEXT,
            branch TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id INTEGER NOT NULL,
            invoice_number TEXT NOT NULL UNIQUE,
            order_number TEXT,
            contract_number TEXT,
            order_date DATE,
            order_type TEXT,
            tracking_status TEXT,
            total_amount REAL,
            paid_amount REAL,
            delivery_type TEXT,
            delivery_address TEXT,
            branch TEXT,
            salesperson TEXT,
            notes TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (customer_id) REFERENCES customers(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inspections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL,
            scheduled_date DATE NOT NULL,
            result TEXT,
            notes TEXT,
            windows_count INTEGER,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (order_id) REFERENCES orders(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_customers_phone ON customers(phone)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_tasks_mapping ON sync_tasks(mapping_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_conflicts_task ON sync_conflicts(task_id)")
        .execute(pool)
        .await?;

    debug!("SQLite migrations completed");
    Ok(())
}
