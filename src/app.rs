use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use sheetsync_engine::{EngineOptions, SyncEngine, SyncService};
use sheetsync_infrastructure::database::{open_pool, run_migrations};
use sheetsync_infrastructure::{
    AppConfig, GoogleSheetsClient, ResilientSheetReader, SqliteConflictRepository, SqliteCrmStore,
    SqliteMappingRepository, SqliteScheduleRepository, SqliteSyncTaskRepository,
};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 对单个映射执行一次同步后退出
    Run { mapping_id: i64 },
    /// 只校验映射配置，不触发同步
    Validate { mapping_id: i64 },
    /// 常驻进程，周期扫描到期排程
    Serve,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mappings: Arc<SqliteMappingRepository>,
    service: Arc<SyncService>,
}

impl Application {
    /// 创建新的应用实例：建库连池、跑迁移、装配引擎与服务
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化表格同步系统");

        let pool = open_pool(&config.database.url, config.database.max_connections)
            .await
            .context("创建数据库连接池失败")?;
        run_migrations(&pool).await.context("执行数据库迁移失败")?;

        let mappings = Arc::new(SqliteMappingRepository::new(pool.clone()));
        let tasks = Arc::new(SqliteSyncTaskRepository::new(pool.clone()));
        let conflicts = Arc::new(SqliteConflictRepository::new(pool.clone()));
        let schedules = Arc::new(SqliteScheduleRepository::new(pool.clone()));
        let crm = Arc::new(SqliteCrmStore::new(pool.clone()));

        let api = Arc::new(
            GoogleSheetsClient::new(config.sheets.clone()).context("创建表格API客户端失败")?,
        );
        let reader = Arc::new(ResilientSheetReader::new(api));

        let engine = Arc::new(SyncEngine::new(
            reader,
            crm.clone(),
            crm.clone(),
            crm.clone(),
            tasks.clone(),
            conflicts.clone(),
            mappings.clone(),
            EngineOptions {
                batch_size: config.engine.batch_size,
                fast_mode: config.engine.fast_mode,
            },
        ));
        let service = Arc::new(SyncService::new(
            engine,
            mappings.clone(),
            tasks,
            conflicts,
            schedules,
            config.engine.task_timeout_seconds,
        ));

        Ok(Self {
            config,
            mappings,
            service,
        })
    }

    /// 按模式运行应用程序
    pub async fn run(&self, mode: AppMode, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match mode {
            AppMode::Run { mapping_id } => self.run_once(mapping_id).await,
            AppMode::Validate { mapping_id } => self.validate(mapping_id).await,
            AppMode::Serve => self.serve(shutdown_rx).await,
        }
    }

    /// 单次同步：执行、打印结果摘要
    async fn run_once(&self, mapping_id: i64) -> Result<()> {
        let task = self
            .service
            .run_sync(mapping_id)
            .await
            .context("同步执行失败")?;

        info!(
            "任务 {} 结束，状态: {}，共 {} 行，成功 {}，失败 {}",
            task.id,
            task.status.as_str(),
            task.total_rows,
            task.successful_rows,
            task.failed_rows
        );
        if let Some(error) = &task.error_message {
            error!("任务失败原因: {error}");
        }
        if let Some(result) = &task.result {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        Ok(())
    }

    /// 只校验，不落任务
    async fn validate(&self, mapping_id: i64) -> Result<()> {
        use sheetsync_domain::repositories::MappingRepository;

        let mapping = self
            .mappings
            .find_by_id(mapping_id)
            .await?
            .with_context(|| format!("映射不存在: {mapping_id}"))?;

        let problems = mapping.validate();
        if problems.is_empty() {
            info!("映射 {} ({}) 校验通过", mapping.id, mapping.name);
        } else {
            for problem in &problems {
                warn!("映射 {}: {}", mapping.id, problem);
            }
            anyhow::bail!("映射 {} 有 {} 处配置问题", mapping.id, problems.len());
        }
        Ok(())
    }

    /// 排程循环：按固定间隔扫描到期排程，直到收到关闭信号
    async fn serve(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.scheduler.enabled {
            anyhow::bail!("排程器被禁用，请检查配置");
        }

        let poll_interval = Duration::from_secs(self.config.scheduler.poll_interval_seconds);
        info!("排程器已启动，扫描间隔 {:?}", poll_interval);
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.service.tick(Utc::now()).await {
                        Ok(started) if !started.is_empty() => {
                            info!("本轮触发 {} 个同步任务", started.len());
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("排程扫描失败: {e}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("排程器收到关闭信号，停止扫描");
                    break;
                }
            }
        }
        Ok(())
    }
}
