use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::engine::SyncEngine;
use sheetsync_domain::entities::{Conflict, SyncTask, TaskKind};
use sheetsync_domain::repositories::{
    ConflictRepository, MappingRepository, ScheduleRepository, SyncTaskRepository,
};
use sheetsync_errors::{SyncError, SyncResult};

/// 同步服务 - 引擎之上的编排层
///
/// 负责映射校验、映射级咨询锁、任务超时与排程扫描。校验失败
/// 不落任何任务记录；同一映射同一时刻最多一个运行中任务。
pub struct SyncService {
    engine: Arc<SyncEngine>,
    mappings: Arc<dyn MappingRepository>,
    tasks: Arc<dyn SyncTaskRepository>,
    conflicts: Arc<dyn ConflictRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    /// 进程内映射级锁表；锁粒度是映射，不是全局
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    task_timeout: Duration,
}

impl SyncService {
    pub fn new(
        engine: Arc<SyncEngine>,
        mappings: Arc<dyn MappingRepository>,
        tasks: Arc<dyn SyncTaskRepository>,
        conflicts: Arc<dyn ConflictRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        task_timeout_seconds: u64,
    ) -> Self {
        Self {
            engine,
            mappings,
            tasks,
            conflicts,
            schedules,
            locks: Mutex::new(HashMap::new()),
            task_timeout: Duration::from_secs(task_timeout_seconds),
        }
    }

    fn try_lock_mapping(&self, mapping_id: i64) -> SyncResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| SyncError::Internal("映射锁表已中毒".to_string()))?;
            locks
                .entry(mapping_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned()
            .map_err(|_| SyncError::MappingBusy { mapping_id })
    }

    /// 对一个映射执行一次导入同步，返回最终任务记录
    ///
    /// 校验失败、映射不存在或映射正忙时直接返回错误，不创建任务。
    /// 引擎内的失败（包括超时）记录在返回的任务上。
    #[instrument(skip(self))]
    pub async fn run_sync(&self, mapping_id: i64) -> SyncResult<SyncTask> {
        let mapping = self
            .mappings
            .find_by_id(mapping_id)
            .await?
            .ok_or(SyncError::MappingNotFound { id: mapping_id })?;

        let problems = mapping.validate();
        if !problems.is_empty() {
            return Err(SyncError::validation_error(format!(
                "映射 {} 校验失败: {}",
                mapping.name,
                problems.join("; ")
            )));
        }

        // 任务创建前取锁；锁守卫活到本函数末尾
        let _guard = self.try_lock_mapping(mapping_id)?;

        let mut task = self
            .tasks
            .create(&SyncTask::new(mapping_id, TaskKind::Import))
            .await?;
        info!("Starting sync task {} for mapping {}", task.id, mapping_id);

        match tokio::time::timeout(self.task_timeout, self.engine.run(&mapping, &mut task)).await {
            Ok(Ok(_stats)) => {}
            Ok(Err(e)) => {
                // 引擎已把任务标记为失败
                warn!("Sync task {} failed: {}", task.id, e);
            }
            Err(_) => {
                let timeout_err = SyncError::TaskTimeout {
                    task_id: task.id,
                    timeout_seconds: self.task_timeout.as_secs(),
                };
                // 引擎内的task副本已失效，按仓库中的最新状态收尾
                if let Some(mut current) = self.tasks.find_by_id(task.id).await? {
                    if !current.status.is_terminal() {
                        current.fail(timeout_err.to_string())?;
                        task = self.tasks.update(&current).await?;
                    } else {
                        task = current;
                    }
                }
                warn!("Sync task {} timed out", task.id);
            }
        }

        Ok(task)
    }

    /// 排程扫描：把所有到期排程各跑一次，返回产生的任务
    ///
    /// 映射正忙的排程原样留到下一轮；其余结果（成败皆然）都
    /// 记入排程计数并推进next_run。
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncTask>> {
        let due = self.schedules.find_due(now).await?;
        let mut started = Vec::new();

        for mut schedule in due {
            debug!("Schedule {} due for mapping {}", schedule.id, schedule.mapping_id);
            match self.run_sync(schedule.mapping_id).await {
                Ok(task) => {
                    let success = task.error_message.is_none();
                    schedule.record_run(success, now);
                    self.schedules.update(&schedule).await?;
                    started.push(task);
                }
                Err(SyncError::MappingBusy { mapping_id }) => {
                    debug!("Mapping {} busy, schedule {} deferred", mapping_id, schedule.id);
                }
                Err(e) => {
                    warn!("Schedule {} run failed: {}", schedule.id, e);
                    schedule.record_run(false, now);
                    self.schedules.update(&schedule).await?;
                }
            }
        }
        Ok(started)
    }

    /// 取消一个未终结的任务
    pub async fn cancel_task(&self, task_id: i64) -> SyncResult<SyncTask> {
        let mut task = self
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or(SyncError::TaskNotFound { id: task_id })?;
        task.cancel()?;
        self.tasks.update(&task).await
    }

    /// 人工解决一条冲突
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        actor: String,
        notes: Option<String>,
    ) -> SyncResult<Conflict> {
        let mut conflict = self
            .conflicts
            .find_by_id(conflict_id)
            .await?
            .ok_or(SyncError::ConflictNotFound { id: conflict_id })?;
        conflict.resolve(actor, notes)?;
        self.conflicts.update(&conflict).await
    }

    /// 人工忽略一条冲突
    pub async fn ignore_conflict(
        &self,
        conflict_id: i64,
        notes: Option<String>,
    ) -> SyncResult<Conflict> {
        let mut conflict = self
            .conflicts
            .find_by_id(conflict_id)
            .await?
            .ok_or(SyncError::ConflictNotFound { id: conflict_id })?;
        conflict.ignore(notes)?;
        self.conflicts.update(&conflict).await
    }
}
