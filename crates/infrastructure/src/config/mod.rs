//! 应用配置
//!
//! TOML文件 + SHEETSYNC__ 前缀环境变量覆盖，文件不存在时回落到内置默认值。

use std::path::Path;

use config::{builder::DefaultState, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use sheetsync_errors::{SyncError, SyncResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// Sheets REST API基础地址，测试时指向本地桩服务
    pub base_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    /// 429限流重试次数上限
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 行处理事务批大小（5-50之间合理）
    pub batch_size: usize,
    /// 快速模式：放大批次；不改变去重/幂等语义
    pub fast_mode: bool,
    /// 任务墙钟超时
    pub task_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sheets: SheetsConfig,
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> SyncResult<Self> {
        let mut builder = Self::with_defaults(config::Config::builder())?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(SyncError::config_error(format!("配置文件不存在: {path}")));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            for path in ["config/sheetsync.toml", "sheetsync.toml"] {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SHEETSYNC")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SyncError::config_error(format!("加载配置失败: {e}")))
    }

    fn with_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> SyncResult<ConfigBuilder<DefaultState>> {
        builder
            .set_default("database.url", "sqlite://sheetsync.db")
            .and_then(|b| b.set_default("database.max_connections", 5))
            .and_then(|b| b.set_default("database.min_connections", 1))
            .and_then(|b| b.set_default("sheets.base_url", "https://sheets.googleapis.com/v4"))
            .and_then(|b| b.set_default("sheets.api_key", None::<String>))
            .and_then(|b| b.set_default("sheets.access_token", None::<String>))
            .and_then(|b| b.set_default("sheets.max_retries", 3))
            .and_then(|b| b.set_default("sheets.retry_delay_ms", 1000))
            .and_then(|b| b.set_default("engine.batch_size", 20))
            .and_then(|b| b.set_default("engine.fast_mode", false))
            .and_then(|b| b.set_default("engine.task_timeout_seconds", 1800))
            .and_then(|b| b.set_default("scheduler.enabled", true))
            .and_then(|b| b.set_default("scheduler.poll_interval_seconds", 60))
            .map_err(|e| SyncError::config_error(format!("构建默认配置失败: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.engine.batch_size, 20);
        assert!(!config.engine.fast_mode);
        assert_eq!(config.scheduler.poll_interval_seconds, 60);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = AppConfig::load(Some("/nonexistent/sheetsync.toml")).unwrap_err();
        assert!(err.to_string().contains("不存在"));
    }
}
