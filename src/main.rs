use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sheetsync_infrastructure::AppConfig;

mod app;

use app::{AppMode, Application};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("sheetsync")
        .version("1.0.0")
        .about("表格数据同步系统 - Google Sheets到CRM的批量同步")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["run", "validate", "serve"])
                .default_value("serve"),
        )
        .arg(
            Arg::new("mapping")
                .long("mapping")
                .value_name("ID")
                .help("映射ID (run/validate模式必填)")
                .value_parser(clap::value_parser!(i64))
                .required_if_eq_any([("mode", "run"), ("mode", "validate")]),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode_str = matches.get_one::<String>("mode").map(String::as_str);
    let mapping_id = matches.get_one::<i64>("mapping").copied();
    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("pretty");

    // 初始化日志系统
    init_logging(log_level, log_format)?;

    info!("启动表格数据同步系统");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    // 加载配置
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    // 解析运行模式
    let mode = parse_app_mode(mode_str.unwrap_or("serve"), mapping_id)?;

    // 创建应用实例
    let app = Application::new(config).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    match mode {
        AppMode::Serve => {
            // 常驻模式：排程循环与信号等待并行
            let serve = app.run(AppMode::Serve, shutdown_rx);
            tokio::pin!(serve);
            tokio::select! {
                result = &mut serve => {
                    result?;
                }
                _ = wait_for_shutdown_signal() => {
                    info!("收到关闭信号，开始优雅关闭...");
                    let _ = shutdown_tx.send(());
                    if let Err(e) = serve.await {
                        error!("排程器关闭时发生错误: {e}");
                    }
                }
            }
        }
        mode => {
            app.run(mode, shutdown_rx).await?;
        }
    }

    info!("表格数据同步系统已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 解析应用运行模式
fn parse_app_mode(mode_str: &str, mapping_id: Option<i64>) -> Result<AppMode> {
    match mode_str {
        "run" => {
            let mapping_id = mapping_id.context("run模式需要 --mapping <ID>")?;
            Ok(AppMode::Run { mapping_id })
        }
        "validate" => {
            let mapping_id = mapping_id.context("validate模式需要 --mapping <ID>")?;
            Ok(AppMode::Validate { mapping_id })
        }
        "serve" => Ok(AppMode::Serve),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
