use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use taskq::app::{AppMode, Application};
use taskq::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use taskq_core::config::AppConfig;
use taskq_infrastructure::{init_logging, init_metrics};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskq")
        .version("1.0.0")
        .about("分布式任务队列")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时搜索默认路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["dispatcher", "worker", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("worker-id")
                .long("worker-id")
                .value_name("ID")
                .help("Worker ID (覆盖配置)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别 (覆盖配置)")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式 (覆盖配置)")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all");

    let mut config = AppConfig::load(config_path).with_context(|| {
        format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>"))
    })?;

    if let Some(id) = matches.get_one::<String>("worker-id") {
        config.worker.worker_id = Some(id.clone());
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    init_metrics(&config.observability)?;

    info!("启动分布式任务队列");
    info!("运行模式: {mode_str}");
    if let Some(id) = &config.worker.worker_id {
        info!("Worker ID: {}", id);
    }

    let app_mode = AppMode::parse(mode_str, &config)?;
    let grace = Duration::from_secs(config.worker.shutdown_timeout_seconds + 5);
    let app = Application::new(config, app_mode).await?;

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(&shutdown_manager, grace).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    match tokio::time::timeout(grace + Duration::from_secs(5), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => error!("应用关闭超时，强制退出"),
    }

    info!("分布式任务队列已退出");
    Ok(())
}
