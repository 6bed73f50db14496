use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskq_core::config::AppConfig;
use taskq_dispatcher::TaskQueueEngine;
use taskq_infrastructure::DatabaseManager;
use taskq_worker::{HandlerRegistry, WorkerService};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::shutdown::ShutdownManager;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行租约回收与清理
    Dispatcher,
    /// 仅运行Worker
    Worker,
    /// 运行所有组件
    All,
}

impl AppMode {
    /// 解析运行模式，并检查对应组件是否在配置中启用
    pub fn parse(mode: &str, config: &AppConfig) -> Result<Self> {
        match mode {
            "dispatcher" => {
                if !config.dispatcher.enabled {
                    return Err(anyhow::anyhow!("Dispatcher模式被禁用，请检查配置"));
                }
                Ok(AppMode::Dispatcher)
            }
            "worker" => {
                if !config.worker.enabled {
                    return Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"));
                }
                Ok(AppMode::Worker)
            }
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }

    fn runs_dispatcher(&self, config: &AppConfig) -> bool {
        match self {
            AppMode::Dispatcher => true,
            AppMode::Worker => false,
            AppMode::All => config.dispatcher.enabled,
        }
    }

    fn runs_worker(&self, config: &AppConfig) -> bool {
        match self {
            AppMode::Dispatcher => false,
            AppMode::Worker => true,
            AppMode::All => config.worker.enabled,
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    db: DatabaseManager,
    engine: Arc<TaskQueueEngine>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        config.validate().context("配置验证失败")?;

        let db = DatabaseManager::new(&config.database)
            .await
            .context("初始化数据库失败")?;
        db.health_check().await.context("数据库健康检查失败")?;

        let engine = Arc::new(TaskQueueEngine::new(
            db.task_store(),
            db.worker_registry(),
            db.stats_aggregator(),
            config.dispatcher.clone(),
            config.retry.clone(),
            config.cleanup.clone(),
        ));

        Ok(Self {
            config,
            mode,
            db,
            engine,
        })
    }

    pub fn engine(&self) -> Arc<TaskQueueEngine> {
        Arc::clone(&self.engine)
    }

    /// 启动各组件的后台任务
    pub fn start(&self, shutdown: &ShutdownManager) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.mode.runs_dispatcher(&self.config) {
            handles.extend(self.start_dispatcher(shutdown));
        }
        if self.mode.runs_worker(&self.config) {
            handles.push(self.start_worker(shutdown.subscribe()));
        }

        info!("应用程序已启动 {} 个后台任务", handles.len());
        handles
    }

    fn start_dispatcher(&self, shutdown: &ShutdownManager) -> Vec<JoinHandle<()>> {
        info!("启动Dispatcher服务");
        taskq_dispatcher::metrics::describe_metrics();

        let lease_manager = self.engine.lease_manager();
        let sweep_rx = shutdown.subscribe();
        let sweeper = tokio::spawn(async move { lease_manager.run(sweep_rx).await });

        let cleanup = self.engine.cleanup_service();
        let cleanup_rx = shutdown.subscribe();
        let cleaner = tokio::spawn(async move { cleanup.run(cleanup_rx).await });

        vec![sweeper, cleaner]
    }

    fn start_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let service = WorkerService::new(
            self.engine(),
            &self.config.worker,
            HandlerRegistry::with_builtin(),
        );
        info!("启动Worker服务: {}", service.worker_id());

        tokio::spawn(async move {
            if let Err(e) = service.run(shutdown_rx).await {
                error!("Worker运行失败: {}", e);
            }
        })
    }

    /// 运行直到收到关闭信号，然后在超时内等待组件退出
    pub async fn run(&self, shutdown: &ShutdownManager, grace: Duration) -> Result<()> {
        let handles = self.start(shutdown);
        let mut shutdown_rx = shutdown.subscribe();
        let _ = shutdown_rx.recv().await;

        info!("开始优雅关闭...");
        if !shutdown.wait_for(handles, grace).await {
            error!("部分组件未在 {:?} 内退出", grace);
        }
        self.db.close().await;
        Ok(())
    }
}
