use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskq_core::Task;

/// 交给处理器的执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: Task,
    pub worker_id: String,
}

impl TaskContext {
    pub fn payload(&self) -> &serde_json::Value {
        &self.task.payload
    }
}

/// 任务处理器
///
/// 按任务名分派。返回的 JSON 写入任务的 `result`，返回错误则按重试策略处理。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, context: &TaskContext) -> anyhow::Result<Option<serde_json::Value>>;
}

/// 任务名到处理器的映射
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置 `echo` 与 `sleep` 处理器
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoHandler));
        registry.register("sleep", Arc::new(SleepHandler));
        registry
    }

    pub fn register(&mut self, task_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_name.into(), handler);
    }

    /// 没有匹配的处理器时使用
    pub fn set_fallback(&mut self, handler: Arc<dyn TaskHandler>) {
        self.fallback = Some(handler);
    }

    pub fn get(&self, task_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .get(task_name)
            .cloned()
            .or_else(|| self.fallback.clone())
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// 原样返回 payload
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, context: &TaskContext) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(Some(context.payload().clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepParams {
    pub millis: u64,
    /// 睡眠结束后以该消息失败
    #[serde(default)]
    pub fail_with: Option<String>,
}

/// 按 payload 睡眠，用于演示超时与重试
pub struct SleepHandler;

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn handle(&self, context: &TaskContext) -> anyhow::Result<Option<serde_json::Value>> {
        let params: SleepParams = serde_json::from_value(context.payload().clone())
            .map_err(|e| anyhow::anyhow!("解析sleep任务参数失败: {e}"))?;

        tokio::time::sleep(Duration::from_millis(params.millis)).await;

        match params.fail_with {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(Some(serde_json::json!({ "slept_ms": params.millis }))),
        }
    }
}
