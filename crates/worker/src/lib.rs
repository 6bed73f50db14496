//! Worker运行时
//!
//! 注册、心跳、领取并在本地执行任务，将结果上报给引擎。

pub mod components;
pub mod handler;
pub mod service;

pub use handler::{EchoHandler, HandlerRegistry, SleepHandler, TaskContext, TaskHandler};
pub use service::WorkerService;
