use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 所有后台循环订阅同一个广播通道，触发一次即全部退出。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号，已关闭时返回立即就绪的接收器
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        // 先订阅再检查标志：标志在发送前置位，两者之间的关闭不会漏掉
        let rx = self.shutdown_tx.subscribe();
        if self.is_shutdown() {
            let (tx, fired) = broadcast::channel(1);
            let _ = tx.send(());
            return fired;
        }
        rx
    }

    /// 触发关闭，重复调用无效果
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        debug!(
            "发送关闭信号给 {} 个订阅者",
            self.shutdown_tx.receiver_count()
        );
        // 没有订阅者时发送失败，可以忽略
        let _ = self.shutdown_tx.send(());
        info!("关闭信号已发送");
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// 在超时内等待后台任务结束，返回是否全部按时结束
    pub async fn wait_for(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        let joined = futures::future::join_all(handles);
        match tokio::time::timeout(timeout, joined).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("后台任务异常退出: {}", e);
                    }
                }
                true
            }
            Err(_) => {
                warn!("等待后台任务结束超时 ({:?})", timeout);
                false
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {}", e);
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_manager_basic() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());

        let mut rx = manager.subscribe();
        manager.shutdown();

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_ok());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let manager = ShutdownManager::new();
        let mut receivers = vec![manager.subscribe(), manager.subscribe(), manager.subscribe()];

        manager.shutdown();

        for rx in receivers.iter_mut() {
            let result = timeout(Duration::from_millis(100), rx.recv()).await;
            assert!(result.is_ok());
        }
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown();

        let mut rx = manager.subscribe();
        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_shutdown_never_misses_signal() {
        for _ in 0..50 {
            let manager = ShutdownManager::new();
            let subscribers: Vec<_> = (0..8)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        let mut rx = manager.subscribe();
                        timeout(Duration::from_secs(1), rx.recv()).await
                    })
                })
                .collect();
            let trigger = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.shutdown() })
            };

            trigger.await.unwrap();
            for subscriber in subscribers {
                assert!(matches!(subscriber.await.unwrap(), Ok(Ok(()))));
            }
        }
    }

    #[tokio::test]
    async fn test_double_shutdown() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();

        manager.shutdown();
        manager.shutdown();
        assert!(manager.is_shutdown());

        assert!(rx.recv().await.is_ok());
        // 第二次关闭不会再发送信号
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_wait_for_background_tasks() {
        let manager = ShutdownManager::new();

        let mut rx = manager.subscribe();
        let quick = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        manager.shutdown();
        assert!(manager.wait_for(vec![quick], Duration::from_secs(1)).await);

        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        assert!(!manager.wait_for(vec![stuck], Duration::from_millis(50)).await);
    }
}
