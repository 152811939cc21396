use std::sync::OnceLock;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::warn;

// 全局单例 Runtime，创建失败时记为 None
static RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();

/// 获取后台 Runtime，如果不存在则创建
/// 服务本身是同步回调驱动的，这里只承载少量定时任务
pub(crate) fn get_runtime() -> Option<&'static Runtime> {
    RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .enable_time()
                .worker_threads(1)
                .thread_name("camsvc-bg-worker")
                .build()
                .map_err(|e| warn!("Failed to create background runtime: {}", e))
                .ok()
        })
        .as_ref()
}

/// 延迟 `delay` 后执行 `task`，`delay` 为 0 时就地执行
///
/// task 内部会拿会话锁、调用驱动，属于阻塞操作，放到 blocking 线程池里跑。
pub(crate) fn run_after<F>(delay: Duration, task: F)
where
    F: FnOnce() + Send + 'static,
{
    if delay.is_zero() {
        task();
        return;
    }
    match get_runtime() {
        Some(rt) => {
            rt.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = tokio::task::spawn_blocking(task).await {
                    warn!("Delayed task panicked: {}", e);
                }
            });
        }
        None => {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                task();
            });
        }
    }
}

/// 把阻塞任务交给后台线程，不等待结果
pub(crate) fn spawn_blocking<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    match get_runtime() {
        Some(rt) => {
            // 不关心结果，JoinHandle 直接丢弃
            let _ = rt.spawn_blocking(task);
        }
        None => {
            std::thread::spawn(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn zero_delay_runs_inline() {
        let (tx, rx) = mpsc::channel();
        run_after(Duration::ZERO, move || tx.send(1).unwrap());
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn delayed_task_eventually_runs() {
        let (tx, rx) = mpsc::channel();
        run_after(Duration::from_millis(10), move || tx.send(2).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    }

    #[test]
    fn spawned_task_runs_off_the_caller_thread() {
        let (tx, rx) = mpsc::channel();
        let caller = std::thread::current().id();
        spawn_blocking(move || tx.send(std::thread::current().id()).unwrap());
        let worker = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker, caller);
    }
}
