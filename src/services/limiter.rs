use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

/// 后端调用并发限制器
///
/// 最多同时执行 `capacity` 个调用，其余按到达顺序排队（tokio 信号量是公平的）。
/// 队列长度不设上限。
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
}

#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("Concurrency limiter is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    pub capacity: usize,
    pub active: usize,
    pub pending: usize,
}

// 计数守卫，任务被取消时同样会回退计数
struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 获得执行名额后再驱动 `task`
    pub async fn run<F>(&self, task: F) -> Result<F::Output, LimiterError>
    where
        F: Future,
    {
        let permit = {
            let _pending = CounterGuard::new(&self.pending);
            self.semaphore
                .acquire()
                .await
                .map_err(|_| LimiterError::Closed)?
        };

        let _active = CounterGuard::new(&self.active);
        let output = task.await;
        drop(permit);
        Ok(output)
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            capacity: self.capacity,
            active: self.active.load(Ordering::SeqCst),
            pending: self.pending.load(Ordering::SeqCst),
        }
    }

    // 关闭后排队中和新到达的调用都会失败
    pub fn close(&self) {
        self.semaphore.close();
        tracing::info!(stats = ?self.stats(), "Concurrency limiter closed");
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
