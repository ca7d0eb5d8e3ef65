//! 任务调度器 (Task Dispatcher)
//!
//! 固定数量的工作协程从共享队列取任务；提交永不阻塞调用方。
//! 每个任务的取消令牌都派生自调度器的根令牌，关闭时统一取消。

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flume::{Receiver, Sender};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{EngineError, ErrorKind, Result};
use crate::core::event::EventSender;

use super::task::{TaskContext, TaskHandle, TaskId, TaskKind};

/// 排队中的任务
struct Job {
    handle: TaskHandle,
    future: BoxFuture<'static, Result<()>>,
}

type Registry = Arc<Mutex<HashMap<TaskId, TaskHandle>>>;

/// 任务调度器
pub struct Dispatcher {
    tx: Mutex<Option<Sender<Job>>>,
    root: CancellationToken,
    events: EventSender,
    /// 在途任务表
    registry: Registry,
    /// 互斥类任务的当前句柄 (每类至多一个)
    current: Mutex<HashMap<TaskKind, TaskHandle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// 创建调度器并启动工作协程
    ///
    /// 必须在 Tokio 运行时内调用。
    pub fn new(workers: usize, events: EventSender) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = flume::unbounded::<Job>();
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));

        let handles = (0..workers)
            .map(|n| tokio::spawn(worker_loop(n, rx.clone(), registry.clone())))
            .collect();

        debug!("调度器已启动，工作协程数: {}", workers);

        Self {
            tx: Mutex::new(Some(tx)),
            root: CancellationToken::new(),
            events,
            registry,
            current: Mutex::new(HashMap::new()),
            workers: Mutex::new(handles),
            next_id: AtomicU64::new(1),
        }
    }

    /// 根令牌 (关闭时被取消)
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    pub fn is_shutdown(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// 在途 (排队或执行中) 任务数
    pub fn in_flight(&self) -> usize {
        self.registry.lock().len()
    }

    /// 提交任务
    ///
    /// `task` 立即被调用以构造 Future，但 Future 只在工作协程中被驱动。
    pub fn submit<F, Fut>(&self, kind: TaskKind, task: F) -> Result<TaskHandle>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(EngineError::Shutdown);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = TaskHandle::new(id, kind, self.root.child_token());
        let ctx = TaskContext::new(handle.clone(), self.events.clone());
        let future = task(ctx).boxed();

        self.registry.lock().insert(id, handle.clone());

        if tx.send(Job { handle: handle.clone(), future }).is_err() {
            self.registry.lock().remove(&id);
            return Err(EngineError::Shutdown);
        }

        debug!("提交任务 #{} ({})", id, kind);
        Ok(handle)
    }

    /// 提交互斥任务
    ///
    /// 先取消并遗忘同类的上一个句柄，再入队新任务。
    /// 旧任务在此调用返回后不会再投递任何结果。
    pub fn submit_exclusive<F, Fut>(&self, kind: TaskKind, task: F) -> Result<TaskHandle>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut current = self.current.lock();
        if let Some(previous) = current.remove(&kind) {
            debug!("取代任务 #{} ({})", previous.id(), kind);
            previous.cancel();
        }

        let handle = self.submit(kind, task)?;
        current.insert(kind, handle.clone());
        Ok(handle)
    }

    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
        let mut current = self.current.lock();
        if current
            .get(&handle.kind())
            .is_some_and(|h| h.id() == handle.id())
        {
            current.remove(&handle.kind());
        }
    }

    /// 取消某类互斥任务的当前句柄
    pub fn cancel_current(&self, kind: TaskKind) -> bool {
        match self.current.lock().remove(&kind) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// 关闭调度器
    ///
    /// 停止接收新任务、取消全部在途任务，并最多等待 `drain_timeout`。
    /// 超时仍未退出的任务被中止，其结果不会投递。返回是否在时限内全部退出。
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            return true;
        };
        drop(tx);

        info!("调度器关闭中，在途任务: {}", self.in_flight());
        self.root.cancel();
        self.current.lock().clear();

        let handles = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(drain_timeout, futures::future::join_all(handles)).await {
            Ok(_) => {
                debug!("全部工作协程已退出");
                true
            }
            Err(_) => {
                warn!("等待超时 ({:?})，中止剩余任务", drain_timeout);
                for abort in aborts {
                    abort.abort();
                }
                self.registry.lock().clear();
                false
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn worker_loop(n: usize, rx: Receiver<Job>, registry: Registry) {
    while let Ok(Job { handle, future }) = rx.recv_async().await {
        let id = handle.id();

        if handle.is_cancelled() {
            debug!("[worker {}] 跳过已取消任务 #{}", n, id);
        } else {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => match e.kind() {
                    ErrorKind::Cancelled => debug!("任务 #{} ({}) 已取消", id, handle.kind()),
                    kind => warn!("任务 #{} ({}) 失败 [{}]: {}", id, handle.kind(), kind, e),
                },
                Err(_) => warn!("任务 #{} ({}) 发生 panic", id, handle.kind()),
            }
        }

        registry.lock().remove(&id);
    }
    debug!("[worker {}] 退出", n);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::core::event::{EngineEvent, create_event_channel};

    #[tokio::test]
    async fn submitted_tasks_deliver_through_the_channel() {
        let (tx, rx) = create_event_channel();
        let dispatcher = Dispatcher::new(2, tx);

        for _ in 0..3 {
            dispatcher
                .submit(TaskKind::PollTick, |ctx| async move {
                    ctx.deliver(EngineEvent::RefreshNeeded);
                    Ok(())
                })
                .unwrap();
        }

        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
                .await
                .unwrap();
            assert!(matches!(event, Some(EngineEvent::RefreshNeeded)));
        }
        assert!(dispatcher.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn worker_count_bounds_parallelism() {
        let (tx, _rx) = create_event_channel();
        let dispatcher = Dispatcher::new(2, tx);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let (active, peak) = (active.clone(), peak.clone());
            dispatcher
                .submit(TaskKind::SiteSearch, move |_ctx| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }

        while dispatcher.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn superseded_task_never_delivers() {
        let (tx, rx) = create_event_channel();
        let dispatcher = Dispatcher::new(2, tx);
        let (release_a, wait_a) = tokio::sync::oneshot::channel::<()>();

        dispatcher
            .submit_exclusive(TaskKind::StreamResolve, |ctx| async move {
                // 模拟一个在被取代之后才返回的网络调用
                let _ = wait_a.await;
                ctx.deliver(EngineEvent::StreamResolved(Some("from-a".into())));
                Ok(())
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        dispatcher
            .submit_exclusive(TaskKind::StreamResolve, |ctx| async move {
                ctx.deliver(EngineEvent::StreamResolved(Some("from-b".into())));
                Ok(())
            })
            .unwrap();
        let _ = release_a.send(());

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
            .await
            .unwrap();
        assert!(matches!(first, Some(EngineEvent::StreamResolved(Some(ref u))) if u == "from-b"));

        assert!(dispatcher.shutdown(Duration::from_secs(1)).await);
        assert!(rx.drain().is_empty());
    }

    #[tokio::test]
    async fn cancel_current_reports_whether_anything_was_running() {
        let (tx, _rx) = create_event_channel();
        let dispatcher = Dispatcher::new(1, tx);
        assert!(!dispatcher.cancel_current(TaskKind::StreamResolve));

        let handle = dispatcher
            .submit_exclusive(TaskKind::StreamResolve, |ctx| async move {
                ctx.token().cancelled().await;
                Err(EngineError::Cancelled)
            })
            .unwrap();

        assert!(dispatcher.cancel_current(TaskKind::StreamResolve));
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work_and_discards_late_results() {
        let (tx, rx) = create_event_channel();
        let dispatcher = Dispatcher::new(1, tx);

        // 忽略取消、迟迟不返回的任务
        dispatcher
            .submit(TaskKind::SiteSearch, |ctx| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                ctx.deliver(EngineEvent::RefreshNeeded);
                Ok(())
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!dispatcher.shutdown(Duration::from_millis(50)).await);
        assert!(dispatcher.is_shutdown());

        let rejected = dispatcher.submit(TaskKind::PollTick, |_ctx| async { Ok(()) });
        assert!(matches!(rejected, Err(EngineError::Shutdown)));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.drain().is_empty());
    }

    #[tokio::test]
    async fn queued_tasks_are_skipped_once_cancelled() {
        let (tx, rx) = create_event_channel();
        let dispatcher = Dispatcher::new(1, tx);
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        dispatcher
            .submit(TaskKind::SiteSearch, |_ctx| async move {
                let _ = wait.await;
                Ok(())
            })
            .unwrap();
        let queued = dispatcher
            .submit(TaskKind::SiteSearch, |ctx| async move {
                ctx.deliver(EngineEvent::RefreshNeeded);
                Ok(())
            })
            .unwrap();

        dispatcher.cancel(&queued);
        let _ = release.send(());

        while dispatcher.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rx.drain().is_empty());
    }
}
