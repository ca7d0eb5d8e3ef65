//! 订阅轮询 (Polling Worker)
//!
//! 状态机：`Idle -> Running -> Idle`。`running` 标志只在检查并置位的瞬间持锁，
//! 由 [`RunningGuard`] 在任何退出路径上复位。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::Result;
use crate::core::event::EngineEvent;
use crate::interfaces::FeedSource;

use super::dispatcher::Dispatcher;
use super::task::{TaskContext, TaskHandle, TaskKind};

pub const MSG_UPDATED: &str = "feed updated";
pub const MSG_UNCHANGED: &str = "no new content";

/// 轮询状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollState {
    pub running: bool,
    pub last_marker: Option<String>,
}

/// 运行标志守卫
///
/// Drop 时复位 `running`：正常结束、出错、panic，或任务在开始前被丢弃。
struct RunningGuard {
    state: Arc<Mutex<PollState>>,
}

impl RunningGuard {
    /// 检查并置位，已在运行时返回 None
    fn acquire(state: &Arc<Mutex<PollState>>) -> Option<Self> {
        let mut s = state.lock();
        if s.running {
            return None;
        }
        s.running = true;
        Some(Self {
            state: state.clone(),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state.lock().running = false;
    }
}

enum PollOutcome {
    Updated,
    Unchanged,
}

/// 轮询工作者
pub struct PollWorker {
    state: Arc<Mutex<PollState>>,
    feed: Arc<dyn FeedSource>,
    dispatcher: Arc<Dispatcher>,
    timer: Mutex<Option<CancellationToken>>,
}

impl PollWorker {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        dispatcher: Arc<Dispatcher>,
        last_marker: Option<String>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PollState {
                running: false,
                last_marker,
            })),
            feed,
            dispatcher,
            timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollState {
        self.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// 一次定时触发
    ///
    /// 上一个周期仍在运行时直接返回 None，不派发任何任务。
    pub fn tick(&self) -> Option<TaskHandle> {
        let Some(guard) = RunningGuard::acquire(&self.state) else {
            debug!("轮询仍在进行，跳过本次触发");
            return None;
        };

        let feed = self.feed.clone();
        let state = self.state.clone();

        let submitted = self.dispatcher.submit(TaskKind::PollTick, move |ctx| async move {
            let outcome = poll_cycle(&ctx, feed.as_ref(), &state).await;
            drop(guard);

            match outcome {
                Ok(PollOutcome::Updated) => {
                    info!("订阅有更新");
                    ctx.deliver(EngineEvent::RefreshNeeded);
                    ctx.deliver(EngineEvent::PollCompleted {
                        success: true,
                        message: MSG_UPDATED.into(),
                    });
                }
                Ok(PollOutcome::Unchanged) => {
                    debug!("订阅无变化");
                    ctx.deliver(EngineEvent::PollCompleted {
                        success: true,
                        message: MSG_UNCHANGED.into(),
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("轮询失败: {}", e);
                    ctx.deliver(EngineEvent::PollCompleted {
                        success: false,
                        message: format!("poll failed: {e}"),
                    });
                }
            }
            Ok(())
        });

        match submitted {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("无法派发轮询任务: {}", e);
                None
            }
        }
    }

    /// 启动定时器：`initial_delay` 后首次触发，此后每 `interval` 触发一次
    ///
    /// 重复调用会替换之前的定时器。定时器只持有弱引用，
    /// 工作者被释放后它在下一次触发时退出。
    pub fn start_polling(self: &Arc<Self>, initial_delay: Duration, interval: Duration) {
        let token = self.dispatcher.root_token().child_token();
        if let Some(previous) = self.timer.lock().replace(token.clone()) {
            previous.cancel();
        }

        let interval = interval.max(Duration::from_secs(1));
        info!("开始轮询，间隔 {:?}", interval);

        let worker = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                match worker.upgrade() {
                    Some(worker) => {
                        worker.tick();
                    }
                    None => break,
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
            }
            debug!("轮询定时器已停止");
        });
    }

    /// 停止定时器，返回之前是否在轮询
    pub fn stop_polling(&self) -> bool {
        match self.timer.lock().take() {
            Some(token) => {
                token.cancel();
                info!("停止轮询");
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for PollWorker {
    fn drop(&mut self) {
        if let Some(token) = self.timer.get_mut().take() {
            token.cancel();
        }
    }
}

async fn poll_cycle(
    ctx: &TaskContext,
    feed: &dyn FeedSource,
    state: &Mutex<PollState>,
) -> Result<PollOutcome> {
    ctx.checkpoint()?;
    let Some(marker) = feed.latest_marker().await? else {
        return Ok(PollOutcome::Unchanged);
    };

    {
        let mut s = state.lock();
        if s.last_marker.as_deref() == Some(marker.as_str()) {
            return Ok(PollOutcome::Unchanged);
        }
        debug!("订阅标记变化: {:?} -> {}", s.last_marker, marker);
        s.last_marker = Some(marker);
    }

    ctx.checkpoint()?;
    feed.synchronize(ctx.token()).await?;
    Ok(PollOutcome::Updated)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::core::error::EngineError;
    use crate::core::event::{EventReceiver, create_event_channel};

    /// 可控的订阅源：`latest_marker` 等待放行后返回固定标记
    struct GatedFeed {
        marker: Option<String>,
        fail: bool,
        gate: Option<Arc<Notify>>,
        marker_calls: AtomicUsize,
        syncs: AtomicUsize,
    }

    impl GatedFeed {
        fn new(marker: Option<&str>) -> Self {
            Self {
                marker: marker.map(str::to_string),
                fail: false,
                gate: None,
                marker_calls: AtomicUsize::new(0),
                syncs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FeedSource for GatedFeed {
        async fn latest_marker(&self) -> Result<Option<String>> {
            self.marker_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(EngineError::Parse("rss: unexpected eof".into()));
            }
            Ok(self.marker.clone())
        }

        async fn synchronize(&self, _cancel: &CancellationToken) -> Result<()> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup(feed: GatedFeed, last: Option<&str>) -> (Arc<GatedFeed>, PollWorker, EventReceiver) {
        let (tx, rx) = create_event_channel();
        let feed = Arc::new(feed);
        let dispatcher = Arc::new(Dispatcher::new(2, tx));
        let worker = PollWorker::new(feed.clone(), dispatcher, last.map(str::to_string));
        (feed, worker, rx)
    }

    async fn completion(rx: &EventReceiver) -> (bool, String) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
                .await
                .expect("poll completion")
                .expect("channel open");
            if let EngineEvent::PollCompleted { success, message } = event {
                return (success, message);
            }
        }
    }

    #[tokio::test]
    async fn back_to_back_ticks_run_one_cycle() {
        let gate = Arc::new(Notify::new());
        let mut feed = GatedFeed::new(Some("100"));
        feed.gate = Some(gate.clone());
        let (feed, worker, rx) = setup(feed, Some("100"));

        assert!(worker.tick().is_some());
        assert!(worker.tick().is_none());
        assert!(worker.is_running());

        gate.notify_one();
        let (success, message) = completion(&rx).await;
        assert!(success);
        assert_eq!(message, MSG_UNCHANGED);
        assert_eq!(feed.marker_calls.load(Ordering::SeqCst), 1);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn changed_marker_synchronizes_and_requests_refresh() {
        let (feed, worker, rx) = setup(GatedFeed::new(Some("200")), Some("100"));

        worker.tick();
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
            .await
            .unwrap();
        assert!(matches!(first, Some(EngineEvent::RefreshNeeded)));

        let (success, message) = completion(&rx).await;
        assert!(success);
        assert_eq!(message, MSG_UPDATED);
        assert_eq!(feed.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(worker.state().last_marker.as_deref(), Some("200"));
    }

    #[tokio::test]
    async fn first_poll_without_marker_counts_as_changed() {
        let (feed, worker, rx) = setup(GatedFeed::new(Some("1")), None);

        worker.tick();
        assert_eq!(completion(&rx).await.1, MSG_UPDATED);
        assert_eq!(feed.syncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_still_resets_running() {
        let mut feed = GatedFeed::new(Some("1"));
        feed.fail = true;
        let (feed, worker, rx) = setup(feed, None);

        worker.tick();
        let (success, message) = completion(&rx).await;
        assert!(!success);
        assert!(message.starts_with("poll failed: "), "{message}");
        assert!(!worker.is_running());
        assert_eq!(feed.syncs.load(Ordering::SeqCst), 0);

        assert!(worker.tick().is_some());
    }

    #[tokio::test]
    async fn rejected_submission_resets_running() {
        let (_feed, worker, _rx) = setup(GatedFeed::new(Some("1")), None);
        worker.dispatcher.shutdown(Duration::from_millis(100)).await;

        assert!(worker.tick().is_none());
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_initial_delay_then_on_interval() {
        let (feed, worker, _rx) = setup(GatedFeed::new(None), None);
        let worker = Arc::new(worker);

        worker.start_polling(Duration::from_secs(5), Duration::from_secs(300));
        assert!(worker.is_polling());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(feed.marker_calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(feed.marker_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(feed.marker_calls.load(Ordering::SeqCst), 2);

        assert!(worker.stop_polling());
        assert!(!worker.is_polling());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(feed.marker_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_worker_stops_its_timer() {
        let (feed, worker, _rx) = setup(GatedFeed::new(None), None);
        let worker = Arc::new(worker);

        worker.start_polling(Duration::from_secs(1), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let fired = feed.marker_calls.load(Ordering::SeqCst);
        assert!(fired >= 3, "fired {fired}");

        // 没有调用 stop_polling
        drop(worker);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(feed.marker_calls.load(Ordering::SeqCst), fired);
    }
}
