//! 事件系统定义
//!
//! 引擎与交互层 (UI 线程) 之间唯一的结果投递通道。
//! 工作协程从不直接修改交互层状态，只通过这里推送有序消息。

use flume::{Receiver, Sender};

use crate::core::model::SiteResult;

/// 引擎对外事件
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// 单个站点的搜索终态 (每次搜索每个站点恰好一次)
    SiteResult(SiteResult),

    /// 视频流解析完成，`None` 表示未捕获到
    StreamResolved(Option<String>),

    /// 轮询周期结束
    PollCompleted { success: bool, message: String },

    /// 订阅有更新，交互层需要刷新
    RefreshNeeded,
}

/// 事件发送器
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<EngineEvent>,
}

impl EventSender {
    fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// 发送事件，接收端已关闭时返回 false
    ///
    /// 仅供任务上下文在投递闸门之后调用。
    pub(crate) fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// 事件接收器
pub struct EventReceiver {
    rx: Receiver<EngineEvent>,
}

impl EventReceiver {
    fn new(rx: Receiver<EngineEvent>) -> Self {
        Self { rx }
    }

    /// 异步接收事件
    pub async fn recv_async(&self) -> Option<EngineEvent> {
        self.rx.recv_async().await.ok()
    }

    /// 取出当前已排队的全部事件
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.rx.drain().collect()
    }
}

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender::new(tx), EventReceiver::new(rx))
}
