//! 任务单元定义
//!
//! 每个派发出去的任务都持有一个 [`TaskHandle`]：取消令牌加一道投递闸门。
//! 闸门关闭后，该任务的任何结果都不会再进入事件通道。

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::error::{EngineError, Result};
use crate::core::event::{EngineEvent, EventSender};

/// 任务编号 (进程内单调递增)
pub type TaskId = u64;

/// 任务类别，用于去重与按类取消
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TaskKind {
    SiteSearch,
    StreamResolve,
    PollTick,
}

struct HandleInner {
    id: TaskId,
    kind: TaskKind,
    token: CancellationToken,
    /// 投递闸门：取消与投递在同一把锁下互斥
    connected: Mutex<bool>,
}

/// 任务句柄
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, kind: TaskKind, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                kind,
                token,
                connected: Mutex::new(true),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled() || !*self.inner.connected.lock()
    }

    /// 取消任务并断开投递
    ///
    /// 返回后，该任务不会再有任何结果到达接收端。
    pub fn cancel(&self) {
        let mut connected = self.inner.connected.lock();
        *connected = false;
        self.inner.token.cancel();
    }

    /// 在闸门保护下投递
    fn deliver(&self, send: impl FnOnce() -> bool) -> bool {
        let connected = self.inner.connected.lock();
        if !*connected || self.inner.token.is_cancelled() {
            return false;
        }
        send()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 任务执行上下文
///
/// 任务体只能通过这里投递结果，不直接接触事件通道。
#[derive(Clone)]
pub struct TaskContext {
    handle: TaskHandle,
    events: EventSender,
}

impl TaskContext {
    pub(crate) fn new(handle: TaskHandle, events: EventSender) -> Self {
        Self { handle, events }
    }

    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    pub fn kind(&self) -> TaskKind {
        self.handle.kind()
    }

    pub fn token(&self) -> &CancellationToken {
        self.handle.token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// 安全检查点：已取消则返回 `Cancelled`
    pub fn checkpoint(&self) -> Result<()> {
        if self.handle.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// 投递事件，任务已取消或接收端关闭时返回 false
    pub fn deliver(&self, event: EngineEvent) -> bool {
        self.handle.deliver(|| self.events.emit(event))
    }
}
