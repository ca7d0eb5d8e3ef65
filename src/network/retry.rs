//! 有界重试 (Bounded Retry)
//!
//! 固定间隔、固定次数。取消错误不重试，等待期间也响应取消。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::config::RetryConfig;
use crate::core::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: cfg.delay(),
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub async fn run<F, Fut, T>(
        &self,
        desc: impl Display,
        cancel: &CancellationToken,
        task: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match task().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() || attempts >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "任务失败 [{}] (第 {}/{} 次): {}。将在 {:?} 后重试...",
                        desc, attempts, self.max_attempts, e, self.delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(self.delay) => {}
                    }
                }
            }
        }
    }
}
