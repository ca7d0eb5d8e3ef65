//! 视频流嗅探 (Stream Sniffer)
//!
//! 在独立的渲染上下文中打开剧集页，监听页面发出的每个网络请求，
//! 返回第一个命中站点模式的请求地址。
//!
//! 启动、开页与监听共用同一个截止时间；只要上下文启动成功，
//! 任何退出路径 (命中、超时、出错、取消) 都会先关闭它再返回。

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::config::BrowserConfig;
use crate::core::error::{EngineError, Result};
use crate::interfaces::StreamSniffer;
use crate::network::browser::BrowserSession;
use crate::sites::PatternSet;

/// 一次嗅探独占的渲染上下文
#[async_trait]
pub trait RenderContext: Send {
    /// 开始加载页面，返回此后页面发出的请求地址流
    async fn open(&mut self, url: &str) -> Result<BoxStream<'static, String>>;

    /// 销毁上下文，不返回错误
    async fn close(&mut self);
}

/// 渲染上下文的启动器
#[async_trait]
pub trait RenderLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn RenderContext>>;
}

/// 与具体渲染后端无关的嗅探流程
pub async fn sniff_with(
    launcher: &dyn RenderLauncher,
    url: &str,
    patterns: &PatternSet,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let deadline = Instant::now() + timeout;

    let launched = tokio::select! {
        res = tokio::time::timeout_at(deadline, launcher.launch()) => res,
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
    };
    let mut ctx = match launched {
        Ok(ctx) => ctx?,
        Err(_) => {
            debug!("启动渲染上下文超时 ({:?}): {}", timeout, url);
            return Ok(None);
        }
    };

    let watch = async {
        let requests = ctx.open(url).await?;
        Ok::<_, EngineError>(first_match(requests, patterns).await)
    };
    let result = tokio::select! {
        res = tokio::time::timeout_at(deadline, watch) => res.unwrap_or_else(|_| {
            debug!("嗅探超时 ({:?}): {}", timeout, url);
            Ok(None)
        }),
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
    };

    ctx.close().await;
    result
}

/// 请求流结束 (页面已关闭) 仍未命中则为 None
async fn first_match(
    mut requests: BoxStream<'static, String>,
    patterns: &PatternSet,
) -> Option<String> {
    while let Some(url) = requests.next().await {
        if patterns.matches(&url) {
            info!("获取到视频链接: {}", url);
            return Some(url);
        }
    }
    None
}

/// 基于 Chromium (CDP) 的嗅探器
pub struct ChromeSniffer {
    config: BrowserConfig,
}

impl ChromeSniffer {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RenderLauncher for ChromeSniffer {
    async fn launch(&self) -> Result<Box<dyn RenderContext>> {
        let session = BrowserSession::launch(&self.config).await?;
        Ok(Box::new(ChromeContext {
            session,
            navigation: None,
        }))
    }
}

#[async_trait]
impl StreamSniffer for ChromeSniffer {
    async fn sniff(
        &self,
        url: &str,
        patterns: &PatternSet,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        sniff_with(self, url, patterns, timeout, cancel).await
    }
}

struct ChromeContext {
    session: BrowserSession,
    navigation: Option<JoinHandle<()>>,
}

#[async_trait]
impl RenderContext for ChromeContext {
    async fn open(&mut self, url: &str) -> Result<BoxStream<'static, String>> {
        let page = self.session.new_page().await?;
        let requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| EngineError::Browser(e.to_string()))?;

        debug!("浏览器访问 URL: {}", url);
        let target = url.to_string();
        self.navigation = Some(tokio::spawn(async move {
            if let Err(e) = page.goto(target).await {
                debug!("页面导航未正常完成: {}", e);
            }
        }));

        Ok(requests.map(|event| event.request.url.clone()).boxed())
    }

    async fn close(&mut self) {
        if let Some(navigation) = self.navigation.take() {
            navigation.abort();
        }
        if let Err(e) = self.session.close().await {
            debug!("关闭浏览器时发生非致命错误: {}", e);
        }
    }
}
