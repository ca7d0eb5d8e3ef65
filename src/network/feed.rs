//! 订阅源 (Timeline Feed)
//!
//! 轻量检查：拉取用户时间线 RSS，取第一条 `<item>` 的 `<guid>` 末段数字作为标记。
//! 重量同步：拉取收藏列表首页并交给持久化协作者。

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::config::PollConfig;
use crate::core::error::{EngineError, Result};
use crate::interfaces::{CollectionStore, FeedSource};
use crate::network::retry::RetryPolicy;
use crate::network::service::HttpService;
use crate::network::session::Session;

/// 收藏列表单页大小
const COLLECTION_PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize)]
struct CollectionPage {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    total: u64,
}

/// 用户时间线订阅源
pub struct TimelineFeed {
    http: HttpService,
    config: PollConfig,
    retry: RetryPolicy,
    store: Arc<dyn CollectionStore>,
}

impl TimelineFeed {
    pub fn new(config: PollConfig, retry: RetryPolicy, store: Arc<dyn CollectionStore>) -> Result<Self> {
        let session = Arc::new(Session::api(
            config.user_agent.clone(),
            config.access_token.clone(),
        ));
        let http = HttpService::new(session, config.feed_timeout())?;
        Ok(Self {
            http,
            config,
            retry,
            store,
        })
    }

    fn user_id(&self) -> Result<&str> {
        let id = self.config.user_id.trim();
        if id.is_empty() {
            return Err(EngineError::config("poll.user_id is not configured"));
        }
        Ok(id)
    }

    pub fn feed_url(&self) -> Result<String> {
        let base = self.config.base_url.trim_end_matches('/');
        Ok(format!("{}/feed/user/{}/timeline?type=subject", base, self.user_id()?))
    }

    pub fn collections_url(&self) -> Result<String> {
        let base = self.config.api_base_url.trim_end_matches('/');
        Ok(format!(
            "{}/v0/users/{}/collections?limit={}&offset=0",
            base,
            self.user_id()?,
            COLLECTION_PAGE_SIZE
        ))
    }
}

#[async_trait]
impl FeedSource for TimelineFeed {
    async fn latest_marker(&self) -> Result<Option<String>> {
        let url = self.feed_url()?;
        let xml = self.http.get_text(&url).await?;
        let marker = first_guid_marker(&xml)?;
        debug!("订阅标记: {:?}", marker);
        Ok(marker)
    }

    async fn synchronize(&self, cancel: &CancellationToken) -> Result<()> {
        let url = self.collections_url()?;
        let http = &self.http;
        let target = url.as_str();

        let page: CollectionPage = self
            .retry
            .run("同步收藏", cancel, move || http.get_json::<CollectionPage>(target))
            .await?;

        info!("同步收藏 {} 条 (共 {} 条)", page.data.len(), page.total);
        self.store.store(page.data).await
    }
}

/// 第一条 `<item>` 的 `<guid>` 末段，仅当其为纯数字时有效
pub fn first_guid_marker(xml: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    let (mut in_item, mut in_guid) = (false, false);
    let mut guid = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| EngineError::Parse(format!("rss: {e}")))?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"item" => in_item = true,
                b"guid" if in_item => in_guid = true,
                _ => {}
            },
            Event::Text(t) if in_guid => {
                let text = t
                    .unescape()
                    .map_err(|e| EngineError::Parse(format!("rss: {e}")))?;
                guid.push_str(&text);
            }
            Event::CData(c) if in_guid => guid.push_str(&String::from_utf8_lossy(&c)),
            Event::End(e) => match e.local_name().as_ref() {
                b"guid" if in_guid => break,
                b"item" => break,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let last = guid.trim().rsplit('/').next().unwrap_or_default();
    if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
        Ok(Some(last.to_string()))
    } else {
        Ok(None)
    }
}

/// 仅记录日志的收藏存储 (命令行使用)
pub struct LogStore;

#[async_trait]
impl CollectionStore for LogStore {
    async fn store(&self, entries: Vec<Value>) -> Result<()> {
        info!("收到 {} 条收藏记录", entries.len());
        Ok(())
    }
}
