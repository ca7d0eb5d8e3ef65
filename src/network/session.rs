use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue};

/// 浏览器风格的默认 User-Agent
pub const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 请求会话：UA、凭据与附加请求头
#[derive(Debug, Default)]
pub struct Session {
    pub ua: Arc<RwLock<String>>,
    pub bearer: Arc<RwLock<Option<String>>>,
    pub extra_headers: Arc<RwLock<HeaderMap>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// 抓取站点页面用的会话，模拟常规浏览器请求头
    pub fn browser_like() -> Self {
        let session = Self::new();
        session.set_ua(BROWSER_UA.to_string());

        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(
            "Accept-Language",
            HeaderValue::from_static("zh-CN,zh;q=0.8,zh-TW;q=0.7,zh-HK;q=0.5,en-US;q=0.3,en;q=0.2"),
        );
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        session.set_headers(headers);
        session
    }

    /// 访问订阅源与 API 用的会话
    pub fn api(ua: impl Into<String>, token: Option<String>) -> Self {
        let session = Self::new();
        session.set_ua(ua.into());
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            session.set_bearer(token);
        }
        session
    }

    pub fn set_ua(&self, ua: String) {
        *self.ua.write() = ua;
    }

    pub fn set_bearer(&self, token: String) {
        *self.bearer.write() = Some(token);
    }

    pub fn set_headers(&self, headers: HeaderMap) {
        *self.extra_headers.write() = headers;
    }

    pub fn get_ua(&self) -> String {
        self.ua.read().clone()
    }

    pub fn get_bearer(&self) -> Option<String> {
        self.bearer.read().clone()
    }

    pub fn get_headers(&self) -> HeaderMap {
        self.extra_headers.read().clone()
    }
}
