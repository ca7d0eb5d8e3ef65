//! 网络层
//!
//! HTTP 服务 (带会话中间件)、浏览器会话、视频流嗅探与订阅源。

pub mod browser;
pub mod feed;
pub mod middleware;
pub mod retry;
pub mod service;
pub mod session;
pub mod sniffer;

pub use feed::{LogStore, TimelineFeed};
pub use retry::RetryPolicy;
pub use service::HttpService;
pub use session::Session;
pub use sniffer::ChromeSniffer;
