//! 协作者接口
//!
//! 引擎通过这些 Trait 访问网络、渲染与持久化能力，便于替换与测试。

pub mod feed;
pub mod fetcher;
pub mod sniffer;

pub use feed::{CollectionStore, FeedSource};
pub use fetcher::PageFetcher;
pub use sniffer::StreamSniffer;
