//! 后台任务调度与多源视频解析引擎
//!
//! 站点适配注册、HTML 抽取、视频流嗅探、任务调度、多源搜索聚合与订阅轮询。

pub mod core;
pub mod engine;
pub mod interfaces;
pub mod network;
pub mod sites;
pub mod ui;
pub mod utils;

pub use crate::core::config::AppConfig;
pub use crate::core::error::{EngineError, ErrorKind, Result};
pub use crate::core::event::{EngineEvent, EventReceiver, EventSender, create_event_channel};
pub use crate::engine::{Engine, SearchHandle, TaskHandle, TaskKind};
pub use crate::sites::SiteRegistry;
