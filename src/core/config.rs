//! 配置管理系统 (Configuration Management)
//!
//! 负责 `config.toml` 的反序列化及其层级结构映射，支持平台配置目录、
//! 环境变量 (`HYM__SECTION__KEY`) 与默认值回退机制。

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::core::error::Result;

/// 全局应用配置
#[derive(Debug, Deserialize, Builder, Clone, Default)]
pub struct AppConfig {
    /// 任务调度引擎参数
    #[serde(default)]
    #[builder(default)]
    pub engine: EngineConfig,

    /// 自动化浏览器 (Chromium) 相关配置
    #[serde(default)]
    #[builder(default)]
    pub browser: BrowserConfig,

    /// 订阅轮询配置
    #[serde(default)]
    #[builder(default)]
    pub poll: PollConfig,

    /// 重量级请求的重试策略
    #[serde(default)]
    #[builder(default)]
    pub retry: RetryConfig,
}

/// 调度引擎参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct EngineConfig {
    /// 工作协程数量 (并行度上限)
    #[serde(default = "default_workers")]
    #[builder(default = default_workers())]
    pub workers: usize,
    /// 关闭时等待任务退出的最长时间
    #[serde(default = "default_drain_timeout_ms")]
    #[builder(default = default_drain_timeout_ms())]
    pub drain_timeout_ms: u64,
    /// 单次 HTTP 请求超时
    #[serde(default = "default_request_timeout_secs")]
    #[builder(default = default_request_timeout_secs())]
    pub request_timeout_secs: u64,
    /// 视频流嗅探默认超时
    #[serde(default = "default_sniff_timeout_secs")]
    #[builder(default = default_sniff_timeout_secs())]
    pub sniff_timeout_secs: u64,
    /// 站点适配文档路径 (JSON / YAML)
    #[serde(default = "default_sources_path")]
    #[builder(default = default_sources_path())]
    pub sources_path: String,
}

/// 浏览器引擎配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct BrowserConfig {
    /// 是否以无头模式 (Headless) 运行
    #[serde(default = "default_headless")]
    #[builder(default = default_headless())]
    pub headless: bool,
    /// 自定义可执行文件路径
    pub chrome_path: Option<String>,
}

/// 订阅 (RSS) 轮询配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_secs")]
    #[builder(default = default_poll_interval_secs())]
    pub interval_secs: u64,
    /// 启动后首次检查的延迟
    #[serde(default = "default_initial_delay_secs")]
    #[builder(default = default_initial_delay_secs())]
    pub initial_delay_secs: u64,
    #[serde(default = "default_base_url")]
    #[builder(default = default_base_url())]
    pub base_url: String,
    #[serde(default = "default_api_base_url")]
    #[builder(default = default_api_base_url())]
    pub api_base_url: String,
    #[serde(default)]
    #[builder(default)]
    pub user_id: String,
    pub access_token: Option<String>,
    #[serde(default = "default_user_agent")]
    #[builder(default = default_user_agent())]
    pub user_agent: String,
    /// 上次记录的订阅标记，作为 PollState 的初值
    pub last_marker: Option<String>,
    #[serde(default = "default_feed_timeout_secs")]
    #[builder(default = default_feed_timeout_secs())]
    pub feed_timeout_secs: u64,
}

/// 固定间隔的有界重试策略
#[derive(Debug, Deserialize, Builder, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    #[builder(default = default_max_attempts())]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    #[builder(default = default_retry_delay_secs())]
    pub delay_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_workers() -> usize {
    5
}
fn default_drain_timeout_ms() -> u64 {
    3000
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_sniff_timeout_secs() -> u64 {
    20
}
fn default_sources_path() -> String {
    "sources.json".to_string()
}
fn default_headless() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    300
}
fn default_initial_delay_secs() -> u64 {
    5
}
fn default_base_url() -> String {
    "https://bangumi.tv/".to_string()
}
fn default_api_base_url() -> String {
    "https://api.bgm.tv".to_string()
}
fn default_user_agent() -> String {
    "ACGN_HYM/1.0".to_string()
}
fn default_feed_timeout_secs() -> u64 {
    20
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    10
}

impl EngineConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_secs(self.sniff_timeout_secs)
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl AppConfig {
    /// 从文件系统与环境变量中加载并解析配置
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(local: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        if local.exists() {
            builder = builder.add_source(File::from(local));
        }

        if let Some(user_file) = Self::user_config_file()
            && user_file.exists()
        {
            builder = builder.add_source(File::from(user_file));
        }

        let settings = builder
            .add_source(Environment::with_prefix("HYM").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// 平台配置目录下的 `config.toml`
    pub fn user_config_file() -> Option<PathBuf> {
        ProjectDirs::from("tv", "hym", "hym").map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_follow_engine_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.workers, 5);
        assert_eq!(cfg.engine.sniff_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.engine.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.poll.interval(), Duration::from_secs(300));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.browser.headless);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nworkers = 2\n\n[poll]\nuser_id = \"42\"").unwrap();

        let cfg = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.engine.workers, 2);
        assert_eq!(cfg.engine.sniff_timeout_secs, 20);
        assert_eq!(cfg.poll.user_id, "42");
        assert_eq!(cfg.poll.user_agent, "ACGN_HYM/1.0");
    }
}
