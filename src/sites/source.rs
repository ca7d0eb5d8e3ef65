//! 站点适配配置
//!
//! 已校验、预编译的站点描述。加载后只读，由注册表独占持有。

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Regex, RegexBuilder};
use scraper::Selector;
use url::Url;

use crate::core::error::{EngineError, Result};

/// 搜索模板中的关键字占位符
pub const KEYWORD_PLACEHOLDER: &str = "{keyword}";

/// 正则模式前缀，其余字符串按子串匹配
pub const REGEX_PREFIX: &str = "re:";

/// 站点选择器集合 (预编译)
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    pub title: Selector,
    pub link: Selector,
    pub route_tab: Selector,
    pub episode_container: Selector,
    pub episode_item: Selector,
}

impl SiteSelectors {
    /// 逐个编译，失败时指出字段名
    pub fn parse(
        title: &str,
        link: &str,
        route_tab: &str,
        episode_container: &str,
        episode_item: &str,
    ) -> Result<Self> {
        Ok(Self {
            title: compile("title", title)?,
            link: compile("link", link)?,
            route_tab: compile("route_tabs", route_tab)?,
            episode_container: compile("episode_containers", episode_container)?,
            episode_item: compile("episode_items", episode_item)?,
        })
    }
}

fn compile(field: &str, css: &str) -> Result<Selector> {
    if css.trim().is_empty() {
        return Err(EngineError::config(format!("selector `{field}` is empty")));
    }
    Selector::parse(css)
        .map_err(|e| EngineError::config(format!("selector `{field}` ({css}) is invalid: {e}")))
}

/// 视频地址匹配模式
#[derive(Debug, Clone)]
pub enum VideoPattern {
    /// 大小写不敏感的子串 (已转小写)
    Substring(String),
    /// 大小写不敏感的正则
    Regex(Regex),
}

impl VideoPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix(REGEX_PREFIX) {
            Some(expr) => RegexBuilder::new(expr)
                .case_insensitive(true)
                .build()
                .map(VideoPattern::Regex)
                .map_err(|e| EngineError::config(format!("video pattern `{raw}`: {e}"))),
            None if raw.is_empty() => Err(EngineError::config("video pattern is empty")),
            None => Ok(VideoPattern::Substring(raw.to_lowercase())),
        }
    }

    fn matches(&self, url: &str, lowered: &str) -> bool {
        match self {
            VideoPattern::Substring(needle) => lowered.contains(needle.as_str()),
            VideoPattern::Regex(re) => re.is_match(url),
        }
    }
}

/// 模式并集：任意一个命中即视为命中
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<VideoPattern>,
}

impl PatternSet {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        let patterns = raw
            .iter()
            .map(|p| VideoPattern::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn matches(&self, url: &str) -> bool {
        let lowered = url.to_lowercase();
        self.patterns.iter().any(|p| p.matches(url, &lowered))
    }
}

/// 单个站点的完整配置
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub name: Option<String>,
    pub base_url: Url,
    pub search_path: String,
    pub selectors: SiteSelectors,
    pub patterns: PatternSet,
    pub icon_url: Option<String>,
}

impl SourceConfig {
    /// 展示名称，缺省为标识符
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// 构建搜索页地址，关键字经百分号编码后替换占位符
    pub fn search_url(&self, keyword: &str) -> String {
        let encoded = utf8_percent_encode(keyword.trim(), NON_ALPHANUMERIC).to_string();
        let path = self.search_path.replace(KEYWORD_PLACEHOLDER, &encoded);

        if path.starts_with("http://") || path.starts_with("https://") {
            return path;
        }

        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
