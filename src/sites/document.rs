//! 站点适配文档 (Adapter Document)
//!
//! 声明式文档的原始形态与校验逻辑。格式错误、重复标识符、
//! 非法选择器等问题一律在加载期以 `Config` 错误拒绝。

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use url::Url;

use crate::core::error::{EngineError, Result};

use super::source::{KEYWORD_PLACEHOLDER, PatternSet, SiteSelectors, SourceConfig};

/// 文档顶层结构
#[derive(Debug, Deserialize)]
pub struct AdapterDocument {
    pub site_configs: SourceEntries,
}

/// 文档中的单个站点条目
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSource {
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    pub search_path: String,
    pub title: String,
    pub link: String,
    pub route_tabs: String,
    pub episode_containers: String,
    pub episode_items: String,
    pub video_patterns: Vec<String>,
    #[serde(default, alias = "icon_url")]
    pub icon: Option<String>,
}

/// 保持文档顺序、保留重复键的条目列表
///
/// 普通的 map 反序列化会静默覆盖重复键，这里逐项收集以便校验。
#[derive(Debug, Default)]
pub struct SourceEntries(pub Vec<(String, RawSource)>);

impl<'de> Deserialize<'de> for SourceEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = SourceEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of source identifier to source config")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, raw)) = map.next_entry::<String, RawSource>()? {
                    entries.push((id, raw));
                }
                Ok(SourceEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl AdapterDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| EngineError::config(format!("malformed adapter document: {e}")))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yml::from_str(text)
            .map_err(|e| EngineError::config(format!("malformed adapter document: {e}")))
    }
}

impl RawSource {
    /// 校验并编译为只读配置
    pub fn validate(self, id: &str) -> Result<SourceConfig> {
        let fail = |msg: String| EngineError::config(format!("source `{id}`: {msg}"));

        if id.trim().is_empty() {
            return Err(EngineError::config("source identifier is empty"));
        }

        let base_url = Url::parse(&self.base_url)
            .map_err(|e| fail(format!("base_url `{}` is invalid: {e}", self.base_url)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(fail(format!("base_url `{}` is not http(s)", self.base_url)));
        }

        if !self.search_path.contains(KEYWORD_PLACEHOLDER) {
            return Err(fail(format!(
                "search_path `{}` lacks the {KEYWORD_PLACEHOLDER} placeholder",
                self.search_path
            )));
        }

        let selectors = SiteSelectors::parse(
            &self.title,
            &self.link,
            &self.route_tabs,
            &self.episode_containers,
            &self.episode_items,
        )
        .map_err(|e| fail(e.to_string()))?;

        if self.video_patterns.is_empty() {
            return Err(fail("video_patterns is empty".into()));
        }
        let patterns = PatternSet::parse(&self.video_patterns).map_err(|e| fail(e.to_string()))?;

        Ok(SourceConfig {
            id: id.to_string(),
            name: self.name,
            base_url,
            search_path: self.search_path,
            selectors,
            patterns,
            icon_url: self.icon,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHA: &str = r#"{
        "base_url": "https://a.example",
        "search_path": "/search?wd={keyword}",
        "title": "div.item h3",
        "link": "div.item a.play",
        "route_tabs": "div.tabs span",
        "episode_containers": "ul.playlist",
        "episode_items": "li a",
        "video_patterns": [".m3u8"]
    }"#;

    #[test]
    fn keeps_duplicate_keys_for_validation() {
        let text = format!(r#"{{"site_configs": {{"alpha": {ALPHA}, "alpha": {ALPHA}}}}}"#);
        let doc = AdapterDocument::from_json(&text).unwrap();
        assert_eq!(doc.site_configs.0.len(), 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = r#"{"site_configs": {"x": {"base_url": "https://x", "bogus": 1}}}"#;
        assert!(AdapterDocument::from_json(text).is_err());
    }

    #[test]
    fn missing_placeholder_is_rejected() {
        let raw: RawSource = serde_json::from_str(&ALPHA.replace("{keyword}", "")).unwrap();
        let err = raw.validate("alpha").unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn invalid_selector_names_field() {
        let raw: RawSource = serde_json::from_str(&ALPHA.replace("li a", "li >>> a[")).unwrap();
        let err = raw.validate("alpha").unwrap_err();
        assert!(err.to_string().contains("episode_items"), "{err}");
    }

    #[test]
    fn non_http_base_is_rejected() {
        let raw: RawSource =
            serde_json::from_str(&ALPHA.replace("https://a.example", "ftp://a.example")).unwrap();
        assert!(raw.validate("alpha").is_err());
    }

    #[test]
    fn yaml_documents_are_accepted() {
        let text = r#"
site_configs:
  beta:
    base_url: https://b.example/
    search_path: /s/{keyword}
    title: a.title
    link: a.title
    route_tabs: h4
    episode_containers: ul
    episode_items: li a
    video_patterns: ["re:\\.mp4$"]
    icon: https://b.example/favicon.ico
"#;
        let doc = AdapterDocument::from_yaml(text).unwrap();
        let (id, raw) = doc.site_configs.0.into_iter().next().unwrap();
        let cfg = raw.validate(&id).unwrap();
        assert_eq!(cfg.icon_url.as_deref(), Some("https://b.example/favicon.ico"));
        assert!(cfg.patterns.matches("https://cdn.b.example/x.MP4"));
    }
}
