//! 站点适配注册表 (Site Adapter Registry)
//!
//! 启动时从声明式文档加载一次，之后只读。除查找外没有任何行为。

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::core::error::{EngineError, Result};

pub mod document;
pub mod extract;
pub mod similarity;
pub mod source;

pub use document::AdapterDocument;
pub use source::{PatternSet, SiteSelectors, SourceConfig};

/// 站点注册表
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sources: IndexMap<String, Arc<SourceConfig>>,
}

impl SiteRegistry {
    /// 校验文档并建立 标识符 -> 配置 映射
    pub fn load(document: AdapterDocument) -> Result<Self> {
        let mut sources = IndexMap::with_capacity(document.site_configs.0.len());

        for (id, raw) in document.site_configs.0 {
            if sources.contains_key(&id) {
                return Err(EngineError::config(format!("duplicate source identifier `{id}`")));
            }
            let config = raw.validate(&id)?;
            debug!("已加载站点适配: {} ({})", id, config.base_url);
            sources.insert(id, Arc::new(config));
        }

        sources.sort_keys();
        Ok(Self { sources })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::load(AdapterDocument::from_json(text)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::load(AdapterDocument::from_yaml(text)?)
    }

    /// 按扩展名选择解析格式，`.yaml`/`.yml` 以外一律按 JSON 处理
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read adapter document {}: {e}", path.display()))
        })?;

        let registry = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&text)?,
            _ => Self::from_json(&text)?,
        };

        info!("站点适配加载完成: {} 个", registry.len());
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Result<Arc<SourceConfig>> {
        self.sources
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSource(id.to_string()))
    }

    /// 按标识符排序的全部站点
    pub fn ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SourceConfig>> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn entry(base: &str) -> String {
        format!(
            r#"{{
                "base_url": "{base}",
                "search_path": "/search?wd={{keyword}}",
                "title": "a.title",
                "link": "a.title",
                "route_tabs": "div.tab",
                "episode_containers": "ul.eps",
                "episode_items": "li a",
                "video_patterns": [".m3u8", "/stream/"]
            }}"#
        )
    }

    #[test]
    fn loads_sources_in_identifier_order() {
        let text = format!(
            r#"{{"site_configs": {{"zeta": {}, "alpha": {}}}}}"#,
            entry("https://z.example"),
            entry("https://a.example")
        );
        let registry = SiteRegistry::from_json(&text).unwrap();
        assert_eq!(registry.ids(), vec!["alpha", "zeta"]);
        assert_eq!(registry.get("zeta").unwrap().base_url.as_str(), "https://z.example/");
    }

    #[test]
    fn duplicate_identifier_is_a_config_error() {
        let text = format!(
            r#"{{"site_configs": {{"alpha": {}, "alpha": {}}}}}"#,
            entry("https://a.example"),
            entry("https://b.example")
        );
        let err = SiteRegistry::from_json(&text).unwrap_err();
        assert!(matches!(err, EngineError::Config(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn malformed_document_is_a_config_error() {
        let err = SiteRegistry::from_json("{\"site_configs\": [").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn unknown_source_lookup_fails() {
        let registry = SiteRegistry::default();
        assert!(matches!(registry.get("nope"), Err(EngineError::UnknownSource(_))));
    }

    #[test]
    fn loads_from_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"site_configs": {{"alpha": {}}}}}"#, entry("https://a.example")).unwrap();

        let registry = SiteRegistry::load_file(file.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("alpha").unwrap().patterns.matches("https://x/stream/1"));
    }
}
