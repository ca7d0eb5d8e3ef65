//! 领域模型
//!
//! 搜索候选、线路、剧集以及单站点结果等跨模块共享的数据结构。

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, Result};

/// 某站点针对关键字返回的一个候选条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub title: String,
    pub link: String,
    /// 与关键字的相似度，取值 [0, 1]
    #[serde(default)]
    pub similarity: f64,
    #[serde(default)]
    pub source_id: String,
}

impl SearchCandidate {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            similarity: 0.0,
            source_id: String::new(),
        }
    }
}

/// 剧集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub name: String,
    pub link: String,
}

/// 线路：一组有序剧集 (通常对应一个镜像/CDN)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub episodes: Vec<Episode>,
}

/// 站点搜索状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SearchStatus {
    Pending,
    Success,
    Failed,
}

/// 最佳候选及其线路
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCandidate {
    pub candidate: SearchCandidate,
    pub routes: Vec<Route>,
}

/// 单个站点的搜索终态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteResult {
    pub source_id: String,
    pub status: SearchStatus,
    pub result: Option<ResolvedCandidate>,
}

impl SiteResult {
    pub fn failed(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            status: SearchStatus::Failed,
            result: None,
        }
    }

    /// 至少一条线路含有剧集才算成功
    pub fn from_routes(candidate: SearchCandidate, routes: Vec<Route>) -> Self {
        let source_id = candidate.source_id.clone();
        if routes.iter().any(|r| !r.episodes.is_empty()) {
            Self {
                source_id,
                status: SearchStatus::Success,
                result: Some(ResolvedCandidate { candidate, routes }),
            }
        } else {
            Self::failed(source_id)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SearchStatus::Success
    }
}

/// 收藏记录中的剧集引用
///
/// 上游数据存在两种形态：扁平的 `sort`，以及嵌套的 `episode.sort`。
/// 在反序列化时统一，扁平值优先。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpisodeRef {
    #[serde(default)]
    sort: Option<f64>,
    #[serde(default)]
    episode: Option<NestedEpisode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NestedEpisode {
    #[serde(default)]
    sort: Option<f64>,
}

impl EpisodeRef {
    pub fn flat(sort: f64) -> Self {
        Self {
            sort: Some(sort),
            episode: None,
        }
    }

    pub fn sort(&self) -> Option<f64> {
        self.sort
            .or_else(|| self.episode.as_ref().and_then(|e| e.sort))
    }
}

/// 一次视频流解析所选定的剧集
///
/// 只能经由 [`EpisodeSelection::from_sort`] 或 [`EpisodeSelection::from_ref`] 构造，
/// 下标总在线路范围内。
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSelection {
    source_id: String,
    route: Route,
    /// 0 起始的数组下标
    index: usize,
}

impl EpisodeSelection {
    /// 将 1 起始的 `sort` 转换为数组下标，越界即失败
    pub fn from_sort(source_id: impl Into<String>, route: Route, sort: f64) -> Result<Self> {
        let len = route.episodes.len();
        if sort.fract() != 0.0 || sort < 1.0 || sort > len as f64 {
            return Err(EngineError::EpisodeOutOfRange { sort, len });
        }

        Ok(Self {
            source_id: source_id.into(),
            index: sort as usize - 1,
            route,
        })
    }

    /// 按收藏记录中的剧集引用选择，记录缺少 `sort` 时失败
    pub fn from_ref(source_id: impl Into<String>, route: Route, episode: &EpisodeRef) -> Result<Self> {
        let sort = episode
            .sort()
            .ok_or_else(|| EngineError::Parse("episode record carries no sort".into()))?;
        Self::from_sort(source_id, route, sort)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn episode(&self) -> &Episode {
        &self.route.episodes[self.index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(n: usize) -> Route {
        Route {
            name: "line 1".into(),
            episodes: (1..=n)
                .map(|i| Episode {
                    name: format!("第{i}集"),
                    link: format!("https://a.example/play/{i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn sort_one_selects_first_episode() {
        let sel = EpisodeSelection::from_sort("alpha", route(3), 1.0).unwrap();
        assert_eq!(sel.index(), 0);
        assert_eq!(sel.source_id(), "alpha");
        assert_eq!(sel.episode().link, "https://a.example/play/1");
    }

    #[test]
    fn sort_outside_range_is_rejected() {
        for sort in [0.0, 4.0, -1.0, 1.5] {
            let err = EpisodeSelection::from_sort("alpha", route(3), sort).unwrap_err();
            assert!(matches!(err, EngineError::EpisodeOutOfRange { len: 3, .. }));
        }
    }

    #[test]
    fn flat_sort_wins_over_nested() {
        let both: EpisodeRef =
            serde_json::from_str(r#"{"sort": 2, "episode": {"sort": 7}}"#).unwrap();
        assert_eq!(both.sort(), Some(2.0));

        let nested: EpisodeRef = serde_json::from_str(r#"{"episode": {"sort": 7}}"#).unwrap();
        assert_eq!(nested.sort(), Some(7.0));

        let none: EpisodeRef = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(none.sort(), None);
    }

    #[test]
    fn last_episode_is_reachable() {
        let sel = EpisodeSelection::from_sort("alpha", route(3), 3.0).unwrap();
        assert_eq!(sel.index(), 2);
        assert_eq!(sel.episode().link, "https://a.example/play/3");
        assert_eq!(sel.route().episodes.len(), 3);
    }

    #[test]
    fn selection_from_collection_record() {
        let nested: EpisodeRef = serde_json::from_str(r#"{"episode": {"sort": 2}}"#).unwrap();
        let sel = EpisodeSelection::from_ref("alpha", route(3), &nested).unwrap();
        assert_eq!(sel.episode().link, "https://a.example/play/2");

        let sel = EpisodeSelection::from_ref("alpha", route(3), &EpisodeRef::flat(1.0)).unwrap();
        assert_eq!(sel.index(), 0);

        let beyond: EpisodeRef = serde_json::from_str(r#"{"sort": 9}"#).unwrap();
        assert!(matches!(
            EpisodeSelection::from_ref("alpha", route(3), &beyond),
            Err(EngineError::EpisodeOutOfRange { len: 3, .. })
        ));

        let bare: EpisodeRef = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert!(matches!(
            EpisodeSelection::from_ref("alpha", route(3), &bare),
            Err(EngineError::Parse(_))
        ));
    }

    #[test]
    fn routes_without_episodes_fail() {
        let candidate = SearchCandidate {
            source_id: "alpha".into(),
            ..SearchCandidate::new("t", "https://a.example/1")
        };
        let empty = Route {
            name: "x".into(),
            episodes: vec![],
        };
        assert_eq!(
            SiteResult::from_routes(candidate.clone(), vec![empty]).status,
            SearchStatus::Failed
        );
        assert!(SiteResult::from_routes(candidate, vec![route(1)]).is_success());
    }
}
