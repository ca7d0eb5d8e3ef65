//! HTML 选择器抽取
//!
//! 无状态纯函数：相同输入总是得到相同输出。选择器未命中返回空列表，
//! 站点缺少内容不视为错误。

use scraper::{ElementRef, Html};
use url::Url;

use crate::core::model::{Episode, Route, SearchCandidate};
use crate::utils::resolve_link;

use super::source::SiteSelectors;

/// 元素的可见文本 (去除首尾空白)
fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// 抽取搜索结果
///
/// 标题与链接按页面顺序一一配对，多出的一侧被丢弃；
/// 缺少 `href` 的链接跳过。相似度留给排序阶段填写。
pub fn extract_candidates(body: &str, selectors: &SiteSelectors, base: &Url) -> Vec<SearchCandidate> {
    let doc = Html::parse_document(body);

    let titles = doc.select(&selectors.title);
    let links = doc.select(&selectors.link);

    titles
        .zip(links)
        .filter_map(|(title, link)| {
            let href = link.value().attr("href")?.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                return None;
            }
            Some(SearchCandidate::new(text_of(&title), resolve_link(base, href)))
        })
        .collect()
}

/// 抽取线路与剧集
///
/// 线路标签与剧集容器按顺序配对；没有任何剧集的线路被丢弃。
pub fn extract_routes(body: &str, selectors: &SiteSelectors, page: &Url) -> Vec<Route> {
    let doc = Html::parse_document(body);

    let tabs = doc.select(&selectors.route_tab);
    let containers = doc.select(&selectors.episode_container);

    tabs.zip(containers)
        .filter_map(|(tab, container)| {
            let episodes: Vec<Episode> = container
                .select(&selectors.episode_item)
                .filter_map(|item| {
                    let href = item.value().attr("href")?;
                    let link = resolve_link(page, href);
                    if link.is_empty() {
                        return None;
                    }
                    Some(Episode {
                        name: text_of(&item),
                        link,
                    })
                })
                .collect();

            if episodes.is_empty() {
                return None;
            }

            Some(Route {
                name: text_of(&tab),
                episodes,
            })
        })
        .collect()
}
