//! 通用辅助工具集 (General Utilities)
//!
//! 提供 URI 规范化、协议升级及跳转包装剥离。

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// 将相对链接解析为绝对地址
pub fn to_absolute_url(base: &Url, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }

    if let Some(path_without_slashes) = href.strip_prefix("//") {
        return format!("{}://{}", base.scheme(), path_without_slashes);
    }

    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// 协议升级：`http://` 一律改写为 `https://`
pub fn upgrade_scheme(link: String) -> String {
    match link.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => link,
    }
}

/// 解析并升级协议，抽取结果统一经过这里
pub fn resolve_link(base: &Url, href: &str) -> String {
    upgrade_scheme(to_absolute_url(base, href))
}

fn scheme_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"https?://").expect("static regex"))
}

/// 去除跳转包装
///
/// 链接中出现两次及以上 `http(s)://` 时，只保留第二次出现处到末尾的部分。
/// 不做 URL 解码。
pub fn strip_redirect_wrapper(url: &str) -> &str {
    match scheme_marker().find_iter(url).nth(1) {
        Some(second) => &url[second.start()..],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_from_second_scheme_marker() {
        assert_eq!(
            strip_redirect_wrapper("https://r.example/go?url=https://cdn.example/a.m3u8&x=1"),
            "https://cdn.example/a.m3u8&x=1"
        );
        assert_eq!(
            strip_redirect_wrapper("https://r.example/?a=http://b/?c=https://d/e.m3u8"),
            "http://b/?c=https://d/e.m3u8"
        );
        assert_eq!(
            strip_redirect_wrapper("https://cdn.example/a.m3u8"),
            "https://cdn.example/a.m3u8"
        );
    }

    #[test]
    fn encoded_wrappers_are_left_alone() {
        let wrapped = "https://r.example/go?url=https%3A%2F%2Fcdn.example%2Fa.m3u8";
        assert_eq!(strip_redirect_wrapper(wrapped), wrapped);
    }

    #[test]
    fn resolves_relative_and_upgrades() {
        let base = Url::parse("http://a.example/detail/1.html").unwrap();
        assert_eq!(resolve_link(&base, "/play/1-1.html"), "https://a.example/play/1-1.html");
        assert_eq!(resolve_link(&base, "//cdn.example/x"), "https://cdn.example/x");
        assert_eq!(resolve_link(&base, "2.html"), "https://a.example/detail/2.html");
        assert_eq!(resolve_link(&base, "https://b.example/"), "https://b.example/");
    }
}
