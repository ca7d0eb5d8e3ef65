//! 标题相似度
//!
//! Ratcliff/Obershelp 序列匹配：递归寻找最长公共子串，
//! 相似度 = 2 * 匹配字符数 / 两串字符总数，取值 [0, 1]。

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::model::SearchCandidate;

/// 计算两个字符串的相似度
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// 所有匹配块的字符数之和
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b2j.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }

    matched
}

/// `a[alo..ahi]` 与 `b[blo..bhi]` 的最长公共子串，并列时取最靠前者
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    let mut j2len: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }

    (best_i, best_j, best_k)
}

/// 为候选打分并按相似度降序排列
///
/// 稳定排序：分数相同保持页面原始顺序。
pub fn rank(keyword: &str, source_id: &str, candidates: Vec<SearchCandidate>) -> Vec<SearchCandidate> {
    let mut scored: Vec<SearchCandidate> = candidates
        .into_iter()
        .map(|mut c| {
            c.similarity = ratio(keyword, &c.title);
            c.source_id = source_id.to_string();
            c
        })
        .collect();

    scored.sort_by(|x, y| {
        y.similarity
            .partial_cmp(&x.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored
}

/// 取最佳候选
pub fn best(keyword: &str, source_id: &str, candidates: Vec<SearchCandidate>) -> Option<SearchCandidate> {
    rank(keyword, source_id, candidates).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn ratio_matches_sequence_matcher() {
        assert!(approx(ratio("abcd", "bcde"), 0.75));
        assert!(approx(ratio("Title", "Title"), 1.0));
        assert!(approx(ratio("", ""), 1.0));
        assert!(approx(ratio("abc", ""), 0.0));
        assert!(approx(ratio("abc", "xyz"), 0.0));
        assert!(approx(ratio("间谍过家家", "间谍过家家 第二季"), 10.0 / 14.0));
    }

    #[test]
    fn ratio_stays_in_unit_range() {
        for (a, b) in [("a", "aaaa"), ("hello world", "world hello"), ("x", "x y z")] {
            let r = ratio(a, b);
            assert!((0.0..=1.0).contains(&r), "{a} vs {b}: {r}");
        }
    }

    #[test]
    fn best_prefers_highest_then_page_order() {
        let candidates = vec![
            SearchCandidate::new("Title II", "https://a/2"),
            SearchCandidate::new("Title", "https://a/1"),
            SearchCandidate::new("Title", "https://a/1-dup"),
        ];
        let top = best("Title", "alpha", candidates).unwrap();
        assert_eq!(top.link, "https://a/1");
        assert_eq!(top.source_id, "alpha");
        assert!(approx(top.similarity, 1.0));
    }

    #[test]
    fn ties_keep_original_order() {
        let candidates = vec![
            SearchCandidate::new("abX", "https://a/first"),
            SearchCandidate::new("abY", "https://a/second"),
        ];
        let ranked = rank("ab", "alpha", candidates);
        assert_eq!(ranked[0].link, "https://a/first");
        assert_eq!(ranked[1].link, "https://a/second");
    }
}
