//! 终端进度渲染引擎 (Terminal UI Progress Engine)
//!
//! 基于 `indicatif` 为每个搜索站点、视频流解析与轮询周期维护一个状态条。

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::core::event::EngineEvent;
use crate::core::model::SearchStatus;
use crate::engine::SearchHandle;

/// 全局 TUI 容器 (Singleton)
static MULTI: OnceLock<MultiProgress> = OnceLock::new();

/// 获取全局进度容器实例
pub fn get_multi() -> &'static MultiProgress {
    MULTI.get_or_init(MultiProgress::new)
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

fn spinner(prefix: impl Into<String>, message: impl Into<String>) -> ProgressBar {
    let bar = get_multi().add(ProgressBar::new_spinner());
    bar.set_style(spinner_style());
    bar.set_prefix(prefix.into());
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// 进度协调器 (Progress Orchestrator)
///
/// 由消费事件的一方持有，只在交互上下文中被修改。
#[derive(Default)]
pub struct Ui {
    /// 站点标识 -> 搜索状态条
    sources: HashMap<String, ProgressBar>,
    stream_bar: Option<ProgressBar>,
    poll_bar: Option<ProgressBar>,
}

impl Ui {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为一次搜索的每个站点建立状态条
    pub fn track_search(&mut self, handle: &SearchHandle) {
        for id in handle.source_ids() {
            let bar = spinner(id, format!("🔍 {}", handle.keyword()));
            self.sources.insert(id.to_string(), bar);
        }
    }

    pub fn track_stream(&mut self, label: &str) {
        self.stream_bar = Some(spinner("stream", format!("🎬 {}", truncate_string(label, 60))));
    }

    pub fn track_poll(&mut self) {
        self.poll_bar = Some(spinner("poll", "📡 waiting for the next tick"));
    }

    /// 执行 UI 状态转换与渲染更新
    pub fn handle_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::SiteResult(result) => {
                let Some(bar) = self.sources.get(&result.source_id) else {
                    return;
                };
                match (&result.status, &result.result) {
                    (SearchStatus::Success, Some(found)) => {
                        let episodes: usize = found.routes.iter().map(|r| r.episodes.len()).sum();
                        bar.finish_with_message(format!(
                            "✅ {} ({} routes, {} episodes)",
                            truncate_string(&found.candidate.title, 30),
                            found.routes.len(),
                            episodes
                        ));
                    }
                    _ => bar.abandon_with_message("❌ no results"),
                }
            }
            EngineEvent::StreamResolved(url) => {
                if let Some(bar) = self.stream_bar.take() {
                    match url {
                        Some(url) => bar.finish_with_message(format!("✅ {}", truncate_string(url, 60))),
                        None => bar.abandon_with_message("❌ no stream captured"),
                    }
                }
            }
            EngineEvent::PollCompleted { success, message } => {
                if let Some(ref bar) = self.poll_bar {
                    let icon = if *success { "✅" } else { "⚠️" };
                    bar.set_message(format!("{} {}", icon, message));
                }
            }
            EngineEvent::RefreshNeeded => {
                if let Some(ref bar) = self.poll_bar {
                    bar.set_message("🔄 refreshing collections");
                }
            }
        }
    }

    /// 结束全部仍在转动的状态条
    pub fn finish(&mut self) {
        for bar in self.sources.values().filter(|b| !b.is_finished()) {
            bar.abandon_with_message("⏹ cancelled");
        }
        if let Some(bar) = self.stream_bar.take() {
            bar.abandon_with_message("⏹ cancelled");
        }
        if let Some(bar) = self.poll_bar.take() {
            bar.finish_with_message("⏹ stopped");
        }
    }
}

/// 执行语义化字符串截断
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
