//! 浏览器会话
//!
//! 每次嗅探启动一个独立、短生命周期的 Chromium 实例 (独立用户目录)，
//! 用完即销毁。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig as CdpConfig},
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::config::BrowserConfig;
use crate::core::error::{EngineError, Result};

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

fn profile_path(seq: u64) -> PathBuf {
    std::env::temp_dir().join(format!("hym-sniffer-{}-{}", std::process::id(), seq))
}

/// 独立用户目录
///
/// 正常路径上由 [`ProfileDir::remove`] 异步删除；若在启动途中被丢弃 (例如超时)，
/// Drop 时在阻塞线程上兜底删除。
struct ProfileDir {
    path: PathBuf,
    removed: bool,
}

impl ProfileDir {
    fn next() -> Self {
        let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            path: profile_path(seq),
            removed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!("清理浏览器用户目录失败: {}", e);
        }
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let dir = self.path.clone();
        let remove = move || {
            let _ = std::fs::remove_dir_all(dir);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

/// 浏览器会话
/// 采用显式的所有权管理，确保关闭逻辑的确定性
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    profile: Option<ProfileDir>,
}

impl BrowserSession {
    /// 启动浏览器会话，失败时不留下用户目录
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let profile = ProfileDir::next();

        let launched = match build_browser_config(config, profile.path()) {
            Ok(cdp_config) => Browser::launch(cdp_config)
                .await
                .map_err(|e| EngineError::Browser(e.to_string())),
            Err(e) => Err(e),
        };
        let (browser, mut handler) = match launched {
            Ok(pair) => pair,
            Err(e) => {
                profile.remove().await;
                return Err(e);
            }
        };

        // 启动事件循环
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        debug!("浏览器会话已启动: {}", profile.path().display());

        Ok(Self {
            browser: Some(browser),
            handler: Some(handle),
            profile: Some(profile),
        })
    }

    /// 创建新页面
    pub async fn new_page(&self) -> Result<Page> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| EngineError::Browser("Browser already closed".into()))?;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Browser(e.to_string()))
    }

    /// 关闭浏览器，等待事件循环结束并清理用户目录
    pub async fn close(&mut self) -> Result<()> {
        let browser = self.browser.take();
        let handler = self.handler.take();

        if let Some(mut b) = browser {
            let _ = b.close().await;
            let _ = b.wait().await;
            if let Some(h) = handler {
                let _ = h.await;
            }
        }

        if let Some(profile) = self.profile.take() {
            profile.remove().await;
        }
        debug!("浏览器会话已关闭");
        Ok(())
    }
}

/// 构建浏览器配置
fn build_browser_config(config: &BrowserConfig, profile_dir: &Path) -> Result<CdpConfig> {
    let mut builder = CdpConfig::builder()
        .user_data_dir(profile_dir)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--no-sandbox")
        .arg("--mute-audio")
        .arg("--autoplay-policy=no-user-gesture-required")
        .arg("--window-size=1280,720")
        .arg("--disable-extensions");

    if config.headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }

    if let Some(path) = &config.chrome_path {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(EngineError::Browser)
}

// 未显式关闭 (例如任务被中止) 时在后台兜底清理
impl Drop for BrowserSession {
    fn drop(&mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        let handler = self.handler.take();
        let profile = self.profile.take();

        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                if let Some(h) = handler {
                    let _ = h.await;
                }
                if let Some(profile) = profile {
                    profile.remove().await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_launch_leaves_no_profile_dir() {
        // 预先放置下一次会话将使用的目录，模拟浏览器已写入后启动失败
        let next = profile_path(SESSION_SEQ.load(Ordering::Relaxed));
        std::fs::create_dir_all(&next).unwrap();
        std::fs::write(next.join("Local State"), "{}").unwrap();

        let config = BrowserConfig {
            headless: true,
            chrome_path: Some("/nonexistent/chrome".into()),
        };
        let err = match BrowserSession::launch(&config).await {
            Ok(_) => panic!("launch should fail without a browser"),
            Err(e) => e,
        };

        assert!(matches!(err, EngineError::Browser(_)), "{err}");
        assert!(!next.exists());
    }
}
