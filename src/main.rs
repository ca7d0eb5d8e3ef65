//! 应用程序入口 (Application Entrypoint)
//!
//! 负责 CLI 指令解析、遥测层初始化、引擎装配及系统生命周期管理。

use std::io;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use hym_engine::core::model::{EpisodeRef, EpisodeSelection, SiteResult};
use hym_engine::ui::{Ui, get_multi};
use hym_engine::{AppConfig, Engine, EngineEvent, EventReceiver, create_event_channel};

/// 进度条感知的日志写入器 (TUI-aware Log Writer)
///
/// 确保非同步日志输出不会破坏终端进度条的渲染布局。
struct IndicatifWriter;

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let _ = get_multi().println(s.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&self) -> Self::Writer {
        IndicatifWriter
    }
}

/// 命令行界面脚手架 (CLI Scaffolding)
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出已注册的站点
    Sources,
    /// 多源搜索
    Search {
        keyword: String,
        /// 限定站点 (可重复)，缺省为全部
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },
    /// 嗅探剧集页的视频流地址
    Resolve {
        #[arg(short, long)]
        source: String,
        #[arg(short, long)]
        url: String,
        /// 嗅探超时 (秒)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// 搜索单个站点并解析指定集数
    Play {
        #[arg(short, long)]
        source: String,
        #[arg(short, long)]
        keyword: String,
        /// 集数 (从 1 开始)
        #[arg(long, conflicts_with = "episode", required_unless_present = "episode")]
        sort: Option<f64>,
        /// 收藏记录中的剧集 JSON，例如 `{"episode":{"sort":3}}`
        #[arg(long)]
        episode: Option<String>,
        /// 线路名称，缺省为第一条
        #[arg(short, long)]
        route: Option<String>,
    },
    /// 定时轮询订阅，直到 Ctrl-C
    Watch {
        /// 轮询间隔 (秒)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 遥测层初始化 (Telemetry Layer Initialization)
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(IndicatifWriter)
        .with_target(false)
        .with_ansi(true)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("加载配置失败")?;

    let (event_sender, events) = create_event_channel();
    let engine = Engine::from_config(config, event_sender).context("初始化引擎失败")?;

    // 信号处理与优雅退出 (Signal Handling)
    let interrupt = CancellationToken::new();
    let on_signal = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut ui = Ui::new();
    let outcome = run(cli.command, &engine, &events, &mut ui, &interrupt).await;

    ui.finish();
    if !engine.shutdown().await {
        tracing::warn!("部分任务未能在时限内退出，其结果已被丢弃");
    }
    outcome
}

async fn run(
    command: Commands,
    engine: &Engine,
    events: &EventReceiver,
    ui: &mut Ui,
    interrupt: &CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Commands::Sources => {
            for source in engine.registry().iter() {
                println!("{:<16} {:<24} {}", source.id, source.display_name(), source.base_url);
            }
        }
        Commands::Search { keyword, sources } => {
            let handle = if sources.is_empty() {
                engine.search_all(&keyword)?
            } else {
                engine.search(&keyword, &sources)?
            };
            ui.track_search(&handle);

            let results = collect_results(events, ui, handle.len(), interrupt).await;
            if interrupt.is_cancelled() {
                handle.cancel();
            }
            for result in &results {
                print_result(result);
            }
        }
        Commands::Resolve { source, url, timeout } => {
            ui.track_stream(&url);
            engine.resolve_stream(&url, &source, timeout.map(Duration::from_secs))?;
            print_stream(wait_stream(events, ui, interrupt).await);
        }
        Commands::Play {
            source,
            keyword,
            sort,
            episode,
            route,
        } => {
            let episode = match (sort, episode) {
                (Some(sort), _) => EpisodeRef::flat(sort),
                (None, Some(json)) => serde_json::from_str(&json).context("剧集记录不是合法 JSON")?,
                (None, None) => bail!("需要 --sort 或 --episode"),
            };

            let handle = engine.search(&keyword, &[source.as_str()])?;
            ui.track_search(&handle);

            let Some(result) = collect_results(events, ui, 1, interrupt).await.pop() else {
                return Ok(());
            };
            let Some(found) = result.result else {
                bail!("站点 {} 没有找到 \"{}\"", source, keyword);
            };

            let chosen = match &route {
                Some(name) => found.routes.into_iter().find(|r| &r.name == name),
                None => found.routes.into_iter().next(),
            }
            .with_context(|| format!("线路不存在: {}", route.unwrap_or_default()))?;

            let selection = EpisodeSelection::from_ref(source, chosen, &episode)?;
            ui.track_stream(&selection.episode().name);
            engine.play(&selection, None)?;
            print_stream(wait_stream(events, ui, interrupt).await);
        }
        Commands::Watch { interval } => {
            ui.track_poll();
            engine.start_polling(interval.map(Duration::from_secs))?;

            loop {
                tokio::select! {
                    _ = interrupt.cancelled() => break,
                    event = events.recv_async() => match event {
                        Some(event) => ui.handle_event(&event),
                        None => break,
                    },
                }
            }
        }
    }

    Ok(())
}

/// 收集 `expected` 个站点结果，或在中断时提前返回
async fn collect_results(
    events: &EventReceiver,
    ui: &mut Ui,
    expected: usize,
    interrupt: &CancellationToken,
) -> Vec<SiteResult> {
    let mut results = Vec::with_capacity(expected);
    while results.len() < expected {
        tokio::select! {
            _ = interrupt.cancelled() => break,
            event = events.recv_async() => match event {
                Some(event) => {
                    ui.handle_event(&event);
                    if let EngineEvent::SiteResult(result) = event {
                        results.push(result);
                    }
                }
                None => break,
            },
        }
    }
    results
}

async fn wait_stream(
    events: &EventReceiver,
    ui: &mut Ui,
    interrupt: &CancellationToken,
) -> Option<String> {
    loop {
        tokio::select! {
            _ = interrupt.cancelled() => return None,
            event = events.recv_async() => match event {
                Some(event) => {
                    ui.handle_event(&event);
                    if let EngineEvent::StreamResolved(url) = event {
                        return url;
                    }
                }
                None => return None,
            },
        }
    }
}

fn print_result(result: &SiteResult) {
    let Some(found) = &result.result else {
        println!("[{}] no results", result.source_id);
        return;
    };

    println!(
        "[{}] {} ({:.2}) {}",
        result.source_id, found.candidate.title, found.candidate.similarity, found.candidate.link
    );
    for route in &found.routes {
        println!("    {} ({} episodes)", route.name, route.episodes.len());
    }
}

fn print_stream(url: Option<String>) {
    match url {
        Some(url) => println!("{}", url),
        None => println!("no stream captured"),
    }
}
