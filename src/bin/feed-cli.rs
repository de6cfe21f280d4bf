//! 会话消息流 CLI（演示版）
//!
//! 非交互式 CLI：打开一对用户的会话，按参数预置数据、上翻历史、发送消息，
//! 最后把当前消息流以 JSON 打印出来。默认使用本地 SQLite，
//! 指定 `--rest-url` 时改用 REST 行存储。

use anyhow::{Context, Result};
use chat_feed_sync::im::feed::{Anchor, FeedListener};
use chat_feed_sync::im::serialization::now_millis;
use chat_feed_sync::{
    BroadcastLiveChannel, ConversationFeed, ConversationKey, FeedChange, FeedConfig, FeedState,
    Message, MessageStoreClient, RestMessageStore, RestStoreConfig, ScrollAnchorManager,
    SqliteMessageStore,
};
use clap::Parser;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 会话消息流 CLI
#[derive(Parser, Debug)]
#[command(name = "feed-cli")]
#[command(about = "会话消息流 CLI - 用于演示分页、推送与乐观发送", long_about = None)]
struct Args {
    /// SQLite 数据库地址
    #[arg(long, default_value = "sqlite://feed.db?mode=rwc")]
    db: String,

    /// REST 行存储地址（设置后忽略 --db）
    #[arg(long)]
    rest_url: Option<String>,

    /// REST 匿名访问 key
    #[arg(long, default_value = "")]
    api_key: String,

    /// 当前用户 ID
    #[arg(short, long)]
    user: String,

    /// 对端用户 ID
    #[arg(short, long)]
    partner: String,

    /// 每页条数
    #[arg(long, default_value = "50")]
    page_size: usize,

    /// 预置的示例消息条数（仅 SQLite）
    #[arg(long, default_value = "0")]
    seed: usize,

    /// 打开后要发送的消息，可重复
    #[arg(short, long)]
    send: Vec<String>,

    /// 上翻加载的页数
    #[arg(long, default_value = "0")]
    older: usize,

    /// 打印前继续监听推送的时长（秒）
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志文件（追加写入）
    #[arg(long, default_value = "feed-cli.log")]
    log_file: String,

    /// 日志级别（默认: info,chat_feed_sync=debug）
    #[arg(long, default_value = "info,chat_feed_sync=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stderr 和文件，stdout 留给 JSON）
fn init_logger(log_level: &str, log_file: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 创建日志文件（追加模式）
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("无法创建日志文件 {}", log_file))?;

    // 输出到文件，禁用 ANSI 颜色代码
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到 stderr 和文件: {}", log_file);
    Ok(())
}

/// 终端没有真实视图：始终跟随尾部，锚点只记日志
struct CliScroll {
    captured: AtomicUsize,
}

impl ScrollAnchorManager for CliScroll {
    fn capture_anchor(&self) -> Anchor {
        self.captured.fetch_add(1, Ordering::SeqCst);
        Anchor::default()
    }

    fn restore_anchor(&self, _anchor: Anchor) {
        info!(
            "[CLI] 📌 恢复锚点（第 {} 次）",
            self.captured.load(Ordering::SeqCst)
        );
    }

    fn should_auto_scroll_to_end(&self) -> bool {
        true
    }
}

struct CliFeedListener;

#[async_trait::async_trait]
impl FeedListener for CliFeedListener {
    async fn on_feed_changed(&self, change: FeedChange, state: FeedState) {
        info!(
            "[CLI/Feed] 🔄 {:?}: {} 条, 待确认 {}, has_more={}, rev={}",
            change,
            state.messages.len(),
            state.pending_count(),
            state.has_more,
            state.revision
        );
    }

    async fn on_subscription_lost(&self, key: ConversationKey, reason: String) {
        warn!("[CLI/Live] 🔗 推送断开 {}: {}", key, reason);
    }

    async fn on_subscription_restored(&self, key: ConversationKey) {
        info!("[CLI/Live] 🔗 推送恢复 {}", key);
    }

    async fn on_subscription_failed(&self, key: ConversationKey, reason: String) {
        error!("[CLI/Live] ❌ 推送失败 {}: {}", key, reason);
    }
}

/// 预置示例数据：两人交替发言，时间逐条递增
async fn seed(
    store: &SqliteMessageStore,
    key: &ConversationKey,
    user: &str,
    count: usize,
) -> Result<()> {
    let partner = key
        .other(user)
        .ok_or_else(|| anyhow::anyhow!("用户 {} 不在会话 {} 中", user, key))?;
    let base = now_millis() - count as i64 * 1000;
    let mut inserted = 0;
    for i in 0..count {
        let (from, to) = if i % 2 == 0 { (user, partner) } else { (partner, user) };
        let msg = Message {
            id: format!("seed-{}-{}", key.channel_name(), i),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            content: format!("示例消息 #{}", i + 1),
            created_at: base + i as i64 * 1000,
            is_read: false,
        };
        if store.insert_message(&msg).await? {
            inserted += 1;
        }
    }
    info!("[CLI] 🌱 预置 {} 条消息（新增 {} 条）", count, inserted);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level, &args.log_file)?;

    info!("[CLI] 🚀 会话消息流 CLI");
    let key = ConversationKey::new(args.user.clone(), args.partner.clone());
    if !key.is_valid() {
        return Err(anyhow::anyhow!("无效的会话: {}", key));
    }

    let hub = Arc::new(BroadcastLiveChannel::default());
    let mut sqlite = None;
    let client: Arc<dyn MessageStoreClient> = match &args.rest_url {
        Some(url) => {
            info!("[CLI] 🌐 使用 REST 存储: {}", url);
            let store =
                RestMessageStore::new(RestStoreConfig::new(url.clone(), args.api_key.clone()))
                    .context("创建 REST 客户端失败")?;
            Arc::new(store)
        }
        None => {
            let store = Arc::new(
                SqliteMessageStore::connect(&args.db)
                    .await
                    .with_context(|| format!("打开数据库失败: {}", args.db))?
                    .with_live_channel(hub.clone()),
            );
            if args.seed > 0 {
                seed(&store, &key, &args.user, args.seed).await?;
            }
            sqlite = Some(store.clone());
            store
        }
    };

    let mut config = FeedConfig::new(args.user.clone());
    config.page_size = args.page_size;
    let feed = ConversationFeed::with_listener(
        config,
        client,
        hub.clone(),
        Arc::new(CliScroll {
            captured: AtomicUsize::new(0),
        }),
        Arc::new(CliFeedListener),
    );

    feed.open(key.clone()).await?;
    info!("[CLI] ✅ 已打开会话 {}", key);

    for _ in 0..args.older {
        feed.load_older().await?;
    }

    for content in &args.send {
        match feed.send(content).await {
            Ok(outcome) => info!("[CLI] 📤 {:?}", outcome),
            Err(e) => error!(
                "[CLI] ❌ 发送失败，内容保留: {:?}: {}",
                e.unsent_content(),
                e
            ),
        }
    }

    if let Some(store) = &sqlite {
        let marked = store.mark_conversation_read(&key, &args.user).await?;
        info!("[CLI] 📖 标记已读 {} 条", marked);
    }

    if args.duration > 0 {
        info!("[CLI] ⏰ 监听推送 {} 秒", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    }

    let state = feed.snapshot();
    let output = serde_json::json!({
        "conversation": key.to_string(),
        "has_more": state.has_more,
        "pending": state.pending_count(),
        "messages": state.messages,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    feed.close().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}
