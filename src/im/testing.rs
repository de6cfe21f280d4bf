//! 单测共用的假实现与工具

use crate::im::error::{LiveError, StoreError};
use crate::im::feed::listener::FeedListener;
use crate::im::feed::models::FeedChange;
use crate::im::feed::scroll::{Anchor, ScrollAnchorManager};
use crate::im::feed::store::FeedState;
use crate::im::live::{LiveChannel, LiveEvent, LiveSubscription, SubscriptionHandle};
use crate::im::store::MessageStoreClient;
use crate::im::types::{ConversationKey, Message, Page};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new("info,chat_feed_sync=debug,sqlx=info");
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// u1 -> u2 的消息
pub(crate) fn msg(id: &str, created_at: i64) -> Message {
    msg_between(id, "u1", "u2", created_at)
}

pub(crate) fn msg_between(id: &str, sender: &str, receiver: &str, created_at: i64) -> Message {
    Message {
        id: id.to_string(),
        sender_id: sender.to_string(),
        receiver_id: receiver.to_string(),
        content: format!("msg {}", id),
        created_at,
        is_read: false,
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 等待条件成立（最多 2 秒）
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// 内存版存储：一张按会话过滤、倒序分页的表
///
/// 可以注入失败、让请求挂起直到放行，并记录每次分页请求。
#[derive(Default)]
pub(crate) struct FakeStore {
    rows: Mutex<Vec<Message>>,
    pages: Mutex<Vec<Page>>,
    fetch_failures: AtomicUsize,
    create_failures: AtomicUsize,
    hold_fetch: AtomicBool,
    hold_create: AtomicBool,
    release: Notify,
    next_id: AtomicUsize,
    /// 创建成功后推送到的假通道
    echo_to: Mutex<Option<Arc<FakeLiveChannel>>>,
}

impl FakeStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicUsize::new(1),
            ..Default::default()
        })
    }

    pub(crate) fn with_rows(rows: Vec<Message>) -> Arc<Self> {
        let store = Self::new();
        *lock(&store.rows) = rows;
        store
    }

    pub(crate) fn insert(&self, message: Message) {
        lock(&self.rows).push(message);
    }

    pub(crate) fn pages(&self) -> Vec<Page> {
        lock(&self.pages).clone()
    }

    pub(crate) fn fail_next_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_creates(&self, n: usize) {
        self.create_failures.store(n, Ordering::SeqCst);
    }

    /// 之后的拉取挂起，直到 `release` 被调用
    pub(crate) fn hold_fetches(&self, hold: bool) {
        self.hold_fetch.store(hold, Ordering::SeqCst);
    }

    pub(crate) fn hold_creates(&self, hold: bool) {
        self.hold_create.store(hold, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.release.notify_waiters();
    }

    pub(crate) fn echo_to(&self, channel: Arc<FakeLiveChannel>) {
        *lock(&self.echo_to) = Some(channel);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageStoreClient for FakeStore {
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        page: Page,
    ) -> Result<Vec<Message>, StoreError> {
        lock(&self.pages).push(page);
        if self.hold_fetch.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if Self::take_failure(&self.fetch_failures) {
            return Err(StoreError::Io("connection reset".to_string()));
        }
        let mut rows: Vec<Message> = lock(&self.rows)
            .iter()
            .filter(|m| key.matches(&m.sender_id, &m.receiver_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.order_cmp(a));
        Ok(rows.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        if self.hold_create.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if Self::take_failure(&self.create_failures) {
            return Err(StoreError::Rejected {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id: format!("s{}", n),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            // 存储端时钟略快于本地
            created_at: crate::im::serialization::now_millis() + 1_000,
            is_read: false,
        };
        self.insert(message.clone());
        let echo = lock(&self.echo_to).clone();
        if let Some(channel) = echo {
            channel.push(message.clone());
        }
        Ok(message)
    }
}

/// 手动驱动的推送通道
#[derive(Default)]
pub(crate) struct FakeLiveChannel {
    senders: Mutex<Vec<mpsc::UnboundedSender<LiveEvent>>>,
    subscribed: AtomicUsize,
    cancelled: Arc<AtomicUsize>,
    subscribe_failures: AtomicUsize,
    keys: Mutex<Vec<ConversationKey>>,
}

impl FakeLiveChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 推给所有订阅者（不做过滤）
    pub(crate) fn push(&self, message: Message) {
        lock(&self.senders).retain(|tx| tx.send(LiveEvent::Created(message.clone())).is_ok());
    }

    /// 让现有订阅全部断开
    pub(crate) fn drop_all(&self, reason: &str) {
        for tx in lock(&self.senders).drain(..) {
            let _ = tx.send(LiveEvent::Dropped(reason.to_string()));
        }
    }

    pub(crate) fn fail_next_subscribes(&self, n: usize) {
        self.subscribe_failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn subscribe_count(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn keys(&self) -> Vec<ConversationKey> {
        lock(&self.keys).clone()
    }
}

#[async_trait]
impl LiveChannel for FakeLiveChannel {
    async fn subscribe(&self, key: &ConversationKey) -> Result<LiveSubscription, LiveError> {
        if FakeStore::take_failure(&self.subscribe_failures) {
            return Err(LiveError::SubscribeFailed {
                channel: key.channel_name(),
                reason: "refused".to_string(),
            });
        }
        self.subscribed.fetch_add(1, Ordering::SeqCst);
        lock(&self.keys).push(key.clone());
        let (tx, events) = mpsc::unbounded_channel();
        lock(&self.senders).push(tx);
        let cancelled = self.cancelled.clone();
        Ok(LiveSubscription {
            events,
            handle: SubscriptionHandle::new(key.channel_name(), move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }
}

/// 记录调用顺序的滚动管理器
pub(crate) struct RecordingScroll {
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) at_bottom: AtomicBool,
}

impl RecordingScroll {
    pub(crate) fn new(at_bottom: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            at_bottom: AtomicBool::new(at_bottom),
        })
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == name).count()
    }
}

impl ScrollAnchorManager for RecordingScroll {
    fn capture_anchor(&self) -> Anchor {
        lock(&self.calls).push("capture".to_string());
        Anchor {
            message_id: Some("anchor".to_string()),
            offset: 12.0,
        }
    }

    fn restore_anchor(&self, anchor: Anchor) {
        lock(&self.calls).push(format!(
            "restore:{}",
            anchor.message_id.unwrap_or_default()
        ));
    }

    fn should_auto_scroll_to_end(&self) -> bool {
        self.at_bottom.load(Ordering::SeqCst)
    }

    fn scroll_to_end(&self) {
        lock(&self.calls).push("scroll_to_end".to_string());
    }
}

/// 记录所有通知的监听器
#[derive(Default)]
pub(crate) struct RecordingListener {
    pub(crate) changes: Mutex<Vec<(FeedChange, FeedState)>>,
    pub(crate) events: Mutex<VecDeque<String>>,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn change_kinds(&self) -> Vec<FeedChange> {
        lock(&self.changes).iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn revisions(&self) -> Vec<u64> {
        lock(&self.changes).iter().map(|(_, s)| s.revision).collect()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        lock(&self.events).iter().cloned().collect()
    }
}

#[async_trait]
impl FeedListener for RecordingListener {
    async fn on_feed_changed(&self, change: FeedChange, state: FeedState) {
        lock(&self.changes).push((change, state));
    }

    async fn on_subscription_lost(&self, key: ConversationKey, reason: String) {
        lock(&self.events).push_back(format!("lost:{}:{}", key, reason));
    }

    async fn on_subscription_restored(&self, key: ConversationKey) {
        lock(&self.events).push_back(format!("restored:{}", key));
    }

    async fn on_subscription_failed(&self, key: ConversationKey, reason: String) {
        lock(&self.events).push_back(format!("failed:{}:{}", key, reason));
    }
}
