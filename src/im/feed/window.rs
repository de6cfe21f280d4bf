//! 会话消息流对外接口
//!
//! 一个 `ConversationFeed` 对应一个会话视图，独占自己的 FeedStore，
//! 不与其他视图共享（同一对参与者同时打开两个视图也各自独立）。

use crate::im::error::FeedError;
use crate::im::feed::context::FeedContext;
use crate::im::feed::listener::{EmptyFeedListener, FeedListener};
use crate::im::feed::models::{FeedChange, FeedConfig, LoadOutcome, SendOutcome};
use crate::im::feed::pagination::PaginationController;
use crate::im::feed::scroll::ScrollAnchorManager;
use crate::im::feed::sender::SendCoordinator;
use crate::im::feed::store::FeedState;
use crate::im::live::{LiveChannel, LiveSubscriptionListener};
use crate::im::store::MessageStoreClient;
use crate::im::types::ConversationKey;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// 会话消息流
pub struct ConversationFeed {
    config: FeedConfig,
    ctx: Arc<FeedContext>,
    live_channel: Arc<dyn LiveChannel>,
    pagination: PaginationController,
    sender: SendCoordinator,
    live: Mutex<Option<LiveSubscriptionListener>>,
}

impl ConversationFeed {
    /// 创建消息流（使用默认空监听器）
    pub fn new(
        config: FeedConfig,
        client: Arc<dyn MessageStoreClient>,
        live_channel: Arc<dyn LiveChannel>,
        scroll: Arc<dyn ScrollAnchorManager>,
    ) -> Self {
        Self::with_listener(
            config,
            client,
            live_channel,
            scroll,
            Arc::new(EmptyFeedListener),
        )
    }

    /// 创建消息流（带自定义监听器）
    pub fn with_listener(
        config: FeedConfig,
        client: Arc<dyn MessageStoreClient>,
        live_channel: Arc<dyn LiveChannel>,
        scroll: Arc<dyn ScrollAnchorManager>,
        listener: Arc<dyn FeedListener>,
    ) -> Self {
        let ctx = Arc::new(FeedContext::new(listener, scroll));
        let pagination = PaginationController::new(ctx.clone(), client.clone(), config.page_size);
        let sender = SendCoordinator::new(ctx.clone(), client, config.user_id.clone());
        Self {
            config,
            ctx,
            live_channel,
            pagination,
            sender,
            live: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// 打开会话（或切换到另一个对端）
    ///
    /// 同步完成：取消旧订阅、使在途请求失效、清空状态；随后加载首屏并挂上推送。
    /// 首屏失败时推送仍会挂上，调用方可用 [`ConversationFeed::reload`] 重试。
    pub async fn open(&self, key: ConversationKey) -> Result<LoadOutcome, FeedError> {
        if !key.is_valid() || !key.contains(&self.config.user_id) {
            return Err(FeedError::InvalidConversation {
                key,
                user_id: self.config.user_id.clone(),
            });
        }

        self.stop_live();
        let (token, state) = {
            let mut store = self.ctx.lock();
            store.reset(Some(key.clone()));
            (store.token(), store.snapshot())
        };
        let token = token.ok_or(FeedError::NotOpen)?;
        info!("[Feed] 打开会话 {} (epoch {})", key, token.epoch);
        self.ctx.notify(FeedChange::Reset, state).await;

        let result = self.pagination.load_initial(&token).await;

        if self.ctx.lock().is_current(&token) {
            let mut listener = LiveSubscriptionListener::start(
                self.live_channel.clone(),
                self.ctx.clone(),
                token.clone(),
                &self.config,
            )
            .await;
            // 订阅期间可能又切换了会话
            if self.ctx.lock().is_current(&token) {
                if let Some(mut old) = self.live_slot().replace(listener) {
                    old.stop();
                }
            } else {
                debug!("[Feed] 订阅完成时会话已切换，放弃 {}", key);
                listener.stop();
            }
        }

        result
    }

    /// 关闭当前会话
    pub async fn close(&self) {
        self.stop_live();
        let state = {
            let mut store = self.ctx.lock();
            if store.key().is_none() {
                return;
            }
            store.reset(None);
            store.snapshot()
        };
        info!("[Feed] 关闭会话");
        self.ctx.notify(FeedChange::Reset, state).await;
    }

    /// 重试首屏加载（首屏失败后使用）
    pub async fn reload(&self) -> Result<LoadOutcome, FeedError> {
        let token = self.ctx.lock().token().ok_or(FeedError::NotOpen)?;
        self.pagination.load_initial(&token).await
    }

    /// 上翻加载更早一页；无更多或加载中时为空操作
    pub async fn load_older(&self) -> Result<LoadOutcome, FeedError> {
        self.pagination.load_older().await
    }

    /// 发送消息；空白内容为空操作
    pub async fn send(&self, content: &str) -> Result<SendOutcome, FeedError> {
        self.sender.send(content).await
    }

    pub fn is_sending(&self) -> bool {
        self.sender.is_sending()
    }

    /// 只读快照（用于渲染）
    pub fn snapshot(&self) -> FeedState {
        self.ctx.lock().snapshot()
    }

    pub fn active_key(&self) -> Option<ConversationKey> {
        self.ctx.lock().key().cloned()
    }

    /// 推送订阅是否处于活动状态
    pub fn is_live(&self) -> bool {
        self.live_slot().as_ref().is_some_and(|l| l.is_alive())
    }

    fn live_slot(&self) -> MutexGuard<'_, Option<LiveSubscriptionListener>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stop_live(&self) {
        if let Some(mut listener) = self.live_slot().take() {
            debug!("[Feed] 停止推送订阅 {}", listener.token().key);
            listener.stop();
        }
    }
}

impl Drop for ConversationFeed {
    fn drop(&mut self) {
        self.stop_live();
    }
}
