//! 消息流监听器回调接口

use crate::im::feed::models::FeedChange;
use crate::im::feed::store::FeedState;
use crate::im::types::ConversationKey;
use async_trait::async_trait;

/// 消息流监听器
#[async_trait]
pub trait FeedListener: Send + Sync {
    /// 每次成功变更后触发，附带最新快照
    ///
    /// 并发路径的通知可能乱序到达，以 `state.revision` 较大者为准。
    async fn on_feed_changed(&self, change: FeedChange, state: FeedState);

    /// 推送通道断开（之后将尝试重订阅）
    async fn on_subscription_lost(&self, key: ConversationKey, reason: String);

    /// 重订阅成功
    async fn on_subscription_restored(&self, key: ConversationKey);

    /// 重订阅次数用尽，推送停止；分页与发送不受影响
    async fn on_subscription_failed(&self, key: ConversationKey, reason: String);
}

/// 空实现（默认监听器）
pub struct EmptyFeedListener;

#[async_trait]
impl FeedListener for EmptyFeedListener {
    async fn on_feed_changed(&self, _change: FeedChange, _state: FeedState) {}
    async fn on_subscription_lost(&self, _key: ConversationKey, _reason: String) {}
    async fn on_subscription_restored(&self, _key: ConversationKey) {}
    async fn on_subscription_failed(&self, _key: ConversationKey, _reason: String) {}
}
