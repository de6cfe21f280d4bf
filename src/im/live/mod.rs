//! 实时推送模块
//!
//! 推送通道按会话键订阅，投递语义为至少一次、不保证顺序。

pub mod broadcast;
pub mod subscription;

use crate::im::error::LiveError;
use crate::im::types::{ConversationKey, Message};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use broadcast::BroadcastLiveChannel;
pub use subscription::LiveSubscriptionListener;

/// 推送事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// 新消息创建
    Created(Message),
    /// 通道断开（之后不会再有事件）
    Dropped(String),
}

/// 订阅句柄，`cancel` 至多生效一次，析构时自动取消
pub struct SubscriptionHandle {
    channel: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(channel: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            channel: channel.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 取消订阅，返回本次调用是否真正执行了取消
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(cancel) => {
                cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 一次成功的订阅：事件接收端 + 取消句柄
pub struct LiveSubscription {
    pub events: mpsc::UnboundedReceiver<LiveEvent>,
    pub handle: SubscriptionHandle,
}

/// 推送通道
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// 订阅指定会话的新消息
    async fn subscribe(&self, key: &ConversationKey) -> Result<LiveSubscription, LiveError>;
}
