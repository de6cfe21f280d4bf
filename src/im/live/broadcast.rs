//! 进程内推送中心
//!
//! 每条新消息广播给所有订阅者，不做会话过滤（与整表 INSERT 订阅一致），
//! 过滤由订阅侧负责。订阅者积压过多时视为通道断开。

use crate::im::error::LiveError;
use crate::im::live::{LiveChannel, LiveEvent, LiveSubscription, SubscriptionHandle};
use crate::im::types::{ConversationKey, Message};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 默认广播缓冲容量
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// 基于 tokio broadcast 的推送中心
#[derive(Debug, Clone)]
pub struct BroadcastLiveChannel {
    sender: broadcast::Sender<Message>,
}

impl BroadcastLiveChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 广播一条新消息，返回当前订阅者数量
    pub fn publish(&self, message: Message) -> usize {
        match self.sender.send(message) {
            Ok(n) => n,
            // 没有订阅者
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastLiveChannel {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

#[async_trait]
impl LiveChannel for BroadcastLiveChannel {
    async fn subscribe(&self, key: &ConversationKey) -> Result<LiveSubscription, LiveError> {
        let channel = key.channel_name();
        let mut rx = self.sender.subscribe();
        let (tx, events) = mpsc::unbounded_channel();

        let name = channel.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if tx.send(LiveEvent::Created(message)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[LiveHub] 订阅 {} 积压，丢失 {} 条推送", name, skipped);
                        let _ = tx.send(LiveEvent::Dropped(format!("lagged by {}", skipped)));
                        break;
                    }
                    Err(RecvError::Closed) => {
                        let _ = tx.send(LiveEvent::Dropped("hub closed".to_string()));
                        break;
                    }
                }
            }
            debug!("[LiveHub] 订阅 {} 转发结束", name);
        });

        debug!("[LiveHub] 新订阅: {}", channel);
        Ok(LiveSubscription {
            events,
            handle: SubscriptionHandle::new(channel, move || task.abort()),
        })
    }
}
