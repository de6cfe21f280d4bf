//! 发送协调
//!
//! 状态：`Idle -> Sending -> Idle`。发送中再次发送直接拒绝，
//! 避免两个占位在回显之前以不确定的顺序竞争。
//! 发送 future 在确认前被丢弃时，占位随之移除。

use crate::im::error::FeedError;
use crate::im::feed::context::FeedContext;
use crate::im::feed::models::{FeedChange, SendOutcome};
use crate::im::feed::store::SessionToken;
use crate::im::store::MessageStoreClient;
use crate::im::types::{MessageDraft, TempKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 发送协调器
pub struct SendCoordinator {
    ctx: Arc<FeedContext>,
    client: Arc<dyn MessageStoreClient>,
    user_id: String,
    sending: AtomicBool,
}

/// 发送状态守卫，离开作用域时回到 Idle
struct SendingGuard<'a>(&'a AtomicBool);

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 占位守卫：发送未走到确认或失败分支就被丢弃时移除占位
///
/// 确认或失败之后占位已不在 pending 中，这里不会再改动状态。
/// Drop 中无法 await，监听方在下一次通知时看到移除后的状态。
struct PlaceholderGuard<'a> {
    ctx: &'a FeedContext,
    token: SessionToken,
    temp: TempKey,
}

impl Drop for PlaceholderGuard<'_> {
    fn drop(&mut self) {
        let mut store = self.ctx.lock();
        if store.is_current(&self.token) && store.abandon_optimistic(&self.temp) {
            warn!("[FeedSend] 发送被中断，移除占位 {}", self.temp);
        }
    }
}

impl SendCoordinator {
    pub(crate) fn new(
        ctx: Arc<FeedContext>,
        client: Arc<dyn MessageStoreClient>,
        user_id: String,
    ) -> Self {
        Self {
            ctx,
            client,
            user_id,
            sending: AtomicBool::new(false),
        }
    }

    /// 是否有消息正在发送（UI 据此禁用发送按钮）
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    /// 发送一条消息
    ///
    /// 先插入占位立即显示，再调用存储端创建。成功时用同步返回值确认占位，
    /// 与推送回显哪个先到都只生效一次；失败时移除占位，原始内容随错误返回。
    pub async fn send(&self, content: &str) -> Result<SendOutcome, FeedError> {
        let text = content.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("[FeedSend] 上一条消息仍在发送中，拒绝");
            return Err(FeedError::SendInFlight);
        }
        let _guard = SendingGuard(&self.sending);

        let follow_tail = self.ctx.scroll.should_auto_scroll_to_end();
        let (token, receiver_id, temp, state) = {
            let mut store = self.ctx.lock();
            let token = store.token().ok_or(FeedError::NotOpen)?;
            let receiver_id = token
                .key
                .other(&self.user_id)
                .ok_or_else(|| FeedError::InvalidConversation {
                    key: token.key.clone(),
                    user_id: self.user_id.clone(),
                })?
                .to_string();
            let temp = store.append_optimistic(MessageDraft {
                sender_id: self.user_id.clone(),
                receiver_id: receiver_id.clone(),
                content: text.to_string(),
            });
            (token, receiver_id, temp, store.snapshot())
        };
        let _placeholder = PlaceholderGuard {
            ctx: &self.ctx,
            token: token.clone(),
            temp: temp.clone(),
        };
        self.ctx.notify(FeedChange::OptimisticAdded, state).await;
        if follow_tail {
            self.ctx.scroll.scroll_to_end();
        }

        debug!("[FeedSend] 发送 {} -> {}，占位 {}", self.user_id, receiver_id, temp);
        let result = self.client.create(&self.user_id, &receiver_id, text).await;

        match result {
            Ok(message) => {
                let state = {
                    let mut store = self.ctx.lock();
                    if !store.is_current(&token) {
                        info!("[FeedSend] 发送成功但会话已切换: {}", message.id);
                        return Ok(SendOutcome::Stale(message));
                    }
                    let merge = store.reconcile_echo(&temp, message.clone());
                    merge.changed().then(|| store.snapshot())
                };
                info!("[FeedSend] ✅ 发送成功: {} (占位 {})", message.id, temp);
                if let Some(state) = state {
                    self.ctx.notify(FeedChange::Confirmed, state).await;
                }
                Ok(SendOutcome::Sent(message))
            }
            Err(e) => {
                let state = {
                    let mut store = self.ctx.lock();
                    if store.is_current(&token) && store.abandon_optimistic(&temp) {
                        Some(store.snapshot())
                    } else {
                        None
                    }
                };
                warn!("[FeedSend] ❌ 发送失败，移除占位 {}: {}", temp, e);
                if let Some(state) = state {
                    self.ctx
                        .notify(FeedChange::OptimisticAbandoned, state)
                        .await;
                }
                Err(FeedError::SendFailed {
                    content: content.to_string(),
                    source: e,
                })
            }
        }
    }
}
