//! 各组件共享的消息流上下文

use crate::im::feed::listener::FeedListener;
use crate::im::feed::models::FeedChange;
use crate::im::feed::scroll::ScrollAnchorManager;
use crate::im::feed::store::{FeedState, FeedStore, LiveMerge, SessionToken};
use crate::im::types::Message;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// 共享上下文：唯一的 FeedStore 加上两个视图侧协作者
///
/// FeedStore 的锁只在同步合并期间持有，绝不跨越 `.await`，
/// 因而任意两次合并之间不会交错。
pub(crate) struct FeedContext {
    store: Mutex<FeedStore>,
    pub(crate) listener: Arc<dyn FeedListener>,
    pub(crate) scroll: Arc<dyn ScrollAnchorManager>,
}

impl FeedContext {
    pub(crate) fn new(
        listener: Arc<dyn FeedListener>,
        scroll: Arc<dyn ScrollAnchorManager>,
    ) -> Self {
        Self {
            store: Mutex::new(FeedStore::new()),
            listener,
            scroll,
        }
    }

    /// 获取 FeedStore；合并操作不会 panic，锁中毒时直接取回内部状态
    pub(crate) fn lock(&self) -> MutexGuard<'_, FeedStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) async fn notify(&self, change: FeedChange, state: FeedState) {
        self.listener.on_feed_changed(change, state).await;
    }

    /// 将一条推送消息合并进当前会话
    ///
    /// 会话已切换时返回 `None`。合并前询问视图是否在底部；
    /// 只有视图在底部且消息落在尾部时，才在渲染后滚到底。
    pub(crate) async fn apply_live(
        &self,
        token: &SessionToken,
        message: Message,
    ) -> Option<LiveMerge> {
        let follow_tail = self.scroll.should_auto_scroll_to_end();
        let id = message.id.clone();
        let (merge, at_tail, state) = {
            let mut store = self.lock();
            if !store.is_current(token) {
                debug!("[Feed] 会话已切换，丢弃推送消息 {}", id);
                return None;
            }
            let merge = store.append_live(message);
            if !merge.changed() {
                return Some(merge);
            }
            let at_tail = store.messages().last().is_some_and(|m| m.id == id);
            (merge, at_tail, store.snapshot())
        };

        self.notify(FeedChange::Live, state).await;
        if follow_tail && at_tail {
            self.scroll.scroll_to_end();
        } else if follow_tail {
            debug!("[Feed] 推送消息 {} 插入在中间，不滚动", id);
        }
        Some(merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::testing::{init_test_logger, msg, RecordingListener, RecordingScroll};
    use crate::im::types::ConversationKey;

    #[tokio::test]
    async fn test_live_insert_scrolls_only_at_tail() {
        init_test_logger();
        let scroll = RecordingScroll::new(true);
        let ctx = FeedContext::new(RecordingListener::new(), scroll.clone());
        let token = {
            let mut store = ctx.lock();
            store.reset(Some(ConversationKey::new("u1", "u2")));
            store.replace_all(vec![msg("m1", 1), msg("m5", 5)]);
            store.token().unwrap()
        };

        // 乱序到达的旧消息插在中间
        ctx.apply_live(&token, msg("m3", 3)).await.unwrap();
        assert_eq!(scroll.count("scroll_to_end"), 0);
        assert_eq!(ctx.lock().len(), 3);

        ctx.apply_live(&token, msg("m9", 9)).await.unwrap();
        assert_eq!(scroll.count("scroll_to_end"), 1);

        // 重复投递不触发渲染也不滚动
        ctx.apply_live(&token, msg("m9", 9)).await.unwrap();
        assert_eq!(scroll.count("scroll_to_end"), 1);
    }
}
