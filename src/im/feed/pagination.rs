//! 历史分页控制
//!
//! 状态机：打开时 `Idle -> LoadingInitial -> Idle`，上翻时 `Idle -> LoadingOlder -> Idle`。
//! 任一加载进行中时新的触发直接忽略，不会对同一方向发起重叠请求。
//! FeedStore 只在请求成功后才被修改，失败不会留下部分合并的状态。
//! 调用方丢弃进行中的 future 时，加载标志同样会被复位。

use crate::im::error::FeedError;
use crate::im::feed::context::FeedContext;
use crate::im::feed::models::{FeedChange, LoadOutcome};
use crate::im::feed::store::SessionToken;
use crate::im::store::MessageStoreClient;
use crate::im::types::{Message, Page};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 分页控制器
pub struct PaginationController {
    ctx: Arc<FeedContext>,
    client: Arc<dyn MessageStoreClient>,
    page_size: usize,
}

impl PaginationController {
    pub(crate) fn new(
        ctx: Arc<FeedContext>,
        client: Arc<dyn MessageStoreClient>,
        page_size: usize,
    ) -> Self {
        Self {
            ctx,
            client,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 拉取最新一页（offset 0）并整体替换当前内容
    pub async fn load_initial(&self, token: &SessionToken) -> Result<LoadOutcome, FeedError> {
        let state = {
            let mut store = self.ctx.lock();
            if !store.is_current(token) {
                return Ok(LoadOutcome::Stale);
            }
            if store.is_loading_initial() || store.is_loading_older() {
                debug!("[FeedPage] 加载进行中，忽略首屏请求");
                return Ok(LoadOutcome::Skipped);
            }
            store.set_loading_initial(true);
            store.snapshot()
        };
        let _loading = LoadingGuard::new(&self.ctx, token, LoadKind::Initial);
        self.ctx.notify(FeedChange::Loading, state).await;

        info!("[FeedPage] 📡 拉取首屏 {}，每页 {}", token.key, self.page_size);
        let result = self
            .client
            .fetch_page(&token.key, Page::new(0, self.page_size))
            .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                let state = {
                    let mut store = self.ctx.lock();
                    if !store.is_current(token) {
                        return Ok(LoadOutcome::Stale);
                    }
                    store.set_loading_initial(false);
                    store.snapshot()
                };
                warn!("[FeedPage] 首屏拉取失败 {}: {}", token.key, e);
                self.ctx.notify(FeedChange::Loading, state).await;
                return Err(FeedError::FetchFailed {
                    initial: true,
                    source: e,
                });
            }
        };

        let (count, has_more, state) = {
            let mut store = self.ctx.lock();
            if !store.is_current(token) {
                debug!("[FeedPage] 首屏返回时会话已切换，丢弃");
                return Ok(LoadOutcome::Stale);
            }
            let fetched = rows.len();
            let count = store.replace_all(into_ascending(rows));
            let has_more = fetched >= self.page_size;
            store.set_has_more(has_more);
            store.set_loading_initial(false);
            (count, has_more, store.snapshot())
        };

        info!(
            "[FeedPage] ✅ 首屏完成 {}: {} 条, has_more={}",
            token.key, count, has_more
        );
        self.ctx
            .notify(FeedChange::InitialLoaded { count }, state)
            .await;
        self.ctx.scroll.scroll_to_end();
        Ok(LoadOutcome::Loaded {
            inserted: count,
            has_more,
        })
    }

    /// 拉取更早的一页并合并到头部
    ///
    /// 无更多或已在加载中时不发请求。偏移取已加载窗口内的权威消息数，
    /// 重复推送不会挪动偏移。
    ///
    /// 请求在途期间有推送新增时，存储端窗口已后移，返回页与已有内容的重叠
    /// 并不代表历史到头，此时按返回行数判断是否还有更多。
    pub async fn load_older(&self) -> Result<LoadOutcome, FeedError> {
        let (token, page, arrivals, state) = {
            let mut store = self.ctx.lock();
            let token = store.token().ok_or(FeedError::NotOpen)?;
            if !store.has_more() || store.is_loading_older() || store.is_loading_initial() {
                return Ok(LoadOutcome::Skipped);
            }
            store.set_loading_older(true);
            let page = Page::new(store.next_offset(), self.page_size);
            (token, page, store.live_arrivals(), store.snapshot())
        };
        let _loading = LoadingGuard::new(&self.ctx, &token, LoadKind::Older);
        self.ctx.notify(FeedChange::Loading, state).await;

        debug!(
            "[FeedPage] 拉取更早一页 {}: offset={}, limit={}",
            token.key, page.offset, page.limit
        );
        let result = self.client.fetch_page(&token.key, page).await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                let state = {
                    let mut store = self.ctx.lock();
                    if !store.is_current(&token) {
                        return Ok(LoadOutcome::Stale);
                    }
                    store.set_loading_older(false);
                    store.snapshot()
                };
                warn!("[FeedPage] 更早一页拉取失败 {}: {}", token.key, e);
                self.ctx.notify(FeedChange::Loading, state).await;
                return Err(FeedError::FetchFailed {
                    initial: false,
                    source: e,
                });
            }
        };

        let anchor = self.ctx.scroll.capture_anchor();
        let (inserted, has_more, state) = {
            let mut store = self.ctx.lock();
            if !store.is_current(&token) {
                debug!("[FeedPage] 更早一页返回时会话已切换，丢弃");
                return Ok(LoadOutcome::Stale);
            }
            let fetched = rows.len();
            let inserted = store.prepend_page(into_ascending(rows));
            let has_more = if store.live_arrivals() != arrivals {
                debug!("[FeedPage] 请求期间有推送新增，按返回行数 {} 判断", fetched);
                fetched >= self.page_size
            } else {
                inserted >= self.page_size
            };
            store.set_has_more(has_more);
            store.set_loading_older(false);
            (inserted, has_more, store.snapshot())
        };

        info!(
            "[FeedPage] ✅ 更早一页完成 {}: 新增 {} 条, has_more={}",
            token.key, inserted, has_more
        );
        self.ctx
            .notify(FeedChange::OlderLoaded { inserted }, state)
            .await;
        // 通知返回即视为已重新渲染
        self.ctx.scroll.restore_anchor(anchor);
        Ok(LoadOutcome::Loaded { inserted, has_more })
    }
}

#[derive(Debug, Clone, Copy)]
enum LoadKind {
    Initial,
    Older,
}

/// 加载标志守卫
///
/// 正常结束时标志已在合并时清除，这里不会再改动状态；
/// future 被丢弃时由它复位，会话已切换则不动。
struct LoadingGuard<'a> {
    ctx: &'a FeedContext,
    token: SessionToken,
    kind: LoadKind,
}

impl<'a> LoadingGuard<'a> {
    fn new(ctx: &'a FeedContext, token: &SessionToken, kind: LoadKind) -> Self {
        Self {
            ctx,
            token: token.clone(),
            kind,
        }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut store = self.ctx.lock();
        if !store.is_current(&self.token) {
            return;
        }
        let loading = match self.kind {
            LoadKind::Initial => store.is_loading_initial(),
            LoadKind::Older => store.is_loading_older(),
        };
        if !loading {
            return;
        }
        warn!("[FeedPage] {:?} 加载被中断，复位加载标志", self.kind);
        match self.kind {
            LoadKind::Initial => store.set_loading_initial(false),
            LoadKind::Older => store.set_loading_older(false),
        }
    }
}

/// 存储端按新到旧返回，消息流按旧到新展示
fn into_ascending(mut rows: Vec<Message>) -> Vec<Message> {
    rows.sort_by(Message::order_cmp);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::testing::{init_test_logger, msg, FakeStore, RecordingListener, RecordingScroll};
    use crate::im::types::ConversationKey;
    use std::time::Duration;

    struct Fixture {
        ctx: Arc<FeedContext>,
        store: Arc<FakeStore>,
        scroll: Arc<RecordingScroll>,
        listener: Arc<RecordingListener>,
        pagination: PaginationController,
        token: SessionToken,
    }

    fn fixture(rows: Vec<crate::im::types::Message>, page_size: usize) -> Fixture {
        init_test_logger();
        let store = FakeStore::with_rows(rows);
        let scroll = RecordingScroll::new(false);
        let listener = RecordingListener::new();
        let ctx = Arc::new(FeedContext::new(listener.clone(), scroll.clone()));
        let token = {
            let mut feed = ctx.lock();
            feed.reset(Some(ConversationKey::new("u1", "u2")));
            feed.token().unwrap()
        };
        let pagination = PaginationController::new(ctx.clone(), store.clone(), page_size);
        Fixture {
            ctx,
            store,
            scroll,
            listener,
            pagination,
            token,
        }
    }

    fn ids(ctx: &FeedContext) -> Vec<String> {
        ctx.lock().messages().iter().map(|m| m.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_initial_then_older_pages() {
        let f = fixture(
            vec![msg("m1", 1), msg("m2", 2), msg("m3", 3), msg("m4", 4)],
            2,
        );

        let outcome = f.pagination.load_initial(&f.token).await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                inserted: 2,
                has_more: true
            }
        );
        assert_eq!(ids(&f.ctx), vec!["m3", "m4"]);

        let outcome = f.pagination.load_older().await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                inserted: 2,
                has_more: true
            }
        );
        assert_eq!(ids(&f.ctx), vec!["m1", "m2", "m3", "m4"]);
        assert_eq!(f.store.pages(), vec![Page::new(0, 2), Page::new(2, 2)]);
        assert!(!f.ctx.lock().is_loading_older());
    }

    #[tokio::test]
    async fn test_exhausted_history_issues_no_fetch() {
        let f = fixture(vec![msg("m1", 1), msg("m2", 2), msg("m3", 3)], 2);
        f.pagination.load_initial(&f.token).await.unwrap();

        let outcome = f.pagination.load_older().await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                inserted: 1,
                has_more: false
            }
        );
        assert_eq!(f.pagination.load_older().await.unwrap(), LoadOutcome::Skipped);
        assert_eq!(f.store.pages().len(), 2);
    }

    #[tokio::test]
    async fn test_short_initial_page_has_no_more() {
        let f = fixture(vec![msg("m1", 1)], 50);
        let outcome = f.pagination.load_initial(&f.token).await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                inserted: 1,
                has_more: false
            }
        );
        assert_eq!(f.pagination.load_older().await.unwrap(), LoadOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_anchor_captured_before_merge_and_restored_after_notify() {
        let f = fixture(
            vec![msg("m1", 1), msg("m2", 2), msg("m3", 3), msg("m4", 4)],
            2,
        );
        f.pagination.load_initial(&f.token).await.unwrap();
        f.pagination.load_older().await.unwrap();

        assert_eq!(
            f.scroll.calls(),
            vec!["scroll_to_end", "capture", "restore:anchor"]
        );
        let kinds = f.listener.change_kinds();
        assert_eq!(kinds.last(), Some(&FeedChange::OlderLoaded { inserted: 2 }));
    }

    #[tokio::test]
    async fn test_failed_older_page_leaves_store_untouched() {
        let f = fixture(
            vec![msg("m1", 1), msg("m2", 2), msg("m3", 3), msg("m4", 4)],
            2,
        );
        f.pagination.load_initial(&f.token).await.unwrap();
        let before = f.ctx.lock().snapshot();

        f.store.fail_next_fetches(1);
        let err = f.pagination.load_older().await.unwrap_err();
        assert!(matches!(err, FeedError::FetchFailed { initial: false, .. }));

        let after = f.ctx.lock().snapshot();
        assert_eq!(after.messages, before.messages);
        assert!(after.has_more);
        assert!(!after.is_loading_older);
        assert_eq!(f.scroll.count("capture"), 0);

        // 可以重试
        let outcome = f.pagination.load_older().await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Loaded { inserted: 2, .. }));
    }

    #[tokio::test]
    async fn test_failed_initial_load_clears_flag() {
        let f = fixture(vec![msg("m1", 1)], 2);
        f.store.fail_next_fetches(1);
        let err = f.pagination.load_initial(&f.token).await.unwrap_err();
        assert!(matches!(err, FeedError::FetchFailed { initial: true, .. }));
        assert!(!f.ctx.lock().is_loading_initial());
        assert!(f.ctx.lock().is_empty());
    }

    #[tokio::test]
    async fn test_offset_accounts_for_live_messages() {
        let f = fixture(
            vec![msg("m1", 1), msg("m2", 2), msg("m3", 3), msg("m4", 4)],
            2,
        );
        f.pagination.load_initial(&f.token).await.unwrap();

        // 新消息已写入存储端并通过推送到达
        f.store.insert(msg("m5", 5));
        f.ctx.apply_live(&f.token, msg("m5", 5)).await;
        f.ctx.apply_live(&f.token, msg("m5", 5)).await;

        f.pagination.load_older().await.unwrap();
        assert_eq!(f.store.pages().last(), Some(&Page::new(3, 2)));
        assert_eq!(ids(&f.ctx), vec!["m1", "m2", "m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn test_concurrent_older_loads_fetch_once() {
        let f = fixture(
            vec![msg("m1", 1), msg("m2", 2), msg("m3", 3), msg("m4", 4)],
            2,
        );
        f.pagination.load_initial(&f.token).await.unwrap();

        f.store.hold_fetches(true);
        let (first, second) = tokio::join!(f.pagination.load_older(), async {
            let skipped = f.pagination.load_older().await;
            f.store.release();
            skipped
        });
        assert!(matches!(first.unwrap(), LoadOutcome::Loaded { .. }));
        assert_eq!(second.unwrap(), LoadOutcome::Skipped);
        assert_eq!(f.store.pages().len(), 2);
    }

    #[tokio::test]
    async fn test_response_after_session_switch_is_discarded() {
        let f = fixture(vec![msg("m1", 1), msg("m2", 2)], 2);
        f.store.hold_fetches(true);

        let (outcome, _) = tokio::join!(f.pagination.load_initial(&f.token), async {
            f.ctx.lock().reset(Some(ConversationKey::new("u1", "u3")));
            f.store.release();
        });
        assert_eq!(outcome.unwrap(), LoadOutcome::Stale);
        assert!(f.ctx.lock().is_empty());
        assert!(!f.ctx.lock().is_loading_initial());
    }

    #[tokio::test]
    async fn test_dropped_older_load_can_be_retried() {
        let f = fixture(
            vec![msg("m1", 1), msg("m2", 2), msg("m3", 3), msg("m4", 4)],
            2,
        );
        f.pagination.load_initial(&f.token).await.unwrap();

        f.store.hold_fetches(true);
        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), f.pagination.load_older()).await;
        assert!(timed_out.is_err());
        assert!(!f.ctx.lock().is_loading_older());

        f.store.hold_fetches(false);
        let outcome = f.pagination.load_older().await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Loaded { inserted: 2, .. }));
        assert_eq!(ids(&f.ctx), vec!["m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_dropped_initial_load_can_be_retried() {
        let f = fixture(vec![msg("m1", 1), msg("m2", 2)], 2);

        f.store.hold_fetches(true);
        let timed_out = tokio::time::timeout(
            Duration::from_millis(50),
            f.pagination.load_initial(&f.token),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(!f.ctx.lock().is_loading_initial());

        f.store.hold_fetches(false);
        let outcome = f.pagination.load_initial(&f.token).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Loaded { inserted: 2, .. }));
    }

    #[tokio::test]
    async fn test_live_message_during_older_load_keeps_history_reachable() {
        let f = fixture(
            vec![msg("m1", 1), msg("m2", 2), msg("m3", 3), msg("m4", 4)],
            2,
        );
        f.pagination.load_initial(&f.token).await.unwrap();

        // 请求发出后、存储端执行前有新消息写入，返回页 [m2, m3] 与已有的 m3 重叠
        f.store.hold_fetches(true);
        let (outcome, _) = tokio::join!(f.pagination.load_older(), async {
            f.store.insert(msg("m5", 5));
            f.ctx.apply_live(&f.token, msg("m5", 5)).await;
            f.store.release();
        });
        assert_eq!(
            outcome.unwrap(),
            LoadOutcome::Loaded {
                inserted: 1,
                has_more: true
            }
        );
        assert_eq!(ids(&f.ctx), vec!["m2", "m3", "m4", "m5"]);

        f.store.hold_fetches(false);
        let outcome = f.pagination.load_older().await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                inserted: 1,
                has_more: false
            }
        );
        assert_eq!(f.store.pages().last(), Some(&Page::new(4, 2)));
        assert_eq!(ids(&f.ctx), vec!["m1", "m2", "m3", "m4", "m5"]);
    }
}
