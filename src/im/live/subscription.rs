//! 推送订阅监听
//!
//! 把外部推送通道桥接到当前会话的 FeedStore：只转发属于该会话的创建事件，
//! 通道断开后按配置重订阅，拆除时订阅句柄只取消一次。

use crate::im::feed::context::FeedContext;
use crate::im::feed::models::FeedConfig;
use crate::im::feed::store::SessionToken;
use crate::im::live::{LiveChannel, LiveEvent, LiveSubscription, SubscriptionHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type HandleSlot = Arc<Mutex<Option<SubscriptionHandle>>>;

/// 单会话推送订阅监听器
pub struct LiveSubscriptionListener {
    token: SessionToken,
    alive: Arc<AtomicBool>,
    handle: HandleSlot,
    task: Option<JoinHandle<()>>,
}

impl LiveSubscriptionListener {
    /// 订阅并开始转发
    ///
    /// 首次订阅失败不会报错返回，转入后台重订阅；期间分页与发送照常可用。
    pub(crate) async fn start(
        channel: Arc<dyn LiveChannel>,
        ctx: Arc<FeedContext>,
        token: SessionToken,
        config: &FeedConfig,
    ) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let handle: HandleSlot = Arc::new(Mutex::new(None));

        let first = match channel.subscribe(&token.key).await {
            Ok(LiveSubscription { events, handle: h }) => {
                info!("[FeedLive] 📡 已订阅 {}", h.channel());
                store_handle(&handle, &alive, h);
                Some(events)
            }
            Err(e) => {
                warn!("[FeedLive] 订阅 {} 失败，稍后重试: {}", token.key, e);
                ctx.listener
                    .on_subscription_lost(token.key.clone(), e.to_string())
                    .await;
                None
            }
        };

        let pump = Pump {
            channel,
            ctx,
            token: token.clone(),
            alive: alive.clone(),
            handle: handle.clone(),
            delay: Duration::from_millis(config.resubscribe_delay_ms),
            max_attempts: config.max_resubscribe_attempts,
        };
        let task = tokio::spawn(pump.run(first));

        Self {
            token,
            alive,
            handle,
            task: Some(task),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// 停止转发并取消订阅，可重复调用
    pub fn stop(&mut self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut h) = lock_slot(&self.handle).take() {
            h.cancel();
            debug!("[FeedLive] 已取消订阅 {}", h.channel());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LiveSubscriptionListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_slot(slot: &HandleSlot) -> std::sync::MutexGuard<'_, Option<SubscriptionHandle>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// 存入新句柄；若已停止则立刻取消，避免与 `stop` 竞争时泄漏订阅
fn store_handle(slot: &HandleSlot, alive: &AtomicBool, mut handle: SubscriptionHandle) -> bool {
    let mut guard = lock_slot(slot);
    if !alive.load(Ordering::SeqCst) {
        handle.cancel();
        return false;
    }
    if let Some(mut old) = guard.replace(handle) {
        old.cancel();
    }
    true
}

struct Pump {
    channel: Arc<dyn LiveChannel>,
    ctx: Arc<FeedContext>,
    token: SessionToken,
    alive: Arc<AtomicBool>,
    handle: HandleSlot,
    delay: Duration,
    max_attempts: u32,
}

impl Pump {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn run(self, first: Option<UnboundedReceiver<LiveEvent>>) {
        let mut events = first;
        loop {
            if let Some(rx) = events.take() {
                let reason = self.forward(rx).await;
                if !self.is_alive() {
                    return;
                }
                warn!("[FeedLive] 推送通道断开 {}: {}", self.token.key, reason);
                if let Some(mut old) = lock_slot(&self.handle).take() {
                    old.cancel();
                }
                self.ctx
                    .listener
                    .on_subscription_lost(self.token.key.clone(), reason)
                    .await;
            }

            match self.resubscribe().await {
                Some(rx) => events = Some(rx),
                None => return,
            }
        }
    }

    /// 转发事件直到通道断开，返回断开原因
    async fn forward(&self, mut rx: UnboundedReceiver<LiveEvent>) -> String {
        while let Some(event) = rx.recv().await {
            // 取消与在途投递可能竞争，每次转发前检查
            if !self.is_alive() {
                return "stopped".to_string();
            }
            match event {
                LiveEvent::Created(message) => {
                    if !self
                        .token
                        .key
                        .matches(&message.sender_id, &message.receiver_id)
                    {
                        debug!(
                            "[FeedLive] 忽略其他会话的消息 {} ({} -> {})",
                            message.id, message.sender_id, message.receiver_id
                        );
                        continue;
                    }
                    let id = message.id.clone();
                    if let Some(merge) = self.ctx.apply_live(&self.token, message).await {
                        debug!("[FeedLive] 推送消息 {} 合并结果: {:?}", id, merge);
                    }
                }
                LiveEvent::Dropped(reason) => return reason,
            }
        }
        "channel closed".to_string()
    }

    async fn resubscribe(&self) -> Option<UnboundedReceiver<LiveEvent>> {
        let mut last_error = String::from("resubscription disabled");
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.delay).await;
            if !self.is_alive() {
                return None;
            }
            match self.channel.subscribe(&self.token.key).await {
                Ok(LiveSubscription { events, handle }) => {
                    if !store_handle(&self.handle, &self.alive, handle) {
                        return None;
                    }
                    info!(
                        "[FeedLive] ✅ 第 {} 次重订阅成功: {}",
                        attempt, self.token.key
                    );
                    self.ctx
                        .listener
                        .on_subscription_restored(self.token.key.clone())
                        .await;
                    return Some(events);
                }
                Err(e) => {
                    warn!(
                        "[FeedLive] 第 {}/{} 次重订阅失败 {}: {}",
                        attempt, self.max_attempts, self.token.key, e
                    );
                    last_error = e.to_string();
                }
            }
        }

        if self.is_alive() {
            error!(
                "[FeedLive] ❌ 重订阅次数用尽，停止推送: {}",
                self.token.key
            );
            self.ctx
                .listener
                .on_subscription_failed(self.token.key.clone(), last_error)
                .await;
        }
        None
    }
}
