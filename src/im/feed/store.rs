//! 会话消息的有序去重内存视图
//!
//! 所有写入都经过这里的合并操作，保证任意操作之后：
//! - `messages` 按 `(created_at, id)` 严格递增
//! - 不存在重复 `id`
//!
//! 分页拉取（页内有序，但可能与推送重叠）和实时推送（至少一次、不保证顺序）
//! 两个来源只通过同一组幂等、保序的合并原语写入。

use crate::im::error::FeedError;
use crate::im::serialization::now_millis;
use crate::im::types::{ConversationKey, Message, MessageDraft, TempKey};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// 对外可见的会话状态快照
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    /// 按 `(created_at, id)` 升序的消息列表
    pub messages: Vec<Message>,
    /// 是否可能还有更早的一页
    pub has_more: bool,
    pub is_loading_initial: bool,
    pub is_loading_older: bool,
    /// 尚未确认的乐观占位消息
    pub pending_optimistic: HashMap<TempKey, Message>,
    /// 每次变更递增，消费方可据此丢弃过期快照
    pub revision: u64,
}

impl FeedState {
    /// 消息是否仍是发送中的占位
    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending_optimistic
            .keys()
            .any(|k| k.as_str() == message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_optimistic.len()
    }
}

/// 推送合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveMerge {
    /// 作为新消息插入
    Inserted,
    /// 替换了对应的占位消息
    Reconciled(TempKey),
    /// 已存在，忽略
    Duplicate,
}

impl LiveMerge {
    pub fn changed(&self) -> bool {
        !matches!(self, LiveMerge::Duplicate)
    }
}

/// 会话期标识：会话键 + 纪元
///
/// 异步响应回来时用它判断是否仍属于当前会话，切换会话后旧响应直接丢弃。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub key: ConversationKey,
    pub epoch: u64,
}

/// 消息流存储
#[derive(Debug, Default)]
pub struct FeedStore {
    key: Option<ConversationKey>,
    epoch: u64,
    state: FeedState,
    ids: HashSet<String>,
    /// 分页拉取到的最旧一条（`(created_at, id)`），即已加载窗口的下沿
    paged_floor: Option<(i64, String)>,
    /// 推送新增（含确认占位）的累计次数
    live_arrivals: u64,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空状态并进入新的会话期，返回新纪元
    pub fn reset(&mut self, key: Option<ConversationKey>) -> u64 {
        self.epoch += 1;
        let revision = self.state.revision + 1;
        self.key = key;
        self.state = FeedState {
            revision,
            ..FeedState::default()
        };
        self.ids.clear();
        self.paged_floor = None;
        self.live_arrivals = 0;
        self.epoch
    }

    pub fn key(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.key.as_ref().map(|key| SessionToken {
            key: key.clone(),
            epoch: self.epoch,
        })
    }

    pub fn is_current(&self, token: &SessionToken) -> bool {
        self.epoch == token.epoch && self.key.as_ref() == Some(&token.key)
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn len(&self) -> usize {
        self.state.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.messages.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.state.has_more
    }

    pub fn is_loading_initial(&self) -> bool {
        self.state.is_loading_initial
    }

    pub fn is_loading_older(&self) -> bool {
        self.state.is_loading_older
    }

    /// 推送新增的累计次数；分页请求在途期间若变化，说明存储端窗口已后移
    pub fn live_arrivals(&self) -> u64 {
        self.live_arrivals
    }

    /// 下一页在存储端倒序排列中的偏移
    ///
    /// 等于不早于分页下沿的权威消息数：存储端从最新一条到下沿是连续前缀，
    /// 推送新增的消息位于前缀头部，同样占用偏移。重复投递、分页重叠都不会重复计数；
    /// 比下沿更早的推送消息尚在窗口之外，不计入。
    pub fn next_offset(&self) -> usize {
        let messages = &self.state.messages;
        let start = match &self.paged_floor {
            Some((created_at, id)) => messages.partition_point(|m| {
                (m.created_at, m.id.as_str()) < (*created_at, id.as_str())
            }),
            None => 0,
        };
        // 占位消息总在尾部，必然在下沿之后
        (messages.len() - start).saturating_sub(self.state.pending_optimistic.len())
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending_optimistic.len()
    }

    pub fn revision(&self) -> u64 {
        self.state.revision
    }

    /// 只读快照（用于渲染）
    pub fn snapshot(&self) -> FeedState {
        self.state.clone()
    }

    pub fn set_loading_initial(&mut self, loading: bool) {
        if self.state.is_loading_initial != loading {
            self.state.is_loading_initial = loading;
            self.touch();
        }
    }

    pub fn set_loading_older(&mut self, loading: bool) {
        if self.state.is_loading_older != loading {
            self.state.is_loading_older = loading;
            self.touch();
        }
    }

    pub fn set_has_more(&mut self, has_more: bool) {
        if self.state.has_more != has_more {
            self.state.has_more = has_more;
            self.touch();
        }
    }

    /// 整体替换内容（仅用于首屏加载），返回最终条数
    pub fn replace_all(&mut self, page: Vec<Message>) -> usize {
        self.state.messages.clear();
        self.state.pending_optimistic.clear();
        self.ids.clear();
        self.paged_floor = None;

        let mut incoming: Vec<Message> = page
            .into_iter()
            .filter(|m| self.ids.insert(m.id.clone()))
            .collect();
        incoming.sort_by(Message::order_cmp);
        self.lower_floor(incoming.first());
        self.state.messages = incoming;
        self.touch();
        self.debug_check();
        self.state.messages.len()
    }

    /// 在头部合并一页更早的消息，返回实际新增条数
    ///
    /// 已存在的 `id` 静默丢弃，同一页重复合并是幂等的。
    pub fn prepend_page(&mut self, page: Vec<Message>) -> usize {
        let oldest = page.iter().min_by(|a, b| a.order_cmp(b)).cloned();
        self.lower_floor(oldest.as_ref());
        let mut incoming: Vec<Message> = page
            .into_iter()
            .filter(|m| !self.ids.contains(&m.id))
            .collect();
        // 页内去重
        let mut seen = HashSet::with_capacity(incoming.len());
        incoming.retain(|m| seen.insert(m.id.clone()));
        if incoming.is_empty() {
            return 0;
        }
        incoming.sort_by(Message::order_cmp);

        let inserted = incoming.len();
        self.ids.extend(seen);

        let existing = std::mem::take(&mut self.state.messages);
        let mut merged = Vec::with_capacity(existing.len() + inserted);
        let mut older = incoming.into_iter().peekable();
        let mut current = existing.into_iter().peekable();
        while let (Some(a), Some(b)) = (older.peek(), current.peek()) {
            let next = if a.order_cmp(b) != Ordering::Greater {
                older.next()
            } else {
                current.next()
            };
            merged.extend(next);
        }
        merged.extend(older);
        merged.extend(current);
        self.state.messages = merged;

        self.touch();
        self.debug_check();
        inserted
    }

    /// 合并一条推送消息
    ///
    /// 若存在发送者、接收者、内容都相同的占位消息，则替换该占位（取最早的一条），
    /// 否则按序插入到正确位置（推送不保证顺序，不一定在尾部）。重复 `id` 不做任何事。
    pub fn append_live(&mut self, message: Message) -> LiveMerge {
        if self.ids.contains(&message.id) {
            return LiveMerge::Duplicate;
        }

        let merge = match self.find_matching_placeholder(&message) {
            Some(temp) => {
                self.replace_placeholder(&temp, message);
                LiveMerge::Reconciled(temp)
            }
            None => {
                self.ids.insert(message.id.clone());
                self.insert_sorted(message);
                LiveMerge::Inserted
            }
        };
        self.live_arrivals += 1;
        self.touch();
        self.debug_check();
        merge
    }

    /// 用发送接口的同步返回值确认指定占位
    ///
    /// 推送回显可能先到也可能后到，两条路径重复触发时只生效一次。
    pub fn reconcile_echo(&mut self, temp: &TempKey, message: Message) -> LiveMerge {
        if self.ids.contains(&message.id) {
            // 回显已经先到过；占位若还在说明内容没能匹配上，这里补删
            self.abandon_optimistic(temp);
            return LiveMerge::Duplicate;
        }
        if !self.state.pending_optimistic.contains_key(temp) {
            return self.append_live(message);
        }

        self.live_arrivals += 1;
        self.replace_placeholder(temp, message);
        self.touch();
        self.debug_check();
        LiveMerge::Reconciled(temp.clone())
    }

    /// 生成一条占位消息追加到尾部，返回临时键
    ///
    /// 占位时间取本地时钟，但不早于当前尾部消息，保证追加后依旧有序。
    pub fn append_optimistic(&mut self, draft: MessageDraft) -> TempKey {
        let temp = TempKey::generate();
        let mut created_at = now_millis();
        if let Some(last) = self.state.messages.last() {
            created_at = created_at.max(last.created_at.saturating_add(1));
        }
        let placeholder = Message {
            id: temp.as_str().to_string(),
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            content: draft.content,
            created_at,
            is_read: false,
        };

        self.ids.insert(placeholder.id.clone());
        self.state
            .pending_optimistic
            .insert(temp.clone(), placeholder.clone());
        self.state.messages.push(placeholder);
        self.touch();
        self.debug_check();
        temp
    }

    /// 移除发送失败的占位，返回是否确实移除
    pub fn abandon_optimistic(&mut self, temp: &TempKey) -> bool {
        if self.state.pending_optimistic.remove(temp).is_none() {
            return false;
        }
        self.ids.remove(temp.as_str());
        self.state.messages.retain(|m| m.id != temp.as_str());
        self.touch();
        self.debug_check();
        true
    }

    /// 校验有序与去重不变量
    pub fn verify_order(&self) -> Result<(), FeedError> {
        let messages = &self.state.messages;
        for (index, pair) in messages.windows(2).enumerate() {
            if pair[0].order_cmp(&pair[1]) != Ordering::Less {
                return Err(FeedError::OrderingViolation {
                    index: index + 1,
                    detail: format!(
                        "{}@{} is not after {}@{}",
                        pair[1].id, pair[1].created_at, pair[0].id, pair[0].created_at
                    ),
                });
            }
        }
        let mut seen = HashSet::with_capacity(messages.len());
        for (index, m) in messages.iter().enumerate() {
            if !seen.insert(m.id.as_str()) {
                return Err(FeedError::OrderingViolation {
                    index,
                    detail: format!("duplicate id {}", m.id),
                });
            }
        }
        if seen.len() != self.ids.len() {
            return Err(FeedError::OrderingViolation {
                index: messages.len(),
                detail: format!("id index holds {} entries", self.ids.len()),
            });
        }
        Ok(())
    }

    fn find_matching_placeholder(&self, message: &Message) -> Option<TempKey> {
        self.state
            .pending_optimistic
            .iter()
            .filter(|(_, p)| {
                p.sender_id == message.sender_id
                    && p.receiver_id == message.receiver_id
                    && p.content == message.content
            })
            .min_by(|(_, a), (_, b)| a.order_cmp(b))
            .map(|(k, _)| k.clone())
    }

    /// 用权威消息替换占位。若顺序允许，位置与原占位相同。
    fn replace_placeholder(&mut self, temp: &TempKey, message: Message) {
        self.state.pending_optimistic.remove(temp);
        self.ids.remove(temp.as_str());
        if let Some(pos) = self
            .state
            .messages
            .iter()
            .position(|m| m.id == temp.as_str())
        {
            self.state.messages.remove(pos);
        }
        self.ids.insert(message.id.clone());
        self.insert_sorted(message);
    }

    fn lower_floor(&mut self, oldest: Option<&Message>) {
        let Some(oldest) = oldest else {
            return;
        };
        let lower = match &self.paged_floor {
            Some((created_at, id)) => {
                (oldest.created_at, oldest.id.as_str()) < (*created_at, id.as_str())
            }
            None => true,
        };
        if lower {
            self.paged_floor = Some((oldest.created_at, oldest.id.clone()));
        }
    }

    fn insert_sorted(&mut self, message: Message) {
        let messages = &mut self.state.messages;
        match messages.last() {
            Some(last) if last.order_cmp(&message) == Ordering::Greater => {
                let pos = messages.partition_point(|m| m.order_cmp(&message) == Ordering::Less);
                messages.insert(pos, message);
            }
            _ => messages.push(message),
        }
    }

    fn touch(&mut self) {
        self.state.revision += 1;
    }

    fn debug_check(&self) {
        debug_assert!(
            self.verify_order().is_ok(),
            "feed invariant broken: {:?}",
            self.verify_order()
        );
    }
}
