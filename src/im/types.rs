//! 会话消息流的基础类型定义

use crate::im::serialization::{deserialize_timestamp_millis, generate_temp_id, TEMP_ID_PREFIX};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 消息（存储端写入后不可变）
///
/// 字段命名与行存储保持一致（`sender_id` / `receiver_id` / `created_at`），
/// `created_at` 统一为毫秒时间戳，由存储端在插入时分配。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp_millis")]
    pub created_at: i64,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// 全序比较：先按 `created_at`，再按 `id` 字典序
    pub fn order_cmp(&self, other: &Message) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    /// 是否为本地乐观占位消息（临时 ID）
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }
}

/// 会话键：两个参与者 ID 的无序对
///
/// `(X, Y)` 与 `(Y, X)` 得到同一个键。内部按字典序存放。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn participants(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// 返回对端 ID；自己和自己的会话返回自身
    pub fn other(&self, user_id: &str) -> Option<&str> {
        if self.low == user_id {
            Some(&self.high)
        } else if self.high == user_id {
            Some(&self.low)
        } else {
            None
        }
    }

    /// 判断 `(sender, receiver)` 是否属于本会话（任意方向）
    pub fn matches(&self, sender_id: &str, receiver_id: &str) -> bool {
        (self.low == sender_id && self.high == receiver_id)
            || (self.low == receiver_id && self.high == sender_id)
    }

    pub fn is_valid(&self) -> bool {
        !self.low.trim().is_empty() && !self.high.trim().is_empty()
    }

    /// 推送频道名，形如 `chat:{a}:{b}`
    pub fn channel_name(&self) -> String {
        format!("chat:{}:{}", self.low, self.high)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// 分页请求描述（针对存储端的倒序排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// 闭区间的最后一个下标（`limit` 为 0 时返回 `None`）
    pub fn last_index(&self) -> Option<usize> {
        self.limit.checked_sub(1).map(|n| self.offset + n)
    }
}

/// 待发送消息草稿
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

/// 乐观占位消息的临时键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempKey(String);

impl TempKey {
    pub fn generate() -> Self {
        Self(generate_temp_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
