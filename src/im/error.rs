//! 错误类型定义
//!
//! 存储/网络错误一律可恢复，只影响触发它的那一次操作，不会破坏 FeedStore 状态。

use crate::im::types::ConversationKey;

/// 外部存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 网络或 I/O 失败
    #[error("store I/O failed: {0}")]
    Io(String),
    /// 存储端拒绝请求（HTTP 状态码或约束错误）
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// 响应无法解析
    #[error("store response decode failed: {0}")]
    Decode(String),
    /// 其他错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(io) => StoreError::Io(io.to_string()),
            sqlx::Error::Decode(d) => StoreError::Decode(d.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::Decode(format!("column {}: {}", index, source))
            }
            sqlx::Error::Database(db) => StoreError::Rejected {
                status: 0,
                message: db.message().to_string(),
            },
            other => StoreError::Other(anyhow::Error::new(other)),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Io(e.to_string())
        }
    }
}

/// 推送频道错误
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("subscribe to {channel} failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },
}

/// 消息流核心错误
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// 历史页拉取失败（首屏或更早一页），状态已回到空闲，可直接重试
    #[error("fetch {} page failed: {source}", page_kind(.initial))]
    FetchFailed {
        initial: bool,
        #[source]
        source: StoreError,
    },
    /// 发送失败，占位消息已移除，原始内容原样返回供重试
    #[error("send failed: {source}")]
    SendFailed {
        content: String,
        #[source]
        source: StoreError,
    },
    /// 上一条消息仍在发送中
    #[error("a previous send is still in flight")]
    SendInFlight,
    /// 当前没有打开的会话
    #[error("no conversation is open")]
    NotOpen,
    /// 会话键不合法或不包含当前用户
    #[error("invalid conversation {key} for user {user_id}")]
    InvalidConversation { key: ConversationKey, user_id: String },
    /// 内部不变量被破坏（逻辑错误，不应出现）
    #[error("ordering violation at index {index}: {detail}")]
    OrderingViolation { index: usize, detail: String },
}

fn page_kind(initial: &bool) -> &'static str {
    if *initial {
        "initial"
    } else {
        "older"
    }
}

impl FeedError {
    /// 发送失败时取回原始内容
    pub fn unsent_content(&self) -> Option<&str> {
        match self {
            FeedError::SendFailed { content, .. } => Some(content),
            _ => None,
        }
    }
}
