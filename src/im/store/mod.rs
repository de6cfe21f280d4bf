//! 消息存储客户端
//!
//! 外部持久化存储的窄接口：按会话倒序分页拉取、插入新消息。

pub mod rest;
pub mod sqlite;

use crate::im::error::StoreError;
use crate::im::types::{ConversationKey, Message, Page};
use async_trait::async_trait;

pub use rest::{RestMessageStore, RestStoreConfig};
pub use sqlite::SqliteMessageStore;

/// 消息存储客户端
#[async_trait]
pub trait MessageStoreClient: Send + Sync {
    /// 拉取一页消息，按 `(created_at, id)` 从新到旧排列
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        page: Page,
    ) -> Result<Vec<Message>, StoreError>;

    /// 插入一条新消息，`id` 与 `created_at` 由存储端分配
    async fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError>;
}
