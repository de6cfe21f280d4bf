//! 本地 SQLite 消息存储（sqlx 驱动）
//!
//! 单表 `messages`，行结构与远端行存储一致。可选地把每次插入广播到推送中心，
//! 相当于数据库变更推送。

use crate::im::error::StoreError;
use crate::im::live::BroadcastLiveChannel;
use crate::im::serialization::now_millis;
use crate::im::store::MessageStoreClient;
use crate::im::types::{ConversationKey, Message, Page};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};

/// SQLite 消息存储
pub struct SqliteMessageStore {
    pool: Pool<Sqlite>,
    /// 插入后广播到的推送中心
    live: Option<Arc<BroadcastLiveChannel>>,
}

impl SqliteMessageStore {
    /// 连接数据库并建表
    ///
    /// 内存库（`sqlite::memory:`）每个连接都是独立的库，此时只开一个连接。
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
        info!(
            "[SqliteStore] 连接 SQLite: {} (max_connections={})",
            db_url, max_connections
        );
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Self::with_pool(pool).await
    }

    /// 使用已有连接池（确保表存在）
    pub async fn with_pool(pool: Pool<Sqlite>) -> Result<Self, StoreError> {
        let store = Self { pool, live: None };
        store.ensure_table().await?;
        Ok(store)
    }

    /// 插入成功后广播到推送中心
    pub fn with_live_channel(mut self, live: Arc<BroadcastLiveChannel>) -> Self {
        self.live = Some(live);
        self
    }

    async fn ensure_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id           TEXT PRIMARY KEY,
                sender_id    TEXT NOT NULL,
                receiver_id  TEXT NOT NULL,
                content      TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                is_read      INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair_time ON messages(sender_id, receiver_id, created_at);",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 按原样写入一条消息（导入/预置数据用），已存在的 `id` 忽略
    pub async fn insert_message(&self, msg: &Message) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO messages (id, sender_id, receiver_id, content, created_at, is_read)
            VALUES (?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.sender_id)
        .bind(&msg.receiver_id)
        .bind(&msg.content)
        .bind(msg.created_at)
        .bind(if msg.is_read { 1 } else { 0 })
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// 会话内的消息总数
    pub async fn count(&self, key: &ConversationKey) -> Result<i64, StoreError> {
        let (a, b) = key.participants();
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM messages
            WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?);
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    /// 把会话中发给 `reader_id` 的消息标记为已读，返回影响行数
    pub async fn mark_conversation_read(
        &self,
        key: &ConversationKey,
        reader_id: &str,
    ) -> Result<u64, StoreError> {
        let Some(partner_id) = key.other(reader_id) else {
            return Ok(0);
        };
        let res = sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE sender_id = ? AND receiver_id = ? AND is_read = 0",
        )
        .bind(partner_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        Ok(Message {
            id: row.try_get("id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            is_read: row.try_get::<i64, _>("is_read")? != 0,
        })
    }
}

#[async_trait]
impl MessageStoreClient for SqliteMessageStore {
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        page: Page,
    ) -> Result<Vec<Message>, StoreError> {
        let (a, b) = key.participants();
        let rows = sqlx::query(
            r#"
            SELECT id, sender_id, receiver_id, content, created_at, is_read FROM messages
            WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?;
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        debug!(
            "[SqliteStore] 拉取 {} offset={} limit={} -> {} 条",
            key,
            page.offset,
            page.limit,
            rows.len()
        );
        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let msg = Message {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.trim().to_string(),
            created_at: now_millis(),
            is_read: false,
        };
        self.insert_message(&msg).await?;
        debug!("[SqliteStore] 新消息 {} ({} -> {})", msg.id, sender_id, receiver_id);
        if let Some(live) = &self.live {
            live.publish(msg.clone());
        }
        Ok(msg)
    }
}
