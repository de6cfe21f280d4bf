//! 行存储 REST 客户端（PostgREST 风格）
//!
//! 历史：`GET /rest/v1/{table}`，按参与者对过滤、`created_at` 倒序，
//! 用 `Range: {offset}-{offset+limit-1}` 分页；发送：`POST` 插入并要求返回整行。

use crate::im::error::StoreError;
use crate::im::store::MessageStoreClient;
use crate::im::types::{ConversationKey, Message, Page};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

/// REST 存储配置
#[derive(Clone, Debug)]
pub struct RestStoreConfig {
    /// 服务基础地址，例如 `https://xyz.example.co`
    pub base_url: String,
    /// 匿名访问 key（`apikey` 头）
    pub api_key: String,
    /// 用户登录后的访问令牌，缺省时用 `api_key` 作为 Bearer
    pub access_token: Option<String>,
    /// 消息表名
    pub table: String,
}

impl RestStoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token: None,
            table: "messages".to_string(),
        }
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.base_url.trim_end_matches('/'),
            self.table
        )
    }
}

/// 基于 reqwest 的消息存储
pub struct RestMessageStore {
    client: reqwest::Client,
    config: RestStoreConfig,
}

impl RestMessageStore {
    /// 创建客户端，认证信息通过 default_headers 自动附加
    pub fn new(config: RestStoreConfig) -> Result<Self, StoreError> {
        let bearer = config.access_token.as_deref().unwrap_or(&config.api_key);
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(&config.api_key)
                .map_err(|e| anyhow::anyhow!("无效的 api key: {}", e))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", bearer))
                .map_err(|e| anyhow::anyhow!("无效的 access token: {}", e))?,
        );
        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .build()
            .map_err(|e| anyhow::anyhow!("创建 HTTP 客户端失败: {}", e))?;
        Ok(Self::with_client(client, config))
    }

    /// 使用外部配置好认证的客户端
    pub fn with_client(client: reqwest::Client, config: RestStoreConfig) -> Self {
        Self { client, config }
    }
}

/// 参与者对过滤条件（两个方向）
///
/// ID 一律加双引号，含 `,` `(` `)` `.` 的 ID 不会破坏 `or=` 语法。
pub fn pair_filter(key: &ConversationKey) -> String {
    let (a, b) = key.participants();
    let (a, b) = (quote_value(a), quote_value(b));
    format!(
        "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))"
    )
}

/// PostgREST 过滤值的双引号形式，`"` 与 `\` 用反斜杠转义
fn quote_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// 分页对应的 `Range` 头，`limit` 为 0 时没有可请求的范围
pub fn range_header(page: Page) -> Option<String> {
    page.last_index()
        .map(|last| format!("{}-{}", page.offset, last))
}

/// 读取并解析响应体；非 2xx 转为 `StoreError::Rejected`
async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> Result<T, StoreError> {
    let status = response.status();
    let body = response.bytes().await?;
    let body_str = String::from_utf8_lossy(&body);
    debug!("[RestStore] {}响应 {}: {}", operation, status, body_str);

    if !status.is_success() {
        error!(
            "[RestStore] {}请求失败，HTTP状态: {}, 响应: {}",
            operation, status, body_str
        );
        return Err(StoreError::Rejected {
            status: status.as_u16(),
            message: body_str.into_owned(),
        });
    }

    serde_json::from_slice(&body).map_err(|e| {
        error!("[RestStore] {}反序列化失败: {:?}", operation, e);
        StoreError::Decode(e.to_string())
    })
}

#[async_trait]
impl MessageStoreClient for RestMessageStore {
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        page: Page,
    ) -> Result<Vec<Message>, StoreError> {
        let Some(range) = range_header(page) else {
            return Ok(Vec::new());
        };
        let url = self.config.table_url();
        debug!("[RestStore] 拉取 {} Range={}", key, range);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("select", "*".to_string()),
                ("or", pair_filter(key)),
                ("order", "created_at.desc,id.desc".to_string()),
            ])
            .header("Range-Unit", "items")
            .header("Range", &range)
            .send()
            .await?;

        // 偏移超出总行数
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!("[RestStore] {} Range={} 超出范围，视为空页", key, range);
            return Ok(Vec::new());
        }
        read_json(response, "拉取消息").await
    }

    async fn create(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let response = self
            .client
            .post(self.config.table_url())
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "sender_id": sender_id,
                "receiver_id": receiver_id,
                "content": content.trim(),
            }))
            .send()
            .await?;

        let rows: Vec<Message> = read_json(response, "发送消息").await?;
        let msg = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("插入响应为空".to_string()))?;
        info!("[RestStore] 📤 新消息 {} ({} -> {})", msg.id, sender_id, receiver_id);
        Ok(msg)
    }
}
