//! 消息流配置与结果类型

use crate::im::types::Message;

/// 默认分页大小
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// 消息流配置
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// 当前登录用户 ID（发送方）
    pub user_id: String,
    /// 每页条数
    pub page_size: usize,
    /// 推送断开后重订阅前的等待时间（毫秒）
    pub resubscribe_delay_ms: u64,
    /// 最大重订阅次数，0 表示不重订阅
    pub max_resubscribe_attempts: u32,
}

impl FeedConfig {
    /// 创建默认配置
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            resubscribe_delay_ms: 1000,
            max_resubscribe_attempts: 5,
        }
    }
}

/// 分页加载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// 已合并
    Loaded { inserted: usize, has_more: bool },
    /// 正在加载或已无更多，未发起请求
    Skipped,
    /// 响应返回时会话已切换，结果被丢弃
    Stale,
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// 内容为空，什么也没做
    Ignored,
    /// 存储端已确认
    Sent(Message),
    /// 存储端已确认，但会话已切换，未写入当前消息流
    Stale(Message),
}

/// 变更通知的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedChange {
    /// 打开、关闭或切换会话后清空
    Reset,
    /// 加载标志变化
    Loading,
    /// 首屏加载完成
    InitialLoaded { count: usize },
    /// 更早一页已合并
    OlderLoaded { inserted: usize },
    /// 推送消息（新增或确认占位）
    Live,
    /// 乐观占位已追加
    OptimisticAdded,
    /// 占位已被权威消息替换
    Confirmed,
    /// 发送失败，占位已移除
    OptimisticAbandoned,
}
