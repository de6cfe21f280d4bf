//! 会话消息流模块
//!
//! 把分页历史、实时推送与本地乐观发送合并成一条无缺口、无重复、单调有序的消息序列，
//! 并在头部插入时保持视图锚点。

pub(crate) mod context;
pub mod listener;
pub mod models;
pub mod pagination;
pub mod scroll;
pub mod sender;
pub mod store;
pub mod window;

// 重新导出主要类型
pub use listener::{EmptyFeedListener, FeedListener};
pub use models::{FeedChange, FeedConfig, LoadOutcome, SendOutcome, DEFAULT_PAGE_SIZE};
pub use pagination::PaginationController;
pub use scroll::{Anchor, NoopScrollAnchor, ScrollAnchorManager};
pub use sender::SendCoordinator;
pub use store::{FeedState, FeedStore, LiveMerge, SessionToken};
pub use window::ConversationFeed;
