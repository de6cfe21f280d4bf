pub mod error;
pub mod feed;
pub mod live;
pub mod serialization;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出消息流主要类型
pub use feed::{
    ConversationFeed, FeedChange, FeedConfig, FeedListener, FeedState, FeedStore, LoadOutcome,
    ScrollAnchorManager, SendOutcome,
};

// 重新导出存储与推送
pub use live::{BroadcastLiveChannel, LiveChannel, LiveEvent, LiveSubscription, SubscriptionHandle};
pub use store::{MessageStoreClient, RestMessageStore, RestStoreConfig, SqliteMessageStore};
