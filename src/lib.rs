pub mod im;

// 重新导出常用类型，方便外部使用
pub use im::{
    error::{FeedError, LiveError, StoreError},
    types::{ConversationKey, Message, Page},
    BroadcastLiveChannel, ConversationFeed, FeedChange, FeedConfig, FeedListener, FeedState,
    FeedStore, LiveChannel, LoadOutcome, MessageStoreClient, RestMessageStore, RestStoreConfig,
    ScrollAnchorManager, SendOutcome, SqliteMessageStore,
};
