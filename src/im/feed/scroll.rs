//! 滚动锚点协作接口
//!
//! 核心只负责在合适的时机调用，具体如何测量与恢复位置由视图层实现。

/// 视图锚点（核心不解释其内容）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Anchor {
    /// 锚定的消息 ID
    pub message_id: Option<String>,
    /// 该消息相对视口顶部的偏移
    pub offset: f64,
}

/// 滚动锚点管理器
///
/// 头部插入前调用 `capture_anchor`，插入并重新渲染后调用 `restore_anchor`，
/// 使用户正在看的内容保持不动。尾部追加前调用 `should_auto_scroll_to_end`，
/// 只有追加前已在底部（或接近底部）时才滚到底。
pub trait ScrollAnchorManager: Send + Sync {
    fn capture_anchor(&self) -> Anchor;

    fn restore_anchor(&self, anchor: Anchor);

    fn should_auto_scroll_to_end(&self) -> bool;

    fn scroll_to_end(&self) {}
}

/// 无视图时使用的空实现（总是跟随尾部）
pub struct NoopScrollAnchor;

impl ScrollAnchorManager for NoopScrollAnchor {
    fn capture_anchor(&self) -> Anchor {
        Anchor::default()
    }

    fn restore_anchor(&self, _anchor: Anchor) {}

    fn should_auto_scroll_to_end(&self) -> bool {
        true
    }
}
