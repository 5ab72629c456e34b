//! 病例时间线（审计轨迹）
//!
//! 只追加的事件序列，用于"最近动态"展示。存储层不去重也不截断。

use medtour_core::{Case, TimelineEvent};

/// 最近动态默认展示条数
pub const RECENT_ACTIVITY_LIMIT: usize = 5;

/// 追加一条带当前时间戳的事件
pub fn record(case: &mut Case, event_text: impl Into<String>) {
    case.timeline.push(TimelineEvent::now(event_text));
}

/// 追加事件并返回病例
pub fn append_timeline_event(mut case: Case, description: impl Into<String>) -> Case {
    record(&mut case, description);
    case
}

/// 最近的 `limit` 条事件，最新的在前
pub fn recent_activity(case: &Case, limit: usize) -> Vec<&TimelineEvent> {
    case.timeline.iter().rev().take(limit).collect()
}
