use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 事件ID
pub type EventId = String;

/// 游戏层提交的事件类型
///
/// 顺序类型与并行安全类型都是封闭集合，其余类型一律落入 `Custom`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    // 顺序类型
    Move,
    TurnEnd,
    GameStart,
    GameEnd,
    // 并行安全类型（仅影响UI）
    Animation,
    Sound,
    UiUpdate,
    Notification,
    Highlight,
    Custom(CustomKind),
}

/// 不属于已知集合的事件类型名
///
/// 只能经由 [`EventKind::parse`] 构造，已知名称不会落入 `Custom`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomKind(String);

impl CustomKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 事件的并发分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// 不能与任何其他事件同批执行
    Sequential,
    /// 可以与其他并行安全事件同批执行
    ParallelSafe,
    /// 未分类事件，保守地单独成批
    Unclassified,
}

impl EventKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "move" => EventKind::Move,
            "turn-end" => EventKind::TurnEnd,
            "game-start" => EventKind::GameStart,
            "game-end" => EventKind::GameEnd,
            "animation" => EventKind::Animation,
            "sound" => EventKind::Sound,
            "ui-update" => EventKind::UiUpdate,
            "notification" => EventKind::Notification,
            "highlight" => EventKind::Highlight,
            other => EventKind::Custom(CustomKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Move => "move",
            EventKind::TurnEnd => "turn-end",
            EventKind::GameStart => "game-start",
            EventKind::GameEnd => "game-end",
            EventKind::Animation => "animation",
            EventKind::Sound => "sound",
            EventKind::UiUpdate => "ui-update",
            EventKind::Notification => "notification",
            EventKind::Highlight => "highlight",
            EventKind::Custom(kind) => kind.as_str(),
        }
    }

    pub fn class(&self) -> EventClass {
        match self {
            EventKind::Move | EventKind::TurnEnd | EventKind::GameStart | EventKind::GameEnd => {
                EventClass::Sequential
            }
            EventKind::Animation
            | EventKind::Sound
            | EventKind::UiUpdate
            | EventKind::Notification
            | EventKind::Highlight => EventClass::ParallelSafe,
            EventKind::Custom(_) => EventClass::Unclassified,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        EventKind::parse(kind)
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        EventKind::parse(&kind)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

/// 事件优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    High,
    #[default]
    Normal,
}

/// 排队中的游戏事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub data: Value,
    pub priority: EventPriority,
    pub enqueued_at: DateTime<Utc>,
    pub retries: u32,
}

impl GameEvent {
    pub fn new(kind: EventKind, data: Value, priority: EventPriority) -> Self {
        Self {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            kind,
            data,
            priority,
            enqueued_at: Utc::now(),
            retries: 0,
        }
    }

    pub fn class(&self) -> EventClass {
        self.kind.class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_round_trip_names() {
        for name in [
            "move",
            "turn-end",
            "game-start",
            "game-end",
            "animation",
            "sound",
            "ui-update",
            "notification",
            "highlight",
        ] {
            assert_eq!(EventKind::parse(name).as_str(), name);
        }
        match EventKind::parse("card-flip") {
            EventKind::Custom(kind) => assert_eq!(kind.as_str(), "card-flip"),
            other => panic!("expected custom kind, got {other:?}"),
        }
    }

    #[test]
    fn test_known_names_never_become_custom() {
        let kind: EventKind = serde_json::from_value(json!("move")).unwrap();
        assert_eq!(kind, EventKind::Move);
        assert_eq!(kind.class(), EventClass::Sequential);
        assert_eq!(EventKind::from(String::from("sound")), EventKind::Sound);
    }

    #[test]
    fn test_event_classification() {
        assert_eq!(EventKind::Move.class(), EventClass::Sequential);
        assert_eq!(EventKind::GameEnd.class(), EventClass::Sequential);
        assert_eq!(EventKind::Sound.class(), EventClass::ParallelSafe);
        assert_eq!(EventKind::Highlight.class(), EventClass::ParallelSafe);
        assert_eq!(
            EventKind::from("weakness-check").class(),
            EventClass::Unclassified
        );
    }

    #[test]
    fn test_event_kind_serializes_as_string() {
        let event = GameEvent::new(EventKind::TurnEnd, json!({"player": 1}), EventPriority::High);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "turn-end");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["retries"], 0);
        assert!(event.id.starts_with("evt_"));

        let back: GameEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind, EventKind::TurnEnd);
    }
}
