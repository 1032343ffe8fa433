use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tabletop_core::Envelope;

use super::easing::Easing;

/// 每帧进度批量通知的消息类型
pub const ANIMATION_FRAME: &str = "ANIMATION_FRAME";
/// 完成批量通知的消息类型
pub const ANIMATIONS_COMPLETE: &str = "ANIMATIONS_COMPLETE";

/// 动画状态：字段名 -> 值，数值字段参与插值
pub type AnimationState = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnimationType {
    Move,
    Fade,
    Scale,
    Rotate,
    Complex,
}

/// 新增动画的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub animation_type: AnimationType,
    /// 持续时间（毫秒）
    pub duration: f64,
    #[serde(default)]
    pub easing: Easing,
    #[serde(default)]
    pub start_state: AnimationState,
    #[serde(default)]
    pub end_state: AnimationState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyframes: Vec<AnimationState>,
    /// 相对当前时刻（或时间线起点）的延迟（毫秒）
    #[serde(default)]
    pub delay: f64,
}

impl AnimationSpec {
    pub fn new(animation_type: AnimationType, duration: f64) -> Self {
        Self {
            id: None,
            animation_type,
            duration,
            easing: Easing::Linear,
            start_state: Map::new(),
            end_state: Map::new(),
            keyframes: Vec::new(),
            delay: 0.0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// `start` / `end` 必须是JSON对象，否则视为空状态
    pub fn with_states(mut self, start: Value, end: Value) -> Self {
        self.start_state = into_state(start);
        self.end_state = into_state(end);
        self
    }

    pub fn with_keyframes(mut self, keyframes: Vec<Value>) -> Self {
        self.keyframes = keyframes.into_iter().map(into_state).collect();
        self
    }

    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }
}

fn into_state(value: Value) -> AnimationState {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// 时间线请求：一组带延迟的子动画
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub animations: Vec<AnimationSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationHandle {
    pub id: String,
    /// 调度器时钟上的开始时间（毫秒）
    pub start_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineHandle {
    pub id: String,
    pub duration: f64,
    pub animations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameUpdate {
    pub id: String,
    pub state: AnimationState,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedAnimation {
    pub id: String,
    pub final_state: AnimationState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationStats {
    pub active: usize,
    pub paused: usize,
    pub frames_processed: u64,
    pub frame_drops: u64,
    pub completed: u64,
}

/// 动画调度器接受的命令
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnimationCommand {
    AddAnimation(AnimationSpec),
    CreateTimeline(TimelineSpec),
    RemoveAnimation(AnimationRef),
    PauseAnimation(AnimationRef),
    ResumeAnimation(AnimationRef),
    GetAnimationStats {},
}

/// 动画调度器发出的通知
#[derive(Debug, Clone, PartialEq)]
pub enum AnimationEvent {
    Frame {
        updates: Vec<FrameUpdate>,
        timestamp: f64,
    },
    Completed(Vec<CompletedAnimation>),
}

#[derive(Deserialize)]
struct FramePayload {
    updates: Vec<FrameUpdate>,
    #[serde(default)]
    timestamp: f64,
}

#[derive(Deserialize)]
struct CompletePayload {
    animations: Vec<CompletedAnimation>,
}

impl AnimationEvent {
    /// 解析动画通知；其他消息返回 `None`
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        match envelope.message_type.as_str() {
            ANIMATION_FRAME => serde_json::from_value::<FramePayload>(envelope.data.clone())
                .ok()
                .map(|payload| AnimationEvent::Frame {
                    updates: payload.updates,
                    timestamp: payload.timestamp,
                }),
            ANIMATIONS_COMPLETE => {
                serde_json::from_value::<CompletePayload>(envelope.data.clone())
                    .ok()
                    .map(|payload| AnimationEvent::Completed(payload.animations))
            }
            _ => None,
        }
    }
}
