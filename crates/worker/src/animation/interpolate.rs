//! 状态插值
//!
//! 数值字段按分量线性插值；非数值字段在进度过半时从起始值切换到结束值。

use serde_json::Value;

use super::types::{AnimationState, AnimationType};

/// 非数值字段的切换点
const SNAP_POINT: f64 = 0.5;

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// 把角度差归一化到 `[-180, 180]`
pub fn shortest_angle_delta(from: f64, to: f64) -> f64 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

fn blend(start: &AnimationState, end: &AnimationState, t: f64, angular: bool) -> AnimationState {
    let mut state = AnimationState::new();

    for (key, from) in start {
        let value = match end.get(key) {
            Some(to) => match (number(from), number(to)) {
                (Some(a), Some(b)) if angular => Value::from(a + shortest_angle_delta(a, b) * t),
                (Some(a), Some(b)) => Value::from(lerp(a, b, t)),
                _ if t < SNAP_POINT => from.clone(),
                _ => to.clone(),
            },
            None => from.clone(),
        };
        state.insert(key.clone(), value);
    }

    // 只在结束状态中出现的字段
    for (key, to) in end {
        if !state.contains_key(key) {
            state.insert(key.clone(), to.clone());
        }
    }

    state
}

/// 按动画类型计算缓动后进度 `eased` 对应的状态
pub fn interpolate(
    animation_type: AnimationType,
    start: &AnimationState,
    end: &AnimationState,
    keyframes: &[AnimationState],
    eased: f64,
) -> AnimationState {
    match animation_type {
        AnimationType::Move | AnimationType::Fade | AnimationType::Scale => {
            blend(start, end, eased, false)
        }
        AnimationType::Rotate => blend(start, end, eased, true),
        AnimationType::Complex if keyframes.len() >= 2 => interpolate_keyframes(keyframes, eased),
        AnimationType::Complex => blend(start, end, eased, false),
    }
}

/// 分段关键帧插值，`keyframes` 至少包含两帧
fn interpolate_keyframes(keyframes: &[AnimationState], eased: f64) -> AnimationState {
    let segments = keyframes.len() - 1;
    let scaled = eased.clamp(0.0, 1.0) * segments as f64;
    let index = (scaled.floor() as usize).min(segments - 1);
    let local = (scaled - index as f64).clamp(0.0, 1.0);
    blend(&keyframes[index], &keyframes[index + 1], local, false)
}

/// 动画结束时的精确状态
pub fn terminal_state(
    animation_type: AnimationType,
    start: &AnimationState,
    end: &AnimationState,
    keyframes: &[AnimationState],
) -> AnimationState {
    if animation_type == AnimationType::Complex && keyframes.len() >= 2 {
        if let Some(last) = keyframes.last() {
            return last.clone();
        }
    }
    let mut state = start.clone();
    for (key, value) in end {
        state.insert(key.clone(), value.clone());
    }
    state
}
