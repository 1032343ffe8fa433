use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tabletop_core::{AnimationConfig, Envelope, RuntimeError, RuntimeResult, Worker, WorkerOutbox};

use super::easing::Easing;
use super::interpolate::{interpolate, terminal_state};
use super::types::{
    AnimationCommand, AnimationHandle, AnimationSpec, AnimationState, AnimationStats,
    AnimationType, CompletedAnimation, FrameUpdate, TimelineHandle, TimelineSpec,
    ANIMATIONS_COMPLETE, ANIMATION_FRAME,
};

/// 帧间隔比较时允许的误差（毫秒）
const FRAME_EPSILON_MS: f64 = 0.01;

#[derive(Debug, Clone)]
struct ActiveAnimation {
    animation_type: AnimationType,
    easing: Easing,
    start_time: f64,
    duration: f64,
    start_state: AnimationState,
    end_state: AnimationState,
    keyframes: Vec<AnimationState>,
    paused_at: Option<f64>,
    last_progress: f64,
}

impl ActiveAnimation {
    fn progress_at(&self, now_ms: f64) -> f64 {
        let elapsed = now_ms - self.start_time;
        let progress = if self.duration <= 0.0 {
            1.0
        } else {
            (elapsed / self.duration).clamp(0.0, 1.0)
        };
        progress.max(self.last_progress)
    }
}

/// 一次更新产生的输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub updates: Vec<FrameUpdate>,
    pub completed: Vec<CompletedAnimation>,
    pub timestamp: f64,
}

/// 动画调度器
///
/// 独占所有进行中的动画，按固定帧间隔推进进度。每次更新把本帧所有动画的状态合并为一条
/// `ANIMATION_FRAME`，把本帧完成的动画合并为一条 `ANIMATIONS_COMPLETE`。
///
/// 时间以毫秒为单位，从调度器创建时刻开始计量。
pub struct AnimationScheduler {
    config: AnimationConfig,
    epoch: Instant,
    animations: BTreeMap<String, ActiveAnimation>,
    last_update_ms: Option<f64>,
    next_id: u64,
    frames_processed: u64,
    frame_drops: u64,
    completed: u64,
}

impl AnimationScheduler {
    pub fn new(config: AnimationConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            animations: BTreeMap::new(),
            last_update_ms: None,
            next_id: 0,
            frames_processed: 0,
            frame_drops: 0,
            completed: 0,
        }
    }

    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    fn generate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn has_running(&self) -> bool {
        self.animations.values().any(|a| a.paused_at.is_none())
    }

    /// 从空闲状态恢复时重新起算帧间隔，避免把空闲时间记为掉帧
    fn wake_at(&mut self, now_ms: f64) {
        if !self.has_running() {
            self.last_update_ms = Some(now_ms);
        }
    }

    fn insert(&mut self, id: String, spec: AnimationSpec, start_time: f64) -> RuntimeResult<()> {
        if !spec.duration.is_finite() || spec.duration < 0.0 {
            return Err(RuntimeError::invalid_payload(format!(
                "动画持续时间无效: {}",
                spec.duration
            )));
        }
        if !spec.delay.is_finite() || spec.delay < 0.0 {
            return Err(RuntimeError::invalid_payload(format!(
                "动画延迟无效: {}",
                spec.delay
            )));
        }
        if self.animations.contains_key(&id) {
            warn!("动画 {} 已存在，将被替换", id);
        }

        self.animations.insert(
            id,
            ActiveAnimation {
                animation_type: spec.animation_type,
                easing: spec.easing,
                start_time,
                duration: spec.duration,
                start_state: spec.start_state,
                end_state: spec.end_state,
                keyframes: spec.keyframes,
                paused_at: None,
                last_progress: 0.0,
            },
        );
        Ok(())
    }

    pub fn add_animation(
        &mut self,
        mut spec: AnimationSpec,
        now_ms: f64,
    ) -> RuntimeResult<AnimationHandle> {
        let id = match spec.id.take() {
            Some(id) => id,
            None => self.generate_id("anim"),
        };
        let start_time = now_ms + spec.delay;

        self.wake_at(now_ms);
        self.insert(id.clone(), spec, start_time)?;
        debug!("添加动画: {} (开始时间 {:.2}ms)", id, start_time);

        Ok(AnimationHandle { id, start_time })
    }

    /// 把时间线展开为一组独立动画
    pub fn create_timeline(
        &mut self,
        spec: TimelineSpec,
        now_ms: f64,
    ) -> RuntimeResult<TimelineHandle> {
        let timeline_id = match spec.id {
            Some(id) => id,
            None => self.generate_id("timeline"),
        };

        // 先整体校验，避免展开到一半失败
        for child in &spec.animations {
            if !child.duration.is_finite() || child.duration < 0.0 {
                return Err(RuntimeError::invalid_payload(format!(
                    "时间线 {} 中的动画持续时间无效: {}",
                    timeline_id, child.duration
                )));
            }
            if !child.delay.is_finite() || child.delay < 0.0 {
                return Err(RuntimeError::invalid_payload(format!(
                    "时间线 {} 中的动画延迟无效: {}",
                    timeline_id, child.delay
                )));
            }
        }

        self.wake_at(now_ms);

        let mut duration: f64 = 0.0;
        let mut ids = Vec::with_capacity(spec.animations.len());
        for (index, mut child) in spec.animations.into_iter().enumerate() {
            let id = child
                .id
                .take()
                .unwrap_or_else(|| format!("{timeline_id}_{index}"));
            duration = duration.max(child.delay + child.duration);
            let start_time = now_ms + child.delay;
            self.insert(id.clone(), child, start_time)?;
            ids.push(id);
        }

        info!(
            "创建时间线: {} ({} 个动画, 总时长 {:.0}ms)",
            timeline_id,
            ids.len(),
            duration
        );

        Ok(TimelineHandle {
            id: timeline_id,
            duration,
            animations: ids,
        })
    }

    pub fn remove_animation(&mut self, id: &str) -> bool {
        let removed = self.animations.remove(id).is_some();
        if removed {
            debug!("移除动画: {}", id);
        }
        removed
    }

    pub fn pause_animation(&mut self, id: &str, now_ms: f64) -> RuntimeResult<bool> {
        let animation = self
            .animations
            .get_mut(id)
            .ok_or_else(|| RuntimeError::AnimationNotFound { id: id.to_string() })?;
        if animation.paused_at.is_some() {
            return Ok(false);
        }
        animation.paused_at = Some(now_ms);
        Ok(true)
    }

    pub fn resume_animation(&mut self, id: &str, now_ms: f64) -> RuntimeResult<bool> {
        if !self.animations.contains_key(id) {
            return Err(RuntimeError::AnimationNotFound { id: id.to_string() });
        }
        self.wake_at(now_ms);

        let Some(animation) = self.animations.get_mut(id) else {
            return Err(RuntimeError::AnimationNotFound { id: id.to_string() });
        };
        match animation.paused_at.take() {
            Some(paused_at) => {
                animation.start_time += now_ms - paused_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn stats(&self) -> AnimationStats {
        let paused = self
            .animations
            .values()
            .filter(|a| a.paused_at.is_some())
            .count();
        AnimationStats {
            active: self.animations.len() - paused,
            paused,
            frames_processed: self.frames_processed,
            frame_drops: self.frame_drops,
            completed: self.completed,
        }
    }

    pub fn active_count(&self) -> usize {
        self.animations.len()
    }

    /// 推进到 `now_ms`
    ///
    /// 距上次更新不足一个帧间隔时返回 `None`。完成的动画在本次更新中以进度1.0和精确的
    /// 终止状态报告一次，随后立即从活动表中移除。
    pub fn advance(&mut self, now_ms: f64) -> Option<TickOutput> {
        let Some(last) = self.last_update_ms else {
            self.last_update_ms = Some(now_ms);
            return None;
        };

        let interval = self.config.frame_interval_ms;
        let delta = now_ms - last;
        if delta + FRAME_EPSILON_MS < interval {
            return None;
        }
        if delta > interval * self.config.frame_drop_factor {
            self.frame_drops += 1;
            debug!("检测到掉帧: 帧间隔 {:.2}ms", delta);
        }
        self.last_update_ms = Some(now_ms);
        self.frames_processed += 1;

        let mut output = TickOutput {
            timestamp: now_ms,
            ..TickOutput::default()
        };
        let mut finished = Vec::new();

        for (id, animation) in self.animations.iter_mut() {
            if animation.paused_at.is_some() || now_ms < animation.start_time {
                continue;
            }

            let progress = animation.progress_at(now_ms);
            animation.last_progress = progress;

            if progress >= 1.0 {
                let final_state = terminal_state(
                    animation.animation_type,
                    &animation.start_state,
                    &animation.end_state,
                    &animation.keyframes,
                );
                output.updates.push(FrameUpdate {
                    id: id.clone(),
                    state: final_state.clone(),
                    progress: 1.0,
                });
                output.completed.push(CompletedAnimation {
                    id: id.clone(),
                    final_state,
                });
                finished.push(id.clone());
            } else {
                let eased = animation.easing.apply(progress);
                output.updates.push(FrameUpdate {
                    id: id.clone(),
                    state: interpolate(
                        animation.animation_type,
                        &animation.start_state,
                        &animation.end_state,
                        &animation.keyframes,
                        eased,
                    ),
                    progress,
                });
            }
        }

        for id in &finished {
            self.animations.remove(id);
        }
        self.completed += finished.len() as u64;

        Some(output)
    }

    fn execute(&mut self, command: AnimationCommand) -> RuntimeResult<Value> {
        let now = self.now_ms();
        match command {
            AnimationCommand::AddAnimation(spec) => {
                Ok(serde_json::to_value(self.add_animation(spec, now)?)?)
            }
            AnimationCommand::CreateTimeline(spec) => {
                Ok(serde_json::to_value(self.create_timeline(spec, now)?)?)
            }
            AnimationCommand::RemoveAnimation(target) => {
                let removed = self.remove_animation(&target.id);
                Ok(json!({ "id": target.id, "removed": removed }))
            }
            AnimationCommand::PauseAnimation(target) => {
                let paused = self.pause_animation(&target.id, now)?;
                Ok(json!({ "id": target.id, "paused": paused }))
            }
            AnimationCommand::ResumeAnimation(target) => {
                let resumed = self.resume_animation(&target.id, now)?;
                Ok(json!({ "id": target.id, "resumed": resumed }))
            }
            AnimationCommand::GetAnimationStats {} => Ok(serde_json::to_value(self.stats())?),
        }
    }
}

#[async_trait]
impl Worker for AnimationScheduler {
    fn worker_type(&self) -> &str {
        crate::ANIMATION_WORKER
    }

    async fn handle_message(
        &mut self,
        envelope: Envelope,
        _outbox: &WorkerOutbox,
    ) -> RuntimeResult<Value> {
        let command = envelope.parse::<AnimationCommand>()?;
        self.execute(command)
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(self.config.frame_interval_ms / 1000.0))
    }

    fn wants_tick(&self) -> bool {
        self.has_running()
    }

    async fn on_tick(&mut self, outbox: &WorkerOutbox) -> RuntimeResult<()> {
        let now = self.now_ms();
        let Some(output) = self.advance(now) else {
            return Ok(());
        };

        if !output.updates.is_empty() {
            outbox.post(Envelope::new(
                ANIMATION_FRAME,
                json!({ "updates": output.updates, "timestamp": output.timestamp }),
            ));
        }
        if !output.completed.is_empty() {
            outbox.post(Envelope::new(
                ANIMATIONS_COMPLETE,
                json!({ "animations": output.completed }),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FRAME: f64 = 1000.0 / 60.0;

    fn scheduler() -> AnimationScheduler {
        AnimationScheduler::new(AnimationConfig::default())
    }

    fn move_spec(id: &str, duration: f64) -> AnimationSpec {
        AnimationSpec::new(AnimationType::Move, duration)
            .with_id(id)
            .with_states(json!({"x": 0, "y": 0}), json!({"x": 100, "y": 0}))
    }

    #[test]
    fn test_move_scenario() {
        let mut scheduler = scheduler();
        let handle = scheduler.add_animation(move_spec("m1", 400.0), 0.0).unwrap();
        assert_eq!(handle.id, "m1");
        assert_eq!(handle.start_time, 0.0);

        let mut last_progress = 0.0;
        let mut completions = Vec::new();
        let mut x_at_200 = None;

        for frame in 1..=30 {
            let now = frame as f64 * FRAME;
            let Some(output) = scheduler.advance(now) else {
                continue;
            };
            for update in &output.updates {
                assert!(update.progress >= last_progress);
                last_progress = update.progress;
                if (now - 200.0).abs() < 1e-6 {
                    x_at_200 = update.state["x"].as_f64();
                }
            }
            completions.extend(output.completed);
        }

        let x = x_at_200.unwrap();
        assert!((x - 50.0).abs() < 1e-6, "x at 200ms = {x}");
        assert_eq!(last_progress, 1.0);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].id, "m1");
        assert_eq!(
            Value::Object(completions[0].final_state.clone()),
            json!({"x": 100, "y": 0})
        );
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[test]
    fn test_skips_update_before_frame_interval() {
        let mut scheduler = scheduler();
        scheduler.add_animation(move_spec("a", 100.0), 0.0).unwrap();

        assert!(scheduler.advance(5.0).is_none());
        assert!(scheduler.advance(FRAME).is_some());
        assert_eq!(scheduler.stats().frames_processed, 1);
    }

    #[test]
    fn test_frame_drop_detection() {
        let mut scheduler = scheduler();
        scheduler.add_animation(move_spec("a", 1000.0), 0.0).unwrap();

        scheduler.advance(FRAME).unwrap();
        scheduler.advance(FRAME * 4.0).unwrap();
        assert_eq!(scheduler.stats().frame_drops, 1);
    }

    #[test]
    fn test_pause_and_resume_shift_start_time() {
        let mut scheduler = scheduler();
        scheduler.add_animation(move_spec("a", 100.0), 0.0).unwrap();

        let output = scheduler.advance(50.0).unwrap();
        assert_eq!(output.updates[0].progress, 0.5);

        assert!(scheduler.pause_animation("a", 50.0).unwrap());
        assert!(!scheduler.pause_animation("a", 60.0).unwrap());
        assert!(!scheduler.wants_tick());

        let output = scheduler.advance(500.0).unwrap();
        assert!(output.updates.is_empty());

        assert!(scheduler.resume_animation("a", 500.0).unwrap());
        let output = scheduler.advance(525.0).unwrap();
        assert_eq!(output.updates[0].progress, 0.75);
    }

    #[test]
    fn test_pause_unknown_animation_fails() {
        let mut scheduler = scheduler();
        assert!(matches!(
            scheduler.pause_animation("ghost", 0.0),
            Err(RuntimeError::AnimationNotFound { .. })
        ));
        assert!(!scheduler.remove_animation("ghost"));
    }

    #[test]
    fn test_delayed_animation_waits_for_start() {
        let mut scheduler = scheduler();
        let handle = scheduler
            .add_animation(move_spec("late", 100.0).with_delay(100.0), 0.0)
            .unwrap();
        assert_eq!(handle.start_time, 100.0);

        let output = scheduler.advance(50.0).unwrap();
        assert!(output.updates.is_empty());

        let output = scheduler.advance(150.0).unwrap();
        assert_eq!(output.updates[0].progress, 0.5);
    }

    #[test]
    fn test_timeline_expands_to_independent_animations() {
        let mut scheduler = scheduler();
        let handle = scheduler
            .create_timeline(
                TimelineSpec {
                    id: Some("intro".into()),
                    animations: vec![
                        AnimationSpec::new(AnimationType::Fade, 200.0),
                        AnimationSpec::new(AnimationType::Scale, 100.0).with_delay(300.0),
                    ],
                },
                0.0,
            )
            .unwrap();

        assert_eq!(handle.id, "intro");
        assert_eq!(handle.duration, 400.0);
        assert_eq!(handle.animations, vec!["intro_0", "intro_1"]);
        assert_eq!(scheduler.active_count(), 2);
    }

    #[test]
    fn test_rejects_negative_duration() {
        let mut scheduler = scheduler();
        let result = scheduler.add_animation(AnimationSpec::new(AnimationType::Move, -1.0), 0.0);
        assert!(matches!(result, Err(RuntimeError::InvalidPayload(_))));
    }

    #[test]
    fn test_completions_batched_per_tick() {
        let mut scheduler = scheduler();
        scheduler.add_animation(move_spec("b", 10.0), 0.0).unwrap();
        scheduler.add_animation(move_spec("a", 10.0), 0.0).unwrap();

        let output = scheduler.advance(FRAME).unwrap();
        let ids: Vec<_> = output.completed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(output.updates.iter().all(|u| u.progress == 1.0));

        let output = scheduler.advance(FRAME * 2.0).unwrap();
        assert!(output.completed.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_easing_is_rejected() {
        let mut scheduler = scheduler();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let outbox = WorkerOutbox::new("animation".into(), tx);

        let envelope = Envelope::request(
            "ADD_ANIMATION",
            json!({"type": "MOVE", "duration": 100, "easing": "wobble"}),
            Some("t1"),
            "normal",
        )
        .unwrap();
        let result = scheduler.handle_message(envelope, &outbox).await;
        assert!(matches!(result, Err(RuntimeError::InvalidPayload(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_tick_posts_frame_and_completion() {
        let mut scheduler = scheduler();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let outbox = WorkerOutbox::new("animation".into(), tx);

        let envelope = Envelope::request(
            "ADD_ANIMATION",
            json!({"id": "f", "type": "FADE", "duration": 20, "startState": {"opacity": 0}, "endState": {"opacity": 1}}),
            Some("t1"),
            "normal",
        )
        .unwrap();
        let reply = scheduler.handle_message(envelope, &outbox).await.unwrap();
        assert_eq!(reply["id"], "f");
        assert!(scheduler.wants_tick());

        tokio::time::advance(Duration::from_millis(30)).await;
        scheduler.on_tick(&outbox).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.envelope.message_type, ANIMATION_FRAME);
        let done = rx.recv().await.unwrap();
        assert_eq!(done.envelope.message_type, ANIMATIONS_COMPLETE);
        assert_eq!(done.envelope.data["animations"][0]["finalState"], json!({"opacity": 1}));
        assert!(!scheduler.wants_tick());
    }
}
