//! 演示场景
//!
//! 命令行程序用这里的场景演示运行时的完整链路：事件入队 → 批次执行 → 处理器调用Worker →
//! 动画逐帧推进直到完成。

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use tabletop_core::{EventPriority, RuntimeError, RuntimeResult, TaskOptions};
use tabletop_dispatcher::{handler_fn, DispatcherStats};
use tabletop_worker::animation::{AnimationEvent, AnimationSpec, AnimationType, TimelineSpec};
use tabletop_worker::compute::{CALCULATE_EFFECTIVENESS, DRAW_CARDS, FIND_PATHS, SHUFFLE_DECK};
use tabletop_worker::{Easing, GAME_LOGIC_WORKER};

use crate::runtime::{AnimationSubscription, GameRuntime};

/// 等待动画完成的上限
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);
/// 棋盘格子在x轴上的像素间距
const CELL_WIDTH: f64 = 40.0;
const BOARD_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Events,
    Animation,
    All,
}

impl FromStr for Scenario {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Scenario::Events),
            "animation" => Ok(Scenario::Animation),
            "all" => Ok(Scenario::All),
            other => Err(RuntimeError::config_error(format!("不支持的演示场景: {other}"))),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scenario::Events => "events",
            Scenario::Animation => "animation",
            Scenario::All => "all",
        };
        f.write_str(name)
    }
}

/// 场景执行结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioReport {
    pub events: DispatcherStats,
    pub frames: u64,
    pub animations_completed: usize,
}

/// 运行指定场景，运行时必须已经初始化
pub async fn run(runtime: &GameRuntime, scenario: Scenario) -> RuntimeResult<ScenarioReport> {
    let mut report = ScenarioReport::default();
    if matches!(scenario, Scenario::Events | Scenario::All) {
        run_events(runtime, &mut report).await?;
    }
    if matches!(scenario, Scenario::Animation | Scenario::All) {
        run_timeline(runtime, &mut report).await?;
    }
    report.events = runtime.dispatcher().stats().await;
    info!(
        "场景 {} 完成: {} 帧, {} 个动画完成, {} 个事件已处理",
        scenario, report.frames, report.animations_completed, report.events.processed
    );
    Ok(report)
}

/// 一回合的事件流：移动棋子、播放音效、刷新克制提示、回合结束洗牌抽牌
async fn run_events(runtime: &GameRuntime, report: &mut ScenarioReport) -> RuntimeResult<()> {
    let (started_tx, mut started_rx) = mpsc::unbounded_channel::<String>();
    register_demo_handlers(runtime, started_tx).await;

    let mut animations = runtime.subscribe_animations();
    runtime
        .queue_event("move", json!({"from": 0, "to": 5}), EventPriority::Normal)
        .await;
    runtime
        .queue_event("sound", json!({"clip": "step"}), EventPriority::Normal)
        .await;
    runtime
        .queue_event(
            "ui-update",
            json!({"attacker": "fire", "defender": "grass"}),
            EventPriority::Normal,
        )
        .await;
    runtime
        .queue_event("turn-end", json!({"player": 1}), EventPriority::High)
        .await;
    runtime.wait_idle().await;

    let mut started = Vec::new();
    while let Ok(id) = started_rx.try_recv() {
        started.push(id);
    }
    await_completions(&mut animations, &started, report).await
}

async fn register_demo_handlers(runtime: &GameRuntime, started: mpsc::UnboundedSender<String>) {
    let rt = runtime.clone();
    runtime
        .register_handler(
            "move",
            handler_fn(move |event| {
                let rt = rt.clone();
                let started = started.clone();
                async move {
                    let from = event.data["from"].as_u64().unwrap_or(0);
                    let to = event.data["to"].as_u64().unwrap_or(0);
                    let paths = rt
                        .send_task(
                            GAME_LOGIC_WORKER,
                            FIND_PATHS,
                            json!({
                                "from": from,
                                "to": to,
                                "boardSize": BOARD_SIZE,
                                "maxSteps": 6,
                                "topK": 1
                            }),
                            TaskOptions::default(),
                        )
                        .await?;
                    let steps = paths["paths"][0].as_array().map(Vec::len).unwrap_or(0);
                    info!("棋子 {} → {} 的最短路径: {} 格", from, to, steps.saturating_sub(1));

                    let spec = AnimationSpec::new(AnimationType::Move, 300.0)
                        .with_easing(Easing::EaseInOutQuad)
                        .with_states(
                            json!({"x": from as f64 * CELL_WIDTH, "y": 0}),
                            json!({"x": to as f64 * CELL_WIDTH, "y": 0}),
                        );
                    let handle = rt.add_animation(spec).await?;
                    let _ = started.send(handle.id);
                    Ok(())
                }
            }),
        )
        .await;

    runtime
        .register_handler(
            "sound",
            handler_fn(|event| async move {
                debug!("播放音效: {}", event.data["clip"]);
                Ok(())
            }),
        )
        .await;

    let rt = runtime.clone();
    runtime
        .register_handler(
            "ui-update",
            handler_fn(move |event| {
                let rt = rt.clone();
                async move {
                    let attacker = event.data["attacker"].as_str().unwrap_or("normal").to_string();
                    let defender = event.data["defender"].as_str().unwrap_or("normal").to_string();
                    let result = rt
                        .send_task(
                            GAME_LOGIC_WORKER,
                            CALCULATE_EFFECTIVENESS,
                            json!({
                                "attacker": {"kind": attacker, "power": 60},
                                "defender": {"kind": defender, "defense": 40},
                                "table": {"fire": {"grass": 2.0, "water": 0.5}}
                            }),
                            TaskOptions::default(),
                        )
                        .await?;
                    info!(
                        "克制提示 {} vs {}: {} (胜率 {})",
                        attacker, defender, result["effectiveness"], result["winProbability"]
                    );
                    Ok(())
                }
            }),
        )
        .await;

    let rt = runtime.clone();
    runtime
        .register_handler(
            "turn-end",
            handler_fn(move |_event| {
                let rt = rt.clone();
                async move {
                    let cards: Vec<Value> = (1..=20).map(|n| json!(n)).collect();
                    rt.send_task(
                        GAME_LOGIC_WORKER,
                        SHUFFLE_DECK,
                        json!({"cards": cards, "deckId": "main"}),
                        TaskOptions::default(),
                    )
                    .await?;
                    let drawn = rt
                        .send_task(
                            GAME_LOGIC_WORKER,
                            DRAW_CARDS,
                            json!({"deckId": "main", "count": 3}),
                            TaskOptions::default(),
                        )
                        .await?;
                    info!("回合结束，抽牌: {} (剩余 {})", drawn["cards"], drawn["remaining"]);
                    Ok(())
                }
            }),
        )
        .await;
}

/// 一段三阶段的时间线：淡入、放大、旋转
async fn run_timeline(runtime: &GameRuntime, report: &mut ScenarioReport) -> RuntimeResult<()> {
    let mut animations = runtime.subscribe_animations();
    let timeline = runtime
        .create_timeline(TimelineSpec {
            id: None,
            animations: vec![
                AnimationSpec::new(AnimationType::Fade, 200.0)
                    .with_states(json!({"opacity": 0}), json!({"opacity": 1})),
                AnimationSpec::new(AnimationType::Scale, 250.0)
                    .with_easing(Easing::Bounce)
                    .with_states(json!({"scale": 1}), json!({"scale": 1.5}))
                    .with_delay(100.0),
                AnimationSpec::new(AnimationType::Rotate, 300.0)
                    .with_easing(Easing::EaseOutCubic)
                    .with_states(json!({"angle": 350}), json!({"angle": 10}))
                    .with_delay(150.0),
            ],
        })
        .await?;
    info!(
        "时间线 {} 已创建: {} 个动画, 总时长 {}ms",
        timeline.id,
        timeline.animations.len(),
        timeline.duration
    );
    await_completions(&mut animations, &timeline.animations, report).await
}

async fn await_completions(
    subscription: &mut AnimationSubscription,
    ids: &[String],
    report: &mut ScenarioReport,
) -> RuntimeResult<()> {
    let mut remaining: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let waiting = async {
        while !remaining.is_empty() {
            match subscription.recv().await {
                Some(AnimationEvent::Frame { .. }) => report.frames += 1,
                Some(AnimationEvent::Completed(done)) => {
                    for animation in done {
                        if remaining.remove(animation.id.as_str()) {
                            report.animations_completed += 1;
                            let final_state = Value::Object(animation.final_state);
                            info!("动画 {} 完成: {}", animation.id, final_state);
                        }
                    }
                }
                None => {
                    return Err(RuntimeError::ChannelClosed(
                        "动画通知通道已关闭".to_string(),
                    ))
                }
            }
        }
        Ok(())
    };

    tokio::time::timeout(COMPLETION_TIMEOUT, waiting)
        .await
        .map_err(|_| RuntimeError::Internal("等待动画完成超时".to_string()))?
}
