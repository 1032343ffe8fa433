//! 隔离Worker实现
//!
//! - [`compute::GameLogicWorker`]：洗牌、路径搜索、克制计算、批处理
//! - [`animation::AnimationScheduler`]：按帧推进的动画调度器

pub mod animation;
pub mod compute;

use tabletop_core::{RuntimeConfig, WorkerSpec};

pub use animation::{AnimationEvent, AnimationScheduler, Easing};
pub use compute::GameLogicWorker;

/// 游戏逻辑Worker的名称
pub const GAME_LOGIC_WORKER: &str = "game-logic";
/// 动画调度Worker的名称
pub const ANIMATION_WORKER: &str = "animation";

/// 运行时默认启动的Worker
pub fn default_worker_specs(config: &RuntimeConfig) -> Vec<WorkerSpec> {
    let compute = config.compute.clone();
    let animation = config.animation.clone();
    vec![
        WorkerSpec::new(GAME_LOGIC_WORKER, move || {
            GameLogicWorker::new(compute.clone())
        }),
        WorkerSpec::new(ANIMATION_WORKER, move || {
            AnimationScheduler::new(animation.clone())
        }),
    ]
}
