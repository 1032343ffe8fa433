//! 桌游异步任务分发与动画调度运行时
//!
//! - [`runtime::GameRuntime`]：对游戏层的统一入口
//! - [`scenario`]：命令行演示场景

pub mod runtime;
pub mod scenario;

pub use runtime::{AnimationSubscription, GameRuntime, RuntimeMetrics};
