//! 动画调度Worker
//!
//! - [`easing`]：缓动函数
//! - [`interpolate`]：按动画类型的状态插值
//! - [`types`]：命令、句柄和通知的线上格式
//! - [`scheduler`]：持有全部进行中动画的 [`AnimationScheduler`]

pub mod easing;
pub mod interpolate;
pub mod scheduler;
pub mod types;

pub use easing::Easing;
pub use scheduler::{AnimationScheduler, TickOutput};
pub use types::*;
