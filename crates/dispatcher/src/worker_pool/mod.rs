//! Worker池
//!
//! - [`host`]：在独立tokio任务中运行单个Worker的宿主循环
//! - [`manager`]：生命周期管理、请求关联、超时、崩溃重启与性能指标

mod correlation;
pub mod host;
pub mod manager;

pub use manager::WorkerPoolManager;
