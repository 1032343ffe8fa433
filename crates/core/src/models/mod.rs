//! # 数据模型
//!
//! 运行时各组件之间共享的数据结构。
//!
//! - [`Envelope`]：Worker与管理器之间的消息信封 `{type, data}`
//! - [`Task`]：一次待关联的Worker请求
//! - [`GameEvent`]：事件分发器队列中的事件
//! - [`WorkerStatus`] / [`PerformanceMetrics`]：只读状态快照
//!
//! 所有模型都实现了 `serde` 序列化，可以直接以JSON形式交给游戏层。

pub mod event;
pub mod message;
pub mod task;
pub mod worker;

pub use event::*;
pub use message::*;
pub use task::*;
pub use worker::*;
