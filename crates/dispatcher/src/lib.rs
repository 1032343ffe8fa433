//! 任务分发层
//!
//! - [`worker_pool`]：Worker生命周期与请求关联
//! - [`event_dispatcher`]：带优先级和批处理的事件队列

pub mod event_dispatcher;
pub mod worker_pool;

pub use event_dispatcher::{
    handler_fn, BatchReport, DispatcherStats, EventDispatcher, EventHandler,
};
pub use worker_pool::WorkerPoolManager;
