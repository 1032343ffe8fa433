//! Worker接口定义
//!
//! 此模块定义了隔离Worker的核心抽象：
//! - [`Worker`]：单线程、独占自身状态的计算单元
//! - [`WorkerOutbox`]：Worker向管理器发送消息的唯一出口
//! - [`WorkerSpec`]：Worker的启动规格，崩溃后按同一规格重建
//!
//! ## 运行模型
//!
//! 每个Worker运行在独立的tokio任务中，与其他Worker不共享任何内存，
//! 只能通过 [`Envelope`] 消息通信：
//!
//! 1. 宿主调用 [`Worker::initialize`]
//! 2. 宿主代替Worker发送一次 `WORKER_READY` 握手
//! 3. 逐条处理收到的请求，把返回值包装成 `<type>_RESULT` 或 `ERROR`
//! 4. 若 [`Worker::tick_interval`] 返回 `Some` 且 [`Worker::wants_tick`] 为真，
//!    按固定间隔调用 [`Worker::on_tick`]
//!
//! Worker内部panic会终止其任务，由管理器检测为崩溃并按规格重启。
//!
//! ## 实现自定义Worker
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use tabletop_core::models::Envelope;
//! use tabletop_core::traits::{Worker, WorkerOutbox};
//! use tabletop_core::RuntimeResult;
//!
//! struct EchoWorker;
//!
//! #[async_trait]
//! impl Worker for EchoWorker {
//!     fn worker_type(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn handle_message(
//!         &mut self,
//!         envelope: Envelope,
//!         _outbox: &WorkerOutbox,
//!     ) -> RuntimeResult<Value> {
//!         Ok(json!({ "echo": envelope.data }))
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::{Envelope, InboundMessage};
use crate::RuntimeResult;

/// 隔离Worker的核心接口
#[async_trait]
pub trait Worker: Send {
    /// Worker类型名称，写入 `WORKER_READY` 握手
    fn worker_type(&self) -> &str;

    /// Worker自身的初始化，完成之前不会发送就绪握手
    async fn initialize(&mut self) -> RuntimeResult<()> {
        Ok(())
    }

    /// 处理一条请求
    ///
    /// 返回 `Ok` 时宿主回复 `<type>_RESULT`，返回 `Err` 时回复 `ERROR`。
    async fn handle_message(
        &mut self,
        envelope: Envelope,
        outbox: &WorkerOutbox,
    ) -> RuntimeResult<Value>;

    /// 周期性回调的目标间隔，`None` 表示Worker不需要时钟
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// 当前是否有需要推进的工作；为假时宿主暂停时钟
    fn wants_tick(&self) -> bool {
        false
    }

    async fn on_tick(&mut self, _outbox: &WorkerOutbox) -> RuntimeResult<()> {
        Ok(())
    }
}

/// Worker发往管理器的消息出口
#[derive(Clone)]
pub struct WorkerOutbox {
    worker_name: String,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl WorkerOutbox {
    pub fn new(worker_name: String, sender: mpsc::UnboundedSender<InboundMessage>) -> Self {
        Self {
            worker_name,
            sender,
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// 发送一条消息；管理器已关闭时返回 `false`
    pub fn post(&self, envelope: Envelope) -> bool {
        self.sender
            .send(InboundMessage {
                worker: self.worker_name.clone(),
                envelope,
            })
            .is_ok()
    }
}

impl fmt::Debug for WorkerOutbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerOutbox")
            .field("worker_name", &self.worker_name)
            .finish()
    }
}

type WorkerFactory = dyn Fn() -> Box<dyn Worker> + Send + Sync;

/// Worker启动规格
///
/// 保存Worker名称和构造函数，崩溃重启时用同一个工厂创建新实例。
#[derive(Clone)]
pub struct WorkerSpec {
    name: String,
    factory: Arc<WorkerFactory>,
}

impl WorkerSpec {
    pub fn new<F, W>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> W + Send + Sync + 'static,
        W: Worker + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Worker>),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(&self) -> Box<dyn Worker> {
        (self.factory)()
    }
}

impl fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("name", &self.name)
            .finish()
    }
}
