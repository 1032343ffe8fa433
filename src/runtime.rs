//! 运行时门面
//!
//! [`GameRuntime`] 把Worker池和事件分发器组装在一起，对外提供游戏层需要的全部操作：
//! 事件入队、向Worker发送请求、动画控制和运行指标。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use tabletop_core::models::{PerformanceMetrics, WorkerStatus};
use tabletop_core::{
    EventId, EventKind, EventPriority, RuntimeConfig, RuntimeResult, TaskOptions,
    WorkerNotification, WorkerSpec,
};
use tabletop_dispatcher::{DispatcherStats, EventDispatcher, EventHandler, WorkerPoolManager};
use tabletop_worker::animation::{
    AnimationEvent, AnimationHandle, AnimationSpec, AnimationStats, TimelineHandle, TimelineSpec,
};
use tabletop_worker::{default_worker_specs, ANIMATION_WORKER};

/// 运行时整体指标
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeMetrics {
    pub workers: PerformanceMetrics,
    pub events: DispatcherStats,
}

/// 游戏运行时
///
/// 生命周期为 `new → initialize → … → destroy`。克隆得到的实例共享同一个Worker池和事件队列，
/// 事件处理器可以持有克隆来调用 [`GameRuntime::send_task`]。
#[derive(Clone)]
pub struct GameRuntime {
    config: Arc<RuntimeConfig>,
    pool: WorkerPoolManager,
    dispatcher: EventDispatcher,
    specs: Arc<Vec<WorkerSpec>>,
    init_lock: Arc<Mutex<()>>,
}

impl GameRuntime {
    /// 使用默认的游戏逻辑Worker和动画Worker
    pub fn new(config: RuntimeConfig) -> Self {
        let specs = default_worker_specs(&config);
        Self::with_workers(config, specs)
    }

    pub fn with_workers(config: RuntimeConfig, specs: Vec<WorkerSpec>) -> Self {
        let pool = WorkerPoolManager::from_config(&config);
        let dispatcher = EventDispatcher::new(config.dispatcher.clone());
        Self {
            config: Arc::new(config),
            pool,
            dispatcher,
            specs: Arc::new(specs),
            init_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPoolManager {
        &self.pool
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// 启动所有Worker并等待就绪，重复调用直接返回
    pub async fn initialize(&self) -> RuntimeResult<()> {
        let _guard = self.init_lock.lock().await;
        if self.pool.is_initialized().await {
            debug!("运行时已初始化，跳过");
            return Ok(());
        }

        info!("初始化运行时: {} 个Worker", self.specs.len());
        self.pool.initialize(self.specs.as_ref().clone()).await
    }

    pub async fn is_initialized(&self) -> bool {
        self.pool.is_initialized().await
    }

    pub async fn register_handler(
        &self,
        kind: impl Into<EventKind>,
        handler: Arc<dyn EventHandler>,
    ) {
        self.dispatcher.register_handler(kind, handler).await;
    }

    pub async fn queue_event(
        &self,
        kind: impl Into<EventKind>,
        data: Value,
        priority: EventPriority,
    ) -> EventId {
        self.dispatcher.queue_event(kind, data, priority).await
    }

    /// 等待事件队列排空
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    pub async fn send_task(
        &self,
        worker_name: &str,
        task_type: &str,
        payload: Value,
        options: TaskOptions,
    ) -> RuntimeResult<Value> {
        self.pool
            .send_task(worker_name, task_type, payload, options)
            .await
    }

    pub async fn send_task_async(&self, worker_name: &str, task_type: &str, payload: Value) -> bool {
        self.pool
            .send_task_async(worker_name, task_type, payload)
            .await
    }

    async fn animation_request<T: DeserializeOwned>(
        &self,
        command: &str,
        payload: Value,
    ) -> RuntimeResult<T> {
        let options =
            TaskOptions::default().with_timeout_ms(self.config.worker_pool.default_task_timeout_ms);
        let result = self
            .pool
            .send_task(ANIMATION_WORKER, command, payload, options)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn add_animation(&self, spec: AnimationSpec) -> RuntimeResult<AnimationHandle> {
        self.animation_request("ADD_ANIMATION", serde_json::to_value(spec)?)
            .await
    }

    pub async fn create_timeline(&self, spec: TimelineSpec) -> RuntimeResult<TimelineHandle> {
        self.animation_request("CREATE_TIMELINE", serde_json::to_value(spec)?)
            .await
    }

    /// 移除动画，返回是否确实存在
    pub async fn remove_animation(&self, id: &str) -> RuntimeResult<bool> {
        let reply: Value = self
            .animation_request("REMOVE_ANIMATION", json!({ "id": id }))
            .await?;
        Ok(reply["removed"].as_bool().unwrap_or(false))
    }

    pub async fn pause_animation(&self, id: &str) -> RuntimeResult<bool> {
        let reply: Value = self
            .animation_request("PAUSE_ANIMATION", json!({ "id": id }))
            .await?;
        Ok(reply["paused"].as_bool().unwrap_or(false))
    }

    pub async fn resume_animation(&self, id: &str) -> RuntimeResult<bool> {
        let reply: Value = self
            .animation_request("RESUME_ANIMATION", json!({ "id": id }))
            .await?;
        Ok(reply["resumed"].as_bool().unwrap_or(false))
    }

    pub async fn animation_stats(&self) -> RuntimeResult<AnimationStats> {
        self.animation_request("GET_ANIMATION_STATS", json!({}))
            .await
    }

    /// 订阅动画帧和完成通知
    pub fn subscribe_animations(&self) -> AnimationSubscription {
        AnimationSubscription {
            receiver: self.pool.subscribe(),
        }
    }

    /// 订阅Worker池的全部非关联通知
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerNotification> {
        self.pool.subscribe()
    }

    pub async fn get_performance_metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics {
            workers: self.pool.performance_metrics().await,
            events: self.dispatcher.stats().await,
        }
    }

    pub async fn get_worker_status(&self) -> Vec<WorkerStatus> {
        self.pool.all_worker_status().await
    }

    /// 关闭事件分发器并销毁所有Worker，待处理请求以 `Destroyed` 拒绝
    ///
    /// 之后入队的事件一律被拒绝；正在执行的批次跑完后返回，失败的事件不再重试。
    pub async fn destroy(&self) {
        let _guard = self.init_lock.lock().await;
        let dropped = self.dispatcher.close().await;
        self.pool.destroy().await;
        self.dispatcher.wait_idle().await;
        info!("运行时已销毁，丢弃 {} 个排队事件", dropped);
    }
}

/// 动画通知流
pub struct AnimationSubscription {
    receiver: broadcast::Receiver<WorkerNotification>,
}

impl AnimationSubscription {
    /// 等待下一条动画通知；Worker池关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<AnimationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(WorkerNotification::Message { worker, envelope }) if worker == ANIMATION_WORKER => {
                    if let Some(event) = AnimationEvent::from_envelope(&envelope) {
                        return Some(event);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("动画订阅落后，跳过 {} 条通知", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
