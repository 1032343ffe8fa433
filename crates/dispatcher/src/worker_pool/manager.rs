use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use tabletop_core::models::{ErrorLogEntry, PerformanceMetrics, WorkerStatus};
use tabletop_core::{
    CrashPolicy, Envelope, InboundMessage, RuntimeConfig, RuntimeError, RuntimeResult, Task,
    TaskIdGenerator, TaskOptions, WorkerNotification, WorkerOutbox, WorkerPoolConfig, WorkerSpec,
};

use super::correlation::{CorrelationTable, PendingCorrelation};
use super::host::run_worker;

const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Created,
    Initializing,
    Running,
    Destroyed,
}

struct WorkerSlot {
    sender: mpsc::UnboundedSender<Envelope>,
    host: AbortHandle,
    supervisor: Option<JoinHandle<()>>,
    status: WorkerStatus,
    /// 崩溃后等待新的就绪握手
    recovering: bool,
}

impl WorkerSlot {
    fn stop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        self.host.abort();
    }
}

fn new_status(name: &str) -> WorkerStatus {
    WorkerStatus {
        name: name.to_string(),
        ready: false,
        tasks_in_progress: 0,
        total_processed: 0,
        average_response_time_ms: 0.0,
        last_active_at: None,
        restarts: 0,
        errors: 0,
    }
}

struct PoolInner {
    config: WorkerPoolConfig,
    metrics_enabled: bool,
    ids: TaskIdGenerator,
    state: RwLock<PoolState>,
    workers: RwLock<HashMap<String, WorkerSlot>>,
    pending: Mutex<CorrelationTable>,
    error_log: Mutex<VecDeque<ErrorLogEntry>>,
    ready_waiters: Mutex<HashMap<String, oneshot::Sender<()>>>,
    notifications: broadcast::Sender<WorkerNotification>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    total_tasks_sent: AtomicU64,
    total_timeouts: AtomicU64,
    total_errors: AtomicU64,
}

/// Worker池管理器
///
/// 负责所有Worker的生命周期，并在fire-and-forget的消息通道之上提供带超时的请求/响应接口。
///
/// ## 关联模型
///
/// `send_task` 为每个请求生成唯一的 `task_id`，在关联表中登记一个 `oneshot` 发送端和一个
/// 超时计时任务，然后把请求投递给Worker。以下任一路径先从关联表中移除条目即结束该请求：
///
/// - 收到 `taskId` 相同的 `<type>_RESULT` 或 `ERROR`
/// - 超时计时任务到期
/// - 目标Worker崩溃（`fail_fast` 策略）
/// - 调用 [`WorkerPoolManager::destroy`]
///
/// 其余路径随后看到空条目，不做任何处理，因此每个请求恰好结束一次。
///
/// ## 崩溃处理
///
/// 每个Worker都有一个监督任务等待其宿主任务结束。宿主因panic结束时记录错误、广播
/// [`WorkerNotification::Crashed`]、按 [`CrashPolicy`] 处理待处理请求，然后用原始
/// [`WorkerSpec`] 重新启动Worker。
#[derive(Clone)]
pub struct WorkerPoolManager {
    inner: Arc<PoolInner>,
}

impl WorkerPoolManager {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self::build(config, true)
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::build(
            config.worker_pool.clone(),
            config.observability.metrics_enabled,
        )
    }

    fn build(config: WorkerPoolConfig, metrics_enabled: bool) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(PoolInner {
                config,
                metrics_enabled,
                ids: TaskIdGenerator::new(),
                state: RwLock::new(PoolState::Created),
                workers: RwLock::new(HashMap::new()),
                pending: Mutex::new(CorrelationTable::default()),
                error_log: Mutex::new(VecDeque::new()),
                ready_waiters: Mutex::new(HashMap::new()),
                notifications,
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                pump: Mutex::new(None),
                total_tasks_sent: AtomicU64::new(0),
                total_timeouts: AtomicU64::new(0),
                total_errors: AtomicU64::new(0),
            }),
        }
    }

    /// 启动所有Worker并等待它们的就绪握手
    ///
    /// 任何Worker在 `ready_timeout_ms` 内未就绪时，终止已启动的全部Worker并返回
    /// `InitializationFailed`，不保留任何部分状态。已初始化时直接返回成功。
    pub async fn initialize(&self, specs: Vec<WorkerSpec>) -> RuntimeResult<()> {
        {
            let mut state = self.inner.state.write().await;
            match *state {
                PoolState::Running => return Ok(()),
                PoolState::Destroyed => return Err(RuntimeError::Destroyed),
                PoolState::Initializing => {
                    return Err(RuntimeError::InitializationFailed(
                        "Worker池正在初始化".to_string(),
                    ))
                }
                PoolState::Created => *state = PoolState::Initializing,
            }
        }

        match self.start_workers(specs).await {
            Ok(count) => {
                *self.inner.state.write().await = PoolState::Running;
                info!("Worker池初始化完成: {} 个Worker", count);
                Ok(())
            }
            Err(e) => {
                error!("Worker池初始化失败: {}", e);
                self.inner.stop_all_workers().await;
                self.inner.ready_waiters.lock().await.clear();
                *self.inner.state.write().await = PoolState::Created;
                Err(e)
            }
        }
    }

    async fn start_workers(&self, specs: Vec<WorkerSpec>) -> RuntimeResult<usize> {
        let mut names: Vec<String> = Vec::with_capacity(specs.len());
        for spec in &specs {
            if names.iter().any(|n| n == spec.name()) {
                return Err(RuntimeError::InitializationFailed(format!(
                    "Worker名称重复: {}",
                    spec.name()
                )));
            }
            names.push(spec.name().to_string());
        }

        self.ensure_pump().await;

        let mut receivers = Vec::with_capacity(specs.len());
        {
            let mut waiters = self.inner.ready_waiters.lock().await;
            for name in &names {
                let (tx, rx) = oneshot::channel();
                waiters.insert(name.clone(), tx);
                receivers.push((name.clone(), rx));
            }
        }

        {
            let mut workers = self.inner.workers.write().await;
            for spec in specs {
                let (sender, host) = self.inner.launch(&spec);
                let host_abort = host.abort_handle();
                let supervisor = tokio::spawn(supervise(
                    Arc::downgrade(&self.inner),
                    spec.clone(),
                    host,
                ));
                workers.insert(
                    spec.name().to_string(),
                    WorkerSlot {
                        sender,
                        host: host_abort,
                        supervisor: Some(supervisor),
                        status: new_status(spec.name()),
                        recovering: false,
                    },
                );
                debug!("启动Worker: {}", spec.name());
            }
        }

        let deadline = Duration::from_millis(self.inner.config.ready_timeout_ms);
        let waits = receivers.into_iter().map(|(name, rx)| async move {
            match rx.await {
                Ok(()) => None,
                Err(_) => Some(name),
            }
        });

        match timeout(deadline, join_all(waits)).await {
            Ok(results) => {
                let failed: Vec<String> = results.into_iter().flatten().collect();
                if failed.is_empty() {
                    Ok(names.len())
                } else {
                    Err(RuntimeError::InitializationFailed(format!(
                        "Worker未能就绪: {}",
                        failed.join(", ")
                    )))
                }
            }
            Err(_) => {
                let workers = self.inner.workers.read().await;
                let mut missing: Vec<&str> = workers
                    .values()
                    .filter(|slot| !slot.status.ready)
                    .map(|slot| slot.status.name.as_str())
                    .collect();
                missing.sort_unstable();
                Err(RuntimeError::InitializationFailed(format!(
                    "等待Worker就绪超时 ({}ms): {}",
                    self.inner.config.ready_timeout_ms,
                    missing.join(", ")
                )))
            }
        }
    }

    async fn ensure_pump(&self) {
        let mut pump = self.inner.pump.lock().await;
        if pump.is_some() {
            return;
        }
        if let Some(mut rx) = self.inner.inbound_rx.lock().await.take() {
            let weak = Arc::downgrade(&self.inner);
            *pump = Some(tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    inner.handle_inbound(message).await;
                }
            }));
        }
    }

    async fn ensure_running(&self) -> RuntimeResult<()> {
        match *self.inner.state.read().await {
            PoolState::Running => Ok(()),
            PoolState::Destroyed => Err(RuntimeError::Destroyed),
            PoolState::Created | PoolState::Initializing => Err(RuntimeError::NotInitialized),
        }
    }

    async fn ready_sender(&self, worker_name: &str) -> RuntimeResult<mpsc::UnboundedSender<Envelope>> {
        let workers = self.inner.workers.read().await;
        let slot = workers
            .get(worker_name)
            .ok_or_else(|| RuntimeError::worker_not_found(worker_name))?;
        if !slot.status.ready {
            return Err(RuntimeError::worker_not_ready(worker_name));
        }
        Ok(slot.sender.clone())
    }

    /// 向Worker发送请求并等待关联的回复
    #[instrument(skip(self, payload, options), fields(timeout_ms = options.timeout_ms))]
    pub async fn send_task(
        &self,
        worker_name: &str,
        task_type: &str,
        payload: Value,
        options: TaskOptions,
    ) -> RuntimeResult<Value> {
        self.ensure_running().await?;
        let sender = self.ready_sender(worker_name).await?;

        let task = Task::new(
            self.inner.ids.next_id(),
            worker_name,
            task_type,
            payload,
            options,
        );
        let envelope = task.to_envelope()?;
        let (responder, receiver) = oneshot::channel();

        {
            // 计时任务在登记完成之后才能拿到锁
            let mut pending = self.inner.pending.lock().await;
            let timeout_handle = spawn_timer(Arc::downgrade(&self.inner), &task);
            pending.insert(
                task.id.clone(),
                PendingCorrelation {
                    responder,
                    timeout_handle,
                    started_at: Instant::now(),
                    worker_name: worker_name.to_string(),
                },
            );
        }

        if let Some(slot) = self.inner.workers.write().await.get_mut(worker_name) {
            slot.status.tasks_in_progress += 1;
        }
        self.inner.total_tasks_sent.fetch_add(1, Ordering::Relaxed);
        if self.inner.metrics_enabled {
            counter!("tabletop_tasks_sent_total", "worker" => worker_name.to_string())
                .increment(1);
        }

        debug!("发送任务 {} -> {}", task.id, worker_name);
        if sender.send(envelope).is_err() {
            self.inner
                .settle(
                    &task.id,
                    Err(RuntimeError::ChannelClosed(format!(
                        "Worker {worker_name} 的收件箱已关闭"
                    ))),
                    true,
                )
                .await;
        }

        receiver.await.unwrap_or_else(|_| {
            Err(RuntimeError::ChannelClosed(format!(
                "任务 {} 的回复通道已关闭",
                task.id
            )))
        })
    }

    /// 发送不需要回复的消息，返回是否成功投递
    pub async fn send_task_async(&self, worker_name: &str, task_type: &str, payload: Value) -> bool {
        if self.ensure_running().await.is_err() {
            return false;
        }
        let Ok(sender) = self.ready_sender(worker_name).await else {
            return false;
        };
        match Envelope::request(task_type, payload, None, "normal") {
            Ok(envelope) => sender.send(envelope).is_ok(),
            Err(e) => {
                warn!("无法构造发往 {} 的消息: {}", worker_name, e);
                false
            }
        }
    }

    /// 订阅非关联消息（帧更新、完成通知、崩溃与重启）
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerNotification> {
        self.inner.notifications.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    pub async fn has_pending(&self, task_id: &str) -> bool {
        self.inner.pending.lock().await.contains(task_id)
    }

    pub async fn is_initialized(&self) -> bool {
        *self.inner.state.read().await == PoolState::Running
    }

    pub async fn worker_status(&self, worker_name: &str) -> Option<WorkerStatus> {
        self.inner
            .workers
            .read()
            .await
            .get(worker_name)
            .map(|slot| slot.status.clone())
    }

    pub async fn all_worker_status(&self) -> Vec<WorkerStatus> {
        let workers = self.inner.workers.read().await;
        let mut statuses: Vec<WorkerStatus> =
            workers.values().map(|slot| slot.status.clone()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        let workers = self
            .inner
            .workers
            .read()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), slot.status.clone()))
            .collect();
        PerformanceMetrics {
            workers,
            pending_tasks: self.pending_count().await,
            total_tasks_sent: self.inner.total_tasks_sent.load(Ordering::Relaxed),
            total_timeouts: self.inner.total_timeouts.load(Ordering::Relaxed),
            total_errors: self.inner.total_errors.load(Ordering::Relaxed),
            recent_errors: self.inner.error_log.lock().await.iter().cloned().collect(),
        }
    }

    /// 终止所有Worker，以 `Destroyed` 拒绝全部待处理请求并清空内部表
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.state.write().await;
            if *state == PoolState::Destroyed {
                return;
            }
            *state = PoolState::Destroyed;
        }

        self.inner.stop_all_workers().await;
        self.inner.ready_waiters.lock().await.clear();

        let drained = self.inner.pending.lock().await.drain();
        let rejected = drained.len();
        for (_, entry) in drained {
            entry.timeout_handle.abort();
            let _ = entry.responder.send(Err(RuntimeError::Destroyed));
        }

        self.inner.error_log.lock().await.clear();
        if let Some(pump) = self.inner.pump.lock().await.take() {
            pump.abort();
        }
        info!("Worker池已销毁，拒绝了 {} 个待处理请求", rejected);
    }
}

fn spawn_timer(inner: Weak<PoolInner>, task: &Task) -> JoinHandle<()> {
    let task_id = task.id.clone();
    let timeout_ms = task.timeout_ms;
    tokio::spawn(async move {
        sleep(Duration::from_millis(timeout_ms)).await;
        if let Some(inner) = inner.upgrade() {
            let error = RuntimeError::Timeout {
                task_id: task_id.clone(),
                timeout_ms,
            };
            inner.settle(&task_id, Err(error), false).await;
        }
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}

/// 监督一个Worker的宿主任务，崩溃后按原始规格重启
async fn supervise(inner: Weak<PoolInner>, spec: WorkerSpec, mut host: JoinHandle<()>) {
    loop {
        let outcome = (&mut host).await;
        let Some(pool) = inner.upgrade() else {
            return;
        };

        match outcome {
            Ok(()) => {
                debug!("Worker {} 已退出", spec.name());
                return;
            }
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                let message = panic_message(e.into_panic());
                pool.on_crash(spec.name(), &message).await;

                if !pool.config.restart_on_crash || !pool.accepts_restart().await {
                    return;
                }
                match pool.restart(&spec).await {
                    Some(new_host) => host = new_host,
                    None => return,
                }
            }
        }
    }
}

impl PoolInner {
    fn launch(&self, spec: &WorkerSpec) -> (mpsc::UnboundedSender<Envelope>, JoinHandle<()>) {
        let (sender, inbox) = mpsc::unbounded_channel();
        let outbox = WorkerOutbox::new(spec.name().to_string(), self.inbound_tx.clone());
        let worker = spec.build();
        let host = tokio::spawn(run_worker(worker, inbox, outbox));
        (sender, host)
    }

    async fn accepts_restart(&self) -> bool {
        matches!(
            *self.state.read().await,
            PoolState::Running | PoolState::Initializing
        )
    }

    async fn restart(&self, spec: &WorkerSpec) -> Option<JoinHandle<()>> {
        let mut workers = self.workers.write().await;
        let slot = workers.get_mut(spec.name())?;
        let (sender, host) = self.launch(spec);
        slot.sender = sender;
        slot.host = host.abort_handle();
        slot.status.restarts += 1;
        info!(
            "重启Worker: {} (第 {} 次)",
            spec.name(),
            slot.status.restarts
        );
        Some(host)
    }

    async fn stop_all_workers(&self) {
        let mut workers = self.workers.write().await;
        for (name, slot) in workers.iter_mut() {
            slot.stop();
            debug!("终止Worker: {}", name);
        }
        workers.clear();
    }

    async fn record_error(&self, worker: &str, task_id: Option<&str>, message: String) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        let mut log = self.error_log.lock().await;
        log.push_back(ErrorLogEntry {
            timestamp: Utc::now(),
            worker: worker.to_string(),
            task_id: task_id.map(str::to_string),
            message,
        });
        while log.len() > self.config.error_log_capacity {
            log.pop_front();
        }
    }

    /// 结束一个请求；条目已被其他路径移除时返回 `false`
    async fn settle(&self, task_id: &str, outcome: RuntimeResult<Value>, abort_timer: bool) -> bool {
        let Some(entry) = self.pending.lock().await.take(task_id) else {
            return false;
        };
        if abort_timer {
            entry.timeout_handle.abort();
        }

        let elapsed_ms = entry.started_at.elapsed().as_secs_f64() * 1000.0;
        let responded = matches!(outcome, Ok(_) | Err(RuntimeError::WorkerError { .. }));

        {
            let mut workers = self.workers.write().await;
            if let Some(slot) = workers.get_mut(&entry.worker_name) {
                let status = &mut slot.status;
                status.tasks_in_progress = status.tasks_in_progress.saturating_sub(1);
                if responded {
                    status.total_processed += 1;
                    status.average_response_time_ms +=
                        (elapsed_ms - status.average_response_time_ms) / status.total_processed as f64;
                    status.last_active_at = Some(Utc::now());
                }
                if outcome.is_err() {
                    status.errors += 1;
                }
            }
        }

        if responded && self.metrics_enabled {
            histogram!("tabletop_task_response_ms", "worker" => entry.worker_name.clone())
                .record(elapsed_ms);
        }

        if let Err(e) = &outcome {
            if e.is_timeout() {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                if self.metrics_enabled {
                    counter!("tabletop_task_timeouts_total", "worker" => entry.worker_name.clone())
                        .increment(1);
                }
                warn!("任务超时: {} ({})", task_id, entry.worker_name);
            }
            if !matches!(e, RuntimeError::Destroyed) {
                self.record_error(&entry.worker_name, Some(task_id), e.to_string())
                    .await;
            }
        }

        let _ = entry.responder.send(outcome);
        true
    }

    async fn handle_inbound(&self, message: InboundMessage) {
        let InboundMessage { worker, envelope } = message;

        if envelope.is_ready() {
            self.mark_ready(&worker).await;
            return;
        }

        if envelope.is_result() || envelope.is_error() {
            if let Some(task_id) = envelope.task_id() {
                let outcome = if envelope.is_error() {
                    Err(RuntimeError::worker_error(&worker, envelope.error_message()))
                } else {
                    Ok(envelope.result_value())
                };
                if !self.settle(task_id, outcome, true).await {
                    debug!("忽略迟到的回复: {} ({})", task_id, worker);
                }
                return;
            }
            if envelope.is_error() {
                warn!("Worker {} 报告错误: {}", worker, envelope.error_message());
                self.record_error(&worker, None, envelope.error_message())
                    .await;
            }
        }

        let _ = self
            .notifications
            .send(WorkerNotification::Message { worker, envelope });
    }

    async fn mark_ready(&self, worker: &str) {
        let restarted = {
            let mut workers = self.workers.write().await;
            match workers.get_mut(worker) {
                Some(slot) => {
                    slot.status.ready = true;
                    slot.status.last_active_at = Some(Utc::now());
                    std::mem::replace(&mut slot.recovering, false)
                }
                None => {
                    warn!("收到未知Worker的就绪握手: {}", worker);
                    return;
                }
            }
        };

        if let Some(waiter) = self.ready_waiters.lock().await.remove(worker) {
            let _ = waiter.send(());
        }
        if restarted {
            info!("Worker {} 重启后已就绪", worker);
            let _ = self.notifications.send(WorkerNotification::Restarted {
                worker: worker.to_string(),
            });
        }
    }

    async fn on_crash(&self, worker: &str, message: &str) {
        error!("Worker {} 崩溃: {}", worker, message);
        if self.metrics_enabled {
            counter!("tabletop_worker_crashes_total", "worker" => worker.to_string()).increment(1);
        }

        if let Some(slot) = self.workers.write().await.get_mut(worker) {
            slot.status.ready = false;
            slot.status.errors += 1;
            slot.recovering = true;
        }
        self.record_error(worker, None, format!("Worker崩溃: {message}"))
            .await;
        let _ = self.notifications.send(WorkerNotification::Crashed {
            worker: worker.to_string(),
            error: message.to_string(),
        });

        if self.config.crash_policy == CrashPolicy::FailFast {
            let ids = self.pending.lock().await.ids_for_worker(worker);
            if !ids.is_empty() {
                warn!("拒绝崩溃Worker {} 的 {} 个待处理请求", worker, ids.len());
            }
            for id in ids {
                self.settle(
                    &id,
                    Err(RuntimeError::WorkerCrashed {
                        name: worker.to_string(),
                        message: message.to_string(),
                    }),
                    true,
                )
                .await;
            }
        }
    }
}
