use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use tabletop_core::{
    DispatcherConfig, EventId, EventKind, EventPriority, GameEvent, RuntimeError,
};

use super::batching::{enqueue, form_batch};
use super::handler::EventHandler;

const REPORT_CAPACITY: usize = 256;

/// 分发器的累计统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// 当前排队中的事件数
    pub queued: usize,
    pub processed: u64,
    pub failed_attempts: u64,
    pub retried: u64,
    pub dropped: u64,
    pub unhandled: u64,
    /// 关闭后被拒绝入队的事件数
    pub rejected: u64,
    pub batches: u64,
}

/// 一个批次的执行结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub events: Vec<EventId>,
    pub kinds: Vec<EventKind>,
    pub succeeded: Vec<EventId>,
    pub retried: Vec<EventId>,
    pub dropped: Vec<EventId>,
    pub unhandled: Vec<EventId>,
}

enum Outcome {
    Handled,
    Unhandled,
    Failed(RuntimeError),
}

struct DispatcherInner {
    config: DispatcherConfig,
    queue: Mutex<VecDeque<GameEvent>>,
    handlers: RwLock<HashMap<EventKind, Arc<dyn EventHandler>>>,
    draining: AtomicBool,
    closed: AtomicBool,
    idle: Notify,
    stats: Mutex<DispatcherStats>,
    reports: broadcast::Sender<BatchReport>,
}

/// 事件分发器
///
/// 维护一个带优先级的事件队列，把事件分组成可以并发执行的批次，交给注册的处理器执行。
/// 处理失败的事件放回队首重试，最多重试 `max_retries` 次。
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EventDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                queue: Mutex::new(VecDeque::new()),
                handlers: RwLock::new(HashMap::new()),
                draining: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                idle: Notify::new(),
                stats: Mutex::new(DispatcherStats::default()),
                reports,
            }),
        }
    }

    /// 注册事件处理器，同一类型重复注册时替换旧的处理器
    pub async fn register_handler(&self, kind: impl Into<EventKind>, handler: Arc<dyn EventHandler>) {
        let kind = kind.into();
        debug!("注册事件处理器: {}", kind);
        self.inner.handlers.write().await.insert(kind, handler);
    }

    /// 事件入队并在需要时启动排空循环，不等待处理器执行
    ///
    /// 分发器关闭后事件不再入队，只计入 `rejected`。
    pub async fn queue_event(
        &self,
        kind: impl Into<EventKind>,
        data: Value,
        priority: EventPriority,
    ) -> EventId {
        let event = GameEvent::new(kind.into(), data, priority);
        let id = event.id.clone();

        {
            let mut queue = self.inner.queue.lock().await;
            if self.is_closed() {
                drop(queue);
                warn!("分发器已关闭，拒绝事件 {} ({})", id, event.kind);
                self.inner.stats.lock().await.rejected += 1;
                return id;
            }
            debug!("事件入队: {} ({}, {:?})", id, event.kind, priority);
            enqueue(&mut queue, event);
        }
        self.trigger_drain();
        id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 关闭分发器：清空队列并拒绝后续事件，返回被丢弃的事件数
    ///
    /// 正在执行的批次会跑完，但失败的事件不再放回队列。调用方需要等它结束时再调用
    /// [`wait_idle`](Self::wait_idle)。
    pub async fn close(&self) -> usize {
        let mut queue = self.inner.queue.lock().await;
        self.inner.closed.store(true, Ordering::SeqCst);
        let cleared = queue.len();
        queue.clear();
        drop(queue);

        let mut stats = self.inner.stats.lock().await;
        stats.dropped += cleared as u64;
        info!("事件分发器已关闭，丢弃 {} 个排队事件", cleared);
        cleared
    }

    fn trigger_drain(&self) {
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            tokio::spawn(drain(self.inner.clone()));
        }
    }

    pub async fn is_idle(&self) -> bool {
        !self.inner.draining.load(Ordering::SeqCst) && self.inner.queue.lock().await.is_empty()
    }

    /// 等待队列排空且没有批次在执行
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle().await {
                return;
            }
            notified.await;
        }
    }

    pub async fn stats(&self) -> DispatcherStats {
        let mut stats = self.inner.stats.lock().await.clone();
        stats.queued = self.inner.queue.lock().await.len();
        stats
    }

    pub fn subscribe_batches(&self) -> broadcast::Receiver<BatchReport> {
        self.inner.reports.subscribe()
    }

    /// 清空队列，返回被丢弃的事件数
    pub async fn clear(&self) -> usize {
        let mut queue = self.inner.queue.lock().await;
        let cleared = queue.len();
        queue.clear();
        if cleared > 0 {
            info!("清空事件队列: 丢弃 {} 个事件", cleared);
        }
        cleared
    }
}

async fn drain(inner: Arc<DispatcherInner>) {
    loop {
        let batch = {
            let mut queue = inner.queue.lock().await;
            form_batch(&mut queue, inner.config.max_batch_size)
        };

        if batch.is_empty() {
            inner.draining.store(false, Ordering::SeqCst);
            if inner.queue.lock().await.is_empty() {
                inner.idle.notify_waiters();
                return;
            }
            // 入队与退出之间有新事件，且没有其他排空循环接手
            if inner.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            continue;
        }

        execute_batch(&inner, batch).await;
        tokio::task::yield_now().await;
    }
}

async fn execute_batch(inner: &Arc<DispatcherInner>, batch: Vec<GameEvent>) {
    let handlers: Vec<Option<Arc<dyn EventHandler>>> = {
        let registry = inner.handlers.read().await;
        batch.iter().map(|e| registry.get(&e.kind).cloned()).collect()
    };

    debug!("执行批次: {} 个事件", batch.len());

    let tasks = batch.iter().cloned().zip(handlers).map(|(event, handler)| {
        tokio::spawn(async move {
            match handler {
                None => Outcome::Unhandled,
                Some(handler) => match handler.handle(&event).await {
                    Ok(()) => Outcome::Handled,
                    Err(e) => Outcome::Failed(e),
                },
            }
        })
    });
    let outcomes = join_all(tasks).await;

    let mut report = BatchReport::default();
    let mut requeue = Vec::new();
    let max_retries = inner.config.max_retries;
    let closed = inner.closed.load(Ordering::SeqCst);

    {
        let mut stats = inner.stats.lock().await;
        stats.batches += 1;

        for (mut event, joined) in batch.into_iter().zip(outcomes) {
            report.events.push(event.id.clone());
            report.kinds.push(event.kind.clone());

            let outcome = joined.unwrap_or_else(|e| {
                Outcome::Failed(RuntimeError::handler_error(format!("处理器异常终止: {e}")))
            });

            match outcome {
                Outcome::Handled => {
                    stats.processed += 1;
                    report.succeeded.push(event.id);
                }
                Outcome::Unhandled => {
                    warn!("没有 {} 类型的处理器，丢弃事件 {}", event.kind, event.id);
                    stats.unhandled += 1;
                    report.unhandled.push(event.id);
                }
                Outcome::Failed(e) => {
                    stats.failed_attempts += 1;
                    if closed {
                        debug!("分发器已关闭，不再重试事件 {} ({}): {}", event.id, event.kind, e);
                        stats.dropped += 1;
                        report.dropped.push(event.id);
                    } else if event.retries < max_retries {
                        event.retries += 1;
                        stats.retried += 1;
                        warn!(
                            "事件 {} ({}) 处理失败，第 {} 次重试: {}",
                            event.id, event.kind, event.retries, e
                        );
                        report.retried.push(event.id.clone());
                        requeue.push(event);
                    } else {
                        error!(
                            "事件 {} ({}) 重试 {} 次后仍失败，已丢弃: {}",
                            event.id, event.kind, max_retries, e
                        );
                        stats.dropped += 1;
                        report.dropped.push(event.id);
                    }
                }
            }
        }
    }

    if !requeue.is_empty() {
        let mut queue = inner.queue.lock().await;
        // 批次执行期间分发器可能已关闭
        if inner.closed.load(Ordering::SeqCst) {
            let mut stats = inner.stats.lock().await;
            stats.retried -= requeue.len() as u64;
            stats.dropped += requeue.len() as u64;
            report.retried.clear();
            report.dropped.extend(requeue.into_iter().map(|e| e.id));
        } else {
            for event in requeue.into_iter().rev() {
                queue.push_front(event);
            }
        }
    }

    let _ = inner.reports.send(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_dispatcher::handler_fn;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_handled_events_update_stats() {
        let dispatcher = EventDispatcher::new(DispatcherConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        dispatcher
            .register_handler(
                "sound",
                handler_fn(move |_event| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .await;

        for i in 0..3 {
            dispatcher
                .queue_event("sound", json!({"clip": i}), EventPriority::Normal)
                .await;
        }
        dispatcher.wait_idle().await;

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        let stats = dispatcher.stats().await;
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.queued, 0);
        assert!(stats.batches >= 1);
    }

    #[tokio::test]
    async fn test_unhandled_event_is_dropped_without_retry() {
        let dispatcher = EventDispatcher::new(DispatcherConfig::default());
        dispatcher
            .queue_event("confetti", Value::Null, EventPriority::Normal)
            .await;
        dispatcher.wait_idle().await;

        let stats = dispatcher.stats().await;
        assert_eq!(stats.unhandled, 1);
        assert_eq!(stats.retried, 0);
        assert_eq!(stats.batches, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_counts_as_failure() {
        let dispatcher = EventDispatcher::new(DispatcherConfig {
            max_retries: 0,
            ..DispatcherConfig::default()
        });
        dispatcher
            .register_handler(
                "move",
                handler_fn(|event| async move {
                    if event.retries == 0 {
                        panic!("handler blew up");
                    }
                    Ok(())
                }),
            )
            .await;

        dispatcher.queue_event("move", Value::Null, EventPriority::Normal).await;
        dispatcher.wait_idle().await;

        let stats = dispatcher.stats().await;
        assert_eq!(stats.failed_attempts, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_clear_discards_queued_events() {
        let dispatcher = EventDispatcher::new(DispatcherConfig::default());
        assert_eq!(dispatcher.clear().await, 0);
        assert!(dispatcher.is_idle().await);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects_events() {
        let dispatcher = EventDispatcher::new(DispatcherConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        dispatcher
            .register_handler(
                "sound",
                handler_fn(move |_event| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .await;

        assert_eq!(dispatcher.close().await, 0);
        assert!(dispatcher.is_closed());

        dispatcher.queue_event("sound", Value::Null, EventPriority::Normal).await;
        dispatcher.wait_idle().await;

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        let stats = dispatcher.stats().await;
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.batches, 0);
    }
}
