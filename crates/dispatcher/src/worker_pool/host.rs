use std::future;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use tabletop_core::{Envelope, Worker, WorkerOutbox};

/// Worker宿主循环
///
/// 初始化Worker，发送一次 `WORKER_READY`，然后逐条处理收件箱中的请求。Worker需要时钟时，
/// 在请求之间按固定间隔调用 `on_tick`。收件箱关闭后退出；Worker内部的panic会直接终止
/// 本任务，由监督者检测。
pub async fn run_worker(
    mut worker: Box<dyn Worker>,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    outbox: WorkerOutbox,
) {
    let name = outbox.worker_name().to_string();

    if let Err(e) = worker.initialize().await {
        error!("Worker {} 初始化失败: {}", name, e);
        return;
    }
    if !outbox.post(Envelope::ready(worker.worker_type())) {
        return;
    }
    debug!("Worker {} 已就绪", name);

    let mut ticker: Option<Interval> = None;

    loop {
        sync_ticker(worker.as_ref(), &mut ticker);

        tokio::select! {
            message = inbox.recv() => {
                let Some(envelope) = message else {
                    debug!("Worker {} 收件箱已关闭，退出", name);
                    break;
                };
                handle(worker.as_mut(), envelope, &outbox).await;
            }
            _ = next_tick(&mut ticker) => {
                if let Err(e) = worker.on_tick(&outbox).await {
                    warn!("Worker {} 时钟回调失败: {}", name, e);
                }
            }
        }
    }
}

fn sync_ticker(worker: &dyn Worker, ticker: &mut Option<Interval>) {
    match worker.tick_interval() {
        Some(period) if worker.wants_tick() && !period.is_zero() => {
            if ticker.is_none() {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *ticker = Some(interval);
            }
        }
        _ => *ticker = None,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

async fn handle(worker: &mut dyn Worker, envelope: Envelope, outbox: &WorkerOutbox) {
    let message_type = envelope.message_type.clone();
    let task_id = envelope.task_id().map(str::to_string);

    let reply = match worker.handle_message(envelope, outbox).await {
        Ok(result) => Envelope::result_for(&message_type, task_id.as_deref(), result),
        Err(e) => {
            debug!(
                "Worker {} 处理 {} 失败: {}",
                outbox.worker_name(),
                message_type,
                e
            );
            Envelope::error(task_id.as_deref(), &e.to_string())
        }
    };
    outbox.post(reply);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tabletop_core::{InboundMessage, RuntimeError, RuntimeResult};

    struct Doubler {
        ticks: u32,
    }

    #[async_trait]
    impl Worker for Doubler {
        fn worker_type(&self) -> &str {
            "doubler"
        }

        async fn handle_message(
            &mut self,
            envelope: Envelope,
            _outbox: &WorkerOutbox,
        ) -> RuntimeResult<Value> {
            match envelope.data.get("n").and_then(Value::as_i64) {
                Some(n) => Ok(json!(n * 2)),
                None => Err(RuntimeError::invalid_payload("missing n")),
            }
        }

        fn tick_interval(&self) -> Option<Duration> {
            Some(Duration::from_millis(10))
        }

        fn wants_tick(&self) -> bool {
            self.ticks < 2
        }

        async fn on_tick(&mut self, outbox: &WorkerOutbox) -> RuntimeResult<()> {
            self.ticks += 1;
            outbox.post(Envelope::new("TICK", json!({"n": self.ticks})));
            Ok(())
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> Envelope {
        rx.recv().await.unwrap().envelope
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_handshake_replies_and_ticks() {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let outbox = WorkerOutbox::new("doubler-1".into(), out_tx);
        let host = tokio::spawn(run_worker(Box::new(Doubler { ticks: 0 }), inbox_rx, outbox));

        let ready = next(&mut out_rx).await;
        assert!(ready.is_ready());
        assert_eq!(ready.data["workerType"], "doubler");

        inbox_tx
            .send(Envelope::request("DOUBLE", json!({"n": 21}), Some("t1"), "normal").unwrap())
            .unwrap();
        let reply = next(&mut out_rx).await;
        assert_eq!(reply.message_type, "DOUBLE_RESULT");
        assert_eq!(reply.task_id(), Some("t1"));
        assert_eq!(reply.result_value(), json!(42));

        inbox_tx
            .send(Envelope::request("DOUBLE", json!({}), Some("t2"), "normal").unwrap())
            .unwrap();
        let error = next(&mut out_rx).await;
        assert!(error.is_error());
        assert_eq!(error.task_id(), Some("t2"));

        assert_eq!(next(&mut out_rx).await.data["n"], 1);
        assert_eq!(next(&mut out_rx).await.data["n"], 2);

        drop(inbox_tx);
        host.await.unwrap();
        assert!(out_rx.try_recv().is_err());
    }
}
