use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use tabletop_core::{
    CrashPolicy, Envelope, RuntimeConfig, RuntimeError, RuntimeResult, TaskOptions, Worker,
    WorkerNotification, WorkerOutbox, WorkerPoolConfig, WorkerSpec,
};
use tabletop_dispatcher::WorkerPoolManager;
use tabletop_worker::animation::{AnimationEvent, ANIMATIONS_COMPLETE};
use tabletop_worker::{default_worker_specs, ANIMATION_WORKER, GAME_LOGIC_WORKER};

/// 测试用Worker：ECHO回显、FAIL返回错误、PANIC崩溃、SLOW延迟回复、PING不回复
struct ScriptedWorker;

#[async_trait]
impl Worker for ScriptedWorker {
    fn worker_type(&self) -> &str {
        "scripted"
    }

    async fn handle_message(
        &mut self,
        envelope: Envelope,
        _outbox: &WorkerOutbox,
    ) -> RuntimeResult<Value> {
        match envelope.message_type.as_str() {
            "ECHO" => Ok(envelope.data.get("value").cloned().unwrap_or(Value::Null)),
            "FAIL" => Err(RuntimeError::invalid_payload("scripted failure")),
            "PANIC" => panic!("scripted panic"),
            "SLOW" => {
                let ms = envelope.data.get("ms").and_then(Value::as_u64).unwrap_or(0);
                sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept": ms }))
            }
            "PING" => std::future::pending().await,
            other => Err(RuntimeError::UnsupportedMessage(other.to_string())),
        }
    }
}

/// 初始化永远不会完成的Worker
struct NeverReady;

#[async_trait]
impl Worker for NeverReady {
    fn worker_type(&self) -> &str {
        "never-ready"
    }

    async fn initialize(&mut self) -> RuntimeResult<()> {
        std::future::pending().await
    }

    async fn handle_message(
        &mut self,
        _envelope: Envelope,
        _outbox: &WorkerOutbox,
    ) -> RuntimeResult<Value> {
        Ok(Value::Null)
    }
}

fn scripted(name: &str) -> WorkerSpec {
    WorkerSpec::new(name, || ScriptedWorker)
}

async fn pool_with(config: WorkerPoolConfig, names: &[&str]) -> WorkerPoolManager {
    let pool = WorkerPoolManager::new(config);
    pool.initialize(names.iter().map(|n| scripted(n)).collect())
        .await
        .unwrap();
    pool
}

fn timeout_ms(ms: u64) -> TaskOptions {
    TaskOptions::default().with_timeout_ms(ms)
}

#[tokio::test(start_paused = true)]
async fn test_send_task_resolves_with_result() {
    let pool = pool_with(WorkerPoolConfig::default(), &["workerX"]).await;

    let result = pool
        .send_task("workerX", "ECHO", json!({"value": {"n": 7}}), TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(result, json!({"n": 7}));
    assert_eq!(pool.pending_count().await, 0);

    let status = pool.worker_status("workerX").await.unwrap();
    assert!(status.ready);
    assert_eq!(status.total_processed, 1);
    assert_eq!(status.tasks_in_progress, 0);
    assert!(status.last_active_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_silent_worker_times_out() {
    let pool = pool_with(WorkerPoolConfig::default(), &["workerX"]).await;

    let started = Instant::now();
    let result = pool
        .send_task("workerX", "PING", json!({}), timeout_ms(50))
        .await;
    let elapsed = started.elapsed();

    let task_id = match result {
        Err(RuntimeError::Timeout {
            task_id,
            timeout_ms,
        }) => {
            assert_eq!(timeout_ms, 50);
            task_id
        }
        other => panic!("expected timeout, got {other:?}"),
    };
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(60));
    assert!(!pool.has_pending(&task_id).await);

    let metrics = pool.performance_metrics().await;
    assert_eq!(metrics.total_timeouts, 1);
    assert_eq!(metrics.pending_tasks, 0);
    assert_eq!(metrics.recent_errors.len(), 1);
    assert_eq!(metrics.recent_errors[0].task_id.as_deref(), Some(task_id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_worker_error_only_rejects_its_request() {
    let pool = pool_with(WorkerPoolConfig::default(), &["workerX"]).await;

    let (failed, echoed) = tokio::join!(
        pool.send_task("workerX", "FAIL", json!({}), TaskOptions::default()),
        pool.send_task("workerX", "ECHO", json!({"value": 1}), TaskOptions::default()),
    );

    match failed {
        Err(RuntimeError::WorkerError { worker, message }) => {
            assert_eq!(worker, "workerX");
            assert!(message.contains("scripted failure"));
        }
        other => panic!("expected worker error, got {other:?}"),
    }
    assert_eq!(echoed.unwrap(), json!(1));

    let status = pool.worker_status("workerX").await.unwrap();
    assert_eq!(status.total_processed, 2);
    assert_eq!(status.errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_errors() {
    let pool = WorkerPoolManager::new(WorkerPoolConfig::default());
    let result = pool
        .send_task("workerX", "ECHO", json!({}), TaskOptions::default())
        .await;
    assert!(matches!(result, Err(RuntimeError::NotInitialized)));

    pool.initialize(vec![scripted("workerX")]).await.unwrap();
    // 重复初始化不做任何事
    pool.initialize(vec![scripted("other")]).await.unwrap();
    assert!(pool.worker_status("other").await.is_none());

    let result = pool
        .send_task("ghost", "ECHO", json!({}), TaskOptions::default())
        .await;
    assert!(matches!(result, Err(RuntimeError::WorkerNotFound { .. })));

    pool.destroy().await;
    let result = pool
        .send_task("workerX", "ECHO", json!({}), TaskOptions::default())
        .await;
    assert!(matches!(result, Err(RuntimeError::Destroyed)));
    assert!(matches!(
        pool.initialize(vec![scripted("workerX")]).await,
        Err(RuntimeError::Destroyed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_timeout_leaves_no_partial_state() {
    let config = WorkerPoolConfig {
        ready_timeout_ms: 100,
        ..WorkerPoolConfig::default()
    };
    let pool = WorkerPoolManager::new(config);

    let result = pool
        .initialize(vec![scripted("fine"), WorkerSpec::new("stuck", || NeverReady)])
        .await;
    match result {
        Err(RuntimeError::InitializationFailed(message)) => assert!(message.contains("stuck")),
        other => panic!("expected initialization failure, got {other:?}"),
    }

    assert!(!pool.is_initialized().await);
    assert!(pool.worker_status("fine").await.is_none());
    assert!(pool.all_worker_status().await.is_empty());

    // 失败后可以重新初始化
    pool.initialize(vec![scripted("fine")]).await.unwrap();
    assert!(pool.is_initialized().await);
}

#[tokio::test(start_paused = true)]
async fn test_crash_fails_fast_and_restarts() {
    let pool = pool_with(WorkerPoolConfig::default(), &["workerX"]).await;
    let mut notifications = pool.subscribe();

    let started = Instant::now();
    let result = pool
        .send_task("workerX", "PANIC", json!({}), timeout_ms(5_000))
        .await;
    assert!(matches!(result, Err(RuntimeError::WorkerCrashed { .. })));
    assert!(started.elapsed() < Duration::from_millis(5_000));

    let mut crashed = false;
    loop {
        match notifications.recv().await.unwrap() {
            WorkerNotification::Crashed { worker, error } => {
                assert_eq!(worker, "workerX");
                assert!(error.contains("scripted panic"));
                crashed = true;
            }
            WorkerNotification::Restarted { worker } => {
                assert_eq!(worker, "workerX");
                break;
            }
            WorkerNotification::Message { .. } => {}
        }
    }
    assert!(crashed);

    let result = pool
        .send_task("workerX", "ECHO", json!({"value": "back"}), TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(result, json!("back"));

    let status = pool.worker_status("workerX").await.unwrap();
    assert_eq!(status.restarts, 1);
    assert!(status.ready);
}

#[tokio::test(start_paused = true)]
async fn test_crash_with_await_timeout_policy() {
    let config = WorkerPoolConfig {
        crash_policy: CrashPolicy::AwaitTimeout,
        ..WorkerPoolConfig::default()
    };
    let pool = pool_with(config, &["workerX"]).await;

    let started = Instant::now();
    let result = pool
        .send_task("workerX", "PANIC", json!({}), timeout_ms(200))
        .await;
    assert!(matches!(result, Err(RuntimeError::Timeout { .. })));
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_every_request_settles_exactly_once() {
    let pool = pool_with(WorkerPoolConfig::default(), &["workerX"]).await;

    // Worker串行处理，后面的请求会排队直到超时
    let requests = (0..20u64).map(|i| {
        let pool = pool.clone();
        async move {
            pool.send_task("workerX", "SLOW", json!({"ms": 15 + i}), timeout_ms(120))
                .await
        }
    });
    let results = futures::future::join_all(requests).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let timed_out = results
        .iter()
        .filter(|r| matches!(r, Err(RuntimeError::Timeout { .. })))
        .count();
    assert_eq!(succeeded + timed_out, 20);
    assert!(succeeded > 0);
    assert!(timed_out > 0);

    // 让迟到的回复全部到达
    sleep(Duration::from_secs(2)).await;

    let metrics = pool.performance_metrics().await;
    assert_eq!(metrics.pending_tasks, 0);
    assert_eq!(metrics.total_tasks_sent, 20);
    assert_eq!(metrics.total_timeouts as usize, timed_out);
    let status = &metrics.workers["workerX"];
    assert_eq!(status.total_processed as usize, succeeded);
    assert_eq!(status.tasks_in_progress, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fire_and_forget_is_broadcast() {
    let pool = pool_with(WorkerPoolConfig::default(), &["workerX"]).await;
    let mut notifications = pool.subscribe();

    assert!(pool.send_task_async("workerX", "ECHO", json!({"value": 5})).await);
    assert!(!pool.send_task_async("ghost", "ECHO", json!({})).await);

    match notifications.recv().await.unwrap() {
        WorkerNotification::Message { worker, envelope } => {
            assert_eq!(worker, "workerX");
            assert_eq!(envelope.message_type, "ECHO_RESULT");
            assert_eq!(envelope.task_id(), None);
            assert_eq!(envelope.result_value(), json!(5));
        }
        other => panic!("unexpected notification: {other:?}"),
    }
    assert_eq!(pool.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_rejects_pending_requests() {
    let pool = pool_with(WorkerPoolConfig::default(), &["workerX"]).await;

    let waiting = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.send_task("workerX", "PING", json!({}), timeout_ms(60_000))
                .await
        })
    };
    while pool.pending_count().await == 0 {
        tokio::task::yield_now().await;
    }

    pool.destroy().await;
    let result = waiting.await.unwrap();
    assert!(matches!(result, Err(RuntimeError::Destroyed)));
    assert_eq!(pool.pending_count().await, 0);
    assert!(pool.all_worker_status().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_game_logic_worker_through_pool() {
    let pool = WorkerPoolManager::new(WorkerPoolConfig::default());
    pool.initialize(default_worker_specs(&RuntimeConfig::default()))
        .await
        .unwrap();

    let cards: Vec<u32> = (1..=52).collect();
    let shuffled = pool
        .send_task(
            GAME_LOGIC_WORKER,
            "SHUFFLE_DECK",
            json!({"cards": cards, "seed": 3}),
            TaskOptions::default(),
        )
        .await
        .unwrap();
    let mut returned: Vec<u64> = shuffled["cards"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_u64().unwrap())
        .collect();
    returned.sort_unstable();
    assert_eq!(returned, (1..=52).collect::<Vec<u64>>());

    let batch = pool
        .send_task(
            GAME_LOGIC_WORKER,
            "PROCESS_BATCH",
            json!({"operations": [
                {"type": "CALCULATE_EFFECTIVENESS", "data": {
                    "attacker": {"kind": "water", "power": 5},
                    "defender": {"kind": "fire", "defense": 5}
                }},
                {"type": "CALCULATE_EFFECTIVENESS", "data": {
                    "attacker": {"kind": "water", "power": -5},
                    "defender": {"kind": "fire", "defense": 5}
                }},
                {"type": "FIND_PATHS", "data": {"from": 0, "to": 3, "boardSize": 6, "maxSteps": 3}}
            ]}),
            TaskOptions::default(),
        )
        .await
        .unwrap();
    let statuses: Vec<&str> = batch["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["success", "error", "success"]);

    pool.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_move_animation_end_to_end() {
    let pool = WorkerPoolManager::new(WorkerPoolConfig::default());
    pool.initialize(default_worker_specs(&RuntimeConfig::default()))
        .await
        .unwrap();
    let mut notifications = pool.subscribe();

    let handle = pool
        .send_task(
            ANIMATION_WORKER,
            "ADD_ANIMATION",
            json!({
                "id": "piece-1",
                "type": "MOVE",
                "duration": 400,
                "easing": "linear",
                "startState": {"x": 0, "y": 0},
                "endState": {"x": 100, "y": 0}
            }),
            TaskOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(handle["id"], "piece-1");

    let mut last_progress = 0.0;
    let mut saw_midpoint = false;
    let mut final_frames = 0;
    loop {
        let notification = notifications.recv().await.unwrap();
        let WorkerNotification::Message { envelope, .. } = notification else {
            continue;
        };
        match AnimationEvent::from_envelope(&envelope) {
            Some(AnimationEvent::Frame { updates, .. }) => {
                for update in updates {
                    assert!(update.progress >= last_progress);
                    last_progress = update.progress;
                    let x = update.state["x"].as_f64().unwrap();
                    assert!((x - 100.0 * update.progress).abs() < 1e-6);
                    if (update.progress - 0.5).abs() < 0.05 {
                        assert!((x - 50.0).abs() <= 5.0);
                        saw_midpoint = true;
                    }
                    if update.progress == 1.0 {
                        final_frames += 1;
                    }
                }
            }
            Some(AnimationEvent::Completed(done)) => {
                assert_eq!(envelope.message_type, ANIMATIONS_COMPLETE);
                assert_eq!(done.len(), 1);
                assert_eq!(done[0].id, "piece-1");
                assert_eq!(Value::Object(done[0].final_state.clone()), json!({"x": 100, "y": 0}));
                break;
            }
            None => {}
        }
    }

    assert!(saw_midpoint);
    assert_eq!(final_frames, 1);
    assert_eq!(last_progress, 1.0);

    let stats = pool
        .send_task(ANIMATION_WORKER, "GET_ANIMATION_STATS", json!({}), TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(stats["active"], 0);
    assert_eq!(stats["completed"], 1);

    pool.destroy().await;
}
