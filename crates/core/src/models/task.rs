use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Envelope;
use tabletop_errors::RuntimeResult;

/// 默认的任务超时时间（毫秒）
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 5000;

/// 任务优先级
///
/// 仅作为元数据随请求下发给Worker，Worker自行决定是否使用。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `send_task` 的可选参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    pub timeout_ms: u64,
    pub priority: TaskPriority,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            priority: TaskPriority::Normal,
        }
    }
}

impl TaskOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// 发往Worker的一次请求
///
/// 从 `send_task` 创建到被解决、拒绝或超时为止，由Worker池管理器独占持有。
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub worker_name: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub timeout_ms: u64,
}

impl Task {
    pub fn new(
        id: String,
        worker_name: &str,
        task_type: &str,
        payload: serde_json::Value,
        options: TaskOptions,
    ) -> Self {
        Self {
            id,
            worker_name: worker_name.to_string(),
            task_type: task_type.to_string(),
            payload,
            priority: options.priority,
            created_at: Utc::now(),
            timeout_ms: options.timeout_ms,
        }
    }

    /// 转换成下发给Worker的请求信封
    pub fn to_envelope(&self) -> RuntimeResult<Envelope> {
        Envelope::request(
            &self.task_type,
            self.payload.clone(),
            Some(&self.id),
            self.priority.as_str(),
        )
    }
}

/// 任务ID生成器
///
/// 生成形如 `task_<毫秒时间戳>_<序号>` 的ID。序号在生成器生命周期内单调递增，
/// 因此即使时间戳相同也不会重复。
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    counter: AtomicU64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("task_{}_{}", Utc::now().timestamp_millis(), sequence)
    }

    pub fn generated(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
