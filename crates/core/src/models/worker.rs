use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个Worker的运行状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub ready: bool,
    pub tasks_in_progress: u64,
    pub total_processed: u64,
    pub average_response_time_ms: f64,
    pub last_active_at: Option<DateTime<Utc>>,
    pub restarts: u32,
    pub errors: u64,
}

/// 错误日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub worker: String,
    pub task_id: Option<String>,
    pub message: String,
}

/// Worker池的性能指标快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub workers: BTreeMap<String, WorkerStatus>,
    pub pending_tasks: usize,
    pub total_tasks_sent: u64,
    pub total_timeouts: u64,
    pub total_errors: u64,
    pub recent_errors: Vec<ErrorLogEntry>,
}

impl PerformanceMetrics {
    /// 所有Worker的平均响应时间，按已处理任务数加权
    pub fn overall_average_response_time_ms(&self) -> f64 {
        let processed: u64 = self.workers.values().map(|w| w.total_processed).sum();
        if processed == 0 {
            return 0.0;
        }
        let weighted: f64 = self
            .workers
            .values()
            .map(|w| w.average_response_time_ms * w.total_processed as f64)
            .sum();
        weighted / processed as f64
    }
}
