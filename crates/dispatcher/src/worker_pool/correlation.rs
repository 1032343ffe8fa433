use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use tabletop_core::RuntimeResult;

/// 一个等待回复的请求
#[derive(Debug)]
pub(crate) struct PendingCorrelation {
    pub responder: oneshot::Sender<RuntimeResult<Value>>,
    pub timeout_handle: JoinHandle<()>,
    pub started_at: Instant,
    pub worker_name: String,
}

/// 关联表：task_id -> 等待中的请求
///
/// 每个条目只能被移除一次，先移除者负责结束请求，其余路径（迟到的回复、超时、崩溃）
/// 看到空条目后直接忽略。
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<String, PendingCorrelation>,
}

impl CorrelationTable {
    pub fn insert(&mut self, task_id: String, entry: PendingCorrelation) {
        self.entries.insert(task_id, entry);
    }

    pub fn take(&mut self, task_id: &str) -> Option<PendingCorrelation> {
        self.entries.remove(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ids_for_worker(&self, worker_name: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.worker_name == worker_name)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(String, PendingCorrelation)> {
        self.entries.drain().collect()
    }
}
