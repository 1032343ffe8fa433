use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabletop_core::Envelope;

/// `PROCESS_BATCH` 请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<BatchOperation>,
}

/// 批处理中的单个操作，格式与普通请求相同
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub data: Value,
}

impl BatchOperation {
    pub fn new(op_type: impl Into<String>, data: Value) -> Self {
        Self {
            op_type: op_type.into(),
            data,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(self.op_type.clone(), self.data.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Error,
}

/// 每个操作对应一条记录，`index` 与请求中的位置一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub index: usize,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchRecord {
    pub fn success(index: usize, result: Value) -> Self {
        Self {
            index,
            status: BatchStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            status: BatchStatus::Error,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub results: Vec<BatchRecord>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn push(&mut self, record: BatchRecord) {
        match record.status {
            BatchStatus::Success => self.succeeded += 1,
            BatchStatus::Error => self.failed += 1,
        }
        self.results.push(record);
    }
}
