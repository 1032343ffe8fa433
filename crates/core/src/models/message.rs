use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use tabletop_errors::{RuntimeError, RuntimeResult};

/// Worker就绪握手消息类型
pub const WORKER_READY: &str = "WORKER_READY";
/// 任务级错误消息类型
pub const ERROR_MESSAGE: &str = "ERROR";
/// 结果消息类型后缀
pub const RESULT_SUFFIX: &str = "_RESULT";

/// Worker与管理器之间双向传递的消息信封
///
/// 序列化后的形式固定为 `{ "type": string, "data": object }`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new<S: Into<String>>(message_type: S, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }

    /// Worker初始化完成后发送的握手消息
    pub fn ready(worker_type: &str) -> Self {
        Self::new(
            WORKER_READY,
            json!({
                "workerType": worker_type,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        )
    }

    /// 构造请求消息：`{...payload, taskId, priority, timestamp}`
    ///
    /// `task_id` 为空表示fire-and-forget请求，此时不写入 `taskId` 字段。
    pub fn request(
        message_type: &str,
        payload: Value,
        task_id: Option<&str>,
        priority: &str,
    ) -> RuntimeResult<Self> {
        let mut data = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(RuntimeError::invalid_payload(format!(
                    "请求负载必须是JSON对象, 实际为: {other}"
                )))
            }
        };
        if let Some(id) = task_id {
            data.insert("taskId".to_string(), Value::String(id.to_string()));
        }
        data.insert("priority".to_string(), Value::String(priority.to_string()));
        data.insert(
            "timestamp".to_string(),
            Value::from(Utc::now().timestamp_millis()),
        );
        Ok(Self::new(message_type, Value::Object(data)))
    }

    /// 针对某个请求的结果消息，类型为 `<type>_RESULT`
    pub fn result_for(request_type: &str, task_id: Option<&str>, result: Value) -> Self {
        Self::new(
            format!("{request_type}{RESULT_SUFFIX}"),
            json!({
                "taskId": task_id,
                "result": result,
            }),
        )
    }

    pub fn error(task_id: Option<&str>, error: &str) -> Self {
        Self::new(
            ERROR_MESSAGE,
            json!({
                "taskId": task_id,
                "error": error,
            }),
        )
    }

    pub fn task_id(&self) -> Option<&str> {
        self.data.get("taskId").and_then(Value::as_str)
    }

    pub fn is_ready(&self) -> bool {
        self.message_type == WORKER_READY
    }

    pub fn is_result(&self) -> bool {
        self.message_type.ends_with(RESULT_SUFFIX)
    }

    pub fn is_error(&self) -> bool {
        self.message_type == ERROR_MESSAGE
    }

    /// 结果消息的有效负载；非本运行时产生的结果消息没有 `result` 字段时返回整个data
    pub fn result_value(&self) -> Value {
        match self.data.get("result") {
            Some(result) => result.clone(),
            None => self.data.clone(),
        }
    }

    pub fn error_message(&self) -> String {
        self.data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("未知错误")
            .to_string()
    }

    /// 把信封解析成adjacently-tagged的强类型命令枚举
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> RuntimeResult<T> {
        let value = serde_json::to_value(self)?;
        serde_json::from_value(value).map_err(|e| {
            RuntimeError::invalid_payload(format!("无法解析消息 {}: {e}", self.message_type))
        })
    }
}

/// Worker发往管理器的消息，附带来源Worker名称
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub worker: String,
    pub envelope: Envelope,
}

/// 管理器向订阅者广播的非关联消息
#[derive(Debug, Clone)]
pub enum WorkerNotification {
    /// 没有匹配到待处理请求的消息（帧更新、完成批次、fire-and-forget结果等）
    Message { worker: String, envelope: Envelope },
    /// Worker任务崩溃
    Crashed { worker: String, error: String },
    /// 崩溃后已重新启动
    Restarted { worker: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_merges_payload_fields() {
        let envelope = Envelope::request(
            "SHUFFLE_DECK",
            json!({"cards": [1, 2, 3]}),
            Some("task_1_1"),
            "normal",
        )
        .unwrap();

        assert_eq!(envelope.message_type, "SHUFFLE_DECK");
        assert_eq!(envelope.task_id(), Some("task_1_1"));
        assert_eq!(envelope.data["cards"], json!([1, 2, 3]));
        assert_eq!(envelope.data["priority"], "normal");
        assert!(envelope.data["timestamp"].is_i64());
    }

    #[test]
    fn test_fire_and_forget_request_has_no_task_id() {
        let envelope = Envelope::request("PING", Value::Null, None, "high").unwrap();
        assert_eq!(envelope.task_id(), None);
        assert!(envelope.data.get("taskId").is_none());
    }

    #[test]
    fn test_request_rejects_non_object_payload() {
        let result = Envelope::request("PING", json!([1, 2]), None, "normal");
        assert!(matches!(result, Err(RuntimeError::InvalidPayload(_))));
    }

    #[test]
    fn test_result_and_error_envelopes() {
        let result = Envelope::result_for("FIND_PATHS", Some("t1"), json!({"paths": []}));
        assert_eq!(result.message_type, "FIND_PATHS_RESULT");
        assert!(result.is_result());
        assert_eq!(result.task_id(), Some("t1"));
        assert_eq!(result.result_value(), json!({"paths": []}));

        let error = Envelope::error(Some("t2"), "boom");
        assert!(error.is_error());
        assert_eq!(error.task_id(), Some("t2"));
        assert_eq!(error.error_message(), "boom");
    }

    #[test]
    fn test_wire_format() {
        let envelope = Envelope::ready("game-logic");
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["type"], "WORKER_READY");
        assert_eq!(wire["data"]["workerType"], "game-logic");
        assert!(envelope.is_ready());
    }

    #[derive(Debug, serde::Deserialize, PartialEq)]
    #[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
    enum TestCommand {
        RemoveAnimation { id: String },
        Stats {},
    }

    #[test]
    fn test_parse_typed_command_ignores_envelope_fields() {
        let envelope =
            Envelope::request("REMOVE_ANIMATION", json!({"id": "m1"}), Some("t"), "normal")
                .unwrap();
        let command: TestCommand = envelope.parse().unwrap();
        assert_eq!(command, TestCommand::RemoveAnimation { id: "m1".into() });

        let stats = Envelope::request("STATS", json!({}), Some("t"), "normal").unwrap();
        assert_eq!(stats.parse::<TestCommand>().unwrap(), TestCommand::Stats {});

        let unknown = Envelope::new("NOPE", json!({}));
        assert!(unknown.parse::<TestCommand>().is_err());
    }
}
