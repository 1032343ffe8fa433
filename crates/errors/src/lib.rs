use thiserror::Error;

/// 运行时统一错误类型
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("Worker未找到: {name}")]
    WorkerNotFound { name: String },
    #[error("Worker尚未就绪: {name}")]
    WorkerNotReady { name: String },
    #[error("Worker已崩溃: {name} - {message}")]
    WorkerCrashed { name: String, message: String },
    #[error("Worker返回错误: {worker} - {message}")]
    WorkerError { worker: String, message: String },
    #[error("任务超时: {task_id} (超时时间: {timeout_ms}ms)")]
    Timeout { task_id: String, timeout_ms: u64 },
    #[error("初始化失败: {0}")]
    InitializationFailed(String),
    #[error("运行时尚未初始化")]
    NotInitialized,
    #[error("运行时已销毁")]
    Destroyed,
    #[error("消息通道已关闭: {0}")]
    ChannelClosed(String),
    #[error("无效的消息负载: {0}")]
    InvalidPayload(String),
    #[error("不支持的消息类型: {0}")]
    UnsupportedMessage(String),
    #[error("动画未找到: {id}")]
    AnimationNotFound { id: String },
    #[error("事件处理失败: {0}")]
    EventHandler(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    pub fn worker_not_found<S: Into<String>>(name: S) -> Self {
        Self::WorkerNotFound { name: name.into() }
    }
    pub fn worker_not_ready<S: Into<String>>(name: S) -> Self {
        Self::WorkerNotReady { name: name.into() }
    }
    pub fn worker_error<W: Into<String>, M: Into<String>>(worker: W, message: M) -> Self {
        Self::WorkerError {
            worker: worker.into(),
            message: message.into(),
        }
    }
    pub fn invalid_payload<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPayload(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn handler_error<S: Into<String>>(msg: S) -> Self {
        Self::EventHandler(msg.into())
    }
    /// 初始化失败、配置错误与销毁后的调用都无法通过重试恢复
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::InitializationFailed(_)
                | RuntimeError::Configuration(_)
                | RuntimeError::Destroyed
                | RuntimeError::Internal(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Timeout { .. }
                | RuntimeError::WorkerNotReady { .. }
                | RuntimeError::WorkerCrashed { .. }
                | RuntimeError::EventHandler(_)
        )
    }
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for RuntimeError {
    fn from(err: anyhow::Error) -> Self {
        RuntimeError::Internal(err.to_string())
    }
}
