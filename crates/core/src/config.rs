use std::collections::HashMap;
use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use tabletop_errors::{RuntimeError, RuntimeResult};

/// 帧间隔上限（毫秒）
const MAX_FRAME_INTERVAL_MS: f64 = 1000.0;

/// 运行时配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_pool: WorkerPoolConfig,
    pub dispatcher: DispatcherConfig,
    pub animation: AnimationConfig,
    pub compute: ComputeConfig,
    pub observability: ObservabilityConfig,
}

/// Worker崩溃时对其待处理请求的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashPolicy {
    /// 立即拒绝所有发往崩溃Worker的待处理请求
    #[default]
    FailFast,
    /// 不主动处理，待处理请求只会通过各自的超时结束
    AwaitTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// 等待 WORKER_READY 握手的超时时间（毫秒）
    pub ready_timeout_ms: u64,
    /// send_task 默认超时时间（毫秒）
    pub default_task_timeout_ms: u64,
    /// 错误日志环形缓冲区容量
    pub error_log_capacity: usize,
    pub crash_policy: CrashPolicy,
    /// 崩溃后是否自动重启
    pub restart_on_crash: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 5000,
            default_task_timeout_ms: 5000,
            error_log_capacity: 100,
            crash_policy: CrashPolicy::FailFast,
            restart_on_crash: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 单个事件失败后的最大重试次数
    pub max_retries: u32,
    /// 单批次最多包含的事件数
    pub max_batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// 目标帧间隔（毫秒）
    pub frame_interval_ms: f64,
    /// 帧间隔超过 frame_interval_ms * frame_drop_factor 记为掉帧
    pub frame_drop_factor: f64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 1000.0 / 60.0,
            frame_drop_factor: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// 路径搜索最多探索的状态数
    pub max_explored_states: usize,
    /// 路径搜索默认返回的路径条数
    pub default_top_k: usize,
    /// 洗牌时每交换多少次让出一次执行权
    pub shuffle_yield_interval: usize,
    pub win_probability_floor: f64,
    pub win_probability_ceiling: f64,
    /// 克制倍率表：攻击方类型 -> 防守方类型 -> 倍率
    pub effectiveness_table: HashMap<String, HashMap<String, f64>>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            max_explored_states: 10_000,
            default_top_k: 3,
            shuffle_yield_interval: 1000,
            win_probability_floor: 0.1,
            win_probability_ceiling: 0.95,
            effectiveness_table: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// "pretty" 或 "json"
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl RuntimeConfig {
    /// 加载配置：默认值 < TOML配置文件 < `TABLETOP__` 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> RuntimeResult<Self> {
        let defaults = RuntimeConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default(
                "worker_pool.ready_timeout_ms",
                defaults.worker_pool.ready_timeout_ms as i64,
            )
            .and_then(|b| {
                b.set_default(
                    "worker_pool.default_task_timeout_ms",
                    defaults.worker_pool.default_task_timeout_ms as i64,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "worker_pool.error_log_capacity",
                    defaults.worker_pool.error_log_capacity as i64,
                )
            })
            .and_then(|b| b.set_default("worker_pool.crash_policy", "fail_fast"))
            .and_then(|b| b.set_default("worker_pool.restart_on_crash", true))
            .and_then(|b| {
                b.set_default(
                    "dispatcher.max_retries",
                    defaults.dispatcher.max_retries as i64,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "dispatcher.max_batch_size",
                    defaults.dispatcher.max_batch_size as i64,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "animation.frame_interval_ms",
                    defaults.animation.frame_interval_ms,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "animation.frame_drop_factor",
                    defaults.animation.frame_drop_factor,
                )
            })
            .and_then(|b| b.set_default("observability.log_level", "info"))
            .and_then(|b| b.set_default("observability.log_format", "pretty"))
            .map_err(|e| RuntimeError::config_error(format!("设置默认配置失败: {e}")))?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(RuntimeError::config_error(format!("配置文件不存在: {path}")));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("TABLETOP")
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder
            .build()
            .map_err(|e| RuntimeError::config_error(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| RuntimeError::config_error(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> RuntimeResult<Self> {
        let config: RuntimeConfig = toml::from_str(toml_str)
            .map_err(|e| RuntimeError::config_error(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> RuntimeResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::config_error(format!("序列化配置为TOML失败: {e}")))
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.worker_pool.ready_timeout_ms == 0 {
            return Err(RuntimeError::config_error("worker_pool.ready_timeout_ms 必须大于0"));
        }
        if self.worker_pool.default_task_timeout_ms == 0 {
            return Err(RuntimeError::config_error(
                "worker_pool.default_task_timeout_ms 必须大于0",
            ));
        }
        if self.worker_pool.error_log_capacity == 0 {
            return Err(RuntimeError::config_error(
                "worker_pool.error_log_capacity 必须大于0",
            ));
        }
        if self.dispatcher.max_batch_size == 0 {
            return Err(RuntimeError::config_error("dispatcher.max_batch_size 必须大于0"));
        }
        let frame_interval = self.animation.frame_interval_ms;
        if !frame_interval.is_finite()
            || frame_interval <= 0.0
            || frame_interval > MAX_FRAME_INTERVAL_MS
        {
            return Err(RuntimeError::config_error(format!(
                "animation.frame_interval_ms 必须在 (0, {MAX_FRAME_INTERVAL_MS}] 之间: {frame_interval}"
            )));
        }
        if !self.animation.frame_drop_factor.is_finite() || self.animation.frame_drop_factor < 1.0 {
            return Err(RuntimeError::config_error(
                "animation.frame_drop_factor 必须是不小于1的有限值",
            ));
        }
        if self.compute.max_explored_states == 0 || self.compute.shuffle_yield_interval == 0 {
            return Err(RuntimeError::config_error(
                "compute.max_explored_states 与 compute.shuffle_yield_interval 必须大于0",
            ));
        }
        let floor = self.compute.win_probability_floor;
        let ceiling = self.compute.win_probability_ceiling;
        if !(0.0..=1.0).contains(&floor) || !(0.0..=1.0).contains(&ceiling) || floor > ceiling {
            return Err(RuntimeError::config_error(format!(
                "胜率区间无效: [{floor}, {ceiling}]"
            )));
        }
        match self.observability.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(RuntimeError::config_error(format!(
                    "不支持的日志格式: {other}"
                )))
            }
        }
        Ok(())
    }
}
