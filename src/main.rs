use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tabletop::scenario::{self, Scenario};
use tabletop::GameRuntime;
use tabletop_core::RuntimeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("tabletop")
        .version("0.1.0")
        .about("桌游异步任务分发与动画调度运行时")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（可选，缺省时使用内置默认值）"),
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("SCENARIO")
                .help("演示场景")
                .value_parser(["events", "animation", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别（覆盖配置文件）")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式（覆盖配置文件）")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("打印生效的配置后退出")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);

    // 加载配置
    let mut config = RuntimeConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认>")))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    if matches.get_flag("print-config") {
        println!("{}", config.to_toml().context("渲染配置失败")?);
        return Ok(());
    }

    // 初始化日志系统
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    let scenario: Scenario = matches
        .get_one::<String>("scenario")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()
        .context("解析演示场景失败")?;

    info!("启动桌游运行时");
    info!("演示场景: {scenario}");

    let runtime = GameRuntime::new(config);
    runtime.initialize().await.context("初始化运行时失败")?;

    tokio::select! {
        result = scenario::run(&runtime, scenario) => match result {
            Ok(report) => info!(
                "演示结束: {}",
                serde_json::to_string(&report).unwrap_or_default()
            ),
            Err(e) => error!("演示运行失败: {e}"),
        },
        _ = wait_for_shutdown_signal() => {
            warn!("收到关闭信号，中止演示");
        }
    }

    let metrics = runtime.get_performance_metrics().await;
    info!(
        "累计发送 {} 个任务，超时 {} 个，平均响应 {:.2}ms",
        metrics.workers.total_tasks_sent,
        metrics.workers.total_timeouts,
        metrics.workers.overall_average_response_time_ms()
    );

    runtime.destroy().await;
    info!("桌游运行时已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
