//! 日志初始化
//!
//! 基于 `tracing-subscriber` 的 EnvFilter；`RUST_LOG` 存在时优先于配置文件中的级别。

use crate::config::LoggingConfig;
use anyhow::Result;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow::anyhow!("Unknown log format: {}", other)),
        }
    }
}

/// 构造过滤器：RUST_LOG > 命令行覆盖 > 配置
pub fn build_filter(config: &LoggingConfig, level_override: Option<&str>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = level_override.unwrap_or(&config.level);
    EnvFilter::try_new(directives)
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", directives, e))
}

/// 初始化全局日志订阅者，只能调用一次
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    let filter = build_filter(config, level_override)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = match config.format.parse::<LogFormat>()? {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}
