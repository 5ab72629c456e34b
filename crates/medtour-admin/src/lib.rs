//! # MedTour管理模块
//!
//! 提供分层配置管理和日志初始化等运维功能

pub mod config;
pub mod logging;

pub use config::{ConfigManager, DatabaseConfig, FinanceConfig, LoggingConfig, MedTourConfig};
pub use logging::{init_logging, LogFormat};
