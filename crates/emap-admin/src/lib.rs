//! # EMAP运维模块
//!
//! 配置加载与校验、日志初始化、处理统计（Prometheus计数器、累计数量与吞吐量）。

pub mod config;
pub mod logging;
pub mod monitoring;

pub use config::{ConfigManager, ConfigValidator, EmapConfig, FeedConfig, LoggingConfig};
pub use logging::init_logging;
pub use monitoring::{ProcessingStats, StatsSnapshot};
