//! 日志初始化

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// 初始化全局 `tracing` 订阅者；设置了 `RUST_LOG` 时以它为准
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let result = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", config.level, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_levels_are_accepted() {
        let config = LoggingConfig {
            level: "info,emap_star=debug".to_string(),
            ..Default::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(build_filter(&config).is_ok());
        }
    }

    #[test]
    fn test_garbage_level_is_rejected() {
        let config = LoggingConfig {
            level: "emap=verbose".to_string(),
            ..Default::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(build_filter(&config).is_err());
        }
    }
}
