//! 消息队列配置

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageQueueConfig {
    pub url: String,
    pub exchange: String,
    pub routing_key: String,
    pub queue_name: String,
    pub heartbeat: u16,
    pub prefetch_count: u16,
    pub max_publish_retries: u32,
    /// 毫秒
    pub initial_backoff_ms: u64,
    /// 毫秒
    pub max_backoff_ms: u64,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: "emap".to_string(),
            routing_key: "hl7".to_string(),
            queue_name: "hl7Queue".to_string(),
            heartbeat: 60,
            prefetch_count: 10,
            max_publish_retries: 8,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
        }
    }
}

impl MessageQueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_publish_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}
