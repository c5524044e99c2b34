//! # EMAP消息队列模块
//!
//! 交换消息的可靠传递：
//! - 带发布确认与指数退避重试的发布器
//! - 把解码后的交换消息交给处理器的订阅器
//! - 测试与进程内回放使用的内存发布器

pub mod config;
pub mod publisher;
pub mod retry;
pub mod subscriber;

pub use config::MessageQueueConfig;
pub use publisher::{AmqpPublisher, MemoryPublisher, Publisher};
pub use retry::RetryPolicy;
pub use subscriber::{process_payload, AmqpSubscriber, DeliveryAction, InterchangeHandler};
