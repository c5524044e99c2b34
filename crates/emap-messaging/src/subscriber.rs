//! 交换消息订阅
//!
//! 处理成功后确认；处理器返回错误时重新入队；无法解码的消息直接拒绝，
//! 避免反复投递。

use crate::config::MessageQueueConfig;
use anyhow::{Context, Result};
use emap_interchange::InterchangeMessage;
use lapin::{message::DeliveryResult, options::*, types::FieldTable, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 交换消息处理器接口
#[async_trait::async_trait]
pub trait InterchangeHandler: Send + Sync {
    /// 返回 `Err` 的消息会被重新投递
    async fn handle(&self, message: InterchangeMessage) -> Result<()>;

    fn name(&self) -> &str;
}

/// 对一次投递的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    Ack,
    Requeue,
    Reject,
}

/// 解码并交给处理器，决定如何回应代理
pub async fn process_payload(handler: &dyn InterchangeHandler, payload: &[u8]) -> DeliveryAction {
    let message = match InterchangeMessage::from_json(payload) {
        Ok(message) => message,
        Err(e) => {
            error!("Undecodable message rejected by {}: {}", handler.name(), e);
            return DeliveryAction::Reject;
        }
    };

    let id = message.source_message_id().to_string();
    debug!("Processing message {} ({})", id, message.message_type());
    match handler.handle(message).await {
        Ok(()) => DeliveryAction::Ack,
        Err(e) => {
            error!("Handler {} failed on {}: {:#}", handler.name(), id, e);
            DeliveryAction::Requeue
        }
    }
}

/// RabbitMQ订阅器
pub struct AmqpSubscriber {
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    config: MessageQueueConfig,
}

impl AmqpSubscriber {
    pub fn new(config: MessageQueueConfig) -> Self {
        Self {
            connection: RwLock::new(None),
            channel: RwLock::new(None),
            config,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        let mut uri: lapin::uri::AMQPUri = self
            .config
            .url
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("Failed to connect to {}", self.config.url))?;
        uri.query.heartbeat = Some(self.config.heartbeat);
        let conn = Connection::connect_uri(uri, ConnectionProperties::default())
        .await
        .with_context(|| format!("Failed to connect to {}", self.config.url))?;
        let channel = conn.create_channel().await?;

        // 设置QoS
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;
        channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        *self.channel.write().await = Some(channel);
        *self.connection.write().await = Some(conn);

        info!("Connected to message queue: {}", self.config.url);
        Ok(())
    }

    /// 开始消费，消息按到达顺序逐条交给处理器
    pub async fn start_consuming(&self, handler: Arc<dyn InterchangeHandler>) -> Result<()> {
        let channel_lock = self.channel.read().await;
        let channel = channel_lock
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Not connected to message queue"))?;

        let consumer_tag = format!("emap-{}-{}", handler.name(), uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.config.queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("Started consuming messages from queue: {}", self.config.queue_name);

        consumer.set_delegate(move |delivery: DeliveryResult| {
            let handler = handler.clone();
            async move {
                let delivery = match delivery {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => return,
                    Err(e) => {
                        error!("Consumer error: {}", e);
                        return;
                    }
                };

                let outcome = match process_payload(handler.as_ref(), &delivery.data).await {
                    DeliveryAction::Ack => delivery.ack(BasicAckOptions::default()).await,
                    DeliveryAction::Requeue => {
                        warn!("Requeueing delivery {}", delivery.delivery_tag);
                        delivery.nack(BasicNackOptions { requeue: true, ..Default::default() }).await
                    }
                    DeliveryAction::Reject => delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await,
                };
                if let Err(e) = outcome {
                    error!("Failed to answer delivery: {}", e);
                }
            }
        });

        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        *self.channel.write().await = None;
        if let Some(conn) = self.connection.write().await.take() {
            conn.close(200, "shutdown").await?;
        }
        info!("Disconnected from message queue");
        Ok(())
    }
}
