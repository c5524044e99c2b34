//! 交换消息发布

use crate::config::MessageQueueConfig;
use anyhow::{Context, Result};
use emap_interchange::InterchangeMessage;
use lapin::{
    options::*, publisher_confirm::Confirmation, types::FieldTable, BasicProperties, Channel, Connection,
    ConnectionProperties, ExchangeKind,
};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// 把交换消息交给下游；返回 `Ok` 表示已确认送达
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &InterchangeMessage) -> Result<()>;
}

/// 基于RabbitMQ的发布器，启用发布确认
pub struct AmqpPublisher {
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    config: MessageQueueConfig,
}

impl AmqpPublisher {
    pub fn new(config: MessageQueueConfig) -> Self {
        Self {
            connection: RwLock::new(None),
            channel: RwLock::new(None),
            config,
        }
    }

    /// 连接并声明交换器、队列与绑定
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

        channel.confirm_select(ConfirmSelectOptions::default()).await?;
        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
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
        channel
            .queue_bind(
                &self.config.queue_name,
                &self.config.exchange,
                &self.config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        *self.channel.write().await = Some(channel);
        *self.connection.write().await = Some(conn);

        info!("Connected to message queue: {}", self.config.url);
        Ok(())
    }

    /// 单次发布并等待确认
    async fn publish_once(&self, message: &InterchangeMessage, payload: &[u8]) -> Result<()> {
        let needs_connect = self.channel.read().await.as_ref().map_or(true, |c| !c.status().connected());
        if needs_connect {
            warn!("Message queue channel is not connected, reconnecting");
            self.connect().await?;
        }

        let channel_lock = self.channel.read().await;
        let channel = channel_lock
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Not connected to message queue"))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_message_id(message.source_message_id().to_string().into())
            .with_timestamp(chrono::Utc::now().timestamp().max(0) as u64)
            .with_delivery_mode(2);

        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                &self.config.routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;

        match confirm {
            Confirmation::Nack(nack) => {
                error!("Message publish rejected: {:?}", nack);
                Err(anyhow::anyhow!("Message {} rejected by broker", message.source_message_id()))
            }
            _ => {
                debug!("Message published: {}", message.source_message_id());
                Ok(())
            }
        }
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

#[async_trait::async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, message: &InterchangeMessage) -> Result<()> {
        let payload = message.to_json().context("Failed to serialise interchange message")?;
        let what = format!("Publishing {}", message.source_message_id());
        self.config
            .retry_policy()
            .run(&what, || self.publish_once(message, &payload))
            .await
    }
}

/// 把消息保存在内存中的发布器
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<InterchangeMessage>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出目前收到的全部消息
    pub fn take(&self) -> Vec<InterchangeMessage> {
        match self.messages.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, message: &InterchangeMessage) -> Result<()> {
        self.messages
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory publisher lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}
