//! 对账消费者：把队列中的交换消息交给对账处理器

use anyhow::{Context, Result};
use chrono::Utc;
use emap_admin::ProcessingStats;
use emap_interchange::InterchangeMessage;
use emap_messaging::InterchangeHandler;
use emap_star::{InterchangeProcessor, ProcessOutcome};
use tracing::warn;

pub struct StarHandler {
    processor: InterchangeProcessor,
    stats: ProcessingStats,
}

impl StarHandler {
    pub fn new(processor: InterchangeProcessor, stats_interval: u64) -> Result<Self> {
        Ok(Self {
            processor,
            stats: ProcessingStats::new("star", stats_interval)?,
        })
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }
}

#[async_trait::async_trait]
impl InterchangeHandler for StarHandler {
    /// 被丢弃和重复的消息同样确认；只有其他错误才重新投递
    async fn handle(&self, message: InterchangeMessage) -> Result<()> {
        let outcome = self
            .processor
            .process(&message, Utc::now())
            .await
            .with_context(|| format!("Failed to process {}", message.source_message_id()))?;

        let label = match outcome {
            ProcessOutcome::Applied => "applied",
            ProcessOutcome::Duplicate => "duplicate",
            ProcessOutcome::Dropped(reason) => {
                warn!("Dropped {}: {}", message.source_message_id(), reason);
                "dropped"
            }
        };
        self.stats.record(label, 1, None);
        Ok(())
    }

    fn name(&self) -> &str {
        "star"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emap_hl7::{Hl7Context, Hl7Dispatcher};
    use emap_interchange::{AdtEvent, AdtMessage};
    use emap_messaging::{process_payload, DeliveryAction};

    const A01: &str = concat!(
        "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209211843||ADT^A01|1|P|2.2\r",
        "EVN|A01|201209211843\r",
        "PID|1||50032556~9999999999||TESTSURNAME^TESTFORENAME\r",
        "PV1|1|I|H2HH^H203^H203-11||||||||||||||||123412341234|||||||||||||||||||||||||201209211740"
    );

    fn handler() -> StarHandler {
        StarHandler::new(InterchangeProcessor::new(), 100).unwrap()
    }

    #[tokio::test]
    async fn test_redelivery_is_acked_once_applied() {
        let handler = handler();
        let dispatched = Hl7Dispatcher::new(Hl7Context::default()).dispatch(A01, 1);
        let payload = dispatched.messages[0].to_json().unwrap();

        assert_eq!(process_payload(&handler, &payload).await, DeliveryAction::Ack);
        assert_eq!(process_payload(&handler, &payload).await, DeliveryAction::Ack);

        assert_eq!(handler.stats().outcome_count("applied"), 1);
        assert_eq!(handler.stats().outcome_count("duplicate"), 1);
    }

    #[tokio::test]
    async fn test_dropped_message_is_acked() {
        let handler = handler();
        // 没有任何患者标识
        let message = InterchangeMessage::Adt(AdtMessage::new("0000000005", "EPIC", "A08", AdtEvent::UpdatePatientInfo));

        let action = process_payload(&handler, &message.to_json().unwrap()).await;

        assert_eq!(action, DeliveryAction::Ack);
        assert_eq!(handler.stats().outcome_count("dropped"), 1);
    }
}
