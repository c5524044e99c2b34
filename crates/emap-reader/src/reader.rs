//! 读取循环
//!
//! 每条源记录：分发 → 逐条发布并等待确认 → 推进书签。
//! 发布或数据库失败时直接返回错误，书签停在上一条，重启后从同一条继续。
//! 已经发布但书签未推进的消息会被再次发布，下游按消息ID去重。

use crate::progress::ProgressStore;
use crate::source::FeedSource;
use anyhow::{Context, Result};
use chrono::Utc;
use emap_admin::{ProcessingStats, StatsSnapshot};
use emap_database::{FeedRecord, Progress};
use emap_hl7::{DispatchOutcome, Hl7Dispatcher};
use emap_messaging::Publisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// 读取器设置
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub poll_interval: Duration,
    /// 没有书签时第一条要处理的序号
    pub default_start_unid: Option<i64>,
    /// 处理完这个序号后停止
    pub end_unid: Option<i64>,
    pub stats_interval: u64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            default_start_unid: None,
            end_unid: None,
            stats_interval: 1000,
        }
    }
}

/// 一次读取的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReadStep {
    Processed {
        unid: i64,
        outcome: DispatchOutcome,
        messages: usize,
    },
    /// 暂时没有新消息
    Idle,
    /// 已越过结束序号
    ReachedEnd,
}

/// HL7源消息读取器
pub struct Hl7Reader {
    source: Arc<dyn FeedSource>,
    progress: Arc<dyn ProgressStore>,
    publisher: Arc<dyn Publisher>,
    dispatcher: Hl7Dispatcher,
    settings: ReaderSettings,
    stats: ProcessingStats,
}

impl Hl7Reader {
    pub fn new(
        source: Arc<dyn FeedSource>,
        progress: Arc<dyn ProgressStore>,
        publisher: Arc<dyn Publisher>,
        dispatcher: Hl7Dispatcher,
        settings: ReaderSettings,
    ) -> Result<Self> {
        let stats = ProcessingStats::new("hl7_reader", settings.stats_interval)?;
        Ok(Self {
            source,
            progress,
            publisher,
            dispatcher,
            settings,
            stats,
        })
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// 最后成功处理的序号；第一次运行时按默认起点初始化书签
    pub async fn latest_processed_unid(&self) -> Result<i64> {
        if let Some(progress) = self.progress.load().await.context("Failed to load progress")? {
            return Ok(progress.last_processed_unid);
        }

        let mut progress = Progress::default();
        if let Some(start) = self.settings.default_start_unid {
            progress.last_processed_unid = start - 1;
        }
        info!("No progress found, initialising to unid {}", progress.last_processed_unid);
        self.progress.save(&progress).await.context("Failed to initialise progress")?;
        Ok(progress.last_processed_unid)
    }

    /// 处理下一条记录（不等待）
    pub async fn process_next(&self) -> Result<ReadStep> {
        let last = self.latest_processed_unid().await?;
        if let Some(end) = self.settings.end_unid {
            if last >= end {
                info!("Last processed unid {} >= end unid {}, stopping", last, end);
                return Ok(ReadStep::ReachedEnd);
            }
        }

        let Some(record) = self.source.next_after(last).await.context("Failed to read feed")? else {
            return Ok(ReadStep::Idle);
        };
        self.process_record(record).await
    }

    async fn process_record(&self, record: FeedRecord) -> Result<ReadStep> {
        // 1. 分发（解析失败、未实现、被忽略、被拒绝都在这里归类）
        let dispatched = self.dispatcher.dispatch(&record.message_text, record.unid);

        // 2. 逐条发布，全部确认后才推进书签
        let total = dispatched.messages.len();
        for (index, message) in dispatched.messages.iter().enumerate() {
            debug!("[{}] publishing message ({}/{}) {}", record.unid, index + 1, total, message.source_message_id());
            self.publisher
                .publish(message)
                .await
                .with_context(|| format!("Failed to publish {} from unid {}", message.source_message_id(), record.unid))?;
        }

        // 3. 推进书签
        let progress = Progress {
            last_processed_unid: record.unid,
            last_processed_message_datetime: record.message_datetime,
            last_processing_datetime: Some(Utc::now()),
        };
        self.progress
            .save(&progress)
            .await
            .with_context(|| format!("Failed to record progress at unid {}", record.unid))?;

        info!("[{}] {} {}: {} messages", record.unid, dispatched.message_code, dispatched.outcome.label(), total);
        self.stats.record(dispatched.outcome.label(), total, Some(record.unid));

        Ok(ReadStep::Processed {
            unid: record.unid,
            outcome: dispatched.outcome,
            messages: total,
        })
    }

    /// 持续读取，直到越过结束序号或收到停止信号；停止只在两条记录之间发生
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<StatsSnapshot> {
        info!("HL7 reader started");
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping reader");
                break;
            }
            match self.process_next().await? {
                ReadStep::Processed { .. } => {}
                ReadStep::ReachedEnd => break,
                ReadStep::Idle => {
                    debug!("No new messages, sleeping {:?}", self.settings.poll_interval);
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                        Ok(()) = shutdown.changed() => {}
                    }
                }
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            "HL7 reader stopped after {} records ({:.1} records/s)",
            snapshot.records, snapshot.throughput
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MemoryProgressStore;
    use crate::source::MemoryFeedSource;
    use emap_hl7::Hl7Context;
    use emap_interchange::InterchangeMessage;
    use emap_messaging::MemoryPublisher;

    const A01: &str = concat!(
        "MSH|^~\\&|EPIC|UCLH|HL7|UCLH|201209211843||ADT^A01|1|P|2.2\n",
        "EVN|A01|201209211843\n",
        "PID|1||50032556\n",
        "PV1|1|I|H2HH^H203^H203-11||||||||||||||||123412341234"
    );

    const ORU: &str = concat!(
        "MSH|^~\\&|WinPath|UCLH|||201301011230||ORU^R01|1|P|2.4\r",
        "PID|1||40800000\r",
        "ORC|RE|91393667|13U444444\r",
        "OBR|1|91393667|13U444444|FBC||201301011000|201301011030\r",
        "OBX|1|NM|HB||142|g/L\r",
        "OBX|2|NM|WCC||7.1"
    );

    struct FailingPublisher;

    #[async_trait::async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _message: &InterchangeMessage) -> Result<()> {
            anyhow::bail!("broker unavailable")
        }
    }

    struct Fixture {
        reader: Hl7Reader,
        progress: Arc<MemoryProgressStore>,
        publisher: Arc<MemoryPublisher>,
    }

    fn fixture(records: Vec<FeedRecord>, settings: ReaderSettings) -> Fixture {
        let progress = Arc::new(MemoryProgressStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let reader = Hl7Reader::new(
            Arc::new(MemoryFeedSource::new(records)),
            progress.clone(),
            publisher.clone(),
            Hl7Dispatcher::new(Hl7Context::default()),
            settings,
        )
        .unwrap();
        Fixture {
            reader,
            progress,
            publisher,
        }
    }

    fn last_unid(progress: &MemoryProgressStore) -> i64 {
        progress.current().unwrap().last_processed_unid
    }

    #[tokio::test]
    async fn test_records_are_published_and_bookmarked_in_order() {
        let f = fixture(
            vec![FeedRecord::new(1, A01, None), FeedRecord::new(2, ORU, None)],
            ReaderSettings::default(),
        );

        let step = f.reader.process_next().await.unwrap();
        assert_eq!(
            step,
            ReadStep::Processed {
                unid: 1,
                outcome: DispatchOutcome::Built,
                messages: 1
            }
        );
        assert_eq!(last_unid(&f.progress), 1);

        f.reader.process_next().await.unwrap();
        assert_eq!(last_unid(&f.progress), 2);
        assert_eq!(f.reader.process_next().await.unwrap(), ReadStep::Idle);

        let published = f.publisher.take();
        let ids: Vec<&str> = published.iter().map(|m| m.source_message_id()).collect();
        // ORU：患者更新 + 两个结果
        assert_eq!(ids, ["0000000001", "0000000002_01", "0000000002_02", "0000000002_03"]);
        assert_eq!(f.reader.stats().snapshot().records, 2);
    }

    #[tokio::test]
    async fn test_unparseable_record_still_advances() {
        let f = fixture(
            vec![FeedRecord::new(7, "this is not hl7", None)],
            ReaderSettings::default(),
        );
        match f.reader.process_next().await.unwrap() {
            ReadStep::Processed { outcome, messages, .. } => {
                assert!(matches!(outcome, DispatchOutcome::InvalidFormat(_)));
                assert_eq!(messages, 0);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(last_unid(&f.progress), 7);
        assert!(f.publisher.is_empty());
        assert_eq!(f.reader.stats().outcome_count("invalid_format"), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_advance() {
        let progress = Arc::new(MemoryProgressStore::new());
        let reader = Hl7Reader::new(
            Arc::new(MemoryFeedSource::new(vec![FeedRecord::new(3, A01, None)])),
            progress.clone(),
            Arc::new(FailingPublisher),
            Hl7Dispatcher::new(Hl7Context::default()),
            ReaderSettings::default(),
        )
        .unwrap();

        assert!(reader.process_next().await.is_err());
        assert_eq!(last_unid(&progress), -1);
        // 重试时仍然是同一条
        assert!(reader.process_next().await.is_err());
        assert_eq!(last_unid(&progress), -1);
    }

    #[tokio::test]
    async fn test_processing_bounds() {
        let records = (1..=6).map(|unid| FeedRecord::new(unid, A01, None)).collect();
        let settings = ReaderSettings {
            default_start_unid: Some(3),
            end_unid: Some(4),
            ..Default::default()
        };
        let f = fixture(records, settings);

        let (_tx, rx) = watch::channel(false);
        let snapshot = f.reader.run(rx).await.unwrap();

        assert_eq!(snapshot.records, 2);
        assert_eq!(last_unid(&f.progress), 4);
        let ids: Vec<String> = f.publisher.take().iter().map(|m| m.source_message_id().to_string()).collect();
        assert_eq!(ids, ["0000000003", "0000000004"]);
    }

    #[tokio::test]
    async fn test_existing_bookmark_wins_over_default_start() {
        let f = fixture(
            vec![FeedRecord::new(10, A01, None), FeedRecord::new(11, A01, None)],
            ReaderSettings {
                default_start_unid: Some(1),
                ..Default::default()
            },
        );
        f.progress.save(&Progress { last_processed_unid: 10, ..Default::default() }).await.unwrap();

        match f.reader.process_next().await.unwrap() {
            ReadStep::Processed { unid, .. } => assert_eq!(unid, 11),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_reader() {
        let f = fixture(Vec::new(), ReaderSettings::default());
        let (tx, rx) = watch::channel(false);
        let handle = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        let (snapshot, _) = tokio::join!(f.reader.run(rx), handle);
        assert_eq!(snapshot.unwrap().records, 0);
    }
}
