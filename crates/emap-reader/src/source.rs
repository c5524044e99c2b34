//! 源消息

use emap_core::Result;
use emap_database::{DatabasePool, FeedQueries, FeedRecord};
use std::sync::Mutex;

/// 按序号读取源消息
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// `unid` 之后的第一条消息；暂时没有时返回 `None`
    async fn next_after(&self, unid: i64) -> Result<Option<FeedRecord>>;
}

/// PostgreSQL中的上游消息表
#[derive(Debug, Clone)]
pub struct PgFeedSource {
    pool: DatabasePool,
}

impl PgFeedSource {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FeedSource for PgFeedSource {
    async fn next_after(&self, unid: i64) -> Result<Option<FeedRecord>> {
        FeedQueries::new(&self.pool).next_record_after(unid).await
    }
}

/// 内存中的消息序列
#[derive(Debug, Default)]
pub struct MemoryFeedSource {
    records: Mutex<Vec<FeedRecord>>,
}

impl MemoryFeedSource {
    pub fn new(records: Vec<FeedRecord>) -> Self {
        let source = Self::default();
        for record in records {
            source.push(record);
        }
        source
    }

    /// 追加一条消息，保持序号有序
    pub fn push(&self, record: FeedRecord) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let position = records.partition_point(|r| r.unid < record.unid);
        records.insert(position, record);
    }
}

#[async_trait::async_trait]
impl FeedSource for MemoryFeedSource {
    async fn next_after(&self, unid: i64) -> Result<Option<FeedRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| emap_core::EmapError::Internal("Feed source lock poisoned".to_string()))?;
        Ok(records.iter().find(|r| r.unid > unid).cloned())
    }
}
