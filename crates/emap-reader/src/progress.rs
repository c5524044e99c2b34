//! 处理进度书签

use emap_core::Result;
use emap_database::{DatabasePool, FeedQueries, Progress};
use std::sync::Mutex;

/// 单行书签的读写
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self) -> Result<Option<Progress>>;

    /// 必须是原子写入
    async fn save(&self, progress: &Progress) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgProgressStore {
    pool: DatabasePool,
}

impl PgProgressStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 确保书签表存在
    pub async fn prepare(&self) -> Result<()> {
        FeedQueries::new(&self.pool).create_progress_table().await
    }
}

#[async_trait::async_trait]
impl ProgressStore for PgProgressStore {
    async fn load(&self) -> Result<Option<Progress>> {
        FeedQueries::new(&self.pool).load_progress().await
    }

    async fn save(&self, progress: &Progress) -> Result<()> {
        FeedQueries::new(&self.pool).save_progress(progress).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    progress: Mutex<Option<Progress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Progress> {
        match self.progress.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait::async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self) -> Result<Option<Progress>> {
        Ok(self.current())
    }

    async fn save(&self, progress: &Progress) -> Result<()> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|_| emap_core::EmapError::Internal("Progress lock poisoned".to_string()))?;
        *guard = Some(*progress);
        Ok(())
    }
}
