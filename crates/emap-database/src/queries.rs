//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::*;
use chrono::{DateTime, Utc};
use emap_core::{EmapError, Result};

/// 进度表只有这一行
const PROGRESS_ROW_ID: i32 = 0;

/// 源消息表与进度书签的查询接口
pub struct FeedQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> FeedQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建进度表（源消息表由上游维护）
    pub async fn create_progress_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS etl_ids_progress (
                id INTEGER PRIMARY KEY,
                lastprocessedidsunid INTEGER NOT NULL,
                lastprocessedmessagedatetime TIMESTAMP WITH TIME ZONE,
                lastprocessingdatetime TIMESTAMP WITH TIME ZONE
            )
        "#,
        )
        .execute(self.pool.pool())
        .await
        .map_err(|e| EmapError::Database(e.to_string()))?;

        tracing::info!("Progress table ready");
        Ok(())
    }

    /// 源消息表是否为空
    pub async fn is_feed_empty(&self) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT unid FROM tbl_ids_master LIMIT 1")
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| EmapError::Database(e.to_string()))?;
        Ok(row.is_none())
    }

    /// `unid` 之后的第一条消息
    pub async fn next_record_after(&self, unid: i64) -> Result<Option<FeedRecord>> {
        let result = sqlx::query_as::<_, DbIdsMaster>(
            "SELECT unid, hl7message, messagedatetime, persistdatetime FROM tbl_ids_master WHERE unid > $1 ORDER BY unid LIMIT 1",
        )
        .bind(unid)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| EmapError::Database(e.to_string()))?;

        Ok(result.map(FeedRecord::from))
    }

    /// 在某个时间之后入库的第一条消息的 `unid`，用于把配置的起止时间换算成序号
    pub async fn first_unid_from(&self, from: DateTime<Utc>, from_unid: i64) -> Result<Option<i64>> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT unid FROM tbl_ids_master WHERE unid >= $1 AND persistdatetime >= $2 ORDER BY unid LIMIT 1",
        )
        .bind(from_unid)
        .bind(from)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| EmapError::Database(e.to_string()))?;

        if row.is_none() {
            tracing::warn!("No feed messages found after {}, is it in the future?", from);
        }
        Ok(row.map(|(unid,)| i64::from(unid)))
    }

    /// 读取书签；不存在时不创建
    pub async fn load_progress(&self) -> Result<Option<Progress>> {
        let result = sqlx::query_as::<_, DbIdsProgress>(
            "SELECT id, lastprocessedidsunid, lastprocessedmessagedatetime, lastprocessingdatetime FROM etl_ids_progress WHERE id = $1",
        )
        .bind(PROGRESS_ROW_ID)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| EmapError::Database(e.to_string()))?;

        Ok(result.map(Progress::from))
    }

    /// 原子地写入书签
    pub async fn save_progress(&self, progress: &Progress) -> Result<()> {
        let unid = i32::try_from(progress.last_processed_unid)
            .map_err(|_| EmapError::Database(format!("unid {} out of range", progress.last_processed_unid)))?;

        sqlx::query(
            r#"
            INSERT INTO etl_ids_progress (id, lastprocessedidsunid, lastprocessedmessagedatetime, lastprocessingdatetime)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                lastprocessedidsunid = EXCLUDED.lastprocessedidsunid,
                lastprocessedmessagedatetime = EXCLUDED.lastprocessedmessagedatetime,
                lastprocessingdatetime = EXCLUDED.lastprocessingdatetime
        "#,
        )
        .bind(PROGRESS_ROW_ID)
        .bind(unid)
        .bind(progress.last_processed_message_datetime)
        .bind(progress.last_processing_datetime)
        .execute(self.pool.pool())
        .await
        .map_err(|e| EmapError::Database(e.to_string()))?;

        Ok(())
    }
}
