//! 数据库模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 上游消息表中的一行
#[derive(Debug, FromRow)]
pub struct DbIdsMaster {
    pub unid: i32,
    pub hl7message: Option<String>,
    pub messagedatetime: Option<DateTime<Utc>>,
    pub persistdatetime: Option<DateTime<Utc>>,
}

/// 进度书签（表中只有一行）
#[derive(Debug, FromRow)]
pub struct DbIdsProgress {
    pub id: i32,
    pub lastprocessedidsunid: i32,
    pub lastprocessedmessagedatetime: Option<DateTime<Utc>>,
    pub lastprocessingdatetime: Option<DateTime<Utc>>,
}

/// 读取器看到的一条源消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// 严格递增的序号
    pub unid: i64,
    /// 已规范为 `\r` 分段的HL7文本
    pub message_text: String,
    pub message_datetime: Option<DateTime<Utc>>,
}

impl FeedRecord {
    pub fn new(unid: i64, raw_text: &str, message_datetime: Option<DateTime<Utc>>) -> Self {
        Self {
            unid,
            message_text: normalize_segment_separators(raw_text),
            message_datetime,
        }
    }
}

impl From<DbIdsMaster> for FeedRecord {
    fn from(row: DbIdsMaster) -> Self {
        FeedRecord::new(i64::from(row.unid), row.hl7message.as_deref().unwrap_or(""), row.messagedatetime)
    }
}

/// 已处理到的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub last_processed_unid: i64,
    pub last_processed_message_datetime: Option<DateTime<Utc>>,
    pub last_processing_datetime: Option<DateTime<Utc>>,
}

impl Default for Progress {
    /// 尚未处理任何消息
    fn default() -> Self {
        Self {
            last_processed_unid: -1,
            last_processed_message_datetime: None,
            last_processing_datetime: None,
        }
    }
}

impl From<DbIdsProgress> for Progress {
    fn from(row: DbIdsProgress) -> Self {
        Progress {
            last_processed_unid: i64::from(row.lastprocessedidsunid),
            last_processed_message_datetime: row.lastprocessedmessagedatetime,
            last_processing_datetime: row.lastprocessingdatetime,
        }
    }
}

/// 上游用 `\n` 或 `\r\n` 分段，HL7要求 `\r`
pub fn normalize_segment_separators(text: &str) -> String {
    text.replace("\r\n", "\r").replace('\n', "\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_feeds_become_carriage_returns() {
        assert_eq!(normalize_segment_separators("MSH|a\nPID|b\r\nPV1|c\r"), "MSH|a\rPID|b\rPV1|c\r");
    }

    #[test]
    fn test_record_from_row() {
        let row = DbIdsMaster {
            unid: 42,
            hl7message: Some("MSH|^~\\&|EPIC\nEVN|A01".to_string()),
            messagedatetime: None,
            persistdatetime: None,
        };
        let record = FeedRecord::from(row);
        assert_eq!(record.unid, 42);
        assert_eq!(record.message_text, "MSH|^~\\&|EPIC\rEVN|A01");
    }

    #[test]
    fn test_missing_message_text_is_empty() {
        let row = DbIdsMaster {
            unid: 7,
            hl7message: None,
            messagedatetime: None,
            persistdatetime: None,
        };
        assert_eq!(FeedRecord::from(row).message_text, "");
    }

    #[test]
    fn test_default_progress_is_before_first_message() {
        assert_eq!(Progress::default().last_processed_unid, -1);
    }
}
