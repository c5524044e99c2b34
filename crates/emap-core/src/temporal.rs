//! 双时态记录
//!
//! 每个有历史的实体都由 [`Temporal`] 包装：
//! - `valid_from` / `valid_until`：事实在现实世界中成立的区间（消息事件时间）
//! - `stored_from` / `stored_until`：该行作为系统当前认知的区间（处理时间）
//!
//! 修改实体前必须先通过 [`Temporal::supersede`] 生成审计行，审计行生成后不再修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 当前有效的双时态记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temporal<T> {
    /// 实体ID
    pub id: i64,
    /// 实体数据
    pub data: T,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub stored_from: DateTime<Utc>,
    pub stored_until: Option<DateTime<Utc>>,
}

/// 不可变的历史审计行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow<T> {
    /// 被审计实体的ID
    pub entity_id: i64,
    pub data: T,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub stored_from: DateTime<Utc>,
    pub stored_until: DateTime<Utc>,
}

impl<T: Clone> Temporal<T> {
    /// 创建新的当前记录
    pub fn new(id: i64, data: T, valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> Self {
        Self {
            id,
            data,
            valid_from,
            valid_until: None,
            stored_from,
            stored_until: None,
        }
    }

    /// 深拷贝
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// 生成表示“截至此刻为真”的审计行
    pub fn supersede(&self, valid_until: DateTime<Utc>, stored_until: DateTime<Utc>) -> AuditRow<T> {
        AuditRow {
            entity_id: self.id,
            data: self.data.clone(),
            valid_from: self.valid_from,
            valid_until,
            stored_from: self.stored_from,
            stored_until,
        }
    }

    /// 是否为当前事实
    pub fn is_current(&self) -> bool {
        self.valid_until.is_none() && self.stored_until.is_none()
    }

    /// 先生成审计行，再以新的时间戳覆盖数据
    ///
    /// 时间戳不会早于当前行的起点，审计行的区间因此不会倒置。
    pub fn replace(&mut self, data: T, valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> AuditRow<T> {
        let valid_from = valid_from.max(self.valid_from);
        let stored_from = stored_from.max(self.stored_from);
        let audit = self.supersede(valid_from, stored_from);
        self.data = data;
        self.valid_from = valid_from;
        self.stored_from = stored_from;
        audit
    }
}
