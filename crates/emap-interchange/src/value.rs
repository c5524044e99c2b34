//! 三态字段
//!
//! 源系统并不总是发送每个字段。未发送（Unknown）不得覆盖已有数据，
//! 明确置空（Delete，HL7中的 `""`）必须清除已有数据。

use serde::{Deserialize, Serialize};

/// HL7中表示“明确删除”的字段值
pub const HL7_DELETE: &str = "\"\"";

/// 三态字段值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterchangeValue<T> {
    /// 消息中没有该信息，不修改已有值
    Unknown,
    /// 明确删除已有值
    Delete,
    /// 保存新值
    Save(T),
}

impl<T> Default for InterchangeValue<T> {
    fn default() -> Self {
        InterchangeValue::Unknown
    }
}

impl<T> InterchangeValue<T> {
    pub fn unknown() -> Self {
        InterchangeValue::Unknown
    }

    pub fn delete() -> Self {
        InterchangeValue::Delete
    }

    pub fn save(value: T) -> Self {
        InterchangeValue::Save(value)
    }

    /// `None` 视为未知
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => InterchangeValue::Save(v),
            None => InterchangeValue::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, InterchangeValue::Unknown)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, InterchangeValue::Delete)
    }

    pub fn is_save(&self) -> bool {
        matches!(self, InterchangeValue::Save(_))
    }

    /// 仅在有值时返回
    pub fn get(&self) -> Option<&T> {
        match self {
            InterchangeValue::Save(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> InterchangeValue<U> {
        match self {
            InterchangeValue::Unknown => InterchangeValue::Unknown,
            InterchangeValue::Delete => InterchangeValue::Delete,
            InterchangeValue::Save(v) => InterchangeValue::Save(f(v)),
        }
    }

    /// 未知时不调用；删除时以 `None` 调用；有值时以 `Some` 调用
    pub fn assign_to<F: FnOnce(Option<T>)>(self, setter: F) {
        match self {
            InterchangeValue::Unknown => {}
            InterchangeValue::Delete => setter(None),
            InterchangeValue::Save(v) => setter(Some(v)),
        }
    }
}

impl InterchangeValue<String> {
    /// 从HL7原始字段构建：空串为未知，`""` 为删除，其余为有值
    pub fn build_from_hl7(raw: &str) -> Self {
        let value = raw.trim();
        if value.is_empty() {
            InterchangeValue::Unknown
        } else if value == HL7_DELETE {
            InterchangeValue::Delete
        } else {
            InterchangeValue::Save(value.to_string())
        }
    }
}
