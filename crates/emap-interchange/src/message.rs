//! 交换消息总线格式

use crate::adt::AdtMessage;
use crate::flowsheet::Flowsheet;
use crate::lab::{LabOrderMsg, LabResultMsg};
use serde::{Deserialize, Serialize};

/// 发布到消息队列的统一消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InterchangeMessage {
    Adt(AdtMessage),
    LabOrder(LabOrderMsg),
    LabResult(LabResultMsg),
    Flowsheet(Flowsheet),
}

impl InterchangeMessage {
    pub fn source_message_id(&self) -> &str {
        match self {
            InterchangeMessage::Adt(m) => &m.source_message_id,
            InterchangeMessage::LabOrder(m) => &m.source_message_id,
            InterchangeMessage::LabResult(m) => &m.source_message_id,
            InterchangeMessage::Flowsheet(m) => &m.source_message_id,
        }
    }

    pub fn set_source_message_id(&mut self, id: String) {
        match self {
            InterchangeMessage::Adt(m) => m.source_message_id = id,
            InterchangeMessage::LabOrder(m) => m.source_message_id = id,
            InterchangeMessage::LabResult(m) => m.source_message_id = id,
            InterchangeMessage::Flowsheet(m) => m.source_message_id = id,
        }
    }

    pub fn source_system(&self) -> &str {
        match self {
            InterchangeMessage::Adt(m) => &m.source_system,
            InterchangeMessage::LabOrder(m) => &m.source_system,
            InterchangeMessage::LabResult(m) => &m.source_system,
            InterchangeMessage::Flowsheet(m) => &m.source_system,
        }
    }

    pub fn mrn(&self) -> Option<&str> {
        match self {
            InterchangeMessage::Adt(m) => m.mrn.as_deref(),
            InterchangeMessage::LabOrder(m) => m.mrn.as_deref(),
            InterchangeMessage::LabResult(m) => m.mrn.as_deref(),
            InterchangeMessage::Flowsheet(m) => m.mrn.as_deref(),
        }
    }

    /// 日志中使用的简短类型名
    pub fn message_type(&self) -> &'static str {
        match self {
            InterchangeMessage::Adt(m) => m.event_name(),
            InterchangeMessage::LabOrder(_) => "LabOrder",
            InterchangeMessage::LabResult(_) => "LabResult",
            InterchangeMessage::Flowsheet(_) => "Flowsheet",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
