//! # EMAP交换消息
//!
//! HL7解析层与对账层之间传递的规范化消息：
//! - 三态字段包装 [`InterchangeValue`]（未知 / 明确删除 / 有值）
//! - ADT消息（入院、转科、出院、取消、合并等）
//! - 检验申请与检验结果
//! - 床旁观察记录（flowsheet）

pub mod adt;
pub mod flowsheet;
pub mod lab;
pub mod message;
pub mod value;

pub use adt::{
    AdtEvent, AdtMessage, Doctor, OtherPatient, PatientClass, PendingType, PreviousIdentifiers,
};
pub use flowsheet::{Flowsheet, FlowsheetValueType};
pub use lab::{LabIsolateMsg, LabOrderMsg, LabResultMsg, LabValueType};
pub use message::InterchangeMessage;
pub use value::InterchangeValue;
