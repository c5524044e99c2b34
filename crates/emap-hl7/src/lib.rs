//! # EMAP HL7
//!
//! HL7 v2 消息解析与交换消息构建：管道格式解析、段包装、
//! 本地时间解释、ADT/检验/床旁观察构建器以及触发事件分发器。

pub mod builders;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod local_time;
pub mod parser;
pub mod segments;

pub use builders::{AdtMessageBuilder, FlowsheetBuilder, LabMessageBuilder, LabSource};
pub use context::{Hl7Context, Hl7Settings};
pub use dispatcher::{DispatchOutcome, Dispatched, Hl7Dispatcher};
pub use error::{Hl7Error, Result};
pub use parser::{Hl7Message, Hl7Parser, Hl7Segment};
