//! 交换消息构建器

mod adt;
mod flowsheet;
mod lab;

pub use adt::AdtMessageBuilder;
pub use flowsheet::FlowsheetBuilder;
pub use lab::{LabMessageBuilder, LabSource, OrderWithResults};
