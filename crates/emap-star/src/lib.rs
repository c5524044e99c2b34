//! # EMAP对账层
//!
//! 把交换消息合并进双时态患者库：
//! - 患者标识、合并与人口统计
//! - 就诊、位置停留与计划移动
//! - 检验申请/结果与床旁观察
//!
//! 所有修改都经过 [`row_state::RowState`]，变化的行先写审计再覆盖。

pub mod flowsheet;
pub mod lab;
pub mod location;
pub mod pending;
pub mod person;
pub mod processor;
pub mod row_state;
pub mod store;
pub mod visit;

pub use processor::{InterchangeProcessor, ProcessOutcome};
pub use row_state::RowState;
pub use store::{StarStore, Table, Timestamps};
