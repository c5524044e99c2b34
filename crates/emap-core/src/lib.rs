//! # EMAP Core
//!
//! EMAP系统的核心模块，提供基础数据结构、双时态记录、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod temporal;
pub mod utils;

pub use error::{EmapError, Result};
pub use models::*;
pub use temporal::{AuditRow, Temporal};
