//! # EMAP数据源数据库模块
//!
//! 访问上游HL7消息表（`tbl_ids_master`）与单行进度书签（`etl_ids_progress`），
//! 提供PostgreSQL连接池与读取、推进书签等操作。

pub mod connection;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use models::*;
pub use queries::FeedQueries;
