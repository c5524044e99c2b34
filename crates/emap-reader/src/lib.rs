//! # EMAP源消息读取器
//!
//! 按序号严格递增地读取上游HL7消息，分发为交换消息并发布，
//! 发布确认后推进书签。

pub mod progress;
pub mod reader;
pub mod source;

pub use progress::{MemoryProgressStore, PgProgressStore, ProgressStore};
pub use reader::{Hl7Reader, ReadStep, ReaderSettings};
pub use source::{FeedSource, MemoryFeedSource, PgFeedSource};
