use super::SegmentView;
use crate::context::Hl7Context;
use crate::error::Result;
use crate::parser::Hl7Segment;
use chrono::{DateTime, Utc};

/// MSH 消息头
#[derive(Debug, Clone, Copy)]
pub struct Msh<'a>(SegmentView<'a>);

impl<'a> Msh<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("MSH", segment))
    }

    /// MSH-3，同时作为交换消息的来源系统
    pub fn sending_application(&self) -> Result<&'a str> {
        self.0.get(3)
    }

    /// MSH-4
    pub fn sending_facility(&self) -> Result<&'a str> {
        self.0.get(4)
    }

    /// MSH-7
    pub fn message_timestamp(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 7)
    }

    /// MSH-9.1
    pub fn message_type(&self) -> Result<&'a str> {
        self.0.component(9, 1)
    }

    /// MSH-9.2
    pub fn trigger_event(&self) -> Result<&'a str> {
        self.0.component(9, 2)
    }

    /// MSH-10
    pub fn message_control_id(&self) -> Result<&'a str> {
        self.0.get(10)
    }
}
