use super::SegmentView;
use crate::context::Hl7Context;
use crate::error::Result;
use crate::parser::Hl7Segment;
use chrono::{DateTime, Utc};

/// EVN 事件类型
#[derive(Debug, Clone, Copy)]
pub struct Evn<'a>(SegmentView<'a>);

impl<'a> Evn<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("EVN", segment))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// EVN-2
    pub fn recorded_datetime(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 2)
    }

    /// EVN-4
    pub fn event_reason_code(&self) -> Option<String> {
        self.0.opt(4, 1)
    }

    /// EVN-5.1
    pub fn operator_id(&self) -> Option<String> {
        self.0.opt(5, 1)
    }

    /// EVN-6，取消类事件的取消时间
    pub fn event_occurred(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 6)
    }
}

/// MRG 合并信息
#[derive(Debug, Clone, Copy)]
pub struct Mrg<'a>(SegmentView<'a>);

impl<'a> Mrg<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("MRG", segment))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// MRG-1 第一个重复
    pub fn previous_mrn(&self) -> Result<&'a str> {
        self.0.field(1, 0, 1)
    }

    /// MRG-1 第二个重复
    pub fn previous_nhs_number(&self) -> Result<&'a str> {
        self.0.field(1, 1, 1)
    }

    /// MRG-5
    pub fn previous_visit_number(&self) -> Result<&'a str> {
        self.0.get(5)
    }
}
