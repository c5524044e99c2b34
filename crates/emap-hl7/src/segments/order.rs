use super::SegmentView;
use crate::context::Hl7Context;
use crate::error::Result;
use crate::parser::{Hl7Message, Hl7Segment};
use chrono::{DateTime, Utc};
use emap_interchange::InterchangeValue;

/// ORC 通用申请
#[derive(Debug, Clone, Copy)]
pub struct Orc<'a>(SegmentView<'a>);

impl<'a> Orc<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("ORC", segment))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// ORC-1
    pub fn order_control(&self) -> Result<&'a str> {
        self.0.get(1)
    }

    /// ORC-2
    pub fn placer_order_number(&self) -> Option<&'a str> {
        self.0.get(2).ok()
    }

    /// ORC-3
    pub fn filler_order_number(&self) -> Option<&'a str> {
        self.0.get(3).ok()
    }

    /// ORC-5
    pub fn order_status(&self) -> Option<String> {
        self.0.opt(5, 1)
    }

    /// ORC-9
    pub fn transaction_datetime(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 9)
    }
}

/// OBR 检验申请详情
#[derive(Debug, Clone, Copy)]
pub struct Obr<'a>(SegmentView<'a>);

impl<'a> Obr<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("OBR", segment))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// OBR-2
    pub fn placer_order_number(&self) -> Option<&'a str> {
        self.0.get(2).ok()
    }

    /// OBR-3
    pub fn filler_order_number(&self) -> Option<&'a str> {
        self.0.get(3).ok()
    }

    /// OBR-4.1
    pub fn test_battery_code(&self) -> Result<&'a str> {
        self.0.component(4, 1)
    }

    /// OBR-4.3
    pub fn test_battery_coding_system(&self) -> Option<String> {
        self.0.opt(4, 3)
    }

    /// OBR-6
    pub fn requested_datetime(&self, ctx: &Hl7Context) -> Result<InterchangeValue<DateTime<Utc>>> {
        self.0.time_value(ctx, 6)
    }

    /// OBR-7
    pub fn collection_datetime(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 7)
    }

    /// OBR-13
    pub fn relevant_clinical_info(&self) -> InterchangeValue<String> {
        self.0.value(13, 1)
    }

    /// OBR-14
    pub fn specimen_received_datetime(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 14)
    }

    /// OBR-15.1
    pub fn specimen_type(&self) -> InterchangeValue<String> {
        self.0.value(15, 1)
    }

    /// OBR-15.3
    pub fn collection_method(&self) -> InterchangeValue<String> {
        self.0.value(15, 3)
    }

    /// OBR-22
    pub fn status_change_datetime(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 22)
    }

    /// OBR-24
    pub fn diagnostic_service(&self) -> Option<String> {
        self.0.opt(24, 1)
    }

    /// OBR-25
    pub fn result_status(&self) -> Option<String> {
        self.0.opt(25, 1)
    }

    /// OBR-26.1 父观察ID（取第一个子组件）
    pub fn parent_observation_identifier(&self) -> Option<String> {
        self.0
            .opt(26, 1)
            .and_then(|v| v.split('&').next().map(str::to_string))
            .filter(|v| !v.is_empty())
    }

    /// OBR-26.2
    pub fn parent_sub_id(&self) -> Option<String> {
        self.0.opt(26, 2)
    }

    /// OBR-31
    pub fn reason_for_study(&self) -> InterchangeValue<String> {
        self.0.value(31, 1)
    }
}

/// OBX 观察结果
#[derive(Debug, Clone, Copy)]
pub struct Obx<'a>(SegmentView<'a>);

impl<'a> Obx<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("OBX", segment))
    }

    /// OBX-2
    pub fn value_type(&self) -> Option<&'a str> {
        self.0.get(2).ok()
    }

    /// OBX-3.1
    pub fn identifier(&self) -> Result<&'a str> {
        self.0.component(3, 1)
    }

    /// OBX-3.3
    pub fn coding_system(&self) -> Option<String> {
        self.0.opt(3, 3)
    }

    /// OBX-4
    pub fn sub_id(&self) -> String {
        self.0.raw(4, 0, 1).to_string()
    }

    /// OBX-5 第一个组件原文
    pub fn value(&self) -> &'a str {
        self.0.raw(5, 0, 1)
    }

    /// OBX-5 编码值的第n个组件
    pub fn coded_value(&self, component: usize) -> Option<String> {
        self.0.opt(5, component)
    }

    /// OBX-5 所有重复按行拼接
    pub fn text_value(&self) -> String {
        (0..self.0.repetitions(5).max(1))
            .map(|rep| self.0.raw(5, rep, 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// OBX-6
    pub fn units(&self) -> InterchangeValue<String> {
        self.0.value(6, 1)
    }

    /// OBX-7
    pub fn reference_range(&self) -> &'a str {
        self.0.raw(7, 0, 1)
    }

    /// OBX-8
    pub fn abnormal_flags(&self) -> InterchangeValue<String> {
        self.0.value(8, 1)
    }

    /// OBX-11
    pub fn result_status(&self) -> Option<String> {
        self.0.opt(11, 1)
    }

    /// OBX-14
    pub fn observation_datetime(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 14)
    }
}

/// NTE 注释
#[derive(Debug, Clone, Copy)]
pub struct Nte<'a>(SegmentView<'a>);

impl<'a> Nte<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("NTE", segment))
    }

    /// NTE-3，多个重复按行拼接
    pub fn comment(&self) -> String {
        (0..self.0.repetitions(3))
            .map(|rep| self.0.raw(3, rep, 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 一个OBX及其后紧随的NTE
#[derive(Debug, Clone)]
pub struct ObservationGroup<'a> {
    pub obx: Obx<'a>,
    pub notes: Vec<Nte<'a>>,
}

impl ObservationGroup<'_> {
    /// 所有注释拼成一段文本，没有注释为未知
    pub fn notes_text(&self) -> InterchangeValue<String> {
        let text = self
            .notes
            .iter()
            .map(Nte::comment)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        InterchangeValue::build_from_hl7(&text)
    }
}

/// 一组申请：ORC（可能与前一组共享）、OBR、OBR后的NTE、以及结果
#[derive(Debug, Clone)]
pub struct OrderGroup<'a> {
    pub orc: Orc<'a>,
    pub obr: Obr<'a>,
    pub notes: Vec<Nte<'a>>,
    pub observations: Vec<ObservationGroup<'a>>,
}

/// 把扁平的段序列还原为申请分组
pub fn order_groups(message: &Hl7Message) -> Vec<OrderGroup<'_>> {
    let mut groups: Vec<OrderGroup<'_>> = Vec::new();
    let mut last_orc: Option<&Hl7Segment> = None;

    for segment in &message.segments {
        match segment.segment_type.as_str() {
            "ORC" => {
                last_orc = Some(segment);
                groups.push(OrderGroup {
                    orc: Orc::new(Some(segment)),
                    obr: Obr::new(None),
                    notes: Vec::new(),
                    observations: Vec::new(),
                });
            }
            "OBR" => match groups.last_mut() {
                // ORC之后第一个OBR归入该组
                Some(group) if !group.obr.exists() && group.observations.is_empty() => {
                    group.obr = Obr::new(Some(segment));
                }
                _ => groups.push(OrderGroup {
                    orc: Orc::new(last_orc),
                    obr: Obr::new(Some(segment)),
                    notes: Vec::new(),
                    observations: Vec::new(),
                }),
            },
            "OBX" => {
                // 没有OBR的观察（例如部分床旁数据）单独成组
                if groups.is_empty() {
                    groups.push(OrderGroup {
                        orc: Orc::new(last_orc),
                        obr: Obr::new(None),
                        notes: Vec::new(),
                        observations: Vec::new(),
                    });
                }
                if let Some(group) = groups.last_mut() {
                    group.observations.push(ObservationGroup {
                        obx: Obx::new(Some(segment)),
                        notes: Vec::new(),
                    });
                }
            }
            "NTE" => {
                if let Some(group) = groups.last_mut() {
                    let note = Nte::new(Some(segment));
                    match group.observations.last_mut() {
                        Some(observation) => observation.notes.push(note),
                        None => group.notes.push(note),
                    }
                }
            }
            _ => {}
        }
    }

    groups
}
