//! 段包装层
//!
//! 每个包装器都持有 `Option<&Hl7Segment>`：段不存在是正常状态
//! （例如只有人口统计信息的消息没有PV1）。取值方法在段或字段缺失时
//! 返回 `FieldNotPresent`，调用方可用 [`crate::error::Tolerate`] 容忍，
//! 也可继续传播。

mod event;
mod msh;
mod order;
mod pid;
mod pv1;

pub use event::{Evn, Mrg};
pub use msh::Msh;
pub use order::{order_groups, Nte, Obr, ObservationGroup, Obx, Orc, OrderGroup};
pub use pid::Pid;
pub use pv1::{Pv1, Pv2};

use crate::context::Hl7Context;
use crate::error::{Hl7Error, Result};
use crate::parser::{Hl7Message, Hl7Segment};
use chrono::{DateTime, Utc};
use emap_interchange::value::HL7_DELETE;
use emap_interchange::{Doctor, InterchangeValue};

/// 对可能缺失的段的只读视图
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    name: &'static str,
    segment: Option<&'a Hl7Segment>,
}

impl<'a> SegmentView<'a> {
    pub fn new(name: &'static str, segment: Option<&'a Hl7Segment>) -> Self {
        Self { name, segment }
    }

    pub fn exists(&self) -> bool {
        self.segment.is_some()
    }

    pub fn field(&self, field: usize, repetition: usize, component: usize) -> Result<&'a str> {
        self.segment
            .and_then(|s| s.value(field, repetition, component))
            .ok_or_else(|| {
                Hl7Error::FieldNotPresent(if repetition == 0 {
                    format!("{}-{}.{}", self.name, field, component)
                } else {
                    format!("{}-{}({}).{}", self.name, field, repetition, component)
                })
            })
    }

    pub fn component(&self, field: usize, component: usize) -> Result<&'a str> {
        self.field(field, 0, component)
    }

    pub fn get(&self, field: usize) -> Result<&'a str> {
        self.field(field, 0, 1)
    }

    /// 原始文本，缺失时为空串
    pub fn raw(&self, field: usize, repetition: usize, component: usize) -> &'a str {
        self.segment
            .and_then(|s| s.value(field, repetition, component))
            .unwrap_or("")
    }

    pub fn opt(&self, field: usize, component: usize) -> Option<String> {
        self.segment
            .and_then(|s| s.value(field, 0, component))
            .filter(|v| *v != HL7_DELETE)
            .map(str::to_string)
    }

    pub fn repetitions(&self, field: usize) -> usize {
        self.segment.map(|s| s.repetitions(field)).unwrap_or(0)
    }

    /// 段不存在时为未知
    pub fn value(&self, field: usize, component: usize) -> InterchangeValue<String> {
        if !self.exists() {
            return InterchangeValue::Unknown;
        }
        InterchangeValue::build_from_hl7(self.raw(field, 0, component))
    }

    /// 时间字段：缺失为 `None`，无法解析为 `DataType`
    pub fn time(&self, ctx: &Hl7Context, field: usize) -> Result<Option<DateTime<Utc>>> {
        ctx.interpret_local_time(self.raw(field, 0, 1))
    }

    /// 时间字段的三态形式，`""` 表示删除
    pub fn time_value(&self, ctx: &Hl7Context, field: usize) -> Result<InterchangeValue<DateTime<Utc>>> {
        let raw = self.raw(field, 0, 1);
        if !self.exists() {
            return Ok(InterchangeValue::Unknown);
        }
        if raw == HL7_DELETE {
            return Ok(InterchangeValue::Delete);
        }
        Ok(InterchangeValue::from_option(ctx.interpret_local_time(raw)?))
    }

    /// `ward^room^bed` 位置串；三个组件都缺失时为 `None`
    pub fn location(&self, field: usize) -> Option<String> {
        let part = |component| self.segment.and_then(|s| s.value(field, 0, component));
        let (ward, room, bed) = (part(1), part(2), part(3));
        if ward.is_none() && room.is_none() && bed.is_none() {
            return None;
        }
        Some(format!(
            "{}^{}^{}",
            ward.unwrap_or("null"),
            room.unwrap_or("null"),
            bed.unwrap_or("null")
        ))
    }

    pub fn location_value(&self, field: usize) -> InterchangeValue<String> {
        if !self.exists() {
            return InterchangeValue::Unknown;
        }
        if self.raw(field, 0, 1) == HL7_DELETE {
            return InterchangeValue::Delete;
        }
        InterchangeValue::from_option(self.location(field))
    }

    /// 重复的XCN字段，按消息顺序返回；没有重复时为空
    pub fn doctors(&self, field: usize) -> Vec<Doctor> {
        (0..self.repetitions(field))
            .map(|rep| {
                let part = |component| {
                    self.segment
                        .and_then(|s| s.value(field, rep, component))
                        .map(str::to_string)
                };
                Doctor {
                    consultant_code: part(1),
                    surname: part(2),
                    firstname: part(3),
                    middlename: part(4),
                    title: part(6),
                }
            })
            .collect()
    }
}

/// 一条消息里构建器需要的全部患者级段
#[derive(Debug, Clone, Copy)]
pub struct SegmentSet<'a> {
    pub msh: Msh<'a>,
    pub evn: Evn<'a>,
    pub pid: Pid<'a>,
    pub pd1: SegmentView<'a>,
    pub pv1: Pv1<'a>,
    pub pv2: Pv2<'a>,
    pub mrg: Mrg<'a>,
}

impl<'a> SegmentSet<'a> {
    /// 按触发事件选择段：合并类消息的MRG/PV1位于特定分组内
    pub fn from_message(message: &'a Hl7Message) -> Self {
        let (mrg, pv1) = match message.trigger_event.as_str() {
            // 第一个患者分组内的MRG与PV1
            "A39" | "A40" => {
                let group = patient_group(message, 0);
                (find_in(group, "MRG"), find_in(group, "PV1"))
            }
            // MERGE_INFO分组：MRG及其后的PV1
            "A45" => {
                let group = after(message, "MRG");
                (group.first().filter(|s| s.segment_type == "MRG"), find_in(group, "PV1"))
            }
            _ => (message.segment("MRG"), message.segment("PV1")),
        };

        Self {
            msh: Msh::new(message.segment("MSH")),
            evn: Evn::new(message.segment("EVN")),
            pid: Pid::new(message.segment("PID")),
            pd1: SegmentView::new("PD1", message.segment("PD1")),
            pv1: Pv1::new(pv1),
            pv2: Pv2::new(message.segment("PV2")),
            mrg: Mrg::new(mrg),
        }
    }

    /// A17中描述另一位患者的第二组PID/PV1
    pub fn other_patient(message: &'a Hl7Message) -> (Pid<'a>, Pv1<'a>) {
        (
            Pid::new(message.nth_segment("PID", 1)),
            Pv1::new(message.nth_segment("PV1", 1)),
        )
    }
}

/// 第n个PID开始、到下一个PID之前的段
fn patient_group(message: &Hl7Message, n: usize) -> &[Hl7Segment] {
    let starts: Vec<usize> = message
        .segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.segment_type == "PID")
        .map(|(i, _)| i)
        .collect();
    match starts.get(n) {
        Some(&start) => {
            let end = starts.get(n + 1).copied().unwrap_or(message.segments.len());
            &message.segments[start..end]
        }
        None => &[],
    }
}

fn after<'a>(message: &'a Hl7Message, name: &str) -> &'a [Hl7Segment] {
    match message.segments.iter().position(|s| s.segment_type == name) {
        Some(start) => &message.segments[start..],
        None => &[],
    }
}

fn find_in<'a>(segments: &'a [Hl7Segment], name: &str) -> Option<&'a Hl7Segment> {
    segments.iter().find(|s| s.segment_type == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Hl7Parser;

    fn parse(text: &str) -> Hl7Message {
        Hl7Parser::new().parse(text).unwrap()
    }

    #[test]
    fn test_absent_pv1_gives_no_information() {
        let msg = parse("MSH|^~\\&|EPIC||||||ADT^A08|1|P|2.4\rPID|1||123");
        let segments = SegmentSet::from_message(&msg);

        assert!(!segments.pv1.exists());
        assert!(segments.pv1.full_location_string().is_unknown());
        assert!(segments.pv1.patient_class_value().unwrap().is_unknown());
        assert!(matches!(segments.pv1.visit_number(), Err(Hl7Error::FieldNotPresent(_))));
        assert!(segments.pv1.attending_doctors().is_empty());
    }

    #[test]
    fn test_present_segment_empty_field_differs_from_absent() {
        let msg = parse("MSH|^~\\&|EPIC||||||ADT^A08|1|P|2.4\rPV1|1|I|\"\"");
        let view = SegmentView::new("PV1", msg.segment("PV1"));
        assert!(view.location_value(3).is_delete());
        assert_eq!(view.location_value(42), InterchangeValue::Unknown);
        assert_eq!(view.value(10, 1), InterchangeValue::Unknown);

        let absent = SegmentView::new("PV1", None);
        assert_eq!(absent.location_value(3), InterchangeValue::Unknown);
    }

    #[test]
    fn test_partial_location_keeps_null_placeholders() {
        let msg = parse("MSH|^~\\&|EPIC||||||ADT^A02|1|P|2.4\rPV1|1|I|ED^^");
        let view = SegmentView::new("PV1", msg.segment("PV1"));
        assert_eq!(view.location(3).as_deref(), Some("ED^null^null"));
    }

    #[test]
    fn test_doctors_keep_message_order() {
        let msg = parse(
            "MSH|^~\\&|EPIC||||||ADT^A01|1|P|2.4\rPV1|1|I|||||C1^SMITH^JOHN^A^^DR~C2^JONES^ANN",
        );
        let doctors = SegmentView::new("PV1", msg.segment("PV1")).doctors(7);
        assert_eq!(doctors.len(), 2);
        assert_eq!(doctors[0].consultant_code.as_deref(), Some("C1"));
        assert_eq!(doctors[0].title.as_deref(), Some("DR"));
        assert_eq!(doctors[1].surname.as_deref(), Some("JONES"));
        assert_eq!(doctors[1].middlename, None);
    }

    #[test]
    fn test_merge_segments_switch_on_trigger() {
        let a40 = parse(
            "MSH|^~\\&|EPIC||||||ADT^A40|1|P|2.4\rEVN|A40|20130101\rPID|1||NEW1\rMRG|OLD1~OLDNHS\rPV1|1|I",
        );
        let set = SegmentSet::from_message(&a40);
        assert_eq!(set.mrg.previous_mrn().unwrap(), "OLD1");
        assert_eq!(set.mrg.previous_nhs_number().unwrap(), "OLDNHS");

        let a45 = parse(
            "MSH|^~\\&|EPIC||||||ADT^A45|1|P|2.4\rEVN|A45|20130101\rPID|1||NEW1\rPD1|\rMRG|OLD1||||V0001\rPV1|1|I|||||||||||||||||V0002",
        );
        let set = SegmentSet::from_message(&a45);
        assert_eq!(set.mrg.previous_visit_number().unwrap(), "V0001");
        assert_eq!(set.pv1.visit_number().unwrap(), "V0002");
    }

    #[test]
    fn test_second_patient_for_swap() {
        let a17 = parse(
            "MSH|^~\\&|EPIC||||||ADT^A17|1|P|2.4\rPID|1||MRN1\rPV1|1|I|W1^R1^B1\rPID|1||MRN2\rPV1|1|I|W2^R2^B2",
        );
        let (pid, pv1) = SegmentSet::other_patient(&a17);
        assert_eq!(pid.mrn().unwrap(), "MRN2");
        assert_eq!(pv1.full_location_string().get().map(String::as_str), Some("W2^R2^B2"));
    }
}
