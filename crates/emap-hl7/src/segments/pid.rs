use super::SegmentView;
use crate::context::Hl7Context;
use crate::error::Result;
use crate::local_time;
use crate::parser::Hl7Segment;
use chrono::{NaiveDate, TimeZone, Utc};
use emap_interchange::value::HL7_DELETE;
use emap_interchange::InterchangeValue;

/// PID 患者标识
#[derive(Debug, Clone, Copy)]
pub struct Pid<'a>(SegmentView<'a>);

impl<'a> Pid<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("PID", segment))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// PID-3 第一个重复
    pub fn mrn(&self) -> Result<&'a str> {
        self.0.field(3, 0, 1)
    }

    /// PID-3 第二个重复
    pub fn nhs_number(&self) -> Result<&'a str> {
        self.0.field(3, 1, 1)
    }

    pub fn family_name(&self) -> InterchangeValue<String> {
        // XPN-1 可能带子组件
        self.0.value(5, 1).map(|v| v.split('&').next().unwrap_or_default().to_string())
    }

    pub fn given_name(&self) -> InterchangeValue<String> {
        self.0.value(5, 2)
    }

    pub fn middle_name(&self) -> InterchangeValue<String> {
        self.0.value(5, 3)
    }

    /// XPN-5 前缀
    pub fn title(&self) -> InterchangeValue<String> {
        self.0.value(5, 5)
    }

    /// 称谓 名 中间名 姓
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<String> = [self.title(), self.given_name(), self.middle_name(), self.family_name()]
            .into_iter()
            .filter_map(|v| v.get().cloned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// PID-7：8位纯日期按UTC零点解释，其余按医院时区
    pub fn birth_datetime(&self, ctx: &Hl7Context) -> Result<InterchangeValue<chrono::DateTime<Utc>>> {
        let raw = self.0.raw(7, 0, 1);
        if !self.exists() {
            return Ok(InterchangeValue::Unknown);
        }
        if raw == HL7_DELETE {
            return Ok(InterchangeValue::Delete);
        }
        if local_time::is_date_only(raw) {
            let date = local_time::parse_date(raw)?;
            return Ok(InterchangeValue::from_option(date.and_then(|d| {
                d.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
            })));
        }
        self.0.time_value(ctx, 7)
    }

    pub fn birth_date(&self) -> Result<InterchangeValue<NaiveDate>> {
        let raw = self.0.raw(7, 0, 1);
        if !self.exists() {
            return Ok(InterchangeValue::Unknown);
        }
        if raw == HL7_DELETE {
            return Ok(InterchangeValue::Delete);
        }
        Ok(InterchangeValue::from_option(local_time::parse_date(raw)?))
    }

    /// PID-8
    pub fn sex(&self) -> InterchangeValue<String> {
        self.0.value(8, 1)
    }

    /// PID-11 第一个地址的邮编
    pub fn postcode(&self) -> InterchangeValue<String> {
        self.0.value(11, 5)
    }

    /// PID-17
    pub fn religion(&self) -> InterchangeValue<String> {
        self.0.value(17, 1)
    }

    /// PID-22
    pub fn ethnic_group(&self) -> InterchangeValue<String> {
        self.0.value(22, 1)
    }

    /// PID-29
    pub fn death_datetime(&self, ctx: &Hl7Context) -> Result<InterchangeValue<chrono::DateTime<Utc>>> {
        self.0.time_value(ctx, 29)
    }

    /// PID-30：`Y` 为已故，`N` 或空为在世，其他值未知
    pub fn is_alive(&self) -> InterchangeValue<bool> {
        if !self.exists() {
            return InterchangeValue::Unknown;
        }
        match self.0.raw(30, 0, 1) {
            "Y" => InterchangeValue::Save(false),
            "N" | "" => InterchangeValue::Save(true),
            _ => InterchangeValue::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Hl7Parser;

    #[test]
    fn test_demographics() {
        let msg = Hl7Parser::new()
            .parse("MSH|^~\\&|EPIC||||||ADT^A08|1|P|2.4\rPID|1||123~9999999999||SMITH&X^JOHN^PAUL^^MR||19870612|M|||1 ROAD^^LONDON^^NW1 2BU|||||||||||||||||||Y")
            .unwrap();
        let pid = Pid::new(msg.segment("PID"));
        let ctx = Hl7Context::default();

        assert_eq!(pid.mrn().unwrap(), "123");
        assert_eq!(pid.nhs_number().unwrap(), "9999999999");
        assert_eq!(pid.family_name(), InterchangeValue::Save("SMITH".to_string()));
        assert_eq!(pid.full_name().as_deref(), Some("MR JOHN PAUL SMITH"));
        assert_eq!(pid.postcode(), InterchangeValue::Save("NW1 2BU".to_string()));
        assert_eq!(pid.is_alive(), InterchangeValue::Save(false));

        let birth = pid.birth_datetime(&ctx).unwrap();
        assert_eq!(birth.get().map(|d| d.to_rfc3339()), Some("1987-06-12T00:00:00+00:00".to_string()));
    }

    #[test]
    fn test_missing_death_indicator_means_alive() {
        let msg = Hl7Parser::new().parse("MSH|^~\\&|EPIC||||||ADT^A08|1|P|2.4\rPID|1||123").unwrap();
        let pid = Pid::new(msg.segment("PID"));
        assert_eq!(pid.is_alive(), InterchangeValue::Save(true));
        assert!(pid.nhs_number().is_err());
        assert!(Pid::new(None).is_alive().is_unknown());
    }
}
