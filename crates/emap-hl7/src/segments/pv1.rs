use super::SegmentView;
use crate::context::Hl7Context;
use crate::error::{Hl7Error, Result};
use crate::parser::Hl7Segment;
use chrono::{DateTime, Utc};
use emap_interchange::{Doctor, InterchangeValue, PatientClass};

/// PV1 就诊信息
#[derive(Debug, Clone, Copy)]
pub struct Pv1<'a>(SegmentView<'a>);

impl<'a> Pv1<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("PV1", segment))
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// PV1-2，无法识别的代码是数据类型错误
    pub fn patient_class_value(&self) -> Result<InterchangeValue<PatientClass>> {
        match self.0.value(2, 1) {
            InterchangeValue::Save(code) => PatientClass::from_hl7(&code)
                .map(InterchangeValue::Save)
                .ok_or_else(|| Hl7Error::DataType(format!("Patient class was not recognised: {}", code))),
            InterchangeValue::Delete => Ok(InterchangeValue::Delete),
            InterchangeValue::Unknown => Ok(InterchangeValue::Unknown),
        }
    }

    /// PV1-3
    pub fn full_location_string(&self) -> InterchangeValue<String> {
        self.0.location_value(3)
    }

    /// PV1-3.3
    pub fn current_bed(&self) -> InterchangeValue<String> {
        self.0.value(3, 3)
    }

    /// PV1-6
    pub fn previous_location(&self) -> Option<String> {
        self.0.location(6)
    }

    /// PV1-7
    pub fn attending_doctors(&self) -> Vec<Doctor> {
        self.0.doctors(7)
    }

    /// PV1-8
    pub fn referring_doctors(&self) -> Vec<Doctor> {
        self.0.doctors(8)
    }

    /// PV1-10
    pub fn hospital_service(&self) -> Option<String> {
        self.0.opt(10, 1)
    }

    /// PV1-14
    pub fn admit_source(&self) -> Option<String> {
        self.0.opt(14, 1)
    }

    /// PV1-18
    pub fn patient_type(&self) -> Option<String> {
        self.0.opt(18, 1)
    }

    /// PV1-19
    pub fn visit_number(&self) -> Result<&'a str> {
        self.0.get(19)
    }

    /// PV1-36
    pub fn discharge_disposition(&self) -> Option<String> {
        self.0.opt(36, 1)
    }

    /// PV1-37
    pub fn discharge_location(&self) -> Option<String> {
        self.0.opt(37, 1)
    }

    /// PV1-42
    pub fn pending_location(&self) -> InterchangeValue<String> {
        self.0.location_value(42)
    }

    /// PV1-44
    pub fn admission_datetime(&self, ctx: &Hl7Context) -> Result<InterchangeValue<DateTime<Utc>>> {
        self.0.time_value(ctx, 44)
    }

    /// PV1-45
    pub fn discharge_datetime(&self, ctx: &Hl7Context) -> Result<Option<DateTime<Utc>>> {
        self.0.time(ctx, 45)
    }
}

/// PV2 附加就诊信息
#[derive(Debug, Clone, Copy)]
pub struct Pv2<'a>(SegmentView<'a>);

impl<'a> Pv2<'a> {
    pub fn new(segment: Option<&'a Hl7Segment>) -> Self {
        Self(SegmentView::new("PV2", segment))
    }

    /// PV2-38
    pub fn mode_of_arrival(&self) -> InterchangeValue<String> {
        self.0.value(38, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Hl7Parser;

    #[test]
    fn test_unknown_patient_class_is_data_type_error() {
        let msg = Hl7Parser::new().parse("MSH|^~\\&|EPIC||||||ADT^A01|1|P|2.4\rPV1|1|Z").unwrap();
        let pv1 = Pv1::new(msg.segment("PV1"));
        assert!(matches!(pv1.patient_class_value(), Err(Hl7Error::DataType(_))));
    }

    #[test]
    fn test_admission_time_and_location() {
        let mut fields = vec![""; 46];
        fields[0] = "PV1";
        fields[2] = "I";
        fields[3] = "H2HH^H203^H203-11";
        fields[19] = "123412341234";
        fields[44] = "201209211740";
        let text = format!("MSH|^~\\&|EPIC||||||ADT^A01|1|P|2.4\r{}", fields.join("|"));

        let msg = Hl7Parser::new().parse(&text).unwrap();
        let pv1 = Pv1::new(msg.segment("PV1"));
        let ctx = Hl7Context::default().with_timezone(chrono_tz::Tz::UTC);

        assert_eq!(pv1.current_bed(), InterchangeValue::Save("H203-11".to_string()));
        assert_eq!(pv1.visit_number().unwrap(), "123412341234");
        assert_eq!(pv1.patient_class_value().unwrap(), InterchangeValue::Save(PatientClass::Inpatient));
        assert_eq!(
            pv1.admission_datetime(&ctx).unwrap().get().map(|d| d.to_rfc3339()),
            Some("2012-09-21T17:40:00+00:00".to_string())
        );
        assert!(pv1.discharge_datetime(&ctx).unwrap().is_none());
        assert!(pv1.pending_location().is_unknown());
    }
}
