//! 床旁观察（Vitals）构建，每个OBX一条记录

use crate::context::Hl7Context;
use crate::error::{Hl7Error, Result, Tolerate};
use crate::local_time;
use crate::parser::Hl7Message;
use crate::segments::{order_groups, ObservationGroup, SegmentSet};
use chrono::{DateTime, Utc};
use emap_interchange::{Flowsheet, FlowsheetValueType, InterchangeValue};
use tracing::error;

pub struct FlowsheetBuilder<'a> {
    ctx: &'a Hl7Context,
}

impl<'a> FlowsheetBuilder<'a> {
    pub fn new(ctx: &'a Hl7Context) -> Self {
        Self { ctx }
    }

    pub fn build(&self, message: &Hl7Message, source_id: &str) -> Result<Vec<Flowsheet>> {
        let segments = SegmentSet::from_message(message);
        let header = Flowsheet {
            source_message_id: source_id.to_string(),
            source_system: segments.msh.sending_facility()?.to_string(),
            source_application: segments.msh.sending_application()?.to_string(),
            mrn: segments.pid.mrn().tolerate()?.map(str::to_string),
            visit_number: segments.pv1.visit_number().tolerate()?.map(str::to_string),
            flowsheet_id: String::new(),
            value_type: FlowsheetValueType::Text,
            numeric_value: InterchangeValue::Unknown,
            string_value: InterchangeValue::Unknown,
            date_value: InterchangeValue::Unknown,
            unit: InterchangeValue::Unknown,
            comment: InterchangeValue::Unknown,
            observation_time: DateTime::<Utc>::default(),
            updated_time: segments.evn.recorded_datetime(self.ctx)?,
        };

        let mut flowsheets = Vec::new();
        for group in order_groups(message) {
            for observation in &group.observations {
                match self.build_observation(observation, &header) {
                    Ok(flowsheet) => flowsheets.push(flowsheet),
                    Err(e) => error!("Skipping flowsheet value in message {}: {}", source_id, e),
                }
            }
        }
        Ok(flowsheets)
    }

    fn build_observation(&self, observation: &ObservationGroup<'_>, header: &Flowsheet) -> Result<Flowsheet> {
        let obx = &observation.obx;
        let mut flowsheet = header.clone();
        flowsheet.flowsheet_id = obx.identifier()?.to_string();
        flowsheet.unit = obx.units();
        flowsheet.comment = observation.notes_text();
        flowsheet.observation_time = obx
            .observation_datetime(self.ctx)?
            .ok_or_else(|| Hl7Error::Inconsistency(format!("Flowsheet {} has no observation time", flowsheet.flowsheet_id)))?;

        let status = obx.result_status().unwrap_or_default();
        let deleted = match status.as_str() {
            "C" | "F" => false,
            "D" => true,
            other => {
                return Err(Hl7Error::Inconsistency(format!(
                    "Flowsheet {} has unexpected result status '{}'",
                    flowsheet.flowsheet_id, other
                )))
            }
        };

        let raw = obx.text_value();
        if !deleted && raw.trim().is_empty() && flowsheet.comment.is_unknown() {
            return Err(Hl7Error::Inconsistency(format!(
                "Flowsheet {} has neither a value nor a comment",
                flowsheet.flowsheet_id
            )));
        }

        match obx.value_type() {
            Some("NM") => {
                flowsheet.value_type = FlowsheetValueType::Numeric;
                flowsheet.numeric_value = if deleted {
                    InterchangeValue::Delete
                } else {
                    parse_numeric(raw.trim(), &flowsheet.flowsheet_id)?
                };
            }
            Some("ST") => {
                flowsheet.value_type = FlowsheetValueType::Text;
                flowsheet.string_value = if deleted {
                    InterchangeValue::Delete
                } else {
                    InterchangeValue::build_from_hl7(&raw)
                };
            }
            Some("DT") => {
                flowsheet.value_type = FlowsheetValueType::Date;
                flowsheet.date_value = if deleted {
                    InterchangeValue::Delete
                } else {
                    InterchangeValue::from_option(local_time::parse_date(&raw)?)
                };
            }
            other => {
                return Err(Hl7Error::Inconsistency(format!(
                    "Flowsheet {} has unsupported value type {:?}",
                    flowsheet.flowsheet_id, other
                )))
            }
        }
        Ok(flowsheet)
    }
}

fn parse_numeric(raw: &str, flowsheet_id: &str) -> Result<InterchangeValue<f64>> {
    if raw.is_empty() {
        return Ok(InterchangeValue::Unknown);
    }
    raw.parse::<f64>()
        .map(InterchangeValue::Save)
        .map_err(|_| Hl7Error::DataType(format!("Flowsheet {} value '{}' is not numeric", flowsheet_id, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Hl7Parser;
    use chrono::TimeZone;

    fn vitals() -> Hl7Message {
        let text = [
            "MSH|^~\\&|Epic|Vitals|||201301011230||ORU^R01|1|P|2.4",
            "EVN||201301011230",
            "PID|1||40800000",
            "PV1|1|I|||||||||||||||||123412341234",
            "OBR|1",
            "OBX|1|NM|5^PULSE||72|/min|||||F|||201301011200",
            "OBX|2|ST|6^BP||120/80||||||C|||201301011200",
            "OBX|3|NM|7^TEMP||||||||D|||201301011200",
            "OBX|4|NM|8^RESP||12||||||X|||201301011200",
            "OBX|5|DT|9^LMP||20121225||||||F|||201301011200",
        ]
        .join("\r");
        Hl7Parser::new().parse(&text).unwrap()
    }

    #[test]
    fn test_one_flowsheet_per_valid_obx() {
        let ctx = Hl7Context::default().with_timezone(chrono_tz::Tz::UTC);
        let flowsheets = FlowsheetBuilder::new(&ctx).build(&vitals(), "0000000001").unwrap();

        // 状态 X 的观察被丢弃
        assert_eq!(flowsheets.len(), 4);
        assert_eq!(flowsheets[0].flowsheet_id, "5");
        assert_eq!(flowsheets[0].numeric_value, InterchangeValue::Save(72.0));
        assert_eq!(flowsheets[0].unit.get().map(String::as_str), Some("/min"));
        assert_eq!(flowsheets[0].source_system, "Vitals");
        assert_eq!(flowsheets[0].observation_time, Utc.with_ymd_and_hms(2013, 1, 1, 12, 0, 0).unwrap());
        assert_eq!(flowsheets[0].updated_time, Some(Utc.with_ymd_and_hms(2013, 1, 1, 12, 30, 0).unwrap()));

        assert_eq!(flowsheets[1].string_value.get().map(String::as_str), Some("120/80"));
        assert!(flowsheets[2].numeric_value.is_delete());
        assert_eq!(flowsheets[3].value_type, FlowsheetValueType::Date);
        assert!(flowsheets[3].date_value.is_save());
    }

    #[test]
    fn test_missing_observation_time_is_inconsistent() {
        let text = "MSH|^~\\&|Epic|Vitals|||201301011230||ORU^R01|1|P|2.4\rPID|1||1\rOBR|1\rOBX|1|NM|5^PULSE||72||||||F";
        let msg = Hl7Parser::new().parse(text).unwrap();
        let ctx = Hl7Context::default();
        let flowsheets = FlowsheetBuilder::new(&ctx).build(&msg, "1").unwrap();
        assert!(flowsheets.is_empty());
    }
}
