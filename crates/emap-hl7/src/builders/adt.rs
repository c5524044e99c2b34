//! ADT消息构建
//!
//! 每个触发事件对应一个 [`AdtEvent`] 变体；公共字段（患者、就诊、事件）
//! 只在对应段存在时填写，段缺失时保持未知。

use crate::context::Hl7Context;
use crate::error::{Hl7Error, Result, Tolerate};
use crate::parser::Hl7Message;
use crate::segments::{Mrg, SegmentSet};
use emap_interchange::{AdtEvent, AdtMessage, InterchangeValue, OtherPatient, PreviousIdentifiers};
use tracing::debug;

pub struct AdtMessageBuilder<'a> {
    ctx: &'a Hl7Context,
}

impl<'a> AdtMessageBuilder<'a> {
    pub fn new(ctx: &'a Hl7Context) -> Self {
        Self { ctx }
    }

    /// 从ADT消息构建
    pub fn build(&self, message: &Hl7Message, source_id: &str) -> Result<AdtMessage> {
        let segments = SegmentSet::from_message(message);
        let trigger = message.trigger_event.as_str();
        let event = self.build_event(trigger, message, &segments)?;
        self.assemble(&segments, source_id, trigger, event)
    }

    /// 从ORU/ORM消息的PID/PV1构建患者信息更新
    pub fn build_patient_update(&self, message: &Hl7Message, source_id: &str) -> Result<AdtMessage> {
        let segments = SegmentSet::from_message(message);
        if !segments.pid.exists() {
            return Err(Hl7Error::FieldNotPresent("PID".to_string()));
        }
        self.assemble(&segments, source_id, &message.trigger_event, AdtEvent::UpdatePatientInfo)
    }

    fn assemble(&self, segments: &SegmentSet<'_>, source_id: &str, trigger: &str, event: AdtEvent) -> Result<AdtMessage> {
        let source_system = segments.msh.sending_application()?;
        let mut msg = AdtMessage::new(source_id, source_system, trigger, event);
        self.add_event_data(segments, &mut msg)?;
        self.add_patient_data(segments, &mut msg)?;
        self.add_visit_data(segments, &mut msg)?;
        debug!("Built {} for {:?}", msg.event_name(), msg.mrn);
        Ok(msg)
    }

    fn build_event(&self, trigger: &str, message: &Hl7Message, segments: &SegmentSet<'_>) -> Result<AdtEvent> {
        let pv1 = &segments.pv1;
        let event = match trigger {
            "A01" => AdtEvent::AdmitPatient {
                admission_datetime: pv1.admission_datetime(self.ctx)?,
            },
            "A02" | "A06" | "A07" => AdtEvent::TransferPatient {
                admission_datetime: pv1.admission_datetime(self.ctx)?,
            },
            "A03" => AdtEvent::DischargePatient {
                discharge_datetime: pv1.discharge_datetime(self.ctx)?,
                discharge_disposition: pv1.discharge_disposition(),
                discharge_location: pv1.discharge_location(),
            },
            "A04" => AdtEvent::RegisterPatient {
                presentation_datetime: pv1.admission_datetime(self.ctx)?,
            },
            // 排班类事件暂不处理
            "A05" | "A14" | "A38" => {
                return Err(Hl7Error::NotImplemented(format!(
                    "Scheduling ADT trigger event not implemented: {}",
                    trigger
                )))
            }
            "A08" | "A28" | "A31" => AdtEvent::UpdatePatientInfo,
            "A11" => AdtEvent::CancelAdmitPatient {
                cancelled_datetime: segments.evn.event_occurred(self.ctx)?,
            },
            "A12" => AdtEvent::CancelTransferPatient {
                cancelled_datetime: segments.evn.event_occurred(self.ctx)?,
            },
            "A13" => AdtEvent::CancelDischargePatient {
                cancelled_datetime: segments.evn.event_occurred(self.ctx)?,
            },
            "A15" => AdtEvent::PendingTransfer {
                pending_location: pv1.pending_location(),
            },
            "A26" => AdtEvent::CancelPendingTransfer {
                pending_location: pv1.pending_location(),
                cancelled_datetime: segments.evn.event_occurred(self.ctx)?,
            },
            "A17" => {
                let (other_pid, other_pv1) = SegmentSet::other_patient(message);
                if !other_pid.exists() {
                    return Err(Hl7Error::FieldNotPresent("second PID for A17".to_string()));
                }
                AdtEvent::SwapLocations {
                    other: OtherPatient {
                        mrn: other_pid.mrn().tolerate()?.map(str::to_string),
                        nhs_number: other_pid.nhs_number().tolerate()?.map(str::to_string),
                        visit_number: other_pv1.visit_number().tolerate()?.map(str::to_string),
                        full_location_string: other_pv1.full_location_string(),
                    },
                }
            }
            "A29" => AdtEvent::DeletePersonInformation,
            "A39" => AdtEvent::MergeById {
                retired: previous_identifiers(&segments.mrg)?,
            },
            "A40" => AdtEvent::MergePatient {
                retired: previous_identifiers(&segments.mrg)?,
            },
            "A45" => AdtEvent::MoveVisitInformation {
                previous: previous_identifiers(&segments.mrg)?,
                previous_visit_number: segments.mrg.previous_visit_number().tolerate()?.map(str::to_string),
            },
            "A47" => AdtEvent::ChangePatientIdentifiers {
                previous: previous_identifiers(&segments.mrg)?,
            },
            other => {
                return Err(Hl7Error::NotImplemented(format!("Unimplemented ADT trigger event {}", other)));
            }
        };
        Ok(event)
    }

    fn add_event_data(&self, segments: &SegmentSet<'_>, msg: &mut AdtMessage) -> Result<()> {
        if segments.evn.exists() {
            msg.recorded_datetime = segments.evn.recorded_datetime(self.ctx)?;
            msg.event_reason_code = segments.evn.event_reason_code();
            msg.operator_id = segments.evn.operator_id();
            msg.event_occurred_datetime = segments.evn.event_occurred(self.ctx)?;
        }
        // 非ADT消息没有EVN，退回到消息时间
        if msg.recorded_datetime.is_none() {
            msg.recorded_datetime = segments.msh.message_timestamp(self.ctx)?;
        }
        Ok(())
    }

    fn add_patient_data(&self, segments: &SegmentSet<'_>, msg: &mut AdtMessage) -> Result<()> {
        let pid = &segments.pid;
        if !pid.exists() {
            return Ok(());
        }

        msg.mrn = pid.mrn().tolerate()?.map(str::to_string);
        msg.nhs_number = pid.nhs_number().tolerate()?.map(str::to_string);
        msg.patient_family_name = pid.family_name();
        msg.patient_given_name = pid.given_name();
        msg.patient_middle_name = pid.middle_name();
        msg.patient_title = pid.title();
        msg.patient_full_name = InterchangeValue::from_option(pid.full_name());
        msg.patient_birth_date = pid.birth_datetime(self.ctx)?;
        msg.patient_birth_date_only = pid.birth_date()?;
        msg.patient_sex = pid.sex();
        msg.patient_zip_or_postal_code = pid.postcode();
        msg.patient_religion = pid.religion();
        msg.ethnic_group = pid.ethnic_group();
        // 死亡指示与死亡时间可能出现在任何消息中，且不一定一致
        msg.patient_is_alive = pid.is_alive();
        msg.patient_death_datetime = pid.death_datetime(self.ctx)?;
        Ok(())
    }

    fn add_visit_data(&self, segments: &SegmentSet<'_>, msg: &mut AdtMessage) -> Result<()> {
        let pv1 = &segments.pv1;
        if pv1.exists() {
            msg.patient_class = pv1.patient_class_value()?;
            msg.full_location_string = pv1.full_location_string();
            msg.current_bed = pv1.current_bed();
            msg.previous_location_string = pv1.previous_location();
            msg.attending_doctors = pv1.attending_doctors();
            msg.referring_doctors = pv1.referring_doctors();
            msg.hospital_service = pv1.hospital_service();
            msg.admit_source = pv1.admit_source();
            msg.patient_type = pv1.patient_type();
            msg.visit_number = pv1.visit_number().tolerate()?.map(str::to_string);
        }
        msg.mode_of_arrival = segments.pv2.mode_of_arrival();
        Ok(())
    }
}

fn previous_identifiers(mrg: &Mrg<'_>) -> Result<PreviousIdentifiers> {
    if !mrg.exists() {
        return Err(Hl7Error::FieldNotPresent("MRG".to_string()));
    }
    Ok(PreviousIdentifiers {
        previous_mrn: mrg.previous_mrn().tolerate()?.map(str::to_string),
        previous_nhs_number: mrg.previous_nhs_number().tolerate()?.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::tests_support::a01_text;
    use crate::parser::Hl7Parser;
    use chrono::{TimeZone, Utc};
    use emap_interchange::PatientClass;

    fn build(text: &str, ctx: &Hl7Context) -> Result<AdtMessage> {
        let message = Hl7Parser::new().parse(text)?;
        AdtMessageBuilder::new(ctx).build(&message, "0000000001")
    }

    #[test]
    fn test_admit_patient() {
        let ctx = Hl7Context::default();
        let msg = build(&a01_text(), &ctx).unwrap();

        assert_eq!(msg.event_name(), "AdmitPatient");
        assert_eq!(msg.source_system, "EPIC");
        assert_eq!(msg.mrn.as_deref(), Some("50032556"));
        assert_eq!(msg.nhs_number.as_deref(), Some("9999999999"));
        assert_eq!(msg.visit_number.as_deref(), Some("123412341234"));
        assert_eq!(msg.current_bed, InterchangeValue::Save("H203-11".to_string()));
        assert_eq!(msg.full_location_string, InterchangeValue::Save("H2HH^H203^H203-11".to_string()));
        assert_eq!(msg.patient_class, InterchangeValue::Save(PatientClass::Inpatient));
        assert_eq!(msg.attending_doctors[0].surname.as_deref(), Some("BEAN"));
        assert_eq!(msg.referring_doctors.len(), 1);
        assert_eq!(msg.referring_doctors[0].consultant_code.as_deref(), Some("C3100"));
        assert_eq!(msg.hospital_service.as_deref(), Some("CARDIOLOGY"));
        assert_eq!(msg.patient_is_alive, InterchangeValue::Save(true));
        assert_eq!(msg.event_occurred_datetime, Some(Utc.with_ymd_and_hms(2012, 9, 21, 17, 40, 0).unwrap()));

        match msg.event {
            AdtEvent::AdmitPatient { admission_datetime } => {
                // 伦敦夏令时
                assert_eq!(admission_datetime, InterchangeValue::Save(Utc.with_ymd_and_hms(2012, 9, 21, 16, 40, 0).unwrap()));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_admit_time_with_utc_hospital_zone() {
        let ctx = Hl7Context::default().with_timezone(chrono_tz::Tz::UTC);
        let msg = build(&a01_text(), &ctx).unwrap();
        match msg.event {
            AdtEvent::AdmitPatient { admission_datetime } => {
                assert_eq!(
                    admission_datetime.get().map(|d| d.to_rfc3339()),
                    Some("2012-09-21T17:40:00+00:00".to_string())
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_update_without_pv1_leaves_visit_unknown() {
        let ctx = Hl7Context::default();
        let text = "MSH|^~\\&|EPIC||||201301011200||ADT^A08|1|P|2.4\rEVN|A08|201301011200\rPID|1||50032556";
        let msg = build(text, &ctx).unwrap();

        assert_eq!(msg.event, AdtEvent::UpdatePatientInfo);
        assert!(msg.full_location_string.is_unknown());
        assert!(msg.patient_class.is_unknown());
        assert_eq!(msg.visit_number, None);
    }

    #[test]
    fn test_discharge_fields() {
        let ctx = Hl7Context::default();
        let mut pv1 = vec![""; 46];
        pv1[0] = "PV1";
        pv1[2] = "I";
        pv1[3] = "T11E^T11E BY02^BY02-17";
        pv1[19] = "V1";
        pv1[36] = "Home";
        pv1[37] = "Patient's home";
        pv1[45] = "201301011530";
        let text = format!(
            "MSH|^~\\&|EPIC||||201301011530||ADT^A03|1|P|2.4\rEVN|A03|201301011530\rPID|1||M1\r{}",
            pv1.join("|")
        );
        let msg = build(&text, &ctx).unwrap();
        assert_eq!(
            msg.event,
            AdtEvent::DischargePatient {
                discharge_datetime: Some(Utc.with_ymd_and_hms(2013, 1, 1, 15, 30, 0).unwrap()),
                discharge_disposition: Some("Home".to_string()),
                discharge_location: Some("Patient's home".to_string()),
            }
        );
    }

    #[test]
    fn test_merge_reads_mrg() {
        let ctx = Hl7Context::default();
        let text = "MSH|^~\\&|EPIC||||201301011200||ADT^A40|1|P|2.4\rEVN|A40|201301011200\rPID|1||SURVIVOR\rMRG|RETIRED~RETIREDNHS";
        let msg = build(text, &ctx).unwrap();
        assert_eq!(
            msg.event,
            AdtEvent::MergePatient {
                retired: PreviousIdentifiers {
                    previous_mrn: Some("RETIRED".to_string()),
                    previous_nhs_number: Some("RETIREDNHS".to_string()),
                }
            }
        );
    }

    #[test]
    fn test_cancel_uses_event_occurred() {
        let ctx = Hl7Context::default().with_timezone(chrono_tz::Tz::UTC);
        let text = "MSH|^~\\&|EPIC||||201301011200||ADT^A12|1|P|2.4\rEVN|A12|201301011200||||201301011100\rPID|1||M1";
        let msg = build(text, &ctx).unwrap();
        assert_eq!(
            msg.event,
            AdtEvent::CancelTransferPatient {
                cancelled_datetime: Some(Utc.with_ymd_and_hms(2013, 1, 1, 11, 0, 0).unwrap()),
            }
        );
    }

    #[test]
    fn test_unknown_triggers_are_not_implemented() {
        let ctx = Hl7Context::default();
        for trigger in ["A05", "A99"] {
            let text = format!("MSH|^~\\&|EPIC||||201301011200||ADT^{}|1|P|2.4\rPID|1||M1", trigger);
            assert!(matches!(build(&text, &ctx), Err(Hl7Error::NotImplemented(_))));
        }
    }

    #[test]
    fn test_merge_without_mrg_is_rejected() {
        let ctx = Hl7Context::default();
        let text = "MSH|^~\\&|EPIC||||201301011200||ADT^A47|1|P|2.4\rPID|1||M1";
        assert!(matches!(build(text, &ctx), Err(Hl7Error::FieldNotPresent(_))));
    }
}
