//! ADT交换消息

use crate::value::InterchangeValue;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 就诊类型（PV1-2）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatientClass {
    Emergency,
    Inpatient,
    Outpatient,
    DayCase,
    SurgeryAdmit,
    NewBorn,
}

impl PatientClass {
    /// 从HL7代码解析，未知代码返回 `None`
    pub fn from_hl7(code: &str) -> Option<Self> {
        match code.trim() {
            "E" => Some(PatientClass::Emergency),
            "I" => Some(PatientClass::Inpatient),
            "O" => Some(PatientClass::Outpatient),
            "DAY CASE" => Some(PatientClass::DayCase),
            "SURG ADMIT" => Some(PatientClass::SurgeryAdmit),
            "NEW BORN" => Some(PatientClass::NewBorn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatientClass::Emergency => "EMERGENCY",
            PatientClass::Inpatient => "INPATIENT",
            PatientClass::Outpatient => "OUTPATIENT",
            PatientClass::DayCase => "DAY_CASE",
            PatientClass::SurgeryAdmit => "SURGERY_ADMIT",
            PatientClass::NewBorn => "NEW_BORN",
        }
    }
}

impl fmt::Display for PatientClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 计划移动的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingType {
    Admit,
    Transfer,
    Discharge,
}

impl PendingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingType::Admit => "ADMIT",
            PendingType::Transfer => "TRANSFER",
            PendingType::Discharge => "DISCHARGE",
        }
    }
}

impl fmt::Display for PendingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 医生（XCN）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub consultant_code: Option<String>,
    pub surname: Option<String>,
    pub firstname: Option<String>,
    pub middlename: Option<String>,
    pub title: Option<String>,
}

/// 合并前的旧标识（MRG-1）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviousIdentifiers {
    pub previous_mrn: Option<String>,
    pub previous_nhs_number: Option<String>,
}

/// A17交换床位中的另一位患者
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtherPatient {
    pub mrn: Option<String>,
    pub nhs_number: Option<String>,
    pub visit_number: Option<String>,
    pub full_location_string: InterchangeValue<String>,
}

/// ADT事件类型及其专有字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdtEvent {
    /// A01
    AdmitPatient {
        admission_datetime: InterchangeValue<DateTime<Utc>>,
    },
    /// A02 / A06 / A07
    TransferPatient {
        admission_datetime: InterchangeValue<DateTime<Utc>>,
    },
    /// A03
    DischargePatient {
        discharge_datetime: Option<DateTime<Utc>>,
        discharge_disposition: Option<String>,
        discharge_location: Option<String>,
    },
    /// A04
    RegisterPatient {
        presentation_datetime: InterchangeValue<DateTime<Utc>>,
    },
    /// A08 / A28 / A31
    UpdatePatientInfo,
    /// A11
    CancelAdmitPatient {
        cancelled_datetime: Option<DateTime<Utc>>,
    },
    /// A12
    CancelTransferPatient {
        cancelled_datetime: Option<DateTime<Utc>>,
    },
    /// A13
    CancelDischargePatient {
        cancelled_datetime: Option<DateTime<Utc>>,
    },
    /// A15
    PendingTransfer {
        pending_location: InterchangeValue<String>,
    },
    /// A26
    CancelPendingTransfer {
        pending_location: InterchangeValue<String>,
        cancelled_datetime: Option<DateTime<Utc>>,
    },
    /// A17
    SwapLocations { other: OtherPatient },
    /// A29
    DeletePersonInformation,
    /// A39
    MergeById { retired: PreviousIdentifiers },
    /// A40
    MergePatient { retired: PreviousIdentifiers },
    /// A45
    MoveVisitInformation {
        previous: PreviousIdentifiers,
        previous_visit_number: Option<String>,
    },
    /// A47
    ChangePatientIdentifiers { previous: PreviousIdentifiers },
}

impl AdtEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AdtEvent::AdmitPatient { .. } => "AdmitPatient",
            AdtEvent::TransferPatient { .. } => "TransferPatient",
            AdtEvent::DischargePatient { .. } => "DischargePatient",
            AdtEvent::RegisterPatient { .. } => "RegisterPatient",
            AdtEvent::UpdatePatientInfo => "UpdatePatientInfo",
            AdtEvent::CancelAdmitPatient { .. } => "CancelAdmitPatient",
            AdtEvent::CancelTransferPatient { .. } => "CancelTransferPatient",
            AdtEvent::CancelDischargePatient { .. } => "CancelDischargePatient",
            AdtEvent::PendingTransfer { .. } => "PendingTransfer",
            AdtEvent::CancelPendingTransfer { .. } => "CancelPendingTransfer",
            AdtEvent::SwapLocations { .. } => "SwapLocations",
            AdtEvent::DeletePersonInformation => "DeletePersonInformation",
            AdtEvent::MergeById { .. } => "MergeById",
            AdtEvent::MergePatient { .. } => "MergePatient",
            AdtEvent::MoveVisitInformation { .. } => "MoveVisitInformation",
            AdtEvent::ChangePatientIdentifiers { .. } => "ChangePatientIdentifiers",
        }
    }

    /// 该事件是否会移动患者位置（明确的入住/离开）
    pub fn is_explicit_movement(&self) -> bool {
        matches!(
            self,
            AdtEvent::AdmitPatient { .. }
                | AdtEvent::TransferPatient { .. }
                | AdtEvent::DischargePatient { .. }
        )
    }

    /// A11/A12/A13：撤销之前的入院、转科或出院
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            AdtEvent::CancelAdmitPatient { .. }
                | AdtEvent::CancelTransferPatient { .. }
                | AdtEvent::CancelDischargePatient { .. }
        )
    }
}

/// ADT交换消息：公共字段 + 事件专有字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdtMessage {
    pub source_message_id: String,
    pub source_system: String,
    /// 触发事件代码，例如 A01
    pub trigger_event: String,
    /// EVN-2
    pub recorded_datetime: Option<DateTime<Utc>>,
    /// EVN-6
    pub event_occurred_datetime: Option<DateTime<Utc>>,
    /// EVN-4
    pub event_reason_code: Option<String>,
    pub operator_id: Option<String>,

    pub mrn: Option<String>,
    pub nhs_number: Option<String>,
    pub visit_number: Option<String>,

    pub patient_given_name: InterchangeValue<String>,
    pub patient_middle_name: InterchangeValue<String>,
    pub patient_family_name: InterchangeValue<String>,
    pub patient_title: InterchangeValue<String>,
    pub patient_full_name: InterchangeValue<String>,
    pub patient_birth_date: InterchangeValue<DateTime<Utc>>,
    /// 仅有日期（8位）时同时给出
    pub patient_birth_date_only: InterchangeValue<NaiveDate>,
    pub patient_sex: InterchangeValue<String>,
    pub patient_zip_or_postal_code: InterchangeValue<String>,
    pub ethnic_group: InterchangeValue<String>,
    pub patient_religion: InterchangeValue<String>,
    pub patient_is_alive: InterchangeValue<bool>,
    pub patient_death_datetime: InterchangeValue<DateTime<Utc>>,

    pub patient_class: InterchangeValue<PatientClass>,
    pub patient_type: Option<String>,
    pub hospital_service: Option<String>,
    pub mode_of_arrival: InterchangeValue<String>,
    pub full_location_string: InterchangeValue<String>,
    pub current_bed: InterchangeValue<String>,
    pub previous_location_string: Option<String>,
    pub admit_source: Option<String>,
    pub attending_doctors: Vec<Doctor>,
    pub referring_doctors: Vec<Doctor>,

    pub event: AdtEvent,
}

impl AdtMessage {
    /// 创建只有公共头字段的消息，其余字段均为未知
    pub fn new(source_message_id: impl Into<String>, source_system: impl Into<String>, trigger_event: impl Into<String>, event: AdtEvent) -> Self {
        Self {
            source_message_id: source_message_id.into(),
            source_system: source_system.into(),
            trigger_event: trigger_event.into(),
            recorded_datetime: None,
            event_occurred_datetime: None,
            event_reason_code: None,
            operator_id: None,
            mrn: None,
            nhs_number: None,
            visit_number: None,
            patient_given_name: InterchangeValue::Unknown,
            patient_middle_name: InterchangeValue::Unknown,
            patient_family_name: InterchangeValue::Unknown,
            patient_title: InterchangeValue::Unknown,
            patient_full_name: InterchangeValue::Unknown,
            patient_birth_date: InterchangeValue::Unknown,
            patient_birth_date_only: InterchangeValue::Unknown,
            patient_sex: InterchangeValue::Unknown,
            patient_zip_or_postal_code: InterchangeValue::Unknown,
            ethnic_group: InterchangeValue::Unknown,
            patient_religion: InterchangeValue::Unknown,
            patient_is_alive: InterchangeValue::Unknown,
            patient_death_datetime: InterchangeValue::Unknown,
            patient_class: InterchangeValue::Unknown,
            patient_type: None,
            hospital_service: None,
            mode_of_arrival: InterchangeValue::Unknown,
            full_location_string: InterchangeValue::Unknown,
            current_bed: InterchangeValue::Unknown,
            previous_location_string: None,
            admit_source: None,
            attending_doctors: Vec::new(),
            referring_doctors: Vec::new(),
            event,
        }
    }

    /// 事实生效时间：优先EVN-6，其次EVN-2
    pub fn valid_from(&self) -> Option<DateTime<Utc>> {
        self.event_occurred_datetime.or(self.recorded_datetime)
    }

    pub fn event_name(&self) -> &'static str {
        self.event.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_patient_class_codes() {
        assert_eq!(PatientClass::from_hl7("I"), Some(PatientClass::Inpatient));
        assert_eq!(PatientClass::from_hl7("DAY CASE"), Some(PatientClass::DayCase));
        assert_eq!(PatientClass::from_hl7("X"), None);
    }

    #[test]
    fn test_valid_from_prefers_event_occurred() {
        let mut msg = AdtMessage::new("0000000001", "EPIC", "A08", AdtEvent::UpdatePatientInfo);
        let recorded = Utc.with_ymd_and_hms(2020, 1, 1, 10, 0, 0).unwrap();
        let occurred = Utc.with_ymd_and_hms(2020, 1, 1, 9, 0, 0).unwrap();

        msg.recorded_datetime = Some(recorded);
        assert_eq!(msg.valid_from(), Some(recorded));

        msg.event_occurred_datetime = Some(occurred);
        assert_eq!(msg.valid_from(), Some(occurred));
    }

    #[test]
    fn test_event_serialises_with_kind_tag() {
        let event = AdtEvent::PendingTransfer {
            pending_location: InterchangeValue::save("T06^T06A^BY01".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "PENDING_TRANSFER");
        assert!(!event.is_explicit_movement());
    }
}
