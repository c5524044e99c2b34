//! 核心数据模型定义
//!
//! 这里只定义实体的业务字段，时态字段由 [`crate::Temporal`] 统一提供。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 患者标识（医院MRN和/或NHS号）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mrn {
    pub mrn: Option<String>,
    pub nhs_number: Option<String>,
    pub source_system: String,
}

impl Mrn {
    /// 是否与给定标识匹配（任一非空标识相同即可）
    pub fn matches(&self, mrn: Option<&str>, nhs_number: Option<&str>) -> bool {
        let mrn_match = matches!((self.mrn.as_deref(), mrn), (Some(a), Some(b)) if a == b);
        let nhs_match = matches!((self.nhs_number.as_deref(), nhs_number), (Some(a), Some(b)) if a == b);
        mrn_match || nhs_match
    }
}

/// MRN到当前存活MRN的映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MrnToLive {
    pub mrn_id: i64,
    pub live_mrn_id: i64,
}

/// 核心人口统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreDemographic {
    pub mrn_id: i64,
    pub firstname: Option<String>,
    pub middlename: Option<String>,
    pub lastname: Option<String>,
    pub title: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub datetime_of_birth: Option<DateTime<Utc>>,
    pub sex: Option<String>,
    pub home_postcode: Option<String>,
    pub ethnicity: Option<String>,
    pub religion: Option<String>,
    pub alive: Option<bool>,
    pub date_of_death: Option<NaiveDate>,
    pub datetime_of_death: Option<DateTime<Utc>>,
}

/// 一次住院/就诊
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HospitalVisit {
    pub mrn_id: i64,
    /// 源系统就诊号
    pub encounter: String,
    pub source_system: String,
    pub presentation_time: Option<DateTime<Utc>>,
    pub admission_time: Option<DateTime<Utc>>,
    pub discharge_time: Option<DateTime<Utc>>,
    pub patient_class: Option<String>,
    pub patient_type: Option<String>,
    pub hospital_service: Option<String>,
    pub admit_source: Option<String>,
    pub arrival_method: Option<String>,
    pub discharge_destination: Option<String>,
    pub discharge_disposition: Option<String>,
    /// PV1-7 顾问代码，按消息顺序
    pub attending_consultants: Vec<String>,
    /// PV1-8 顾问代码
    pub referring_consultants: Vec<String>,
}

/// 患者在某个位置停留的时间段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationVisit {
    pub hospital_visit_id: i64,
    pub location_id: i64,
    pub admission_time: Option<DateTime<Utc>>,
    pub discharge_time: Option<DateTime<Utc>>,
    pub parent_location_visit_id: Option<i64>,
    /// 入住时间由推断得到，而非A01/A02/A03明确给出
    pub inferred_admission: bool,
    /// 离开时间由推断得到
    pub inferred_discharge: bool,
}

impl LocationVisit {
    pub fn is_open(&self) -> bool {
        self.discharge_time.is_none()
    }
}

/// 位置（HL7 "ward^room^bed" 字符串）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub location_string: String,
    pub department_id: Option<i64>,
    pub room_id: Option<i64>,
    pub bed_id: Option<i64>,
}

/// 科室/病区
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub hl7_string: String,
}

/// 房间
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub department_id: i64,
    pub hl7_string: String,
}

/// 床位
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bed {
    pub room_id: i64,
    pub hl7_string: String,
}

/// 尚未生效的计划移动（待转科等）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannedMovement {
    pub hospital_visit_id: i64,
    pub location_id: Option<i64>,
    /// ADMIT / TRANSFER / DISCHARGE
    pub event_type: String,
    pub event_datetime: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub cancelled_datetime: Option<DateTime<Utc>>,
}

/// 检验申请
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabOrder {
    pub mrn_id: i64,
    pub hospital_visit_id: Option<i64>,
    pub epic_care_order_number: Option<String>,
    pub lab_specimen_number: String,
    pub test_battery_code: String,
    pub source_system: String,
    pub order_datetime: Option<DateTime<Utc>>,
    pub request_datetime: Option<DateTime<Utc>>,
    pub collection_datetime: Option<DateTime<Utc>>,
    pub sample_received_datetime: Option<DateTime<Utc>>,
    pub status_change_datetime: Option<DateTime<Utc>>,
    pub lab_department: Option<String>,
    pub result_status: Option<String>,
    pub specimen_type: Option<String>,
    pub collection_method: Option<String>,
    pub clinical_information: Option<String>,
    pub questions: BTreeMap<String, String>,
}

/// 单项检验结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub lab_order_id: i64,
    pub test_item_code: String,
    pub observation_sub_id: String,
    pub value_type: String,
    pub numeric_value: Option<f64>,
    pub string_value: Option<String>,
    pub result_operator: Option<String>,
    pub units: Option<String>,
    pub reference_low: Option<f64>,
    pub reference_high: Option<f64>,
    pub abnormal_flag: Option<String>,
    pub result_status: Option<String>,
    pub result_last_modified_time: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

/// 微生物分离株
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabIsolate {
    pub lab_result_id: i64,
    pub isolate_code: String,
    pub isolate_name: Option<String>,
    pub culture_type: Option<String>,
    pub quantity: Option<String>,
    pub clinical_information: Option<String>,
}

/// 药敏结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabSensitivity {
    pub lab_isolate_id: i64,
    pub agent: String,
    pub sensitivity: Option<String>,
    pub reporting_datetime: Option<DateTime<Utc>>,
}

/// 床旁观察记录（flowsheet）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitObservation {
    pub hospital_visit_id: i64,
    pub observation_type: String,
    pub observation_datetime: DateTime<Utc>,
    pub source_system: String,
    pub value_as_real: Option<f64>,
    pub value_as_text: Option<String>,
    pub value_as_date: Option<NaiveDate>,
    pub unit: Option<String>,
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mrn_matches_either_identifier() {
        let mrn = Mrn {
            mrn: Some("50032556".into()),
            nhs_number: Some("9999999999".into()),
            source_system: "EPIC".into(),
        };
        assert!(mrn.matches(Some("50032556"), None));
        assert!(mrn.matches(None, Some("9999999999")));
        assert!(mrn.matches(Some("other"), Some("9999999999")));
        assert!(!mrn.matches(Some("other"), None));
        assert!(!mrn.matches(None, None));
    }
}
