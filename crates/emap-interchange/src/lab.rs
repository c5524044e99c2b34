//! 检验交换消息

use crate::value::InterchangeValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 检验结果值类型（OBX-2）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabValueType {
    Numeric,
    Text,
    CodedEntry,
}

impl LabValueType {
    pub fn from_hl7(code: &str) -> Option<Self> {
        match code.trim() {
            "NM" => Some(LabValueType::Numeric),
            "ST" | "FT" | "TX" => Some(LabValueType::Text),
            "CE" | "CWE" => Some(LabValueType::CodedEntry),
            _ => None,
        }
    }
}

/// 检验申请（ORM，或ORU中的申请部分）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabOrderMsg {
    pub source_message_id: String,
    pub source_system: String,
    pub mrn: Option<String>,
    pub nhs_number: Option<String>,
    pub visit_number: Option<String>,
    /// ORC-1
    pub order_control_id: String,
    /// ORC-5
    pub order_status: Option<String>,
    /// ORC-2 / OBR-2
    pub epic_care_order_number: Option<String>,
    /// ORC-3 / OBR-3
    pub lab_specimen_number: String,
    pub test_battery_local_code: String,
    pub test_battery_coding_system: Option<String>,
    pub order_datetime: InterchangeValue<DateTime<Utc>>,
    pub requested_datetime: InterchangeValue<DateTime<Utc>>,
    pub collection_datetime: Option<DateTime<Utc>>,
    pub sample_received_datetime: InterchangeValue<DateTime<Utc>>,
    pub status_change_datetime: Option<DateTime<Utc>>,
    pub lab_department: Option<String>,
    /// OBR-25
    pub result_status: Option<String>,
    pub specimen_type: InterchangeValue<String>,
    pub collection_method: InterchangeValue<String>,
    pub clinical_information: InterchangeValue<String>,
    /// OBR-26：药敏结果所属分离株的观察ID与子ID
    pub parent_observation_identifier: Option<String>,
    pub parent_sub_id: Option<String>,
    /// 申请问卷（问题 -> 回答）
    pub questions: BTreeMap<String, String>,
}

/// 微生物分离株及其药敏结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabIsolateMsg {
    /// OBX-4
    pub isolate_id: String,
    pub isolate_code: Option<String>,
    pub isolate_name: Option<String>,
    pub culture_type: InterchangeValue<String>,
    pub quantity: InterchangeValue<String>,
    pub clinical_information: InterchangeValue<String>,
    pub sensitivities: Vec<LabResultMsg>,
}

impl LabIsolateMsg {
    /// 合并同一子ID的分离株信息（后来的有值字段覆盖先前的）
    pub fn merge(&mut self, other: LabIsolateMsg) {
        if other.isolate_code.is_some() {
            self.isolate_code = other.isolate_code;
            self.isolate_name = other.isolate_name;
        }
        if !other.culture_type.is_unknown() {
            self.culture_type = other.culture_type;
        }
        if !other.quantity.is_unknown() {
            self.quantity = other.quantity;
        }
        if !other.clinical_information.is_unknown() {
            self.clinical_information = other.clinical_information;
        }
        self.sensitivities.extend(other.sensitivities);
    }
}

/// 单项检验结果，附带其所属申请的标识
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabResultMsg {
    pub source_message_id: String,
    pub source_system: String,
    pub mrn: Option<String>,
    pub nhs_number: Option<String>,
    pub visit_number: Option<String>,
    pub epic_care_order_number: Option<String>,
    pub lab_specimen_number: String,
    pub test_battery_local_code: String,
    pub collection_datetime: Option<DateTime<Utc>>,

    /// OBX-3
    pub test_item_local_code: String,
    pub test_item_coding_system: Option<String>,
    /// OBX-4
    pub observation_sub_id: String,
    pub value_type: Option<LabValueType>,
    pub numeric_value: InterchangeValue<f64>,
    pub string_value: InterchangeValue<String>,
    /// `<` / `>` / `=`
    pub result_operator: String,
    pub units: InterchangeValue<String>,
    pub reference_low: InterchangeValue<f64>,
    pub reference_high: InterchangeValue<f64>,
    pub abnormal_flags: InterchangeValue<String>,
    /// OBX-11
    pub result_status: Option<String>,
    /// OBX-14
    pub result_time: Option<DateTime<Utc>>,
    /// 紧随其后的NTE段
    pub notes: InterchangeValue<String>,
    pub isolate: Option<LabIsolateMsg>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_codes() {
        assert_eq!(LabValueType::from_hl7("NM"), Some(LabValueType::Numeric));
        assert_eq!(LabValueType::from_hl7("FT"), Some(LabValueType::Text));
        assert_eq!(LabValueType::from_hl7("CWE"), Some(LabValueType::CodedEntry));
        assert_eq!(LabValueType::from_hl7("ED"), None);
    }

    #[test]
    fn test_isolate_merge_keeps_known_fields() {
        let mut first = LabIsolateMsg {
            isolate_id: "1".into(),
            isolate_code: Some("KLEOXY".into()),
            isolate_name: Some("Klebsiella oxytoca".into()),
            ..Default::default()
        };
        let second = LabIsolateMsg {
            isolate_id: "1".into(),
            quantity: InterchangeValue::save("10,000 - 100,000 CFU/mL".into()),
            ..Default::default()
        };

        first.merge(second);

        assert_eq!(first.isolate_code.as_deref(), Some("KLEOXY"));
        assert_eq!(first.quantity.get().map(String::as_str), Some("10,000 - 100,000 CFU/mL"));
    }
}
