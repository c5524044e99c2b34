//! 床旁观察记录

use crate::value::InterchangeValue;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowsheetValueType {
    Numeric,
    Text,
    Date,
}

/// 一条观察值（每个OBX一条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flowsheet {
    pub source_message_id: String,
    pub source_system: String,
    pub source_application: String,
    pub mrn: Option<String>,
    pub visit_number: Option<String>,
    /// OBX-3
    pub flowsheet_id: String,
    pub value_type: FlowsheetValueType,
    pub numeric_value: InterchangeValue<f64>,
    pub string_value: InterchangeValue<String>,
    pub date_value: InterchangeValue<NaiveDate>,
    pub unit: InterchangeValue<String>,
    pub comment: InterchangeValue<String>,
    /// OBX-14
    pub observation_time: DateTime<Utc>,
    /// EVN-2
    pub updated_time: Option<DateTime<Utc>>,
}
