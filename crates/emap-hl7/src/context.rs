//! 解析上下文
//!
//! 启动时构建一次，之后只读，显式传给分发器和各个消息构建器。

use crate::error::{Hl7Error, Result};
use crate::local_time;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// HL7相关配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hl7Settings {
    /// 医院所在时区（IANA名称）
    pub timezone: String,
    /// 唯一允许发送ADT消息的系统（MSH-3）
    pub allowed_adt_sender: String,
    /// 保留的检验申请控制代码（ORC-1）
    pub allowed_order_controls: Vec<String>,
    /// 床旁观察数据的发送机构（MSH-4）
    pub flowsheet_facility: String,
}

impl Default for Hl7Settings {
    fn default() -> Self {
        Self {
            timezone: "Europe/London".to_string(),
            allowed_adt_sender: "EPIC".to_string(),
            allowed_order_controls: vec!["SC".to_string(), "RE".to_string()],
            flowsheet_facility: "Vitals".to_string(),
        }
    }
}

/// 不可变的解析上下文
#[derive(Debug, Clone)]
pub struct Hl7Context {
    timezone: Tz,
    allowed_adt_sender: String,
    allowed_order_controls: Vec<String>,
    flowsheet_facility: String,
}

impl Default for Hl7Context {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::London,
            allowed_adt_sender: "EPIC".to_string(),
            allowed_order_controls: vec!["SC".to_string(), "RE".to_string()],
            flowsheet_facility: "Vitals".to_string(),
        }
    }
}

impl Hl7Context {
    pub fn from_config(settings: &Hl7Settings) -> Result<Self> {
        let timezone: Tz = settings
            .timezone
            .parse()
            .map_err(|e| Hl7Error::DataType(format!("Unknown timezone {}: {}", settings.timezone, e)))?;

        Ok(Self {
            timezone,
            allowed_adt_sender: settings.allowed_adt_sender.clone(),
            allowed_order_controls: settings.allowed_order_controls.clone(),
            flowsheet_facility: settings.flowsheet_facility.clone(),
        })
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn allowed_adt_sender(&self) -> &str {
        &self.allowed_adt_sender
    }

    pub fn flowsheet_facility(&self) -> &str {
        &self.flowsheet_facility
    }

    pub fn is_order_control_allowed(&self, order_control: &str) -> bool {
        self.allowed_order_controls.iter().any(|c| c == order_control)
    }

    /// 按医院时区解释时间戳
    pub fn interpret_local_time(&self, raw: &str) -> Result<Option<DateTime<Utc>>> {
        local_time::interpret_local_time(raw, self.timezone)
    }
}
