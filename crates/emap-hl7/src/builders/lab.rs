//! 检验申请与结果构建
//!
//! ORM^O01 每个申请分组生成一条 [`LabOrderMsg`]；ORU^R01 每个结果生成
//! 一条 [`LabResultMsg`]。药敏分组（OBR-26 指向父分离株）挂到对应的
//! 分离株结果下，不单独输出。单个申请出错只丢弃该申请。
//!
//! 来源由第一个 OBR 的编码系统和 MSH-3 决定：WinPath 与 BIO-CONNECT
//! 会构建，其余已知来源整条忽略。

use crate::context::Hl7Context;
use crate::error::{Hl7Error, Result, Tolerate};
use crate::parser::Hl7Message;
use crate::segments::{order_groups, ObservationGroup, OrderGroup, SegmentSet};
use emap_interchange::{InterchangeValue, LabIsolateMsg, LabOrderMsg, LabResultMsg, LabValueType};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, error, trace, warn};

const ISOLATE_CODE: &str = "ISOLATE";
const WIN_PATH: &str = "WinPath";
const BIO_CONNECT_SENDER: &str = "BIO-CONNECT";
const BIO_CONNECT_ORDER_CONTROL: &str = "NW";
const ABL_SENDER: &str = "ABL90 FLEX Plus";
const CULTURE_SUFFIX: &str = " culture yields:";

fn question_separator() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s*->\s*").expect("constant question separator"))
}

/// 检验数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabSource {
    WinPath,
    BioConnect,
    CoPath,
    BankManager,
    BloodProducts,
    Abl,
}

impl LabSource {
    /// 按第一个 OBR 的编码系统和发送方判断来源
    pub fn detect(message: &Hl7Message) -> Result<Self> {
        let obr = message.segment("OBR");
        let obr_value = |field, component| obr.and_then(|s| s.value(field, 0, component)).unwrap_or("");
        let sender = message
            .segment("MSH")
            .and_then(|msh| msh.value(3, 0, 1))
            .unwrap_or("");

        let source = if obr_value(4, 3) == WIN_PATH || sender == WIN_PATH {
            LabSource::WinPath
        } else if obr_value(3, 2) == "CoPathPlus" || obr_value(4, 3) == "CPEAP" {
            LabSource::CoPath
        } else if obr_value(4, 4) == "Profiles" {
            LabSource::BankManager
        } else if obr_value(4, 4) == "Products" {
            LabSource::BloodProducts
        } else if sender == BIO_CONNECT_SENDER {
            LabSource::BioConnect
        } else if sender == ABL_SENDER {
            LabSource::Abl
        } else {
            return Err(Hl7Error::MessageIgnored("Unknown coding system for order/result".to_string()));
        };
        Ok(source)
    }

    pub fn coding_system(&self) -> &'static str {
        match self {
            LabSource::WinPath => "WIN_PATH",
            LabSource::BioConnect => "BIO_CONNECT",
            LabSource::CoPath => "CO_PATH",
            LabSource::BankManager => "BANK_MANAGER",
            LabSource::BloodProducts => "BLOOD_PRODUCTS",
            LabSource::Abl => "ABL90_FLEX_PLUS",
        }
    }
}

/// 患者标识，所有申请共用
#[derive(Debug, Clone, Default)]
struct PatientIds {
    source_system: String,
    mrn: Option<String>,
    nhs_number: Option<String>,
    visit_number: Option<String>,
}

/// 一个申请及其结果
#[derive(Debug, Clone)]
pub struct OrderWithResults {
    pub order: LabOrderMsg,
    pub results: Vec<LabResultMsg>,
}

pub struct LabMessageBuilder<'a> {
    ctx: &'a Hl7Context,
}

impl<'a> LabMessageBuilder<'a> {
    pub fn new(ctx: &'a Hl7Context) -> Self {
        Self { ctx }
    }

    /// ORM^O01：每个允许的申请一条消息
    pub fn build_orders(&self, message: &Hl7Message, source_id: &str) -> Result<Vec<LabOrderMsg>> {
        Ok(self
            .build_all(message, source_id)?
            .into_iter()
            .map(|built| built.order)
            .collect())
    }

    /// ORU^R01：每个结果一条消息，药敏结果并入分离株
    pub fn build_results(&self, message: &Hl7Message, source_id: &str) -> Result<Vec<LabResultMsg>> {
        let built = self.build_all(message, source_id)?;
        let (sensitivities, mut orders): (Vec<_>, Vec<_>) = built
            .into_iter()
            .partition(|b| b.order.parent_sub_id.is_some());

        for sensitivity in sensitivities {
            if let Err(e) = reparent_sensitivity(&mut orders, sensitivity) {
                error!("Dropping sensitivity in message {}: {}", source_id, e);
            }
        }

        Ok(orders.into_iter().flat_map(|o| o.results).collect())
    }

    fn build_all(&self, message: &Hl7Message, source_id: &str) -> Result<Vec<OrderWithResults>> {
        let segments = SegmentSet::from_message(message);
        let ids = PatientIds {
            source_system: segments.msh.sending_application()?.to_string(),
            mrn: segments.pid.mrn().tolerate()?.map(str::to_string),
            nhs_number: segments.pid.nhs_number().tolerate()?.map(str::to_string),
            visit_number: segments.pv1.visit_number().tolerate()?.map(str::to_string),
        };
        let is_result = message.message_type == "ORU";

        match LabSource::detect(message)? {
            LabSource::WinPath => {}
            LabSource::BioConnect if is_result => return self.build_bio_connect(message, &ids, source_id),
            other => {
                return Err(Hl7Error::MessageIgnored(format!(
                    "{} lab {} not implemented for now",
                    other.coding_system(),
                    if is_result { "results" } else { "orders" }
                )))
            }
        }

        let mut built = Vec::new();
        for group in order_groups(message) {
            match self.build_order(&group, &ids, source_id, is_result, LabSource::WinPath) {
                Ok(Some(order)) => built.push(order),
                Ok(None) => {}
                Err(e) => error!("Skipping order in message {}: {}", source_id, e),
            }
        }
        Ok(built)
    }

    /// 床旁设备：一个申请、一个结果，出错时整条消息失败
    fn build_bio_connect(&self, message: &Hl7Message, ids: &PatientIds, source_id: &str) -> Result<Vec<OrderWithResults>> {
        let groups = order_groups(message);
        let [group] = groups.as_slice() else {
            return Err(Hl7Error::Inconsistency("BIO-CONNECT messages should only have one order".to_string()));
        };
        if group.observations.len() > 1 {
            return Err(Hl7Error::Inconsistency(
                "BIO-CONNECT messages should only have one OBX result segment".to_string(),
            ));
        }
        Ok(self
            .build_order(group, ids, source_id, true, LabSource::BioConnect)?
            .into_iter()
            .collect())
    }

    /// 构建单个申请；不在允许列表中的申请控制返回 `None`
    fn build_order(
        &self,
        group: &OrderGroup<'_>,
        ids: &PatientIds,
        source_id: &str,
        is_result: bool,
        source: LabSource,
    ) -> Result<Option<OrderWithResults>> {
        // 1. 申请控制：ORU可能没有ORC，视为结果
        let order_control = if group.orc.exists() {
            group.orc.order_control()?.to_string()
        } else if is_result {
            "RE".to_string()
        } else {
            return Err(Hl7Error::FieldNotPresent("ORC-1.1".to_string()));
        };
        let allowed = match source {
            LabSource::BioConnect => order_control == BIO_CONNECT_ORDER_CONTROL,
            _ => self.ctx.is_order_control_allowed(&order_control),
        };
        if !allowed {
            trace!("Ignoring order control {} in message {}", order_control, source_id);
            return Ok(None);
        }
        if !group.obr.exists() {
            return Err(Hl7Error::FieldNotPresent("OBR".to_string()));
        }

        // 2. 申请号交叉校验
        let obr_number = group.obr.placer_order_number();
        if group.orc.exists() {
            let orc_number = group.orc.placer_order_number().unwrap_or("");
            if orc_number != obr_number.unwrap_or("") {
                return Err(Hl7Error::Inconsistency(format!(
                    "ORC-2 {} does not match OBR-2 {}",
                    orc_number,
                    obr_number.unwrap_or("")
                )));
            }
        }

        let mut order = LabOrderMsg {
            source_message_id: source_id.to_string(),
            source_system: ids.source_system.clone(),
            mrn: ids.mrn.clone(),
            nhs_number: ids.nhs_number.clone(),
            visit_number: ids.visit_number.clone(),
            order_control_id: order_control,
            order_status: group.orc.order_status(),
            epic_care_order_number: obr_number.map(str::to_string),
            lab_specimen_number: group
                .orc
                .filler_order_number()
                .or_else(|| group.obr.filler_order_number())
                .unwrap_or_default()
                .to_string(),
            test_battery_local_code: group.obr.test_battery_code()?.to_string(),
            test_battery_coding_system: group.obr.test_battery_coding_system(),
            lab_department: group.obr.diagnostic_service(),
            result_status: group.obr.result_status(),
            specimen_type: group.obr.specimen_type(),
            collection_method: group.obr.collection_method(),
            parent_observation_identifier: group.obr.parent_observation_identifier(),
            parent_sub_id: group.obr.parent_sub_id(),
            ..Default::default()
        };

        // 3. 时间
        self.add_order_times(group, &mut order)?;

        // 床旁设备没有 Epic 申请号，OBR-2 是样本号
        if source == LabSource::BioConnect {
            order.lab_specimen_number = obr_number.unwrap_or_default().to_string();
            order.epic_care_order_number = None;
            order.test_battery_coding_system = Some(source.coding_system().to_string());
            order.requested_datetime = InterchangeValue::Unknown;
        }

        // 4. 临床信息与问卷
        order.clinical_information = match group.obr.relevant_clinical_info() {
            InterchangeValue::Save(info) => InterchangeValue::Save(info),
            _ => group.obr.reason_for_study(),
        };
        for note in &group.notes {
            let comment = note.comment();
            let mut parts = question_separator().splitn(&comment, 2);
            if let (Some(question), Some(answer)) = (parts.next(), parts.next()) {
                order.questions.insert(question.trim().to_string(), answer.trim().to_string());
            }
        }

        // 5. 结果
        let allow_text = order.parent_sub_id.is_some() || source == LabSource::BioConnect;
        let mut results: Vec<LabResultMsg> = Vec::new();
        for observation in &group.observations {
            match self.build_result(observation, &order, allow_text) {
                Ok(result) => merge_or_push(&mut results, result),
                Err(Hl7Error::SkipResult(reason)) => debug!("Skipping result: {}", reason),
                Err(e) => return Err(e),
            }
        }

        Ok(Some(OrderWithResults { order, results }))
    }

    fn add_order_times(&self, group: &OrderGroup<'_>, order: &mut LabOrderMsg) -> Result<()> {
        let obr = &group.obr;
        order.requested_datetime = obr.requested_datetime(self.ctx)?;
        order.collection_datetime = Some(
            obr.collection_datetime(self.ctx)?
                .ok_or_else(|| Hl7Error::Inconsistency("Collection time is required but missing".to_string()))?,
        );
        order.status_change_datetime = obr.status_change_datetime(self.ctx)?;
        order.sample_received_datetime = InterchangeValue::from_option(obr.specimen_received_datetime(self.ctx)?);

        // ORC-9 的含义取决于申请控制
        let transaction = group.orc.transaction_datetime(self.ctx)?;
        match order.order_control_id.as_str() {
            "NW" | "SN" => {
                order.order_datetime = InterchangeValue::from_option(transaction);
                order.status_change_datetime = transaction.or(order.status_change_datetime);
            }
            "NA" | "CR" | "CA" | "OC" => {
                order.status_change_datetime = transaction.or(order.status_change_datetime);
            }
            "SC" => {
                if order.result_status.as_deref() == Some("I") {
                    order.sample_received_datetime = InterchangeValue::from_option(transaction);
                }
                if order.status_change_datetime.is_none() {
                    order.status_change_datetime = transaction;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn build_result(&self, observation: &ObservationGroup<'_>, order: &LabOrderMsg, allow_text: bool) -> Result<LabResultMsg> {
        let obx = &observation.obx;
        let test_code = obx.identifier()?.to_string();
        let raw_type = obx.value_type().unwrap_or("");
        let value_type = LabValueType::from_hl7(raw_type);

        let mut result = LabResultMsg {
            source_message_id: order.source_message_id.clone(),
            source_system: order.source_system.clone(),
            mrn: order.mrn.clone(),
            nhs_number: order.nhs_number.clone(),
            visit_number: order.visit_number.clone(),
            epic_care_order_number: order.epic_care_order_number.clone(),
            lab_specimen_number: order.lab_specimen_number.clone(),
            test_battery_local_code: order.test_battery_local_code.clone(),
            collection_datetime: order.collection_datetime,
            test_item_coding_system: obx.coding_system(),
            observation_sub_id: obx.sub_id(),
            value_type,
            result_operator: "=".to_string(),
            units: obx.units(),
            abnormal_flags: obx.abnormal_flags(),
            result_status: obx.result_status(),
            result_time: order.status_change_datetime,
            notes: observation.notes_text(),
            test_item_local_code: test_code,
            ..Default::default()
        };

        match value_type {
            Some(LabValueType::Numeric) => {
                set_numeric_value(&mut result, obx.value());
                set_reference_range(&mut result, obx.reference_range());
            }
            _ if result.test_item_local_code == ISOLATE_CODE => {
                result.isolate = Some(build_isolate(observation, value_type)?);
            }
            Some(LabValueType::CodedEntry) if !allow_text => {
                return Err(Hl7Error::SkipResult(format!(
                    "Coded data which is not an ISOLATE test, instead is '{}'",
                    result.test_item_local_code
                )));
            }
            Some(LabValueType::CodedEntry) => {
                result.string_value = InterchangeValue::from_option(obx.coded_value(1));
            }
            Some(LabValueType::Text) if allow_text => {
                result.string_value = InterchangeValue::build_from_hl7(&obx.text_value());
            }
            _ => {
                return Err(Hl7Error::SkipResult(format!(
                    "value type '{}' for {} is not modelled",
                    raw_type, result.test_item_local_code
                )));
            }
        }
        Ok(result)
    }
}

fn build_isolate(observation: &ObservationGroup<'_>, value_type: Option<LabValueType>) -> Result<LabIsolateMsg> {
    let obx = &observation.obx;
    let mut isolate = LabIsolateMsg {
        isolate_id: obx.sub_id(),
        ..Default::default()
    };
    match value_type {
        Some(LabValueType::CodedEntry) => {
            isolate.isolate_code = obx.coded_value(1);
            isolate.isolate_name = obx.coded_value(2);
        }
        Some(LabValueType::Text) => {
            let text = obx.value().trim();
            match text.strip_suffix(CULTURE_SUFFIX) {
                Some(culture) => isolate.culture_type = InterchangeValue::Save(culture.trim().to_string()),
                None => isolate.quantity = InterchangeValue::build_from_hl7(text),
            }
        }
        _ => {
            return Err(Hl7Error::SkipResult(format!(
                "isolate value type {:?} is not modelled",
                obx.value_type()
            )))
        }
    }
    Ok(isolate)
}

/// 同一子ID的分离株合并为一个结果
fn merge_or_push(results: &mut Vec<LabResultMsg>, result: LabResultMsg) {
    if let Some(isolate) = &result.isolate {
        let existing = results.iter_mut().find(|r| {
            r.test_item_local_code == result.test_item_local_code && r.observation_sub_id == result.observation_sub_id
        });
        if let Some(existing) = existing {
            if let Some(current) = existing.isolate.as_mut() {
                current.merge(isolate.clone());
                existing.string_value = InterchangeValue::Unknown;
                return;
            }
        }
    }
    results.push(result);
}

fn set_numeric_value(result: &mut LabResultMsg, raw: &str) {
    let value = raw.trim();
    let (operator, number) = match value.chars().next() {
        Some(c @ ('<' | '>')) => (c.to_string(), &value[1..]),
        _ => ("=".to_string(), value),
    };
    result.result_operator = operator;
    result.numeric_value = match number.trim().parse::<f64>() {
        Ok(n) => InterchangeValue::Save(n),
        Err(_) => {
            warn!("Numeric result {} is not a number: '{}'", result.test_item_local_code, value);
            InterchangeValue::Delete
        }
    };
}

fn set_reference_range(result: &mut LabResultMsg, raw: &str) {
    let range = raw.trim();
    if range.is_empty() {
        return;
    }
    let parsed = if let Some(high) = range.strip_prefix('<') {
        high.trim().parse::<f64>().map(|h| (InterchangeValue::Delete, InterchangeValue::Save(h)))
    } else if let Some(low) = range.strip_prefix('>') {
        low.trim().parse::<f64>().map(|l| (InterchangeValue::Save(l), InterchangeValue::Delete))
    } else {
        let parts: Vec<&str> = range.split('-').collect();
        if parts.len() != 2 {
            error!("Reference range '{}' for {} has an unexpected shape", range, result.test_item_local_code);
            return;
        }
        parts[0]
            .trim()
            .parse::<f64>()
            .and_then(|low| parts[1].trim().parse::<f64>().map(|high| (InterchangeValue::Save(low), InterchangeValue::Save(high))))
    };

    match parsed {
        Ok((low, high)) => {
            result.reference_low = low;
            result.reference_high = high;
        }
        Err(e) => error!("Could not parse reference range '{}': {}", range, e),
    }
}

/// 把药敏申请的结果挂到第一个申请中匹配的分离株上
fn reparent_sensitivity(orders: &mut [OrderWithResults], sensitivity: OrderWithResults) -> Result<()> {
    let order = &sensitivity.order;
    let parent = orders.first_mut().and_then(|first| {
        first.results.iter_mut().find(|r| {
            r.epic_care_order_number == order.epic_care_order_number
                && Some(&r.test_item_local_code) == order.parent_observation_identifier.as_ref()
                && Some(&r.observation_sub_id) == order.parent_sub_id.as_ref()
        })
    });

    let isolate = parent
        .and_then(|p| p.isolate.as_mut())
        .ok_or_else(|| Hl7Error::Inconsistency("No parent order found for sensitivity".to_string()))?;
    isolate.clinical_information = order.clinical_information.clone();
    isolate.sensitivities.extend(sensitivity.results);
    Ok(())
}
