//! 检验申请、结果、分离株与药敏

use crate::row_state::RowState;
use crate::store::{StarStore, Timestamps};
use emap_core::{LabIsolate, LabOrder, LabResult, LabSensitivity};
use emap_interchange::{InterchangeValue, LabIsolateMsg, LabOrderMsg, LabResultMsg, LabValueType};
use tracing::{debug, info};

/// 申请的业务键
struct OrderKey<'a> {
    epic_care_order_number: Option<&'a str>,
    lab_specimen_number: &'a str,
    test_battery_code: &'a str,
    source_system: &'a str,
}

impl OrderKey<'_> {
    fn matches(&self, order: &LabOrder) -> bool {
        order.lab_specimen_number == self.lab_specimen_number
            && order.test_battery_code == self.test_battery_code
            && order.source_system == self.source_system
            && (order.epic_care_order_number.is_none()
                || self.epic_care_order_number.is_none()
                || order.epic_care_order_number.as_deref() == self.epic_care_order_number)
    }
}

fn order_state(store: &StarStore, key: &OrderKey<'_>, mrn_id: i64, visit_id: Option<i64>, ts: Timestamps) -> RowState<LabOrder> {
    let mut state = RowState::get_or_create(
        &store.lab_orders,
        |o: &LabOrder| key.matches(o),
        || LabOrder {
            mrn_id,
            hospital_visit_id: visit_id,
            lab_specimen_number: key.lab_specimen_number.to_string(),
            test_battery_code: key.test_battery_code.to_string(),
            source_system: key.source_system.to_string(),
            ..Default::default()
        },
        ts.valid_from,
        ts.stored_from,
    );
    state.assign_if_present(key.epic_care_order_number.map(str::to_string), |o| &mut o.epic_care_order_number);
    state.assign_if_present(visit_id, |o| &mut o.hospital_visit_id);
    state
}

/// 保存检验申请
pub fn process_order(store: &mut StarStore, msg: &LabOrderMsg, mrn_id: i64, visit_id: Option<i64>, ts: Timestamps) -> i64 {
    let key = OrderKey {
        epic_care_order_number: msg.epic_care_order_number.as_deref(),
        lab_specimen_number: &msg.lab_specimen_number,
        test_battery_code: &msg.test_battery_local_code,
        source_system: &msg.source_system,
    };
    let mut state = order_state(store, &key, mrn_id, visit_id, ts);

    state.assign_interchange_value(msg.order_datetime.clone(), |o| &mut o.order_datetime);
    state.assign_interchange_value(msg.requested_datetime.clone(), |o| &mut o.request_datetime);
    state.assign_if_present(msg.collection_datetime, |o| &mut o.collection_datetime);
    state.assign_interchange_value(msg.sample_received_datetime.clone(), |o| &mut o.sample_received_datetime);
    state.assign_if_present(msg.status_change_datetime, |o| &mut o.status_change_datetime);
    state.assign_if_present(msg.lab_department.clone(), |o| &mut o.lab_department);
    state.assign_if_present(msg.result_status.clone(), |o| &mut o.result_status);
    state.assign_interchange_value(msg.specimen_type.clone(), |o| &mut o.specimen_type);
    state.assign_interchange_value(msg.collection_method.clone(), |o| &mut o.collection_method);
    state.assign_interchange_value(msg.clinical_information.clone(), |o| &mut o.clinical_information);

    let missing: Vec<(String, String)> = msg
        .questions
        .iter()
        .filter(|(q, a)| state.data().questions.get(*q) != Some(*a))
        .map(|(q, a)| (q.clone(), a.clone()))
        .collect();
    if !missing.is_empty() {
        state.data_mut().questions.extend(missing);
    }

    let created = state.is_created();
    let id = state.save_or_audit(&mut store.lab_orders);
    if created {
        info!("Created lab order {} ({})", id, msg.lab_specimen_number);
    }
    id
}

/// 保存检验结果（及其分离株、药敏）
pub fn process_result(store: &mut StarStore, msg: &LabResultMsg, mrn_id: i64, visit_id: Option<i64>, ts: Timestamps) -> i64 {
    let key = OrderKey {
        epic_care_order_number: msg.epic_care_order_number.as_deref(),
        lab_specimen_number: &msg.lab_specimen_number,
        test_battery_code: &msg.test_battery_local_code,
        source_system: &msg.source_system,
    };
    let mut order = order_state(store, &key, mrn_id, visit_id, ts);
    order.assign_if_present(msg.collection_datetime, |o| &mut o.collection_datetime);
    let order_id = order.save_or_audit(&mut store.lab_orders);

    let result_id = save_result(store, order_id, msg, ts);
    if let Some(isolate) = &msg.isolate {
        save_isolate(store, result_id, isolate, ts);
    }
    result_id
}

fn save_result(store: &mut StarStore, order_id: i64, msg: &LabResultMsg, ts: Timestamps) -> i64 {
    let mut state = RowState::get_or_create(
        &store.lab_results,
        |r: &LabResult| {
            r.lab_order_id == order_id && r.test_item_code == msg.test_item_local_code && r.observation_sub_id == msg.observation_sub_id
        },
        || LabResult {
            lab_order_id: order_id,
            test_item_code: msg.test_item_local_code.clone(),
            observation_sub_id: msg.observation_sub_id.clone(),
            ..Default::default()
        },
        ts.valid_from,
        ts.stored_from,
    );

    // 已保存的结果比消息更新时不覆盖
    if !state.is_created() {
        let stored = state.data().result_last_modified_time;
        if matches!((stored, msg.result_time), (Some(s), Some(m)) if s > m) {
            debug!("Lab result {} is newer than message {}", msg.test_item_local_code, msg.source_message_id);
            return state.save_or_audit(&mut store.lab_results);
        }
    }

    let value_type = match msg.value_type {
        Some(LabValueType::Numeric) => "NUMERIC",
        Some(LabValueType::CodedEntry) => "CODED",
        Some(LabValueType::Text) | None => "TEXT",
    };
    if state.data().value_type != value_type {
        state.data_mut().value_type = value_type.to_string();
    }
    state.assign_interchange_value(msg.numeric_value.clone(), |r| &mut r.numeric_value);
    state.assign_interchange_value(msg.string_value.clone(), |r| &mut r.string_value);
    state.assign_if_present(Some(msg.result_operator.clone()), |r| &mut r.result_operator);
    state.assign_interchange_value(msg.units.clone(), |r| &mut r.units);
    state.assign_interchange_value(msg.reference_low.clone(), |r| &mut r.reference_low);
    state.assign_interchange_value(msg.reference_high.clone(), |r| &mut r.reference_high);
    state.assign_interchange_value(msg.abnormal_flags.clone(), |r| &mut r.abnormal_flag);
    state.assign_if_present(msg.result_status.clone(), |r| &mut r.result_status);
    state.assign_if_present(msg.result_time, |r| &mut r.result_last_modified_time);
    state.assign_interchange_value(msg.notes.clone(), |r| &mut r.comment);
    state.save_or_audit(&mut store.lab_results)
}

fn save_isolate(store: &mut StarStore, result_id: i64, msg: &LabIsolateMsg, ts: Timestamps) {
    let code = msg.isolate_code.clone().unwrap_or_else(|| msg.isolate_id.clone());
    let mut state = RowState::get_or_create(
        &store.lab_isolates,
        |i: &LabIsolate| i.lab_result_id == result_id && i.isolate_code == code,
        || LabIsolate {
            lab_result_id: result_id,
            isolate_code: code.clone(),
            ..Default::default()
        },
        ts.valid_from,
        ts.stored_from,
    );
    state.assign_if_present(msg.isolate_name.clone(), |i| &mut i.isolate_name);
    state.assign_interchange_value(msg.culture_type.clone(), |i| &mut i.culture_type);
    state.assign_interchange_value(msg.quantity.clone(), |i| &mut i.quantity);
    state.assign_interchange_value(msg.clinical_information.clone(), |i| &mut i.clinical_information);
    let isolate_id = state.save_or_audit(&mut store.lab_isolates);

    for sensitivity in &msg.sensitivities {
        let value = match &sensitivity.string_value {
            InterchangeValue::Save(v) => InterchangeValue::Save(v.clone()),
            InterchangeValue::Delete => InterchangeValue::Delete,
            InterchangeValue::Unknown => sensitivity.numeric_value.clone().map(|n| n.to_string()),
        };
        let mut state = RowState::get_or_create(
            &store.lab_sensitivities,
            |s: &LabSensitivity| s.lab_isolate_id == isolate_id && s.agent == sensitivity.test_item_local_code,
            || LabSensitivity {
                lab_isolate_id: isolate_id,
                agent: sensitivity.test_item_local_code.clone(),
                ..Default::default()
            },
            ts.valid_from,
            ts.stored_from,
        );
        state.assign_interchange_value(value, |s| &mut s.sensitivity);
        state.assign_if_present(sensitivity.result_time, |s| &mut s.reporting_datetime);
        state.save_or_audit(&mut store.lab_sensitivities);
    }
}
