//! 住院/就诊
//!
//! ADT消息可以更新就诊的所有字段；检验和床旁消息只会创建最小就诊记录，
//! 不信任它们携带的就诊信息。就诊按就诊号查找，所属患者必须是消息的
//! 存活患者，或者已经并入该患者。

use crate::person;
use crate::row_state::RowState;
use crate::store::{StarStore, Timestamps};
use chrono::{DateTime, Utc};
use emap_core::{EmapError, HospitalVisit, Result};
use emap_interchange::{AdtEvent, AdtMessage, Doctor, InterchangeValue};
use tracing::{debug, info};

/// 已有就诊的ID、数据与生效时间；属于其他患者时报错
fn owned_visit(store: &StarStore, mrn_id: i64, encounter: &str) -> Result<Option<(i64, HospitalVisit, DateTime<Utc>)>> {
    let Some(row) = store.hospital_visits.find(|v| v.encounter == encounter) else {
        return Ok(None);
    };
    if row.data.mrn_id != mrn_id && person::live_mrn_id(store, row.data.mrn_id)? != mrn_id {
        return Err(EmapError::IncompatibleDatabaseState(format!(
            "Hospital visit {} belongs to MRN {}, not {}",
            encounter, row.data.mrn_id, mrn_id
        )));
    }
    Ok(Some((row.id, row.data.clone(), row.valid_from)))
}

fn find_or_new(store: &StarStore, mrn_id: i64, encounter: &str, source_system: &str, ts: Timestamps) -> Result<RowState<HospitalVisit>> {
    let state = match owned_visit(store, mrn_id, encounter)? {
        Some((id, data, _)) => {
            let mut state = RowState::existing(id, data, ts.valid_from, ts.stored_from);
            // 合并后就诊归到存活患者名下
            if state.data().mrn_id != mrn_id {
                state.data_mut().mrn_id = mrn_id;
            }
            state
        }
        None => RowState::created(
            HospitalVisit {
                mrn_id,
                encounter: encounter.to_string(),
                source_system: source_system.to_string(),
                ..Default::default()
            },
            ts.valid_from,
            ts.stored_from,
        ),
    };
    Ok(state)
}

pub fn visit_id(store: &StarStore, encounter: &str) -> Option<i64> {
    store.hospital_visits.find(|v| v.encounter == encounter).map(|row| row.id)
}

/// 检验/床旁数据引用的就诊：不存在时创建最小记录
pub fn get_or_create_minimal_visit(store: &mut StarStore, mrn_id: i64, encounter: &str, source_system: &str, ts: Timestamps) -> Result<i64> {
    let state = find_or_new(store, mrn_id, encounter, source_system, ts)?;
    if state.is_created() {
        info!("Created minimal hospital visit {} for MRN {}", encounter, mrn_id);
    }
    Ok(state.save_or_audit(&mut store.hospital_visits))
}

fn consultant_codes(doctors: &[Doctor]) -> Vec<String> {
    doctors.iter().filter_map(|d| d.consultant_code.clone()).collect()
}

/// 较旧的消息只补全空字段
fn assign<V: PartialEq>(
    state: &mut RowState<HospitalVisit>,
    stale: bool,
    value: InterchangeValue<V>,
    field: impl FnOnce(&mut HospitalVisit) -> &mut Option<V>,
) {
    if stale {
        state.assign_if_empty(value, field);
    } else {
        state.assign_interchange_value(value, field);
    }
}

/// 根据ADT消息创建或更新就诊；消息没有就诊号时返回 `None`
///
/// 撤销类事件只作用于已存在的就诊，找不到时返回 `RequiredDataMissing`。
/// 比已保存数据更早的消息不会覆盖已有的值，也不会清空字段。
pub fn update_from_adt(store: &mut StarStore, mrn_id: i64, msg: &AdtMessage, ts: Timestamps) -> Result<Option<i64>> {
    let Some(encounter) = msg.visit_number.as_deref() else {
        return Ok(None);
    };

    let existing = owned_visit(store, mrn_id, encounter)?;
    if existing.is_none() && msg.event.is_cancellation() {
        return Err(EmapError::RequiredDataMissing(format!(
            "{} for unknown hospital visit {}",
            msg.event_name(),
            encounter
        )));
    }
    let stale = matches!(existing, Some((_, _, valid_from)) if valid_from > ts.valid_from);
    if stale {
        debug!("Hospital visit {} is newer than message {}", encounter, msg.source_message_id);
    }

    let mut state = find_or_new(store, mrn_id, encounter, &msg.source_system, ts)?;
    if state.is_created() {
        info!("Created hospital visit {} for MRN {}", encounter, mrn_id);
    }

    assign(&mut state, stale, msg.patient_class.clone().map(|c| c.as_str().to_string()), |v| &mut v.patient_class);
    assign(&mut state, stale, msg.mode_of_arrival.clone(), |v| &mut v.arrival_method);
    assign(&mut state, stale, InterchangeValue::from_option(msg.patient_type.clone()), |v| &mut v.patient_type);
    assign(&mut state, stale, InterchangeValue::from_option(msg.hospital_service.clone()), |v| &mut v.hospital_service);
    assign(&mut state, stale, InterchangeValue::from_option(msg.admit_source.clone()), |v| &mut v.admit_source);

    let attending = consultant_codes(&msg.attending_doctors);
    if !attending.is_empty() && !stale && state.data().attending_consultants != attending {
        state.data_mut().attending_consultants = attending;
    }
    let referring = consultant_codes(&msg.referring_doctors);
    if !referring.is_empty() && !stale && state.data().referring_consultants != referring {
        state.data_mut().referring_consultants = referring;
    }

    match &msg.event {
        AdtEvent::AdmitPatient { admission_datetime } => {
            assign(&mut state, stale, admission_datetime.clone(), |v| &mut v.admission_time);
        }
        AdtEvent::RegisterPatient { presentation_datetime } => {
            assign(&mut state, stale, presentation_datetime.clone(), |v| &mut v.presentation_time);
        }
        AdtEvent::TransferPatient { admission_datetime } => {
            // 转科消息中的入院时间只用于补全
            state.assign_if_empty(admission_datetime.clone(), |v| &mut v.admission_time);
        }
        // 较旧的出院消息不补全出院信息
        AdtEvent::DischargePatient {
            discharge_datetime,
            discharge_disposition,
            discharge_location,
        } if !stale => {
            state.assign_if_present(discharge_datetime.or(Some(ts.valid_from)), |v| &mut v.discharge_time);
            state.assign_if_present(discharge_disposition.clone(), |v| &mut v.discharge_disposition);
            state.assign_if_present(discharge_location.clone(), |v| &mut v.discharge_destination);
        }
        AdtEvent::CancelAdmitPatient { .. } if !stale => {
            state.assign_if_different(None, |v| &mut v.admission_time);
        }
        AdtEvent::CancelDischargePatient { .. } if !stale => {
            state.assign_if_different(None, |v| &mut v.discharge_time);
            state.assign_if_different(None, |v| &mut v.discharge_disposition);
            state.assign_if_different(None, |v| &mut v.discharge_destination);
        }
        _ => {}
    }

    Ok(Some(state.save_or_audit(&mut store.hospital_visits)))
}

/// A45：把就诊移到当前患者名下
pub fn move_visit(store: &mut StarStore, encounter: &str, mrn_id: i64, ts: Timestamps) -> Result<i64> {
    let row = store
        .hospital_visits
        .find(|v| v.encounter == encounter)
        .ok_or_else(|| EmapError::RequiredDataMissing(format!("Hospital visit {} to move does not exist", encounter)))?;

    let mut state = RowState::existing(row.id, row.data.clone(), ts.valid_from, ts.stored_from);
    if state.data().mrn_id != mrn_id {
        state.data_mut().mrn_id = mrn_id;
    }
    let id = state.save_or_audit(&mut store.hospital_visits);
    info!("Moved hospital visit {} to MRN {}", encounter, mrn_id);
    Ok(id)
}
