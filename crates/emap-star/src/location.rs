//! 位置层级与位置停留
//!
//! HL7位置串 `ward^room^bed` 拆成 病区 / 房间 / 床位 三级，`null` 表示该级缺失。
//! 每次处理最多关闭一个打开的停留并打开一个新的停留。

use crate::row_state::RowState;
use crate::store::{StarStore, Timestamps};
use chrono::{DateTime, Utc};
use emap_core::{Bed, Department, EmapError, Location, LocationVisit, Result, Room};
use emap_interchange::{AdtEvent, AdtMessage};
use tracing::{debug, info, warn};

const MISSING_PART: &str = "null";

fn part(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty() && *v != MISSING_PART)
}

/// 查找或创建位置及其层级
pub fn get_or_create_location(store: &mut StarStore, location_string: &str, ts: Timestamps) -> i64 {
    if let Some(row) = store.locations.find(|l| l.location_string == location_string) {
        return row.id;
    }

    let mut parts = location_string.split('^');
    let (ward, room, bed) = (part(parts.next()), part(parts.next()), part(parts.next()));

    let department_id = ward.map(|ward| {
        match store.departments.find(|d| d.hl7_string == ward) {
            Some(row) => row.id,
            None => store.departments.insert(Department { hl7_string: ward.to_string() }, ts.valid_from, ts.stored_from),
        }
    });
    let room_id = match (department_id, room) {
        (Some(department_id), Some(room)) => Some(
            match store.rooms.find(|r| r.department_id == department_id && r.hl7_string == room) {
                Some(row) => row.id,
                None => store.rooms.insert(
                    Room {
                        department_id,
                        hl7_string: room.to_string(),
                    },
                    ts.valid_from,
                    ts.stored_from,
                ),
            },
        ),
        _ => None,
    };
    let bed_id = match (room_id, bed) {
        (Some(room_id), Some(bed)) => Some(match store.beds.find(|b| b.room_id == room_id && b.hl7_string == bed) {
            Some(row) => row.id,
            None => store.beds.insert(
                Bed {
                    room_id,
                    hl7_string: bed.to_string(),
                },
                ts.valid_from,
                ts.stored_from,
            ),
        }),
        _ => None,
    };

    let id = store.locations.insert(
        Location {
            location_string: location_string.to_string(),
            department_id,
            room_id,
            bed_id,
        },
        ts.valid_from,
        ts.stored_from,
    );
    info!("Created location {} ({})", id, location_string);
    id
}

fn open_location_visit(store: &StarStore, visit_id: i64) -> Option<(i64, LocationVisit)> {
    store
        .location_visits
        .filter(|lv| lv.hospital_visit_id == visit_id && lv.is_open())
        .max_by_key(|row| row.data.admission_time)
        .map(|row| (row.id, row.data.clone()))
}

fn last_closed_location_visit(store: &StarStore, visit_id: i64) -> Option<(i64, LocationVisit)> {
    store
        .location_visits
        .filter(|lv| lv.hospital_visit_id == visit_id && !lv.is_open())
        .max_by_key(|row| row.data.discharge_time)
        .map(|row| (row.id, row.data.clone()))
}

/// 离开时间早于入住时间时不关闭，返回 `false`
fn close(store: &mut StarStore, id: i64, visit: LocationVisit, discharge_time: DateTime<Utc>, inferred: bool, ts: Timestamps) -> bool {
    if matches!(visit.admission_time, Some(admission) if discharge_time < admission) {
        warn!(
            "Refusing to close location visit {} at {} before its admission {:?}",
            id, discharge_time, visit.admission_time
        );
        return false;
    }
    let mut state = RowState::existing(id, visit, ts.valid_from, ts.stored_from);
    state.assign_if_different(Some(discharge_time), |lv| &mut lv.discharge_time);
    if state.data().inferred_discharge != inferred {
        state.data_mut().inferred_discharge = inferred;
    }
    state.save_or_audit(&mut store.location_visits);
    true
}

fn open(store: &mut StarStore, visit_id: i64, location_id: i64, admission_time: DateTime<Utc>, inferred: bool, ts: Timestamps) -> i64 {
    store.location_visits.insert(
        LocationVisit {
            hospital_visit_id: visit_id,
            location_id,
            admission_time: Some(admission_time),
            discharge_time: None,
            parent_location_visit_id: None,
            inferred_admission: inferred,
            inferred_discharge: false,
        },
        ts.valid_from,
        ts.stored_from,
    )
}

/// 根据ADT消息维护就诊的位置停留
pub fn process_location(store: &mut StarStore, visit_id: i64, msg: &AdtMessage, ts: Timestamps) -> Result<()> {
    match &msg.event {
        AdtEvent::DischargePatient { discharge_datetime, .. } => {
            if let Some((id, lv)) = open_location_visit(store, visit_id) {
                close(store, id, lv, discharge_datetime.unwrap_or(ts.valid_from), false, ts);
            }
            Ok(())
        }
        AdtEvent::CancelAdmitPatient { .. } => {
            // 撤销入院：删除打开的停留（保留审计）
            if let Some((id, _)) = open_location_visit(store, visit_id) {
                store.location_visits.delete(id, ts.valid_from, ts.stored_from);
            }
            Ok(())
        }
        AdtEvent::CancelTransferPatient { .. } => {
            if let Some((id, _)) = open_location_visit(store, visit_id) {
                store.location_visits.delete(id, ts.valid_from, ts.stored_from);
            }
            reopen_last(store, visit_id, ts);
            Ok(())
        }
        AdtEvent::CancelDischargePatient { .. } => {
            if open_location_visit(store, visit_id).is_none() {
                reopen_last(store, visit_id, ts);
            }
            Ok(())
        }
        AdtEvent::SwapLocations { .. } => Err(EmapError::Internal("SwapLocations is handled by swap_locations".to_string())),
        event => {
            let Some(location_string) = msg.full_location_string.get() else {
                return Ok(());
            };
            let location_id = get_or_create_location(store, location_string, ts);
            let explicit = event.is_explicit_movement();
            let arrival = match event {
                AdtEvent::AdmitPatient { admission_datetime } => admission_datetime.get().copied(),
                _ => None,
            }
            .unwrap_or(ts.valid_from);
            if let (AdtEvent::TransferPatient { .. }, Some(previous)) = (event, msg.previous_location_string.as_deref()) {
                infer_previous_stay(store, visit_id, previous, location_id, arrival, ts);
            }
            move_to(store, visit_id, location_id, arrival, !explicit, ts);
            Ok(())
        }
    }
}

/// 转科时没有打开的停留：PV1-6 给出的前一位置记为已关闭的推断停留
fn infer_previous_stay(store: &mut StarStore, visit_id: i64, previous: &str, location_id: i64, arrival: DateTime<Utc>, ts: Timestamps) {
    if open_location_visit(store, visit_id).is_some() {
        return;
    }
    let previous_id = get_or_create_location(store, previous, ts);
    if previous_id == location_id {
        return;
    }
    let id = store.location_visits.insert(
        LocationVisit {
            hospital_visit_id: visit_id,
            location_id: previous_id,
            admission_time: None,
            discharge_time: Some(arrival),
            parent_location_visit_id: None,
            inferred_admission: true,
            inferred_discharge: false,
        },
        ts.valid_from,
        ts.stored_from,
    );
    debug!("Inferred previous location visit {} at {}", id, previous);
}

/// 关闭当前停留并在新位置打开；位置相同或到达时间早于当前停留时不做任何事
fn move_to(store: &mut StarStore, visit_id: i64, location_id: i64, arrival: DateTime<Utc>, inferred: bool, ts: Timestamps) {
    if let Some((id, lv)) = open_location_visit(store, visit_id) {
        if lv.location_id == location_id {
            debug!("Visit {} already at location {}", visit_id, location_id);
            return;
        }
        if !close(store, id, lv, arrival, inferred, ts) {
            return;
        }
    }
    open(store, visit_id, location_id, arrival, inferred, ts);
}

fn reopen_last(store: &mut StarStore, visit_id: i64, ts: Timestamps) {
    match last_closed_location_visit(store, visit_id) {
        Some((id, lv)) => {
            let mut state = RowState::existing(id, lv, ts.valid_from, ts.stored_from);
            state.assign_if_different(None, |lv| &mut lv.discharge_time);
            state.data_mut().inferred_discharge = false;
            state.save_or_audit(&mut store.location_visits);
        }
        None => debug!("No previous location visit to reopen for visit {}", visit_id),
    }
}

/// A17：两个就诊交换当前位置
pub fn swap_locations(store: &mut StarStore, visit_id: i64, other_visit_id: i64, ts: Timestamps) -> Result<()> {
    let (_, current) = open_location_visit(store, visit_id)
        .ok_or_else(|| EmapError::RequiredDataMissing(format!("Visit {} has no open location", visit_id)))?;
    let (_, other) = open_location_visit(store, other_visit_id)
        .ok_or_else(|| EmapError::RequiredDataMissing(format!("Visit {} has no open location", other_visit_id)))?;

    move_to(store, visit_id, other.location_id, ts.valid_from, false, ts);
    move_to(store, other_visit_id, current.location_id, ts.valid_from, false, ts);
    Ok(())
}
