//! 床旁观察

use crate::row_state::RowState;
use crate::store::{StarStore, Timestamps};
use emap_core::VisitObservation;
use emap_interchange::Flowsheet;
use tracing::debug;

/// 按 (就诊, 观察类型, 观察时间) 查找或创建，再更新取值
pub fn process_flowsheet(store: &mut StarStore, msg: &Flowsheet, visit_id: i64, ts: Timestamps) -> i64 {
    let mut state = RowState::get_or_create(
        &store.visit_observations,
        |o: &VisitObservation| {
            o.hospital_visit_id == visit_id
                && o.observation_type == msg.flowsheet_id
                && o.observation_datetime == msg.observation_time
        },
        || VisitObservation {
            hospital_visit_id: visit_id,
            observation_type: msg.flowsheet_id.clone(),
            observation_datetime: msg.observation_time,
            source_system: msg.source_system.clone(),
            ..Default::default()
        },
        ts.valid_from,
        ts.stored_from,
    );

    if !state.is_created() {
        let stored_from = store
            .visit_observations
            .find(|o| o.hospital_visit_id == visit_id && o.observation_type == msg.flowsheet_id && o.observation_datetime == msg.observation_time)
            .map(|row| row.valid_from);
        if matches!(stored_from, Some(stored) if stored > ts.valid_from) {
            debug!("Flowsheet {} already has a newer value", msg.flowsheet_id);
            return state.save_or_audit(&mut store.visit_observations);
        }
    }

    state.assign_interchange_value(msg.numeric_value.clone(), |o| &mut o.value_as_real);
    state.assign_interchange_value(msg.string_value.clone(), |o| &mut o.value_as_text);
    state.assign_interchange_value(msg.date_value.clone(), |o| &mut o.value_as_date);
    state.assign_interchange_value(msg.unit.clone(), |o| &mut o.unit);
    state.assign_interchange_value(msg.comment.clone(), |o| &mut o.comment);
    state.save_or_audit(&mut store.visit_observations)
}
