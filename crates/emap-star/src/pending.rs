//! 计划移动（待转科等）

use crate::location::get_or_create_location;
use crate::row_state::RowState;
use crate::store::{StarStore, Timestamps};
use emap_core::PlannedMovement;
use emap_interchange::{AdtEvent, AdtMessage, PendingType};
use tracing::{debug, info};

/// 处理与计划移动有关的事件，其他事件忽略
///
/// 计划移动只来自 A15，因此只有转科类的撤销需要查找它们。
pub fn process_pending(store: &mut StarStore, visit_id: i64, msg: &AdtMessage, ts: Timestamps) {
    match &msg.event {
        AdtEvent::PendingTransfer { pending_location } => {
            let location_id = pending_location.get().map(|l| get_or_create_location(store, l, ts));
            let id = store.planned_movements.insert(
                PlannedMovement {
                    hospital_visit_id: visit_id,
                    location_id,
                    event_type: PendingType::Transfer.to_string(),
                    event_datetime: Some(ts.valid_from),
                    cancelled: false,
                    cancelled_datetime: None,
                },
                ts.valid_from,
                ts.stored_from,
            );
            info!("Created planned movement {} for visit {}", id, visit_id);
        }
        AdtEvent::CancelPendingTransfer {
            pending_location,
            cancelled_datetime,
        } => {
            let location_id = pending_location.get().map(|l| get_or_create_location(store, l, ts));
            cancel_matching(store, visit_id, location_id, PendingType::Transfer, cancelled_datetime.unwrap_or(ts.valid_from), ts);
        }
        AdtEvent::CancelTransferPatient { cancelled_datetime } => {
            cancel_matching(store, visit_id, None, PendingType::Transfer, cancelled_datetime.unwrap_or(ts.valid_from), ts);
        }
        _ => {}
    }
}

/// 取消最近一个匹配的计划移动；没有时什么都不做。
/// `location_id` 为 `None` 时不按位置筛选。
fn cancel_matching(
    store: &mut StarStore,
    visit_id: i64,
    location_id: Option<i64>,
    pending_type: PendingType,
    cancelled_at: chrono::DateTime<chrono::Utc>,
    ts: Timestamps,
) {
    let event_type = pending_type.to_string();
    let matching = store
        .planned_movements
        .filter(|pm| {
            pm.hospital_visit_id == visit_id
                && !pm.cancelled
                && pm.event_type == event_type
                && (location_id.is_none() || pm.location_id == location_id)
        })
        .max_by_key(|row| row.data.event_datetime)
        .map(|row| (row.id, row.data.clone()));

    let Some((id, movement)) = matching else {
        debug!("No pending {} to cancel for visit {}", event_type, visit_id);
        return;
    };

    let mut state = RowState::existing(id, movement, ts.valid_from, ts.stored_from);
    state.data_mut().cancelled = true;
    state.assign_if_different(Some(cancelled_at), |pm| &mut pm.cancelled_datetime);
    state.save_or_audit(&mut store.planned_movements);
    info!("Cancelled planned movement {} for visit {}", id, visit_id);
}
