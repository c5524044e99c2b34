//! 患者身份与人口统计
//!
//! MRN查找/创建、合并后的存活映射、标识变更与人口统计更新。

use crate::row_state::RowState;
use crate::store::{StarStore, Timestamps};
use emap_core::{CoreDemographic, EmapError, Mrn, MrnToLive, Result};
use emap_interchange::{AdtMessage, PreviousIdentifiers};
use tracing::{debug, info};

/// 按MRN或NHS号查找患者，必要时补全另一个标识；找不到则新建。
/// 返回当前存活的MRN ID。
pub fn get_or_create_mrn(
    store: &mut StarStore,
    mrn: Option<&str>,
    nhs_number: Option<&str>,
    source_system: &str,
    ts: Timestamps,
) -> Result<i64> {
    if mrn.is_none() && nhs_number.is_none() {
        return Err(EmapError::RequiredDataMissing("No MRN or NHS number in message".to_string()));
    }

    let mut state = RowState::get_or_create(
        &store.mrns,
        |m: &Mrn| m.matches(mrn, nhs_number),
        || Mrn {
            mrn: mrn.map(str::to_string),
            nhs_number: nhs_number.map(str::to_string),
            source_system: source_system.to_string(),
        },
        ts.valid_from,
        ts.stored_from,
    );

    if state.is_created() {
        let id = state.save_or_audit(&mut store.mrns);
        store.mrn_to_live.insert(MrnToLive { mrn_id: id, live_mrn_id: id }, ts.valid_from, ts.stored_from);
        info!("Created MRN {} ({:?} / {:?})", id, mrn, nhs_number);
        return Ok(id);
    }

    // 只补全此前未知的标识
    if state.data().mrn.is_none() {
        state.assign_if_present(mrn.map(str::to_string), |m| &mut m.mrn);
    }
    if state.data().nhs_number.is_none() {
        state.assign_if_present(nhs_number.map(str::to_string), |m| &mut m.nhs_number);
    }
    let id = state.save_or_audit(&mut store.mrns);
    live_mrn_id(store, id)
}

/// 合并后的存活MRN
pub fn live_mrn_id(store: &StarStore, mrn_id: i64) -> Result<i64> {
    store
        .mrn_to_live
        .find(|m| m.mrn_id == mrn_id)
        .map(|row| row.data.live_mrn_id)
        .ok_or_else(|| EmapError::IncompatibleDatabaseState(format!("MRN {} has no live mapping", mrn_id)))
}

/// 把被淘汰患者（及此前并入它的所有MRN）指向存活患者
pub fn merge(store: &mut StarStore, retired: &PreviousIdentifiers, surviving_live_id: i64, source_system: &str, ts: Timestamps) -> Result<()> {
    let retired_live_id = get_or_create_mrn(
        store,
        retired.previous_mrn.as_deref(),
        retired.previous_nhs_number.as_deref(),
        source_system,
        ts,
    )?;
    if retired_live_id == surviving_live_id {
        debug!("MRN {} already merged into {}", retired_live_id, surviving_live_id);
        return Ok(());
    }

    let aliases: Vec<(i64, MrnToLive)> = store
        .mrn_to_live
        .filter(|m| m.live_mrn_id == retired_live_id)
        .map(|row| (row.id, row.data.clone()))
        .collect();
    for (id, mapping) in aliases {
        let mut state = RowState::existing(id, mapping, ts.valid_from, ts.stored_from);
        if state.data().live_mrn_id != surviving_live_id {
            state.data_mut().live_mrn_id = surviving_live_id;
        }
        state.save_or_audit(&mut store.mrn_to_live);
    }
    info!("Merged MRN {} into {}", retired_live_id, surviving_live_id);
    Ok(())
}

/// A47：把旧标识改为消息中的新标识
pub fn change_identifiers(store: &mut StarStore, previous: &PreviousIdentifiers, msg: &AdtMessage, ts: Timestamps) -> Result<()> {
    let new_mrn = msg.mrn.as_deref();
    if let Some(new_mrn) = new_mrn {
        if store.mrns.find(|m| m.mrn.as_deref() == Some(new_mrn)).is_some() {
            return Err(EmapError::IncompatibleDatabaseState(format!(
                "Cannot change identifiers to MRN {} which already exists",
                new_mrn
            )));
        }
    }

    let previous_mrn = previous.previous_mrn.as_deref();
    let previous_nhs = previous.previous_nhs_number.as_deref();
    let Some(row) = store.mrns.find(|m| m.matches(previous_mrn, previous_nhs)) else {
        // 旧标识从未出现过：直接按新标识建档
        get_or_create_mrn(store, new_mrn, msg.nhs_number.as_deref(), &msg.source_system, ts)?;
        return Ok(());
    };

    let mut state = RowState::existing(row.id, row.data.clone(), ts.valid_from, ts.stored_from);
    state.assign_if_present(new_mrn.map(str::to_string), |m| &mut m.mrn);
    state.assign_if_present(msg.nhs_number.clone(), |m| &mut m.nhs_number);
    let id = state.save_or_audit(&mut store.mrns);
    info!("Changed identifiers of MRN {} to {:?}", id, new_mrn);
    Ok(())
}

/// 更新人口统计；只有比已保存数据更新的消息才会覆盖
pub fn update_demographics(store: &mut StarStore, mrn_id: i64, msg: &AdtMessage, ts: Timestamps) {
    let mut state = RowState::get_or_create(
        &store.demographics,
        |d: &CoreDemographic| d.mrn_id == mrn_id,
        || CoreDemographic {
            mrn_id,
            ..Default::default()
        },
        ts.valid_from,
        ts.stored_from,
    );

    if !state.is_created() {
        let current = store.demographics.find(|d| d.mrn_id == mrn_id).map(|row| row.valid_from);
        if matches!(current, Some(stored) if stored > ts.valid_from) {
            debug!("Demographics of MRN {} are newer than message {}", mrn_id, msg.source_message_id);
            return;
        }
    }

    state.assign_interchange_value(msg.patient_given_name.clone(), |d| &mut d.firstname);
    state.assign_interchange_value(msg.patient_middle_name.clone(), |d| &mut d.middlename);
    state.assign_interchange_value(msg.patient_family_name.clone(), |d| &mut d.lastname);
    state.assign_interchange_value(msg.patient_title.clone(), |d| &mut d.title);
    state.assign_interchange_value(msg.patient_birth_date.clone(), |d| &mut d.datetime_of_birth);
    state.assign_interchange_value(msg.patient_birth_date_only.clone(), |d| &mut d.date_of_birth);
    state.assign_interchange_value(msg.patient_sex.clone(), |d| &mut d.sex);
    state.assign_interchange_value(msg.patient_zip_or_postal_code.clone(), |d| &mut d.home_postcode);
    state.assign_interchange_value(msg.ethnic_group.clone(), |d| &mut d.ethnicity);
    state.assign_interchange_value(msg.patient_religion.clone(), |d| &mut d.religion);
    state.assign_interchange_value(msg.patient_is_alive.clone(), |d| &mut d.alive);
    state.assign_interchange_value(msg.patient_death_datetime.clone(), |d| &mut d.datetime_of_death);
    state.assign_interchange_value(msg.patient_death_datetime.clone().map(|t| t.date_naive()), |d| &mut d.date_of_death);

    if state.is_created() || state.is_changed() {
        debug!("Saving demographics for MRN {}", mrn_id);
    }
    state.save_or_audit(&mut store.demographics);
}

/// A29：删除患者的人口统计与全部就诊
pub fn delete_person_information(store: &mut StarStore, mrn_id: i64, ts: Timestamps) {
    let demographics: Vec<i64> = store.demographics.filter(|d| d.mrn_id == mrn_id).map(|r| r.id).collect();
    for id in demographics {
        store.demographics.delete(id, ts.valid_from, ts.stored_from);
    }

    let visits: Vec<i64> = store.hospital_visits.filter(|v| v.mrn_id == mrn_id).map(|r| r.id).collect();
    for visit_id in &visits {
        let location_visits: Vec<i64> = store
            .location_visits
            .filter(|lv| lv.hospital_visit_id == *visit_id)
            .map(|r| r.id)
            .collect();
        for id in location_visits {
            store.location_visits.delete(id, ts.valid_from, ts.stored_from);
        }
        store.hospital_visits.delete(*visit_id, ts.valid_from, ts.stored_from);
    }
    info!("Deleted person information for MRN {} ({} visits)", mrn_id, visits.len());
}
