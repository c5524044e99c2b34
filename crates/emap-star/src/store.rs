//! 内存双时态存储
//!
//! 每张表保存当前行与审计行。修改当前行必须经过 [`Table::update`]
//! 或 [`Table::delete`]，两者都会先生成审计行。
//!
//! [`StarStore::begin`] 之后，每张表记录首次被改动的行的原值，
//! [`StarStore::rollback`] 只恢复这些行，代价与本条消息改动的行数成正比。

use chrono::{DateTime, Utc};
use emap_core::{
    AuditRow, Bed, CoreDemographic, Department, HospitalVisit, LabIsolate, LabOrder, LabResult, LabSensitivity,
    Location, LocationVisit, Mrn, MrnToLive, PlannedMovement, Room, Temporal, VisitObservation,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 一条消息的时间：事实生效时间与处理时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub valid_from: DateTime<Utc>,
    pub stored_from: DateTime<Utc>,
}

impl Timestamps {
    pub fn new(valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> Self {
        Self { valid_from, stored_from }
    }
}

/// 检查点：开始时的ID与审计长度，以及被改动行的原值（`None` 表示新插入）
#[derive(Debug, Clone)]
struct Checkpoint<T> {
    next_id: i64,
    audit_len: usize,
    originals: BTreeMap<i64, Option<Temporal<T>>>,
}

fn no_checkpoint<T>() -> Option<Checkpoint<T>> {
    None
}

/// 一张双时态表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table<T> {
    next_id: i64,
    rows: BTreeMap<i64, Temporal<T>>,
    audit: Vec<AuditRow<T>>,
    #[serde(skip, default = "no_checkpoint")]
    checkpoint: Option<Checkpoint<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
            audit: Vec::new(),
            checkpoint: None,
        }
    }
}

impl<T: Clone> Table<T> {
    pub fn begin(&mut self) {
        self.checkpoint = Some(Checkpoint {
            next_id: self.next_id,
            audit_len: self.audit.len(),
            originals: BTreeMap::new(),
        });
    }

    pub fn commit(&mut self) {
        self.checkpoint = None;
    }

    /// 恢复到 [`Table::begin`] 时的状态；没有检查点时什么都不做
    pub fn rollback(&mut self) {
        let Some(checkpoint) = self.checkpoint.take() else {
            return;
        };
        self.next_id = checkpoint.next_id;
        self.audit.truncate(checkpoint.audit_len);
        for (id, original) in checkpoint.originals {
            match original {
                Some(row) => {
                    self.rows.insert(id, row);
                }
                None => {
                    self.rows.remove(&id);
                }
            }
        }
    }

    /// 只记录第一次改动前的值
    fn remember(&mut self, id: i64) {
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            let rows = &self.rows;
            checkpoint.originals.entry(id).or_insert_with(|| rows.get(&id).cloned());
        }
    }

    /// 插入新行，返回分配的ID
    pub fn insert(&mut self, data: T, valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.remember(id);
        self.rows.insert(id, Temporal::new(id, data, valid_from, stored_from));
        id
    }

    pub fn get(&self, id: i64) -> Option<&Temporal<T>> {
        self.rows.get(&id)
    }

    pub fn find<P: Fn(&T) -> bool>(&self, predicate: P) -> Option<&Temporal<T>> {
        self.rows.values().find(|row| predicate(&row.data))
    }

    pub fn filter<'a, P: Fn(&T) -> bool + 'a>(&'a self, predicate: P) -> impl Iterator<Item = &'a Temporal<T>> + 'a {
        self.rows.values().filter(move |row| predicate(&row.data))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Temporal<T>> {
        self.rows.values()
    }

    /// 先审计再覆盖；行不存在时返回 `false`
    pub fn update(&mut self, id: i64, data: T, valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> bool {
        self.remember(id);
        match self.rows.get_mut(&id) {
            Some(row) => {
                let audit = row.replace(data, valid_from, stored_from);
                self.audit.push(audit);
                true
            }
            None => false,
        }
    }

    /// 删除当前行，保留审计行
    pub fn delete(&mut self, id: i64, valid_until: DateTime<Utc>, stored_until: DateTime<Utc>) -> bool {
        self.remember(id);
        match self.rows.remove(&id) {
            Some(row) => {
                // 审计区间不能早于行本身的起点
                self.audit.push(row.supersede(valid_until.max(row.valid_from), stored_until.max(row.stored_from)));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn audit_rows(&self) -> &[AuditRow<T>] {
        &self.audit
    }

    /// 某个实体的全部审计行
    pub fn history(&self, id: i64) -> impl Iterator<Item = &AuditRow<T>> {
        self.audit.iter().filter(move |a| a.entity_id == id)
    }
}

macro_rules! each_table {
    ($store:ident, $method:ident) => {
        $store.mrns.$method();
        $store.mrn_to_live.$method();
        $store.demographics.$method();
        $store.hospital_visits.$method();
        $store.location_visits.$method();
        $store.locations.$method();
        $store.departments.$method();
        $store.rooms.$method();
        $store.beds.$method();
        $store.planned_movements.$method();
        $store.lab_orders.$method();
        $store.lab_results.$method();
        $store.lab_isolates.$method();
        $store.lab_sensitivities.$method();
        $store.visit_observations.$method();
    };
}

/// 对账使用的全部实体表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StarStore {
    pub mrns: Table<Mrn>,
    pub mrn_to_live: Table<MrnToLive>,
    pub demographics: Table<CoreDemographic>,
    pub hospital_visits: Table<HospitalVisit>,
    pub location_visits: Table<LocationVisit>,
    pub locations: Table<Location>,
    pub departments: Table<Department>,
    pub rooms: Table<Room>,
    pub beds: Table<Bed>,
    pub planned_movements: Table<PlannedMovement>,
    pub lab_orders: Table<LabOrder>,
    pub lab_results: Table<LabResult>,
    pub lab_isolates: Table<LabIsolate>,
    pub lab_sensitivities: Table<LabSensitivity>,
    pub visit_observations: Table<VisitObservation>,
    /// 已应用的交换消息ID
    processed_messages: BTreeSet<String>,
}

impl StarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, source_message_id: &str) -> bool {
        self.processed_messages.contains(source_message_id)
    }

    pub fn mark_processed(&mut self, source_message_id: &str) {
        self.processed_messages.insert(source_message_id.to_string());
    }

    /// 对每张表打检查点
    pub fn begin(&mut self) {
        each_table!(self, begin);
    }

    pub fn commit(&mut self) {
        each_table!(self, commit);
    }

    /// 撤销自 [`StarStore::begin`] 以来的全部改动
    pub fn rollback(&mut self) {
        each_table!(self, rollback);
    }

    /// 审计行总数，用于判断一次处理是否产生了历史
    pub fn audit_count(&self) -> usize {
        self.mrns.audit_rows().len()
            + self.mrn_to_live.audit_rows().len()
            + self.demographics.audit_rows().len()
            + self.hospital_visits.audit_rows().len()
            + self.location_visits.audit_rows().len()
            + self.planned_movements.audit_rows().len()
            + self.lab_orders.audit_rows().len()
            + self.lab_results.audit_rows().len()
            + self.lab_isolates.audit_rows().len()
            + self.lab_sensitivities.audit_rows().len()
            + self.visit_observations.audit_rows().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_update_and_delete_leave_audit_rows() {
        let mut table: Table<Department> = Table::default();
        let id = table.insert(Department { hl7_string: "T11E".into() }, at(1), at(1));

        assert!(table.update(id, Department { hl7_string: "T11S".into() }, at(2), at(3)));
        assert!(table.delete(id, at(4), at(5)));
        assert!(!table.delete(id, at(4), at(5)));

        let history: Vec<_> = table.history(id).collect();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].data.hl7_string, "T11E");
        assert_eq!(history[0].stored_until, at(3));
        assert_eq!(history[1].data.hl7_string, "T11S");
        assert_eq!(history[1].stored_from, at(3));
        assert!(table.is_empty());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut table: Table<Department> = Table::default();
        let first = table.insert(Department::default(), at(1), at(1));
        table.delete(first, at(2), at(2));
        let second = table.insert(Department::default(), at(3), at(3));
        assert_ne!(first, second);
    }

    #[test]
    fn test_rollback_restores_touched_rows() {
        let mut table: Table<Department> = Table::default();
        let kept = table.insert(Department { hl7_string: "T11E".into() }, at(1), at(1));
        let removed = table.insert(Department { hl7_string: "ED".into() }, at(1), at(1));

        table.begin();
        table.update(kept, Department { hl7_string: "T11S".into() }, at(2), at(2));
        table.update(kept, Department { hl7_string: "T11N".into() }, at(3), at(3));
        table.delete(removed, at(3), at(3));
        let added = table.insert(Department { hl7_string: "T06".into() }, at(3), at(3));
        table.rollback();

        assert_eq!(table.get(kept).unwrap().data.hl7_string, "T11E");
        assert_eq!(table.get(kept).unwrap().valid_from, at(1));
        assert_eq!(table.get(removed).unwrap().data.hl7_string, "ED");
        assert!(table.get(added).is_none());
        assert!(table.audit_rows().is_empty());
        // 回滚后ID从检查点继续分配
        assert_eq!(table.insert(Department::default(), at(4), at(4)), added);
    }

    #[test]
    fn test_commit_keeps_changes() {
        let mut store = StarStore::new();
        store.begin();
        let id = store.departments.insert(Department { hl7_string: "T11E".into() }, at(1), at(1));
        store.commit();
        store.rollback();
        assert!(store.departments.get(id).is_some());
    }

    #[test]
    fn test_delete_before_row_start_is_clamped() {
        let mut table: Table<Department> = Table::default();
        let id = table.insert(Department::default(), at(5), at(5));
        table.delete(id, at(2), at(6));
        let audit = &table.audit_rows()[0];
        assert_eq!(audit.valid_from, at(5));
        assert_eq!(audit.valid_until, at(5));
    }
}
