//! 实体修改跟踪
//!
//! [`RowState`] 持有实体的工作副本，记录是否新建、是否有字段变化，
//! 最后由 [`RowState::save_or_audit`] 决定插入、审计后更新或什么都不做。

use crate::store::Table;
use chrono::{DateTime, Utc};
use emap_interchange::InterchangeValue;

#[derive(Debug, Clone)]
pub struct RowState<T> {
    id: Option<i64>,
    data: T,
    valid_from: DateTime<Utc>,
    stored_from: DateTime<Utc>,
    changed: bool,
}

impl<T: Clone> RowState<T> {
    /// 尚未保存的新实体
    pub fn created(data: T, valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> Self {
        Self {
            id: None,
            data,
            valid_from,
            stored_from,
            changed: true,
        }
    }

    /// 已存在的实体
    pub fn existing(id: i64, data: T, valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> Self {
        Self {
            id: Some(id),
            data,
            valid_from,
            stored_from,
            changed: false,
        }
    }

    /// 从表中取出已有实体，没有则用 `create` 新建
    pub fn get_or_create<P, C>(table: &Table<T>, predicate: P, create: C, valid_from: DateTime<Utc>, stored_from: DateTime<Utc>) -> Self
    where
        P: Fn(&T) -> bool,
        C: FnOnce() -> T,
    {
        match table.find(predicate) {
            Some(row) => Self::existing(row.id, row.data.clone(), valid_from, stored_from),
            None => Self::created(create(), valid_from, stored_from),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// 直接修改工作副本，视为有变化
    pub fn data_mut(&mut self) -> &mut T {
        self.changed = true;
        &mut self.data
    }

    /// 三态赋值：未知不修改，删除置空，有值则在不同时覆盖
    pub fn assign_interchange_value<V, F>(&mut self, value: InterchangeValue<V>, field: F)
    where
        V: PartialEq,
        F: FnOnce(&mut T) -> &mut Option<V>,
    {
        match value {
            InterchangeValue::Unknown => {}
            InterchangeValue::Delete => self.assign_if_different(None, field),
            InterchangeValue::Save(v) => self.assign_if_different(Some(v), field),
        }
    }

    /// `None` 不视为删除，只在有值时覆盖
    pub fn assign_if_present<V, F>(&mut self, value: Option<V>, field: F)
    where
        V: PartialEq,
        F: FnOnce(&mut T) -> &mut Option<V>,
    {
        if value.is_some() {
            self.assign_if_different(value, field);
        }
    }

    /// 只补全空字段，已有的值不覆盖
    pub fn assign_if_empty<V, F>(&mut self, value: InterchangeValue<V>, field: F)
    where
        F: FnOnce(&mut T) -> &mut Option<V>,
    {
        if let InterchangeValue::Save(v) = value {
            let slot = field(&mut self.data);
            if slot.is_none() {
                *slot = Some(v);
                self.changed = true;
            }
        }
    }

    pub fn assign_if_different<V, F>(&mut self, value: Option<V>, field: F)
    where
        V: PartialEq,
        F: FnOnce(&mut T) -> &mut Option<V>,
    {
        let slot = field(&mut self.data);
        if *slot != value {
            *slot = value;
            self.changed = true;
        }
    }

    /// 新建则插入，有变化则审计后更新，返回实体ID
    pub fn save_or_audit(self, table: &mut Table<T>) -> i64 {
        match self.id {
            None => table.insert(self.data, self.valid_from, self.stored_from),
            Some(id) => {
                if self.changed {
                    table.update(id, self.data, self.valid_from, self.stored_from);
                }
                id
            }
        }
    }
}
