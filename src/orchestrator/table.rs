//! Shared device table.
//!
//! Ordered `DeviceKey -> DeviceRecord` mapping read by completion and
//! reporting. Each record is written only by the worker of its own pair, and
//! the lock is never held across a hardware call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{DeviceKey, DeviceRecord};

#[derive(Debug, Default)]
struct TableInner {
    records: BTreeMap<DeviceKey, DeviceRecord>,
    /// Pairs whose programmer failed the connectivity check this cycle.
    unreachable: BTreeSet<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    inner: Arc<RwLock<TableInner>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        DeviceTable::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every record of one pair (new detection pass).
    pub fn reset_pair(&self, pair: usize) {
        self.write().records.retain(|key, _| key.pair != pair);
    }

    pub fn insert(&self, record: DeviceRecord) {
        self.write().records.insert(record.key, record);
    }

    /// Create the record on first use, keeping an existing one untouched.
    pub fn ensure(&self, key: DeviceKey, dut_number: Option<u32>) {
        self.write()
            .records
            .entry(key)
            .or_insert_with(|| DeviceRecord::new(key).with_dut_number(dut_number));
    }

    /// Mutate one record, creating it if needed.
    pub fn update<R>(&self, key: DeviceKey, f: impl FnOnce(&mut DeviceRecord) -> R) -> R {
        let mut inner = self.write();
        let record = inner
            .records
            .entry(key)
            .or_insert_with(|| DeviceRecord::new(key));
        f(record)
    }

    pub fn get(&self, key: DeviceKey) -> Option<DeviceRecord> {
        self.read().records.get(&key).cloned()
    }

    /// Log label of a device: its number if known, otherwise its key.
    pub fn label(&self, key: DeviceKey) -> String {
        self.read()
            .records
            .get(&key)
            .map(|r| r.label())
            .unwrap_or_else(|| key.to_string())
    }

    /// All records in key order.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.read().records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    pub fn set_reachable(&self, pair: usize, reachable: bool) {
        let mut inner = self.write();
        if reachable {
            inner.unreachable.remove(&pair);
        } else {
            inner.unreachable.insert(pair);
        }
    }

    pub fn is_unreachable(&self, pair: usize) -> bool {
        self.read().unreachable.contains(&pair)
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.records.clear();
        inner.unreachable.clear();
    }
}
