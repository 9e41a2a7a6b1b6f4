//! Computed value cache
//!
//! Stores the last computed value of each (record, formula field) pair. The
//! cache is only an optimisation for plain reads: callers that need a
//! guaranteed-fresh value go through
//! [`FormulaEngine::read_fresh_value`](crate::FormulaEngine::read_fresh_value).

use ahash::AHashMap;
use fieldcalc_core::{FieldId, RecordId, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// A computed value together with the logical time it was computed at
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CachedValue {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub value: Value,
    /// Monotonic version from the cache's logical clock
    pub computed_at_version: u64,
}

/// Thread-safe cache of computed formula values
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: RwLock<AHashMap<(RecordId, FieldId), CachedValue>>,
    clock: AtomicU64,
}

impl ValueCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for a record's formula field
    pub fn get(&self, record: RecordId, field: FieldId) -> Option<CachedValue> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(record, field))
            .cloned()
    }

    /// Store a computed value, returning the version it was stamped with
    pub fn insert(&self, record: RecordId, field: FieldId, value: Value) -> u64 {
        let version = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (record, field),
                CachedValue {
                    record_id: record,
                    field_id: field,
                    value,
                    computed_at_version: version,
                },
            );
        version
    }

    /// Drop one entry so the next read recomputes it
    pub fn invalidate(&self, record: RecordId, field: FieldId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(record, field))
            .is_some()
    }

    /// Drop the entries of the given fields on every record
    pub fn invalidate_fields(&self, fields: impl IntoIterator<Item = FieldId>) -> usize {
        let fields: ahash::AHashSet<FieldId> = fields.into_iter().collect();
        if fields.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(_, field), _| !fields.contains(field));
        before - entries.len()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current logical clock value
    pub fn version(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_versions_increase() {
        let cache = ValueCache::new();
        let v1 = cache.insert(RecordId(1), FieldId(1), Value::from(1));
        let v2 = cache.insert(RecordId(1), FieldId(1), Value::from(2));
        assert!(v2 > v1);

        let cached = cache.get(RecordId(1), FieldId(1)).unwrap();
        assert_eq!(cached.value, Value::from(2));
        assert_eq!(cached.computed_at_version, v2);
        assert_eq!(cache.version(), v2);
    }

    #[test]
    fn test_invalidate() {
        let cache = ValueCache::new();
        cache.insert(RecordId(1), FieldId(1), Value::from(1));
        cache.insert(RecordId(2), FieldId(1), Value::from(1));
        cache.insert(RecordId(1), FieldId(2), Value::from(1));
        assert_eq!(cache.len(), 3);

        assert!(cache.invalidate(RecordId(1), FieldId(2)));
        assert!(!cache.invalidate(RecordId(1), FieldId(2)));
        assert_eq!(cache.invalidate_fields([FieldId(1)]), 2);
        assert!(cache.is_empty());

        cache.insert(RecordId(3), FieldId(3), Value::Null);
        cache.clear();
        assert_eq!(cache.get(RecordId(3), FieldId(3)), None);
    }
}
