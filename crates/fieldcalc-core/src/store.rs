//! Record storage capability

use crate::id::{FieldId, RecordId, TableId};
use crate::value::Value;
use ahash::AHashMap;

/// Read access to records, as needed by the formula engine.
///
/// The engine depends only on this capability: field values of a record, and
/// link traversal in both directions. Persistence and transactions belong to
/// the implementor.
pub trait RecordStore {
    /// Current stored value of `field` on `record` (`Null` when unset)
    fn field_value(&self, record: RecordId, field: FieldId) -> Value;

    /// Records targeted by link field `link` on `record`
    fn linked_records(&self, record: RecordId, link: FieldId) -> Vec<RecordId>;

    /// Records whose link field `link` targets `target` (reverse traversal)
    fn records_linking_to(&self, link: FieldId, target: RecordId) -> Vec<RecordId>;
}

/// Simple in-memory [`RecordStore`]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: AHashMap<TableId, Vec<RecordId>>,
    values: AHashMap<(RecordId, FieldId), Value>,
    links: AHashMap<(RecordId, FieldId), Vec<RecordId>>,
    next_record: u64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record in `table`
    pub fn add_record(&mut self, table: TableId) -> RecordId {
        let id = RecordId(self.next_record);
        self.next_record += 1;
        self.tables.entry(table).or_default().push(id);
        id
    }

    /// Records of a table, in creation order
    pub fn records(&self, table: TableId) -> &[RecordId] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Store a value
    pub fn set_value(&mut self, record: RecordId, field: FieldId, value: Value) {
        if value.is_null() {
            self.values.remove(&(record, field));
        } else {
            self.values.insert((record, field), value);
        }
    }

    /// Replace the targets of a link field on a record
    pub fn set_links(&mut self, record: RecordId, link: FieldId, targets: Vec<RecordId>) {
        if targets.is_empty() {
            self.links.remove(&(record, link));
        } else {
            self.links.insert((record, link), targets);
        }
    }
}

impl RecordStore for MemoryStore {
    fn field_value(&self, record: RecordId, field: FieldId) -> Value {
        self.values
            .get(&(record, field))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn linked_records(&self, record: RecordId, link: FieldId) -> Vec<RecordId> {
        self.links.get(&(record, link)).cloned().unwrap_or_default()
    }

    fn records_linking_to(&self, link: FieldId, target: RecordId) -> Vec<RecordId> {
        let mut found: Vec<RecordId> = self
            .links
            .iter()
            .filter(|((_, field), targets)| *field == link && targets.contains(&target))
            .map(|((record, _), _)| *record)
            .collect();
        found.sort();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_values_and_links() {
        let mut store = MemoryStore::new();
        let t = TableId(0);
        let a = store.add_record(t);
        let b = store.add_record(t);
        let c = store.add_record(t);
        let link = FieldId(7);

        store.set_value(a, FieldId(1), Value::from(3));
        assert_eq!(store.field_value(a, FieldId(1)), Value::from(3));
        assert_eq!(store.field_value(b, FieldId(1)), Value::Null);

        store.set_links(c, link, vec![a]);
        store.set_links(b, link, vec![a, c]);
        assert_eq!(store.linked_records(b, link), vec![a, c]);
        assert_eq!(store.records_linking_to(link, a), vec![b, c]);
        assert_eq!(store.records(t), &[a, b, c]);
    }
}
