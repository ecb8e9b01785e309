//! The normalized store: record id to record, with merge-on-write semantics.

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::value::{DataId, DataValue, ROOT_ID};

/// One normalized entity: field key to stored value.
pub type Record = BTreeMap<String, DataValue>;

/// Result of looking up a record id.
///
/// `Deleted` (an explicitly invalidated record) is distinct from `Missing`
/// (an id the store has never seen); the reader treats the former as a known
/// `null` and the latter as missing data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RecordState<'a> {
    Missing,
    Deleted,
    Present(&'a Record),
}

/// A batch of partial records produced by one normalization pass, applied to
/// the store in a single commit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreUpdate {
    records: BTreeMap<DataId, Record>,
}

impl StoreUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one field write. Last write to a key within the batch wins.
    pub fn set(&mut self, record_id: &str, field_key: String, value: DataValue) {
        self.records
            .entry(record_id.to_string())
            .or_default()
            .insert(field_key, value);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = (&DataId, &Record)> {
        self.records.iter()
    }

    pub(crate) fn into_records(self) -> BTreeMap<DataId, Record> {
        self.records
    }
}

/// In-memory mapping from record id to record. The root record exists from
/// construction and is never deleted.
#[derive(Clone, Debug, PartialEq)]
pub struct Store {
    records: BTreeMap<DataId, Option<Record>>,
}

impl Store {
    pub fn new() -> Self {
        let mut records = BTreeMap::new();
        records.insert(ROOT_ID.to_string(), Some(Record::new()));
        Self { records }
    }

    pub fn get(&self, record_id: &str) -> RecordState<'_> {
        match self.records.get(record_id) {
            None => RecordState::Missing,
            Some(None) => RecordState::Deleted,
            Some(Some(record)) => RecordState::Present(record),
        }
    }

    /// Merge a partial record field-by-field: last write wins per field key,
    /// fields absent from the partial record are left untouched, and merging
    /// into a deleted slot resurrects it.
    pub fn merge(&mut self, record_id: &str, partial: Record) {
        let slot = self
            .records
            .entry(record_id.to_string())
            .or_insert_with(|| Some(Record::new()));
        let record = slot.get_or_insert_with(Record::new);
        for (field_key, value) in partial {
            record.insert(field_key, value);
        }
    }

    /// Apply a whole normalization batch. This is the single mutation choke
    /// point; the environment notifies subscribers once per commit.
    pub fn commit(&mut self, update: StoreUpdate) {
        for (record_id, partial) in update.into_records() {
            self.merge(&record_id, partial);
        }
    }

    /// Mark a record as explicitly deleted. Readers resolve links to it as
    /// `null` from now on; a later merge resurrects the slot.
    pub fn delete(&mut self, record_id: &str) -> Result<()> {
        if record_id == ROOT_ID {
            bail!("the root record cannot be deleted");
        }
        self.records.insert(record_id.to_string(), None);
        Ok(())
    }

    pub fn record_ids(&self) -> impl Iterator<Item = &DataId> {
        self.records.keys()
    }

    /// Dump the whole store as JSON for diagnostics: record id to record,
    /// deleted slots rendered as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (record_id, slot) in &self.records {
            let rendered = match slot {
                None => serde_json::Value::Null,
                Some(record) => {
                    let mut fields = serde_json::Map::new();
                    for (field_key, value) in record {
                        fields.insert(field_key.clone(), value.to_json());
                    }
                    serde_json::Value::Object(fields)
                }
            };
            out.insert(record_id.clone(), rendered);
        }
        serde_json::Value::Object(out)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Link;

    #[test]
    fn root_record_exists_from_construction() {
        let store = Store::new();
        assert_eq!(store.get(ROOT_ID), RecordState::Present(&Record::new()));
    }

    #[test]
    fn unknown_ids_are_missing_not_deleted() {
        let store = Store::new();
        assert_eq!(store.get("u1"), RecordState::Missing);
    }

    #[test]
    fn merge_is_last_write_wins_per_field() {
        let mut store = Store::new();
        let mut first = Record::new();
        first.insert("name".to_string(), DataValue::Str("Ada".to_string()));
        first.insert("age".to_string(), DataValue::Int(36));
        store.merge("u1", first);

        let mut second = Record::new();
        second.insert("name".to_string(), DataValue::Str("Grace".to_string()));
        store.merge("u1", second);

        match store.get("u1") {
            RecordState::Present(record) => {
                assert_eq!(
                    record.get("name"),
                    Some(&DataValue::Str("Grace".to_string()))
                );
                // Fields absent from the partial record survive the merge.
                assert_eq!(record.get("age"), Some(&DataValue::Int(36)));
            }
            other => panic!("expected a present record, found {other:?}"),
        }
    }

    #[test]
    fn delete_marks_the_slot_and_merge_resurrects_it() -> Result<()> {
        let mut store = Store::new();
        let mut record = Record::new();
        record.insert("id".to_string(), DataValue::Str("u1".to_string()));
        store.merge("u1", record.clone());
        store.delete("u1")?;
        assert_eq!(store.get("u1"), RecordState::Deleted);

        store.merge("u1", record);
        assert!(matches!(store.get("u1"), RecordState::Present(_)));
        Ok(())
    }

    #[test]
    fn deleting_the_root_is_fatal() {
        let mut store = Store::new();
        assert!(store.delete(ROOT_ID).is_err());
    }

    #[test]
    fn commit_applies_every_staged_record() {
        let mut update = StoreUpdate::new();
        update.set(ROOT_ID, "viewer".to_string(), DataValue::Link(Link::to("u1")));
        update.set("u1", "id".to_string(), DataValue::Str("u1".to_string()));
        update.set("u1", "name".to_string(), DataValue::Str("Ada".to_string()));
        assert_eq!(update.record_count(), 2);

        let mut store = Store::new();
        store.commit(update);
        assert!(matches!(store.get("u1"), RecordState::Present(_)));
        match store.get(ROOT_ID) {
            RecordState::Present(root) => {
                assert_eq!(root.get("viewer"), Some(&DataValue::Link(Link::to("u1"))));
            }
            other => panic!("expected the root record, found {other:?}"),
        }
    }
}
