use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::Id;

/// Process-wide creation counter, so slots from different managers never compare equal.
static SLOT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Collection name to the ids recorded for it, in recording order.
pub type CollectionIds = BTreeMap<String, Vec<Id>>;

/// Identity of one slot creation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    fn next() -> Self {
        SlotId(SLOT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The caller's token for an acquired slot. Required to commit it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    id: SlotId,
}

impl SlotHandle {
    pub fn id(&self) -> SlotId {
        self.id
    }
}

/// Changed and deleted model ids collected during one update cycle.
///
/// Ids are not de-duplicated: recording the same id twice yields it twice
/// downstream, and an id that was changed and then deleted shows up in both
/// lists.
#[derive(Debug)]
pub struct UpdateSlot {
    id: SlotId,
    changed: CollectionIds,
    deleted: CollectionIds,
}

impl UpdateSlot {
    pub fn new() -> Self {
        UpdateSlot {
            id: SlotId::next(),
            changed: CollectionIds::new(),
            deleted: CollectionIds::new(),
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn handle(&self) -> SlotHandle {
        SlotHandle { id: self.id }
    }

    pub fn record_changed(&mut self, collection: &str, id: Id) {
        push_id(&mut self.changed, collection, id);
    }

    pub fn record_deleted(&mut self, collection: &str, id: Id) {
        push_id(&mut self.deleted, collection, id);
    }

    pub fn changed_ids(&self, collection: &str) -> &[Id] {
        self.changed.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn deleted_ids(&self, collection: &str) -> &[Id] {
        self.deleted.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Deleted ids first, then changed ids.
    pub fn all_ids(&self, collection: &str) -> Vec<Id> {
        let deleted = self.deleted_ids(collection);
        let changed = self.changed_ids(collection);
        let mut ids = Vec::with_capacity(deleted.len() + changed.len());
        ids.extend_from_slice(deleted);
        ids.extend_from_slice(changed);
        ids
    }

    pub fn changed_models(&self) -> &CollectionIds {
        &self.changed
    }

    pub fn deleted_models(&self) -> &CollectionIds {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn is(&self, handle: &SlotHandle) -> bool {
        self.id == handle.id
    }
}

impl Default for UpdateSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for UpdateSlot {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for UpdateSlot {}

fn push_id(map: &mut CollectionIds, collection: &str, id: Id) {
    match map.get_mut(collection) {
        Some(ids) => ids.push(id),
        None => {
            map.insert(collection.to_string(), vec![id]);
        }
    }
}
