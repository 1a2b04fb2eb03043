use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::batch::UpdateBatch;
use super::channels::{ClearEvent, Notifications};
use super::config::StoreConfig;
use crate::error::StoreError;
use crate::mapper::CollectionMapper;
use crate::model::{DeletedInformation, Id, Model, Record};
use crate::slot::{ModifiedNotifier, SlotHandle, UpdateManager};

/// Collection name to id to record. Ids iterate in ascending order.
pub type ModelStorage = BTreeMap<String, BTreeMap<Id, Record>>;

/// The single source of truth for live model records.
///
/// Clones share the same storage, channels and update manager.
///
/// Every mutation reports each touched record. While an update slot is
/// active the report goes into the slot and the aggregate "modified" signal
/// waits for the commit; without a slot, "modified" fires once per record.
/// Per-collection "changed" subscribers always hear about a change right away.
///
/// `set` and every single-record write happen under one storage write lock, so
/// readers on other threads never see them half done.
#[derive(Clone)]
pub struct DataStore {
    storage: Arc<RwLock<ModelStorage>>,
    mapper: Arc<dyn CollectionMapper>,
    manager: Arc<UpdateManager>,
    notifications: Arc<Notifications>,
}

impl DataStore {
    pub fn new(mapper: Arc<dyn CollectionMapper>) -> Self {
        Self::with_config(mapper, StoreConfig::default())
    }

    pub fn with_config(mapper: Arc<dyn CollectionMapper>, config: StoreConfig) -> Self {
        let manager = Arc::new(UpdateManager::new(Arc::clone(&mapper)));
        DataStore {
            storage: Arc::new(RwLock::new(ModelStorage::new())),
            mapper,
            manager,
            notifications: Arc::new(Notifications::new(&config)),
        }
    }

    pub fn update_manager(&self) -> &Arc<UpdateManager> {
        &self.manager
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, ModelStorage>, StoreError> {
        self.storage
            .read()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn write(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, ModelStorage>, StoreError> {
        self.storage
            .write()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Fires once per unscoped mutation, or once per committed slot.
    pub fn subscribe_modified(&self) -> Result<mpsc::UnboundedReceiver<()>, StoreError> {
        self.notifications.subscribe_modified()
    }

    /// Every change in `collection`, even while a slot is active. Meant for
    /// small collections.
    pub fn subscribe_changed(
        &self,
        collection: &str,
    ) -> Result<mpsc::UnboundedReceiver<Record>, StoreError> {
        self.notifications.subscribe_changed(collection)
    }

    pub fn subscribe_changed_model<M: Model>(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<Record>, StoreError> {
        self.subscribe_changed(M::COLLECTION)
    }

    pub fn subscribe_cleared(&self) -> broadcast::Receiver<ClearEvent> {
        self.notifications.subscribe_cleared()
    }

    /// Fire the aggregate "modified" signal.
    pub fn trigger_modified(&self) -> Result<(), StoreError> {
        self.notifications.publish_modified()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, collection: &str, id: Id) -> Result<Option<Record>, StoreError> {
        let storage = self.read("get")?;
        Ok(storage
            .get(collection)
            .and_then(|models| models.get(&id))
            .cloned())
    }

    /// Ids that are not stored are skipped.
    pub fn get_many(&self, collection: &str, ids: &[Id]) -> Result<Vec<Record>, StoreError> {
        let storage = self.read("get many")?;
        let Some(models) = storage.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| models.get(id).cloned()).collect())
    }

    pub fn get_all(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let storage = self.read("get all")?;
        Ok(storage
            .get(collection)
            .map(|models| models.values().cloned().collect())
            .unwrap_or_default())
    }

    pub fn filter<F>(&self, collection: &str, predicate: F) -> Result<Vec<Record>, StoreError>
    where
        F: Fn(&Record) -> bool,
    {
        let storage = self.read("filter")?;
        Ok(storage
            .get(collection)
            .map(|models| {
                models
                    .values()
                    .filter(|record| predicate(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// First match in ascending id order.
    pub fn find<F>(&self, collection: &str, predicate: F) -> Result<Option<Record>, StoreError>
    where
        F: Fn(&Record) -> bool,
    {
        let storage = self.read("find")?;
        Ok(storage
            .get(collection)
            .and_then(|models| models.values().find(|record| predicate(record)))
            .cloned())
    }

    pub fn get_model<M: Model>(&self, id: Id) -> Result<Option<M>, StoreError> {
        self.get(M::COLLECTION, id)?
            .map(|record| record.to_model())
            .transpose()
    }

    pub fn get_many_models<M: Model>(&self, ids: &[Id]) -> Result<Vec<M>, StoreError> {
        self.get_many(M::COLLECTION, ids)?
            .iter()
            .map(Record::to_model)
            .collect()
    }

    pub fn get_all_models<M: Model>(&self) -> Result<Vec<M>, StoreError> {
        self.get_all(M::COLLECTION)?
            .iter()
            .map(Record::to_model)
            .collect()
    }

    pub fn filter_models<M, F>(&self, predicate: F) -> Result<Vec<M>, StoreError>
    where
        M: Model,
        F: Fn(&M) -> bool,
    {
        let mut matches = Vec::new();
        for model in self.get_all_models::<M>()? {
            if predicate(&model) {
                matches.push(model);
            }
        }
        Ok(matches)
    }

    pub fn find_model<M, F>(&self, predicate: F) -> Result<Option<M>, StoreError>
    where
        M: Model,
        F: Fn(&M) -> bool,
    {
        for record in self.get_all(M::COLLECTION)? {
            let model: M = record.to_model()?;
            if predicate(&model) {
                return Ok(Some(model));
            }
        }
        Ok(None)
    }

    /// Collections currently holding at least one record.
    pub fn collections(&self) -> Result<Vec<String>, StoreError> {
        let storage = self.read("collections")?;
        Ok(storage
            .iter()
            .filter(|(_, models)| !models.is_empty())
            .map(|(collection, _)| collection.clone())
            .collect())
    }

    /// Total number of stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        let storage = self.read("len")?;
        Ok(storage.values().map(BTreeMap::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Copy of the whole storage.
    pub fn snapshot(&self) -> Result<ModelStorage, StoreError> {
        Ok(self.read("snapshot")?.clone())
    }

    /// Dump the storage at debug level.
    pub fn print(&self) -> Result<(), StoreError> {
        let storage = self.read("print")?;
        for (collection, models) in storage.iter() {
            for record in models.values() {
                debug!(collection = %collection, id = record.id(), data = %record.data(), "stored model");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or overwrite each record under its collection and id.
    pub fn add(&self, records: impl IntoIterator<Item = Record>) -> Result<(), StoreError> {
        let mut storage = self.write("add")?;
        self.insert_records(&mut storage, records)
    }

    fn insert_records(
        &self,
        storage: &mut ModelStorage,
        records: impl IntoIterator<Item = Record>,
    ) -> Result<(), StoreError> {
        for record in records {
            storage
                .entry(record.collection().to_string())
                .or_default()
                .insert(record.id(), record.clone());
            self.publish_changed(&record)?;
        }
        Ok(())
    }

    pub fn add_models<'a, M: Model + 'a>(
        &self,
        models: impl IntoIterator<Item = &'a M>,
    ) -> Result<(), StoreError> {
        let records = models
            .into_iter()
            .map(Record::from_model)
            .collect::<Result<Vec<_>, _>>()?;
        self.add(records)
    }

    /// Merge each record into the stored one with the same key, or insert it.
    ///
    /// The merge runs without holding the storage lock, so a mapper may read
    /// the store. If the stored record was replaced meanwhile, the merge is
    /// redone against the new one. Records before a failing merge stay applied.
    pub fn add_or_update(&self, records: impl IntoIterator<Item = Record>) -> Result<(), StoreError> {
        for record in records {
            loop {
                let existing = self.get(record.collection(), record.id())?;
                let merged = match &existing {
                    Some(existing) => {
                        let data = self.mapper.updated_data(
                            record.collection(),
                            existing.data(),
                            record.data(),
                        );
                        self.mapper
                            .construct_model(record.collection(), record.id(), data)?
                    }
                    None => record.clone(),
                };

                let mut storage = self.write("add or update")?;
                let models = storage.entry(record.collection().to_string()).or_default();
                let unchanged = match (models.get(&record.id()), &existing) {
                    (Some(current), Some(seen)) => current.is_same(seen),
                    (None, None) => true,
                    _ => false,
                };
                if !unchanged {
                    continue;
                }
                models.insert(merged.id(), merged.clone());
                self.publish_changed(&merged)?;
                break;
            }
        }
        Ok(())
    }

    /// Remove the given ids. Ids that are not stored are still reported as deleted.
    pub fn remove(&self, collection: &str, ids: &[Id]) -> Result<(), StoreError> {
        let mut storage = self.write("remove")?;
        for &id in ids {
            if let Some(models) = storage.get_mut(collection) {
                models.remove(&id);
            }
            self.publish_deleted(&DeletedInformation {
                collection: collection.to_string(),
                id,
            })?;
        }
        Ok(())
    }

    /// Replace the whole storage.
    ///
    /// Every previously stored model is reported as deleted before the new
    /// records are added.
    pub fn set(&self, records: Vec<Record>) -> Result<(), StoreError> {
        let mut storage = self.write("set")?;
        let previous = std::mem::take(&mut *storage);
        for (collection, models) in &previous {
            for &id in models.keys() {
                self.publish_deleted(&DeletedInformation {
                    collection: collection.clone(),
                    id,
                })?;
            }
        }
        self.insert_records(&mut storage, records)
    }

    /// Wipe everything. Neither slots nor "modified" subscribers are involved.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.write("clear")?.clear();
        debug!("data store cleared");
        self.notifications.publish_cleared(ClearEvent::All);
        Ok(())
    }

    /// Remove every collection matching `predicate`.
    ///
    /// "modified" fires once per removed collection, then "cleared" carries
    /// the removed collection names.
    pub fn clear_collections_matching<F>(&self, predicate: F) -> Result<Vec<String>, StoreError>
    where
        F: Fn(&str) -> bool,
    {
        let mut storage = self.write("clear collections")?;
        let removed: Vec<String> = storage
            .keys()
            .filter(|collection| predicate(collection))
            .cloned()
            .collect();
        for collection in &removed {
            storage.remove(collection);
            self.trigger_modified()?;
        }
        drop(storage);

        debug!(collections = ?removed, "collections cleared");
        self.notifications
            .publish_cleared(ClearEvent::Collections(removed.clone()));
        Ok(removed)
    }

    /// Remove every meeting scoped collection.
    pub fn clear_meeting_models(&self) -> Result<Vec<String>, StoreError> {
        self.clear_collections_matching(|collection| self.mapper.is_meeting_scoped(collection))
    }

    fn publish_changed(&self, record: &Record) -> Result<(), StoreError> {
        if !self.manager.record_changed(record.collection(), record.id())? {
            self.trigger_modified()?;
        }
        self.notifications.publish_changed(record)
    }

    fn publish_deleted(&self, information: &DeletedInformation) -> Result<(), StoreError> {
        if !self
            .manager
            .record_deleted(&information.collection, information.id)?
        {
            self.trigger_modified()?;
        }
        Ok(())
    }

    // ========================================================================
    // Update cycles
    // ========================================================================

    /// Wait for an update slot. See [`UpdateManager::acquire_slot`].
    pub async fn begin_update(&self) -> Result<SlotHandle, StoreError> {
        self.manager.acquire_slot().await
    }

    pub fn commit_update(&self, slot: &SlotHandle) -> Result<(), StoreError> {
        self.manager.commit(slot, self)
    }

    pub fn drop_update(&self) -> Result<(), StoreError> {
        self.manager.drop_slot()
    }

    /// Apply a whole server update as one update cycle.
    ///
    /// Deletions go first, then changed models are merged in. Raw payloads
    /// are decoded before anything is touched, so a missing id fails cleanly.
    /// A merged model that does not fit its registered type fails only after
    /// the deletions were applied. On error the slot is released without
    /// notifying repositories; changes applied so far stay in the store.
    pub async fn apply_update(&self, batch: UpdateBatch) -> Result<(), StoreError> {
        let slot = self.begin_update().await?;
        match self.apply_batch(&batch) {
            Ok(()) => self.commit_update(&slot),
            Err(err) => {
                warn!(slot = %slot.id(), error = %err, "update batch failed, dropping slot");
                self.manager.release(&slot)?;
                Err(err)
            }
        }
    }

    fn apply_batch(&self, batch: &UpdateBatch) -> Result<(), StoreError> {
        let changed = batch.changed_records()?;
        for (collection, ids) in &batch.deleted {
            self.remove(collection, ids)?;
        }
        self.add_or_update(changed)
    }
}

impl ModifiedNotifier for DataStore {
    fn trigger_modified(&self) -> Result<(), StoreError> {
        DataStore::trigger_modified(self)
    }
}
