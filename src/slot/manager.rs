use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::update_slot::{SlotHandle, UpdateSlot};
use crate::error::StoreError;
use crate::mapper::CollectionMapper;
use crate::model::Id;

/// The one capability the manager needs from the store: firing the
/// aggregate "something changed" signal once a commit is through.
pub trait ModifiedNotifier {
    fn trigger_modified(&self) -> Result<(), StoreError>;
}

struct ManagerState {
    current: Option<UpdateSlot>,
    /// Set while a commit is notifying repositories. The slot is already
    /// cleared, but new acquirers must still queue.
    committing: bool,
    /// Served newest first.
    requests: Vec<oneshot::Sender<SlotHandle>>,
}

impl ManagerState {
    fn busy(&self) -> bool {
        self.current.is_some() || self.committing
    }

    /// Hand a fresh slot to the newest live request, if any.
    fn serve_next(&mut self) {
        while let Some(request) = self.requests.pop() {
            let slot = UpdateSlot::new();
            let handle = slot.handle();
            if request.send(handle).is_ok() {
                debug!(slot = %slot.id(), "concurrent update slots, serving queued request");
                self.current = Some(slot);
                return;
            }
            warn!("queued update slot request was cancelled, skipping it");
        }
    }
}

/// Serializes update cycles: at most one slot is active at a time.
pub struct UpdateManager {
    state: Mutex<ManagerState>,
    mapper: Arc<dyn CollectionMapper>,
}

impl UpdateManager {
    pub fn new(mapper: Arc<dyn CollectionMapper>) -> Self {
        UpdateManager {
            state: Mutex::new(ManagerState {
                current: None,
                committing: false,
                requests: Vec::new(),
            }),
            mapper,
        }
    }

    fn lock_state(&self, operation: &'static str) -> Result<MutexGuard<'_, ManagerState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    /// Get a new update slot, waiting while another cycle is in progress.
    ///
    /// Waiters are served newest first, and each one receives a fresh slot.
    /// Dropping the returned future before it resolves withdraws the request;
    /// a slot handed over to an already dropped future is released again.
    pub async fn acquire_slot(&self) -> Result<SlotHandle, StoreError> {
        let receiver = {
            let mut state = self.lock_state("acquire slot")?;
            if !state.busy() {
                let slot = UpdateSlot::new();
                let handle = slot.handle();
                debug!(slot = %slot.id(), "update slot acquired");
                state.current = Some(slot);
                return Ok(handle);
            }

            let (sender, receiver) = oneshot::channel();
            state.requests.push(sender);
            debug!(pending = state.requests.len(), "update in progress, queueing slot request");
            receiver
        };

        let mut pending = PendingRequest {
            manager: self,
            receiver,
            served: false,
        };
        let handle = (&mut pending.receiver)
            .await
            .map_err(|_| StoreError::SlotRequestAbandoned)?;
        pending.served = true;
        Ok(handle)
    }

    pub fn current_slot(&self) -> Result<Option<SlotHandle>, StoreError> {
        let state = self.lock_state("current slot")?;
        Ok(state.current.as_ref().map(UpdateSlot::handle))
    }

    /// Run `f` on the active slot, if any, while the manager is locked.
    pub fn inspect_current<R>(
        &self,
        f: impl FnOnce(&UpdateSlot) -> R,
    ) -> Result<Option<R>, StoreError> {
        Ok(self.lock_state("inspect current")?.current.as_ref().map(f))
    }

    pub fn is_active(&self) -> Result<bool, StoreError> {
        Ok(self.lock_state("is active")?.current.is_some())
    }

    /// Number of callers waiting for a slot.
    pub fn pending_requests(&self) -> Result<usize, StoreError> {
        Ok(self.lock_state("pending requests")?.requests.len())
    }

    /// Record a changed model into the active slot.
    ///
    /// Returns `false` when no slot is active and the caller has to notify
    /// immediately.
    pub fn record_changed(&self, collection: &str, id: Id) -> Result<bool, StoreError> {
        let mut state = self.lock_state("record changed")?;
        Ok(match state.current.as_mut() {
            Some(slot) => {
                slot.record_changed(collection, id);
                true
            }
            None => false,
        })
    }

    /// Record a deleted model into the active slot. See [`Self::record_changed`].
    pub fn record_deleted(&self, collection: &str, id: Id) -> Result<bool, StoreError> {
        let mut state = self.lock_state("record deleted")?;
        Ok(match state.current.as_mut() {
            Some(slot) => {
                slot.record_deleted(collection, id);
                true
            }
            None => false,
        })
    }

    /// Commit the active slot.
    ///
    /// Fails with [`StoreError::InvalidSlot`] unless `slot` is the active
    /// one. The slot is cleared before any repository is called, so store
    /// mutations made from inside a repository notify immediately.
    ///
    /// Phase 1 calls `delete_models` then `changed_models` per repository, in
    /// registration order. Phase 2 calls `commit_update` with deleted ids
    /// followed by changed ids on every repository. Afterwards `notifier`
    /// fires once and the newest queued request gets a fresh slot.
    pub fn commit(
        &self,
        slot: &SlotHandle,
        notifier: &dyn ModifiedNotifier,
    ) -> Result<(), StoreError> {
        let committed = {
            let mut state = self.lock_state("commit")?;
            match state.current.take() {
                Some(current) if current.is(slot) => {
                    state.committing = true;
                    current
                }
                other => {
                    let active = other.as_ref().map(UpdateSlot::id);
                    state.current = other;
                    return Err(StoreError::InvalidSlot {
                        given: slot.id(),
                        active,
                    });
                }
            }
        };
        let _finish = FinishCommit { manager: self };

        debug!(
            slot = %committed.id(),
            changed = committed.changed_models().len(),
            deleted = committed.deleted_models().len(),
            "committing update slot"
        );

        let repositories = self.mapper.repositories();

        // Phase 1: deleting and creating view models (in this order)
        for repository in repositories {
            let collection = repository.collection();
            repository.delete_models(committed.deleted_ids(collection));
            repository.changed_models(committed.changed_ids(collection));
        }

        // Phase 2: updating all repositories
        for repository in repositories {
            repository.commit_update(&committed.all_ids(repository.collection()));
        }

        notifier.trigger_modified()
    }

    /// Discard the active slot without notifying anyone.
    pub fn drop_slot(&self) -> Result<(), StoreError> {
        let mut state = self.lock_state("drop slot")?;
        if let Some(slot) = state.current.take() {
            debug!(slot = %slot.id(), "update slot dropped");
        }
        if !state.committing {
            state.serve_next();
        }
        Ok(())
    }

    /// Like [`Self::drop_slot`], but only if `slot` is still the active one.
    pub(crate) fn release(&self, slot: &SlotHandle) -> Result<(), StoreError> {
        let mut state = self.lock_state("release slot")?;
        if state.current.as_ref().is_some_and(|current| current.is(slot)) {
            state.current = None;
            debug!(slot = %slot.id(), "update slot released");
            if !state.committing {
                state.serve_next();
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn active_id(&self) -> Option<super::SlotId> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.current.as_ref().map(UpdateSlot::id))
    }
}

/// Ends the commit phase even if a repository panics.
struct FinishCommit<'a> {
    manager: &'a UpdateManager,
}

impl Drop for FinishCommit<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.manager.state.lock() {
            state.committing = false;
            state.serve_next();
        }
    }
}

/// A queued request. If dropped before resolving, a slot that was already
/// handed over is released so it cannot starve later updaters.
struct PendingRequest<'a> {
    manager: &'a UpdateManager,
    receiver: oneshot::Receiver<SlotHandle>,
    served: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.served {
            return;
        }
        self.receiver.close();
        if let Ok(handle) = self.receiver.try_recv() {
            warn!(slot = %handle.id(), "slot request cancelled after being served, releasing slot");
            let _ = self.manager.release(&handle);
        }
    }
}
