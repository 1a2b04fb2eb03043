use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use tokio::sync::{broadcast, mpsc};

use super::config::StoreConfig;
use crate::error::StoreError;
use crate::model::Record;

/// Payload of the "cleared" channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearEvent {
    /// The whole store was wiped.
    All,
    /// Only these collections were removed.
    Collections(Vec<String>),
}

/// The store's notification channels.
///
/// "modified" and the per-collection "changed" channels are unbounded, one
/// sender per subscriber: every signal reaches every live subscriber.
/// Senders whose receiver was dropped are pruned on the next publish.
/// Per-collection subscriber lists are created on first subscription and
/// live as long as the store.
pub(crate) struct Notifications {
    modified: Mutex<Vec<mpsc::UnboundedSender<()>>>,
    cleared: broadcast::Sender<ClearEvent>,
    changed: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Record>>>>,
}

impl Notifications {
    pub(crate) fn new(config: &StoreConfig) -> Self {
        Self {
            modified: Mutex::new(Vec::new()),
            cleared: broadcast::channel(config.clear_channel_capacity.max(1)).0,
            changed: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn subscribe_modified(&self) -> Result<mpsc::UnboundedReceiver<()>, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.modified
            .lock()
            .map_err(|_| StoreError::LockPoisoned("modified subscribers"))?
            .push(sender);
        Ok(receiver)
    }

    pub(crate) fn subscribe_cleared(&self) -> broadcast::Receiver<ClearEvent> {
        self.cleared.subscribe()
    }

    pub(crate) fn subscribe_changed(
        &self,
        collection: &str,
    ) -> Result<mpsc::UnboundedReceiver<Record>, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.changed
            .write()
            .map_err(|_| StoreError::LockPoisoned("changed channels write"))?
            .entry(collection.to_string())
            .or_default()
            .push(sender);
        Ok(receiver)
    }

    pub(crate) fn publish_modified(&self) -> Result<(), StoreError> {
        let mut subscribers = self
            .modified
            .lock()
            .map_err(|_| StoreError::LockPoisoned("modified subscribers"))?;
        subscribers.retain(|sender| sender.send(()).is_ok());
        if subscribers.is_empty() {
            tracing::trace!("no subscribers for modified signal");
        }
        Ok(())
    }

    /// Only collections somebody subscribed to have a subscriber list.
    pub(crate) fn publish_changed(&self, record: &Record) -> Result<(), StoreError> {
        let needs_pruning = {
            let channels = self
                .changed
                .read()
                .map_err(|_| StoreError::LockPoisoned("changed channels read"))?;
            let Some(senders) = channels.get(record.collection()) else {
                return Ok(());
            };
            let mut closed = false;
            for sender in senders {
                closed |= sender.send(record.clone()).is_err();
            }
            closed
        };

        if needs_pruning {
            let mut channels = self
                .changed
                .write()
                .map_err(|_| StoreError::LockPoisoned("changed channels write"))?;
            if let Some(senders) = channels.get_mut(record.collection()) {
                senders.retain(|sender| !sender.is_closed());
                if senders.is_empty() {
                    tracing::trace!(collection = record.collection(), "no subscribers left for collection");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn publish_cleared(&self, event: ClearEvent) {
        if self.cleared.send(event).is_err() {
            tracing::trace!("no subscribers for clear event");
        }
    }

    #[cfg(test)]
    fn changed_subscribers(&self, collection: &str) -> usize {
        self.changed
            .read()
            .map(|channels| channels.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
