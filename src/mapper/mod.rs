//! Collection mapping and repository collaborators.
//!
//! The store and the update manager only know collections by name. A
//! [`CollectionMapper`] supplies the per-collection knowledge they need: how
//! to merge and rebuild a model, whether it belongs to a meeting, and which
//! repositories want to hear about committed update cycles.

mod registry;

use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::model::{Id, Record};

pub use registry::ModelRegistry;

/// A view-model repository notified when an update slot is committed.
///
/// See [`UpdateManager::commit`](crate::UpdateManager::commit) for the call
/// order. Implementations must not wait on an update slot from inside these
/// calls.
pub trait UpdateCollaborator: Send + Sync {
    /// The collection this repository mirrors.
    fn collection(&self) -> &str;

    /// Phase 1: drop view models for these ids.
    fn delete_models(&self, ids: &[Id]);

    /// Phase 1: create or refresh view models for these ids.
    fn changed_models(&self, ids: &[Id]);

    /// Phase 2: every repository has seen its phase 1 calls. Deleted ids come first.
    fn commit_update(&self, ids: &[Id]);
}

/// Collection-specific knowledge the store consults.
///
/// The store never holds its storage lock while calling `updated_data` or
/// `construct_model`, so both may read the store.
pub trait CollectionMapper: Send + Sync {
    /// Registered repositories, in registration order.
    fn repositories(&self) -> &[Arc<dyn UpdateCollaborator>];

    /// Merge a stored payload with incoming data for `collection`.
    fn updated_data(&self, collection: &str, stored: &Value, incoming: &Value) -> Value;

    /// Build the record that replaces a stored one after a merge.
    fn construct_model(&self, collection: &str, id: Id, data: Value) -> Result<Record, StoreError>;

    fn is_meeting_scoped(&self, collection: &str) -> bool;
}
