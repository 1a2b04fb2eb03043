use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{CollectionMapper, UpdateCollaborator};
use crate::error::StoreError;
use crate::model::{merge_shallow, Id, Model, Record};

#[derive(Clone, Copy)]
struct ModelDescriptor {
    meeting_scoped: bool,
    merge: fn(&Value, &Value) -> Value,
    normalize: fn(Value) -> Result<Value, StoreError>,
}

/// Round-trip through `M` so stored payloads always have `M`'s shape.
fn normalize<M: Model>(data: Value) -> Result<Value, StoreError> {
    let model: M = serde_json::from_value(data)?;
    Ok(serde_json::to_value(&model)?)
}

/// Explicit startup registration of model types and repositories.
///
/// Collections without a registered model are merged shallowly, stored
/// as-is and treated as not meeting scoped.
///
/// ```ignore
/// let registry = ModelRegistry::new()
///     .with_model::<Motion>()
///     .with_model::<User>()
///     .with_repository(motion_repo);
/// let store = DataStore::new(Arc::new(registry));
/// ```
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
    repositories: Vec<Arc<dyn UpdateCollaborator>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model<M: Model>(&mut self) {
        self.models.insert(
            M::COLLECTION.to_string(),
            ModelDescriptor {
                meeting_scoped: M::MEETING_SCOPED,
                merge: M::updated_data,
                normalize: normalize::<M>,
            },
        );
    }

    pub fn with_model<M: Model>(mut self) -> Self {
        self.register_model::<M>();
        self
    }

    /// Repositories are notified in the order they were registered.
    pub fn register_repository(&mut self, repository: Arc<dyn UpdateCollaborator>) {
        self.repositories.push(repository);
    }

    pub fn with_repository(mut self, repository: Arc<dyn UpdateCollaborator>) -> Self {
        self.register_repository(repository);
        self
    }

    pub fn is_registered(&self, collection: &str) -> bool {
        self.models.contains_key(collection)
    }
}

impl CollectionMapper for ModelRegistry {
    fn repositories(&self) -> &[Arc<dyn UpdateCollaborator>] {
        &self.repositories
    }

    fn updated_data(&self, collection: &str, stored: &Value, incoming: &Value) -> Value {
        match self.models.get(collection) {
            Some(descriptor) => (descriptor.merge)(stored, incoming),
            None => merge_shallow(stored, incoming),
        }
    }

    fn construct_model(&self, collection: &str, id: Id, data: Value) -> Result<Record, StoreError> {
        let data = match self.models.get(collection) {
            Some(descriptor) => (descriptor.normalize)(data)?,
            None => data,
        };
        Ok(Record::new(collection, id, data))
    }

    fn is_meeting_scoped(&self, collection: &str) -> bool {
        self.models
            .get(collection)
            .is_some_and(|descriptor| descriptor.meeting_scoped)
    }
}
