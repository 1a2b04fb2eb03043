use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Id, Model};
use crate::error::StoreError;

/// Type-erased stored model.
///
/// The payload is shared, so cloning a record out of the store is cheap.
/// Records are never mutated in place; an update replaces the whole record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    collection: Arc<str>,
    id: Id,
    data: Arc<Value>,
}

impl Record {
    pub fn new(collection: impl Into<Arc<str>>, id: Id, data: Value) -> Self {
        Self {
            collection: collection.into(),
            id,
            data: Arc::new(data),
        }
    }

    /// Build a record from a raw payload, reading the id from its `id` field.
    pub fn from_raw(collection: impl Into<Arc<str>>, data: Value) -> Result<Self, StoreError> {
        let collection = collection.into();
        let id = data
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::MissingId {
                collection: collection.to_string(),
            })?;
        Ok(Self::new(collection, id, data))
    }

    pub fn from_model<M: Model>(model: &M) -> Result<Self, StoreError> {
        let data = serde_json::to_value(model)?;
        Ok(Self::new(M::COLLECTION, model.id(), data))
    }

    /// Decode the payload as `M`.
    pub fn to_model<M: Model>(&self) -> Result<M, StoreError> {
        Ok(M::deserialize(self.data.as_ref())?)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Whether both are the very same stored value, not just equal ones.
    pub(crate) fn is_same(&self, other: &Record) -> bool {
        self.id == other.id
            && self.collection == other.collection
            && Arc::ptr_eq(&self.data, &other.data)
    }
}

/// What is left of a model after it was removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeletedInformation {
    pub collection: String,
    pub id: Id,
}
