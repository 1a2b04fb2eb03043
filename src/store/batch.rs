use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::model::{Id, Model, Record};

/// One server update: raw changed models and deleted ids, per collection.
///
/// ```json
/// {
///   "changed": { "motions/motion": [{ "id": 4, "title": "..." }] },
///   "deleted": { "users/user": [2, 9] }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    #[serde(default)]
    pub changed: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub deleted: BTreeMap<String, Vec<Id>>,
}

impl UpdateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_changed(mut self, collection: impl Into<String>, data: Value) -> Self {
        self.changed.entry(collection.into()).or_default().push(data);
        self
    }

    pub fn with_changed_model<M: Model>(self, model: &M) -> Result<Self, StoreError> {
        let data = serde_json::to_value(model)?;
        Ok(self.with_changed(M::COLLECTION, data))
    }

    pub fn with_deleted(mut self, collection: impl Into<String>, ids: &[Id]) -> Self {
        self.deleted
            .entry(collection.into())
            .or_default()
            .extend_from_slice(ids);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changed.values().all(Vec::is_empty) && self.deleted.values().all(Vec::is_empty)
    }

    /// Decode every changed entry up front, so a bad payload is caught
    /// before the store is touched.
    pub(crate) fn changed_records(&self) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        for (collection, entries) in &self.changed {
            for data in entries {
                records.push(Record::from_raw(collection.as_str(), data.clone())?);
            }
        }
        Ok(records)
    }
}
