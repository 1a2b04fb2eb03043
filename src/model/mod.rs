//! Models - typed records and their type-erased stored form.
//!
//! Every value in the [`DataStore`](crate::DataStore) is a [`Record`]: the
//! collection it belongs to, its id, and an immutable JSON payload. Typed
//! access goes through the [`Model`] trait.
//!
//! ## Example
//!
//! ```ignore
//! use meeting_store::{Model, Record};
//!
//! #[derive(Serialize, Deserialize, Clone, Model)]
//! #[model(collection = "motions/motion")]
//! struct Motion {
//!     pub id: u64,
//!     pub title: String,
//! }
//!
//! let record = Record::from_model(&motion)?;
//! let back: Motion = record.to_model()?;
//! ```

mod record;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub use record::{DeletedInformation, Record};

/// Model id. Unique within a collection, not across collections.
pub type Id = u64;

/// Trait for types that can be stored in the data store.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The collection this model type is stored under (e.g. "users/user").
    const COLLECTION: &'static str;

    /// Whether the collection belongs to a single meeting and is dropped by
    /// [`DataStore::clear_meeting_models`](crate::DataStore::clear_meeting_models).
    const MEETING_SCOPED: bool = true;

    /// Returns the id of this model instance.
    fn id(&self) -> Id;

    /// Combines the stored payload with incoming (possibly partial) data.
    fn updated_data(stored: &Value, incoming: &Value) -> Value {
        merge_shallow(stored, incoming)
    }
}

/// Shallow object merge: keys of `incoming` overwrite keys of `stored`.
///
/// A non-object on either side means `incoming` replaces `stored` entirely.
pub fn merge_shallow(stored: &Value, incoming: &Value) -> Value {
    match (stored, incoming) {
        (Value::Object(base), Value::Object(update)) => {
            let mut merged = base.clone();
            for (key, value) in update {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}
