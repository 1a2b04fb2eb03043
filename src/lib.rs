//! In-memory, collection-indexed model store with serialized update cycles.
//!
//! - [`DataStore`] holds every live [`Record`], grouped by collection, and
//!   broadcasts changes.
//! - [`UpdateManager`] lets one updater at a time batch store mutations into
//!   an [`UpdateSlot`]; committing it notifies every registered
//!   [`UpdateCollaborator`] in two phases and fires a single "modified" signal.
//! - [`ModelRegistry`] is the startup registration of model types and
//!   repositories the store and manager consult.
//!
//! ```ignore
//! let registry = ModelRegistry::new()
//!     .with_model::<Motion>()
//!     .with_repository(motion_repository);
//! let store = DataStore::new(Arc::new(registry));
//!
//! let slot = store.begin_update().await?;
//! store.remove("motions/motion", &[3])?;
//! store.add_or_update(records)?;
//! store.commit_update(&slot)?;
//! ```

mod error;
mod mapper;
mod model;
mod slot;
mod store;

pub use error::StoreError;
pub use mapper::{CollectionMapper, ModelRegistry, UpdateCollaborator};
pub use model::{merge_shallow, DeletedInformation, Id, Model, Record};
pub use slot::{CollectionIds, ModifiedNotifier, SlotHandle, SlotId, UpdateManager, UpdateSlot};
pub use store::{ClearEvent, DataStore, ModelStorage, StoreConfig, UpdateBatch};

// Re-export the derive macro next to the trait it implements
pub use meeting_store_macros::Model;
