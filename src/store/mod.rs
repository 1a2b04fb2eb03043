//! The data store: every live model record, grouped by collection.

mod batch;
mod channels;
mod config;
mod data_store;

pub use batch::UpdateBatch;
pub use channels::ClearEvent;
pub use config::StoreConfig;
pub use data_store::{DataStore, ModelStorage};
