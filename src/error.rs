use thiserror::Error;

use crate::slot::SlotId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Commit against no active slot, or against a slot that is not the active one.
    #[error("no or wrong update slot to be finished (given {given}, active {active:?})")]
    InvalidSlot {
        given: SlotId,
        active: Option<SlotId>,
    },
    /// A queued slot request was dropped by the manager without being served.
    #[error("update slot request was abandoned before being served")]
    SlotRequestAbandoned,
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("model serialization error: {0}")]
    Serde(String),
    /// A raw payload in an update batch carried no usable `id` field.
    #[error("raw model in collection {collection} has no numeric `id` field")]
    MissingId { collection: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}
