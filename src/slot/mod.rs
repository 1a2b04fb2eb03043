//! Update slots - serialized update cycles over the data store.
//!
//! An update cycle starts with [`UpdateManager::acquire_slot`], collects every
//! changed and deleted model id the store reports while the slot is active,
//! and ends with either [`UpdateManager::commit`] (two-phase repository
//! notification plus one aggregate "modified" signal) or
//! [`UpdateManager::drop_slot`] (bookkeeping discarded, nobody notified).
//!
//! ```text
//!   Idle ──acquire_slot──▶ Active ──commit / drop_slot──▶ Idle
//!                            │                             │
//!              acquire_slot  │   (queued, newest first)    │
//!              ◀─────────────┴─────── serve next ◀─────────┘
//! ```

mod manager;
mod update_slot;

pub use manager::{ModifiedNotifier, UpdateManager};
pub use update_slot::{CollectionIds, SlotHandle, SlotId, UpdateSlot};
