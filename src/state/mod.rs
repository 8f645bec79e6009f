//! Run state: work items, the transition log and run records.
//!
//! The [`RunStateStore`] is the only owner of [`WorkItem`] and
//! [`RunRecord`] lifecycles. Everything else reads and changes work items
//! through its API.

pub mod item;
pub mod lock;
pub mod record;
pub mod store;

pub use item::{FailureReason, ItemOrigin, SlotKey, WorkItem, WorkItemId, WorkItemState};
pub use lock::{LockInfo, StoreLock};
pub use record::{ConfigSnapshot, RunRecord, RunSummary};
pub use store::{write_atomic, RunStateStore, StateLayout, StoreEvent};
