//! Job lock module
//!
//! Dataset-scoped, TTL-bounded mutual exclusion. Correctness across worker
//! processes rests on the store's single conditional insert.
//!
//! # Overview
//!
//! - `LockManager` - acquire / release / refresh / list / force-clear
//! - `LockStore` - conditional storage, `MemoryLockStore` and `FileLockStore`

mod manager;
mod store;
mod types;

pub use manager::LockManager;
pub use store::{FileLockStore, LockStore, MemoryLockStore};
pub use types::{AcquireOutcome, LockInfo, LockRecord, LockScope};
