//! Control plane module
//!
//! The operations the CRUD/UI layer calls: triggers, cancellation, worker
//! control, lock administration, job listing, schedules and health. The
//! REST server and the CLI are thin adapters over `ControlPlane`.

mod plane;
mod types;

pub use plane::ControlPlane;
pub use types::TriggerAllOutcome;
