//! Sync strategy selector
//!
//! Given a dataset and what is already in the target, builds the extraction
//! query and the mutations run around the load.
//!
//! | Strategy             | Extraction                     | Target mutation               |
//! |----------------------|--------------------------------|-------------------------------|
//! | `full_refresh`       | everything (custom_where)      | truncate                      |
//! | `timestamp` / `id`   | `reference > watermark`        | append                        |
//! | `date_delete_insert` | `reference >= window start`    | delete window, insert         |
//! | `date_partition`     | partitions in window/modified  | delete partitions, insert     |
//!
//! A full resync turns every strategy into a truncate-and-reload.

mod partition;
mod planner;
mod types;

pub use partition::{
    compare_watermarks, modified_partitions, partition_key, partition_maxima_query,
    partition_range, partitions_predicate, window_partitions,
};
pub use planner::{
    base_relation, check_requirements, plan, target_column, FULL_REFRESH_PERIOD_DAYS,
};
pub use types::{PartitionRange, PlanContext, SyncPlan};
