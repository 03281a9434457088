//! Extraction query and load plan per sync strategy

use super::partition::{partition_range, partitions_predicate, window_partitions};
use super::types::{PartitionRange, PlanContext, SyncPlan};
use crate::error::{Error, Result};
use crate::mapping::{format_datetime, sanitize_name};
use crate::model::{ColumnMapping, Dataset};
use crate::source::SqlDialect;
use crate::types::{MergeMode, SyncStrategy};
use crate::writer::{watermark_literal, TargetMutation};
use chrono::{Duration, NaiveTime};
use tracing::debug;

/// Weekly full reload period of `date_partition`
pub const FULL_REFRESH_PERIOD_DAYS: i64 = 7;

// ============================================================================
// Requirements
// ============================================================================

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Fail fast when the strategy's required columns are not configured
pub fn check_requirements(dataset: &Dataset) -> Result<()> {
    let strategy = dataset.sync_strategy.as_str();
    let require = |value: &Option<String>, field: &str| {
        present(value)
            .map(|_| ())
            .ok_or_else(|| Error::missing_column(strategy, field))
    };

    match dataset.sync_strategy {
        SyncStrategy::FullRefresh => {}
        SyncStrategy::Timestamp | SyncStrategy::Id => {
            require(&dataset.reference_column, "reference_column")?;
        }
        SyncStrategy::DateDeleteInsert => {
            require(&dataset.reference_column, "reference_column")?;
            if dataset.delete_window_days.is_none() {
                return Err(Error::config(
                    "date_delete_insert strategy requires delete_window_days",
                ));
            }
        }
        SyncStrategy::DatePartition => {
            require(&dataset.partition_column, "partition_column")?;
            if dataset.refresh_window_days.is_none() {
                return Err(Error::config(
                    "date_partition strategy requires refresh_window_days",
                ));
            }
            if dataset.detect_modified {
                require(&dataset.modified_column, "modified_column")?;
            }
        }
    }

    if dataset.merge_mode == MergeMode::Dedupe {
        require(&dataset.unique_column, "unique_column")?;
    }
    Ok(())
}

// ============================================================================
// Relation & Column Helpers
// ============================================================================

/// Relation the extraction reads from: the configured query or table
pub fn base_relation(dataset: &Dataset, dialect: SqlDialect) -> Result<String> {
    if let Some(query) = present(&dataset.source_query) {
        let query = query.trim_end_matches(';').trim();
        return Ok(format!("({query}) AS src"));
    }
    match present(&dataset.source_table) {
        Some(table) => Ok(dialect.quote_qualified(table)),
        None => Err(Error::config(format!(
            "Dataset '{}' has neither source_table nor source_query",
            dataset.name
        ))),
    }
}

/// Target column a source column lands in
pub fn target_column(mapping: Option<&ColumnMapping>, source: &str) -> String {
    mapping
        .and_then(|m| m.target_for(source))
        .map_or_else(|| sanitize_name(source, 0), String::from)
}

fn required<'a>(value: &'a Option<String>, strategy: SyncStrategy, field: &str) -> Result<&'a str> {
    present(value).ok_or_else(|| Error::missing_column(strategy.as_str(), field))
}

// ============================================================================
// Planning
// ============================================================================

/// Build the extraction query and load plan for one run
pub fn plan(
    dataset: &Dataset,
    mapping: Option<&ColumnMapping>,
    ctx: &PlanContext,
) -> Result<SyncPlan> {
    check_requirements(dataset)?;

    let dialect = ctx.dialect;
    let strategy = dataset.sync_strategy;
    let mut predicates: Vec<String> = present(&dataset.custom_where)
        .map(|w| vec![w.to_string()])
        .unwrap_or_default();
    let mut order_by = None;
    let mut pre_load = Vec::new();
    let mut partitions = Vec::new();
    let mut full_reload = false;

    match strategy {
        SyncStrategy::FullRefresh => {
            pre_load.push(TargetMutation::Truncate);
            full_reload = true;
        }
        SyncStrategy::Timestamp | SyncStrategy::Id => {
            let reference = required(&dataset.reference_column, strategy, "reference_column")?;
            order_by = Some(dialect.quote_ident(reference));
            if ctx.full_resync {
                pre_load.push(TargetMutation::Truncate);
                full_reload = true;
            } else if let Some(watermark) = &ctx.watermark {
                predicates.push(format!(
                    "{} > {}",
                    dialect.quote_ident(reference),
                    source_watermark(dialect, watermark, ctx.watermark_numeric)
                ));
            }
        }
        SyncStrategy::DateDeleteInsert => {
            let reference = required(&dataset.reference_column, strategy, "reference_column")?;
            if ctx.full_resync {
                pre_load.push(TargetMutation::Truncate);
                full_reload = true;
            } else {
                let days = dataset.delete_window_days.unwrap_or_default();
                let start = (ctx.now.naive_utc() - Duration::days(i64::from(days)))
                    .date()
                    .and_time(NaiveTime::MIN);
                predicates.push(format!(
                    "{} >= {}",
                    dialect.quote_ident(reference),
                    dialect.datetime_literal(&start)
                ));
                pre_load.push(TargetMutation::DeleteRange {
                    column: target_column(mapping, reference),
                    from: Some(format_datetime(&start)),
                    to: None,
                });
            }
        }
        SyncStrategy::DatePartition => {
            let column = required(&dataset.partition_column, strategy, "partition_column")?;
            if needs_full_reload(dataset, ctx) {
                pre_load.push(TargetMutation::Truncate);
                full_reload = true;
            } else {
                partitions = reload_partitions(dataset, ctx)?;
                predicates.push(partitions_predicate(dialect, column, &partitions));
                let target = target_column(mapping, column);
                pre_load.extend(partitions.iter().map(|p| TargetMutation::DeleteRange {
                    column: target.clone(),
                    from: Some(format_datetime(&p.start)),
                    to: Some(format_datetime(&p.end)),
                }));
            }
        }
    }

    let mut post_load = Vec::new();
    if dataset.merge_mode == MergeMode::Dedupe && !full_reload {
        let unique = required(&dataset.unique_column, strategy, "unique_column")?;
        post_load.push(TargetMutation::Dedupe {
            unique_column: target_column(mapping, unique),
            order_column: present(&dataset.reference_column).map(|c| target_column(mapping, c)),
        });
    }

    let extraction_query = dialect.select(
        "*",
        &ctx.relation,
        &predicates,
        order_by.as_deref(),
        dataset.row_limit,
    );
    debug!(
        dataset_id = dataset.id,
        strategy = %strategy,
        full_reload,
        partitions = partitions.len(),
        query = %extraction_query,
        "Planned sync"
    );

    Ok(SyncPlan {
        extraction_query,
        pre_load,
        post_load,
        partitions,
        full_reload,
    })
}

/// Watermark literal in a form the source dialect compares correctly
fn source_watermark(dialect: SqlDialect, watermark: &str, numeric: bool) -> String {
    match dialect {
        SqlDialect::TSql if !numeric => watermark_literal(&watermark.replacen(' ', "T", 1), false),
        _ => watermark_literal(watermark, numeric),
    }
}

fn needs_full_reload(dataset: &Dataset, ctx: &PlanContext) -> bool {
    if ctx.full_resync || ctx.target_empty {
        return true;
    }
    dataset.weekly_full_refresh
        && ctx.last_full_refresh_at.map_or(true, |at| {
            ctx.now - at >= Duration::days(FULL_REFRESH_PERIOD_DAYS)
        })
}

/// Window partitions plus modified ones, oldest first, without duplicates
fn reload_partitions(dataset: &Dataset, ctx: &PlanContext) -> Result<Vec<PartitionRange>> {
    let days = dataset.refresh_window_days.unwrap_or_default();
    let mut ranges = window_partitions(ctx.now.naive_utc(), days, dataset.partition_type);

    if dataset.detect_modified {
        for key in &ctx.modified_partitions {
            if ranges.iter().all(|r| &r.key != key) {
                ranges.push(partition_range(key, dataset.partition_type)?);
            }
        }
        ranges.sort_by(|a, b| a.start.cmp(&b.start));
    }
    Ok(ranges)
}
