//! Date partition helpers for the `date_partition` strategy

use super::types::PartitionRange;
use crate::error::{Error, Result};
use crate::mapping::parse_datetime;
use crate::source::SqlDialect;
use crate::types::PartitionType;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::collections::BTreeMap;

// ============================================================================
// Keys and Ranges
// ============================================================================

/// Partition key of a timestamp
pub fn partition_key(at: NaiveDateTime, partition_type: PartitionType) -> String {
    match partition_type {
        PartitionType::Monthly => at.format("%Y-%m").to_string(),
        PartitionType::Daily => at.format("%Y-%m-%d").to_string(),
    }
}

/// First day of the partition containing `at`
fn partition_start(at: NaiveDateTime, partition_type: PartitionType) -> Option<NaiveDate> {
    let date = at.date();
    match partition_type {
        PartitionType::Monthly => date.with_day(1),
        PartitionType::Daily => Some(date),
    }
}

fn next_start(start: NaiveDate, partition_type: PartitionType) -> Option<NaiveDate> {
    match partition_type {
        PartitionType::Monthly => start.checked_add_months(Months::new(1)),
        PartitionType::Daily => start.succ_opt(),
    }
}

/// `[start, end)` bounds of a partition key
pub fn partition_range(key: &str, partition_type: PartitionType) -> Result<PartitionRange> {
    let invalid = || Error::config(format!("Invalid {partition_type} partition key '{key}'"));
    let start = match partition_type {
        PartitionType::Monthly => NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d"),
        PartitionType::Daily => NaiveDate::parse_from_str(key, "%Y-%m-%d"),
    }
    .map_err(|_| invalid())?;
    let end = next_start(start, partition_type).ok_or_else(invalid)?;

    Ok(PartitionRange {
        key: key.to_string(),
        start: start.and_time(chrono::NaiveTime::MIN),
        end: end.and_time(chrono::NaiveTime::MIN),
    })
}

/// Every partition touching `[now - days, now]`, oldest first
pub fn window_partitions(
    now: NaiveDateTime,
    days: u32,
    partition_type: PartitionType,
) -> Vec<PartitionRange> {
    let from = now - Duration::days(i64::from(days));
    let mut ranges = Vec::new();
    let mut current = partition_start(from, partition_type);

    while let Some(start) = current {
        if start > now.date() {
            break;
        }
        let Some(end) = next_start(start, partition_type) else {
            break;
        };
        let start_at = start.and_time(chrono::NaiveTime::MIN);
        ranges.push(PartitionRange {
            key: partition_key(start_at, partition_type),
            start: start_at,
            end: end.and_time(chrono::NaiveTime::MIN),
        });
        current = Some(end);
    }
    ranges
}

// ============================================================================
// Modification Detection
// ============================================================================

/// Order two watermark texts: numerically, then as dates, then lexically
pub fn compare_watermarks(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    if let (Some(x), Some(y)) = (parse_datetime(a), parse_datetime(b)) {
        return x.cmp(&y);
    }
    a.cmp(b)
}

/// Partitions whose source maximum is past the watermark they were loaded at.
///
/// A partition the state has never seen counts as modified.
pub fn modified_partitions(
    source_maxima: &BTreeMap<String, String>,
    loaded: &BTreeMap<String, String>,
) -> Vec<String> {
    source_maxima
        .iter()
        .filter(|(key, max)| match loaded.get(*key) {
            Some(mark) => compare_watermarks(max, mark) == Ordering::Greater,
            None => true,
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Query returning `partition_key, watermark` per source partition
pub fn partition_maxima_query(
    dialect: SqlDialect,
    relation: &str,
    partition_column: &str,
    partition_type: PartitionType,
    modified_column: &str,
    custom_where: Option<&str>,
) -> String {
    let key = dialect.partition_key_expr(partition_column, partition_type);
    let watermark = dialect.cast_text(&format!("MAX({})", dialect.quote_ident(modified_column)));
    let mut sql = format!("SELECT {key} AS partition_key, {watermark} AS watermark FROM {relation}");
    if let Some(filter) = custom_where.filter(|w| !w.trim().is_empty()) {
        sql.push_str(&format!(" WHERE ({filter})"));
    }
    sql.push_str(&format!(" GROUP BY {key}"));
    sql
}

/// Source predicate covering a set of partitions
pub fn partitions_predicate(
    dialect: SqlDialect,
    partition_column: &str,
    partitions: &[PartitionRange],
) -> String {
    let column = dialect.quote_ident(partition_column);
    partitions
        .iter()
        .map(|p| {
            format!(
                "({column} >= {} AND {column} < {})",
                dialect.datetime_literal(&p.start),
                dialect.datetime_literal(&p.end)
            )
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}
