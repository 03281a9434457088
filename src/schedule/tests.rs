//! Tests for cron parsing, shorthand codes and the scheduler tick

use super::*;
use crate::catalog::{Catalog, JobPatch, Repository};
use crate::model::{Connection, Dataset};
use crate::types::{JobStatus, SourceType};
use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

// ============================================================================
// Cron Tests
// ============================================================================

#[test]
fn test_cron_matches() {
    let cron = CronSchedule::parse("*/15 9-17 * * 1-5").unwrap();
    // Tuesday
    assert!(cron.matches(at(2024, 3, 5, 9, 45)));
    assert!(!cron.matches(at(2024, 3, 5, 9, 40)));
    assert!(!cron.matches(at(2024, 3, 5, 18, 0)));
    // Sunday
    assert!(!cron.matches(at(2024, 3, 3, 10, 0)));
}

#[test]
fn test_cron_sunday_as_seven() {
    let cron = CronSchedule::parse("0 0 * * 7").unwrap();
    assert!(cron.matches(at(2024, 3, 3, 0, 0)));
}

#[test]
fn test_cron_day_fields_are_ored() {
    // the 1st of the month or any Monday
    let cron = CronSchedule::parse("0 0 1 * 1").unwrap();
    assert!(cron.matches(at(2024, 3, 1, 0, 0)));
    assert!(cron.matches(at(2024, 3, 4, 0, 0)));
    assert!(!cron.matches(at(2024, 3, 5, 0, 0)));
}

#[test]
fn test_cron_weekday_ranges_and_names() {
    // Friday through Sunday, written with 7
    let weekend = CronSchedule::parse("0 0 * * 5-7").unwrap();
    assert!(weekend.matches(at(2024, 3, 1, 0, 0)));
    assert!(weekend.matches(at(2024, 3, 3, 0, 0)));
    assert!(!weekend.matches(at(2024, 3, 4, 0, 0)));

    let named = CronSchedule::parse("0 9 * * MON-FRI").unwrap();
    assert!(named.matches(at(2024, 3, 4, 9, 0)));
    assert!(!named.matches(at(2024, 3, 2, 9, 0)));

    let sunday = CronSchedule::parse("0 0 * * 0").unwrap();
    assert_eq!(sunday.next_after(at(2024, 3, 4, 0, 0)), Some(at(2024, 3, 10, 0, 0)));
}

#[test]
fn test_cron_matches_ignores_seconds() {
    let cron = CronSchedule::parse("30 2 * * *").unwrap();
    let at_second = at(2024, 3, 5, 2, 30) + chrono::Duration::seconds(42);
    assert!(cron.matches(at_second));
    assert_eq!(cron.to_string(), "30 2 * * *");
}

#[test_case("*/15 * * * *", at(2024, 3, 5, 10, 7), at(2024, 3, 5, 10, 15))]
#[test_case("0 * * * *", at(2024, 3, 5, 10, 0), at(2024, 3, 5, 11, 0))]
#[test_case("30 2 * * *", at(2024, 3, 5, 10, 0), at(2024, 3, 6, 2, 30))]
#[test_case("0 0 1 1 *", at(2024, 3, 5, 10, 0), at(2025, 1, 1, 0, 0))]
#[test_case("0 12 29 2 *", at(2024, 3, 1, 0, 0), at(2028, 2, 29, 12, 0))]
fn test_next_after(expr: &str, from: DateTime<Utc>, expected: DateTime<Utc>) {
    let cron = CronSchedule::parse(expr).unwrap();
    assert_eq!(cron.next_after(from), Some(expected));
}

#[test]
fn test_is_due_between() {
    let cron = CronSchedule::parse("*/5 * * * *").unwrap();
    assert!(cron.is_due_between(at(2024, 1, 1, 0, 3), at(2024, 1, 1, 0, 5)));
    assert!(!cron.is_due_between(at(2024, 1, 1, 0, 5), at(2024, 1, 1, 0, 9)));
}

#[test_case("* * * *" ; "too few fields")]
#[test_case("60 * * * *" ; "minute out of range")]
#[test_case("*/0 * * * *" ; "zero step")]
#[test_case("5-1 * * * *" ; "reversed range")]
#[test_case("a * * * *" ; "not a number")]
#[test_case("0 0 * * 8" ; "weekday out of range")]
#[test_case("0 0 * * 1-3/0" ; "zero weekday step")]
fn test_invalid_cron(expr: &str) {
    assert!(CronSchedule::parse(expr).is_err());
}

// ============================================================================
// Shorthand Tests
// ============================================================================

#[test_case("manual", None)]
#[test_case("", None)]
#[test_case("every_minute", Some("* * * * *"))]
#[test_case("every_15_minutes", Some("*/15 * * * *"))]
#[test_case("hourly", Some("0 * * * *"))]
#[test_case("every_6_hours", Some("0 */6 * * *"))]
#[test_case("daily", Some("0 0 * * *"))]
#[test_case("daily_at_03", Some("0 3 * * *"))]
#[test_case("daily_at_14:30", Some("30 14 * * *"))]
#[test_case("weekly", Some("0 0 * * 0"))]
#[test_case("  0   4 * *  1-5 ", Some("0 4 * * 1-5"))]
fn test_to_cron(code: &str, expected: Option<&str>) {
    assert_eq!(to_cron(code).unwrap().as_deref(), expected);
}

#[test_case("every_0_minutes")]
#[test_case("every_90_minutes")]
#[test_case("daily_at_25")]
#[test_case("sometimes")]
fn test_to_cron_rejects(code: &str) {
    assert!(to_cron(code).is_err());
}

// ============================================================================
// Scheduler Tests
// ============================================================================

async fn catalog() -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::in_memory());
    catalog
        .put_connection(Connection::new(1, "src", SourceType::Postgres))
        .await
        .unwrap();
    for id in [1, 2] {
        catalog
            .put_dataset(Dataset::new(id, 1, "orders", format!("orders_{id}")))
            .await
            .unwrap();
    }
    catalog
}

#[tokio::test]
async fn test_tick_enqueues_due_schedules() {
    let catalog = catalog().await;
    catalog
        .upsert_schedule(1, "*/5 * * * *".into(), true)
        .await
        .unwrap();
    catalog
        .upsert_schedule(2, "0 3 * * *".into(), true)
        .await
        .unwrap();

    let scheduler = Scheduler::new(catalog.clone(), Duration::from_secs(60));
    let outcome = scheduler.tick(at(2024, 3, 5, 10, 5)).await.unwrap();

    assert_eq!(outcome.enqueued.len(), 1);
    assert_eq!(outcome.enqueued[0].0, 1);
    let schedules = catalog.schedules().await.unwrap();
    assert_eq!(schedules[0].last_triggered_at, Some(at(2024, 3, 5, 10, 5)));
}

#[tokio::test]
async fn test_tick_is_idempotent_while_job_active() {
    let catalog = catalog().await;
    catalog
        .upsert_schedule(1, "* * * * *".into(), true)
        .await
        .unwrap();
    let scheduler = Scheduler::new(catalog.clone(), Duration::from_secs(60));

    let first = scheduler.tick(at(2024, 3, 5, 10, 5)).await.unwrap();
    assert_eq!(first.enqueued.len(), 1);

    let job_id = first.enqueued[0].1;
    catalog
        .transition_job(job_id, JobStatus::Running, JobPatch::worker("w1"))
        .await
        .unwrap();

    let second = scheduler.tick(at(2024, 3, 5, 10, 6)).await.unwrap();
    assert!(second.enqueued.is_empty());
    assert_eq!(second.already_queued, vec![1]);

    // exactly one job exists for the dataset
    let jobs = catalog
        .jobs(&crate::model::JobFilter::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
}

#[tokio::test]
async fn test_tick_skips_inactive_and_not_due() {
    let catalog = catalog().await;
    let schedule = catalog
        .upsert_schedule(1, "* * * * *".into(), true)
        .await
        .unwrap();
    catalog.set_schedule_active(schedule.id, false).await.unwrap();

    let scheduler = Scheduler::new(catalog.clone(), Duration::from_secs(60));
    assert!(scheduler
        .tick(at(2024, 3, 5, 10, 5))
        .await
        .unwrap()
        .enqueued
        .is_empty());

    catalog.set_schedule_active(schedule.id, true).await.unwrap();
    catalog
        .mark_schedule_triggered(schedule.id, at(2024, 3, 5, 10, 5))
        .await
        .unwrap();
    // same minute again: nothing new is due
    let outcome = scheduler.tick(at(2024, 3, 5, 10, 5)).await.unwrap();
    assert!(outcome.enqueued.is_empty());
    assert!(catalog.active_job(1).await.unwrap().is_none());
}
