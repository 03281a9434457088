//! The read -> map -> flush loop of one job

use super::{SyncEngine, SyncStats};
use crate::error::{Error, Result};
use crate::mapping::MappingInferrer;
use crate::model::{ColumnMapping, Dataset, Job};
use crate::source::SourceConnector;
use crate::strategy::{self, PlanContext, SyncPlan};
use crate::types::{JobAction, Row, SyncStrategy};
use crate::writer::BatchWriter;
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Target-side preparation that waits for the first rows
struct LoadState {
    mapping: Option<ColumnMapping>,
    prepared: bool,
}

impl SyncEngine {
    pub(super) async fn execute(
        &self,
        job: &Job,
        holder: &str,
        token: &CancellationToken,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let started = Instant::now();
        let mut dataset = self.repo.dataset(job.dataset_id).await?;
        dataset.row_limit = job.row_limit;
        strategy::check_requirements(&dataset)?;

        let connection = self.repo.connection(dataset.connection_id).await?;
        let source = self.opener.open(&connection).await?;
        let full_resync = job.action == JobAction::FullResync;

        let (plan, maxima) = self.plan(&dataset, source.as_ref(), full_resync).await?;
        stats.full_reload = plan.full_reload;
        stats.partitions_reloaded = plan.partitions.len();
        if full_resync {
            self.state.clear_dataset(dataset.id).await?;
        }
        info!(
            job_id = job.id,
            dataset_id = dataset.id,
            strategy = %dataset.sync_strategy,
            full_reload = plan.full_reload,
            partitions = ?plan.partition_keys(),
            "Starting extraction"
        );

        let mut load = LoadState {
            mapping: dataset.column_mapping.clone(),
            prepared: false,
        };
        let mut writer = BatchWriter::new(self.target.clone(), self.config.insert_batch_size)
            .with_report_interval(self.config.report_interval);
        let mut remaining = dataset.row_limit;

        let mut stream = source
            .stream_query(&plan.extraction_query, self.config.read_batch_size)
            .await?;

        loop {
            self.tracker.check_cancelled(job.id, token).await?;
            let Some(batch) = stream.next_batch().await else {
                break;
            };
            let mut rows = batch?;
            if let Some(left) = remaining {
                rows.truncate(usize::try_from(left).unwrap_or(usize::MAX));
            }
            stats.add_read_batch(rows.len());
            if rows.is_empty() {
                if remaining == Some(0) {
                    break;
                }
                continue;
            }

            let Some(mapping) = self.resolve_mapping(&dataset, &mut load, &rows).await? else {
                continue;
            };
            if !load.prepared {
                self.prepare(&dataset, &plan, &mapping, stats).await?;
                load.prepared = true;
            }

            for chunk in rows.chunks(writer.insert_batch_size()) {
                let written = writer.insert(&dataset.target_table, &mapping, chunk).await?;
                stats.add_flush(written);
                self.tracker.progress(job.id, stats.rows_written).await?;
                if !self.locks.refresh(dataset.id, holder).await? {
                    return Err(Error::state(format!(
                        "Lock on dataset {} was lost during the load",
                        dataset.id
                    )));
                }
            }
            if let Some(left) = remaining.as_mut() {
                *left = left.saturating_sub(rows.len() as u64);
            }
        }
        drop(stream);
        stats.values_coerced = writer.coerced();

        let table_exists = self.target.table_exists(&dataset.target_table).await?;
        if table_exists {
            if !load.prepared {
                // nothing was read: the plan still empties what it replaces
                for mutation in &plan.pre_load {
                    stats.add_removed(self.target.apply(&dataset.target_table, mutation).await?);
                }
            }
            for mutation in &plan.post_load {
                stats.add_removed(self.target.apply(&dataset.target_table, mutation).await?);
            }
            stats.target_rows = self.target.row_count(&dataset.target_table).await?;
        }

        if dataset.sync_strategy == SyncStrategy::DatePartition {
            self.record_partitions(&dataset, source.as_ref(), &plan, maxima)
                .await?;
        }
        stats.set_duration(started.elapsed().as_millis() as u64);
        Ok(())
    }

    /// Gather the target facts the strategy needs and build the plan
    async fn plan(
        &self,
        dataset: &Dataset,
        source: &dyn SourceConnector,
        full_resync: bool,
    ) -> Result<(SyncPlan, Option<BTreeMap<String, String>>)> {
        let dialect = source.dialect();
        let relation = strategy::base_relation(dataset, dialect)?;
        let table = &dataset.target_table;
        let mapping = dataset.column_mapping.as_ref();

        let target_rows = if self.target.table_exists(table).await? {
            self.target.row_count(table).await?
        } else {
            0
        };

        let mut ctx = PlanContext::new(Utc::now(), dialect, relation)
            .with_full_resync(full_resync)
            .with_target_empty(target_rows == 0);

        let mut maxima = None;
        match dataset.sync_strategy {
            SyncStrategy::Timestamp | SyncStrategy::Id if target_rows > 0 && !full_resync => {
                if let (Some(mapping), Some(reference)) = (mapping, &dataset.reference_column) {
                    if let Some(column) = mapping.by_source(reference) {
                        let watermark = self.target.max_value(table, &column.target).await?;
                        debug!(dataset_id = dataset.id, watermark = ?watermark, "Target watermark");
                        ctx = ctx.with_watermark(watermark, column.column_type.is_numeric());
                    }
                }
            }
            SyncStrategy::DatePartition => {
                ctx = ctx.with_last_full_refresh(self.state.last_full_refresh(dataset.id).await);
                if dataset.detect_modified && target_rows > 0 && !full_resync {
                    let source_maxima = self.partition_maxima(dataset, source, &ctx.relation).await?;
                    let loaded = self.state.partition_watermarks(dataset.id).await;
                    ctx = ctx.with_modified_partitions(strategy::modified_partitions(
                        &source_maxima,
                        &loaded,
                    ));
                    maxima = Some(source_maxima);
                }
            }
            _ => {}
        }

        Ok((strategy::plan(dataset, mapping, &ctx)?, maxima))
    }

    /// Latest `modified_column` value per source partition
    async fn partition_maxima(
        &self,
        dataset: &Dataset,
        source: &dyn SourceConnector,
        relation: &str,
    ) -> Result<BTreeMap<String, String>> {
        let (Some(partition), Some(modified)) = (&dataset.partition_column, &dataset.modified_column)
        else {
            return Ok(BTreeMap::new());
        };
        let query = strategy::partition_maxima_query(
            source.dialect(),
            relation,
            partition,
            dataset.partition_type,
            modified,
            dataset.custom_where.as_deref(),
        );
        let rows = source
            .stream_query(&query, self.config.read_batch_size)
            .await?
            .collect_rows()
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let key = row.get("partition_key")?.as_str()?.to_string();
                let mark = match row.get("watermark")? {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                Some((key, mark))
            })
            .collect())
    }

    /// Persisted mapping, or one inferred (and saved) from this batch
    async fn resolve_mapping(
        &self,
        dataset: &Dataset,
        load: &mut LoadState,
        rows: &[Row],
    ) -> Result<Option<ColumnMapping>> {
        if let Some(mapping) = &load.mapping {
            return Ok(Some(mapping.clone()));
        }
        let Some(inferred) = MappingInferrer::new().infer(rows) else {
            // an empty first row; try again with the next batch
            return Ok(None);
        };
        let stored = self.repo.save_mapping(dataset.id, inferred).await?;
        info!(
            dataset_id = dataset.id,
            columns = stored.columns().len(),
            "Column mapping inferred"
        );
        load.mapping = Some(stored.clone());
        Ok(Some(stored))
    }

    /// Create the table and run the pre-load mutations before the first flush
    async fn prepare(
        &self,
        dataset: &Dataset,
        plan: &SyncPlan,
        mapping: &ColumnMapping,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let table = &dataset.target_table;
        self.target.ensure_table(table, mapping).await?;
        for mutation in &plan.pre_load {
            let removed = self.target.apply(table, mutation).await?;
            debug!(dataset_id = dataset.id, %mutation, removed, "Pre-load mutation");
            stats.add_removed(removed);
        }
        Ok(())
    }

    /// Remember which partitions were loaded, and at which watermark
    async fn record_partitions(
        &self,
        dataset: &Dataset,
        source: &dyn SourceConnector,
        plan: &SyncPlan,
        maxima: Option<BTreeMap<String, String>>,
    ) -> Result<()> {
        let now = Utc::now();
        let maxima = match maxima {
            Some(m) => m,
            None if dataset.detect_modified => {
                let relation = strategy::base_relation(dataset, source.dialect())?;
                self.partition_maxima(dataset, source, &relation).await?
            }
            None => BTreeMap::new(),
        };

        let loaded: BTreeMap<String, Option<String>> = if plan.full_reload {
            self.state.mark_full_refresh(dataset.id, now).await?;
            maxima.into_iter().map(|(k, v)| (k, Some(v))).collect()
        } else {
            plan.partitions
                .iter()
                .map(|p| (p.key.clone(), maxima.get(&p.key).cloned()))
                .collect()
        };
        self.state.record_partitions(dataset.id, &loaded, now).await
    }
}
