//! Select queries: validation, partition fan-out with bounded parallelism, merging of
//! per-partition results, and materialisation into frames.

use crate::aggregate::{interpolate, AggregateFunction, Buckets, Interpolator};
use crate::column::{Column, ColumnSpec, FloatColumn, StringColumn, TimeColumn};
use crate::config::QuerierConfig;
use crate::encoding::Encoding;
use crate::error::DbError;
use crate::frames::{DataFrame, FrameSet, SeriesSet};
use crate::partition::{Partition, PartitionManager, PartitionReader, ReadRequest};
use crate::series::SeriesIterator;
use crate::telemetry::{query_metrics, with_timer, QueryEvent, QueryEventListener};
use crate::types::{Labels, SampleValue, Timestamp, Value};

use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Metric-name attribute as written by callers in filter expressions.
pub const PROMETHEUS_METRIC_NAME_ATTRIBUTE: &str = "__name__";

/// Metric-name attribute as stored.
pub const METRIC_NAME_ATTRIBUTE: &str = "_name";

/// Name under which the query body is timed.
pub const QUERY_TIMER: &str = "QueryTimer";

/// One output column requested by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedColumn {
    pub metric: String,
    /// Aggregation function name; empty for a raw column.
    pub function: String,
    pub interpolator: String,
}

/// Caller-facing select request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectParams {
    pub name: String,
    /// Comma-separated aggregation functions, e.g. `"avg, max"`.
    pub functions: String,
    pub from: Timestamp,
    pub to: Timestamp,
    pub step: i64,
    pub windows: Vec<i64>,
    pub filter: String,
    pub requested_columns: Option<Vec<RequestedColumn>>,
}

impl SelectParams {
    /// The explicit column selection, or one column per entry of `functions` with the
    /// `next` interpolator.
    pub fn requested_columns(&self) -> Vec<RequestedColumn> {
        if let Some(columns) = &self.requested_columns {
            return columns.clone();
        }
        self.functions
            .split(',')
            .map(|function| RequestedColumn {
                metric: self.name.clone(),
                function: function.trim().to_string(),
                interpolator: "next".to_string(),
            })
            .collect()
    }
}

pub fn is_power_of_two(x: usize) -> bool {
    x != 0 && (x & (x - 1)) == 0
}

/// Entry point for select queries over a set of partitions.
#[derive(Debug)]
pub struct Querier {
    partitions: Arc<dyn PartitionManager>,
    reader: Arc<dyn PartitionReader>,
    config: QuerierConfig,
    /// Shared by every query. `None` when `query_workers` is invalid or the pool failed to start.
    pool: Option<rayon::ThreadPool>,
}

impl Querier {
    pub fn new(
        partitions: Arc<dyn PartitionManager>,
        reader: Arc<dyn PartitionReader>,
        config: QuerierConfig,
    ) -> Self {
        let pool = if is_power_of_two(config.query_workers) {
            rayon::ThreadPoolBuilder::new()
                .num_threads(config.query_workers)
                .thread_name(|i| format!("tsq-query-{}", i))
                .build()
                .map_err(|e| log::error!(target: "tsquery", "failed to build query pool: {}", e))
                .ok()
        } else {
            None
        };
        Self {
            partitions,
            reader,
            config,
            pool,
        }
    }

    pub fn config(&self) -> &QuerierConfig {
        &self.config
    }

    /// Runs a select query and returns its series.
    ///
    /// `Ok` always holds a valid set, empty when no partition overlaps the range. On
    /// error, `unwrap_or_default()` yields the empty set.
    pub fn select(&self, params: &SelectParams) -> Result<SeriesSet, DbError> {
        let frames = self.base_select(params)?;
        SeriesSet::try_from(frames)
    }

    /// Runs a select query and returns its column-oriented frames.
    pub fn select_data_frame(&self, params: &SelectParams) -> Result<FrameSet, DbError> {
        self.base_select(params)
    }

    fn base_select(&self, params: &SelectParams) -> Result<FrameSet, DbError> {
        let started = Instant::now();
        let result = self.run_select(params);
        let events = &self.config.event_listener;
        match &result {
            Ok(frames) => events.on_event(QueryEvent::QueryCompleted {
                series: frames.len(),
                duration: started.elapsed(),
            }),
            Err(e) => {
                query_metrics::record_query_failure();
                events.on_event(QueryEvent::QueryFailed {
                    error: e.to_string(),
                });
            }
        }
        result
    }

    fn run_select(&self, params: &SelectParams) -> Result<FrameSet, DbError> {
        if params.to < params.from {
            return Err(DbError::Range {
                from: params.from,
                to: params.to,
            });
        }

        self.partitions
            .read_and_update_schema()
            .map_err(DbError::schema_refresh)?;

        // Enforced here as well as in config validation: the merge relies on it.
        if !is_power_of_two(self.config.query_workers) {
            return Err(DbError::Configuration(format!(
                "Query workers num must be a power of 2 and > 0, got {}",
                self.config.query_workers
            )));
        }

        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::Internal("query worker pool is not running".to_string()))?;

        let mut ctx = SelectQueryContext::new(params, &self.config)?;

        self.config.event_listener.on_event(QueryEvent::QueryStarted {
            metric: params.name.clone(),
            from: params.from,
            to: params.to,
            step: params.step,
            functions: params.functions.clone(),
            filter: params.filter.clone(),
            windows: params.windows.clone(),
            disable_client_aggr: self.config.disable_client_aggr,
        });

        with_timer(self.config.reporter.as_ref(), QUERY_TIMER, || {
            ctx.filter = params
                .filter
                .replace(PROMETHEUS_METRIC_NAME_ATTRIBUTE, METRIC_NAME_ATTRIBUTE);

            let parts = self.partitions.parts_for_range(params.from, params.to, true);
            self.config
                .event_listener
                .on_event(QueryEvent::PartitionsResolved { count: parts.len() });
            if parts.is_empty() {
                return Ok(FrameSet::default());
            }

            ctx.start(pool, &parts, self.reader.as_ref())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnPlan {
    metric: String,
    function: Option<AggregateFunction>,
    interpolator: Interpolator,
}

/// Execution state of one select query.
#[derive(Debug)]
pub struct SelectQueryContext {
    mint: Timestamp,
    maxt: Timestamp,
    step: i64,
    filter: String,
    window: Option<i64>,
    columns: Vec<ColumnPlan>,
    events: Arc<dyn QueryEventListener>,
}

impl SelectQueryContext {
    fn new(params: &SelectParams, config: &QuerierConfig) -> Result<Self, DbError> {
        if params.step < 0 {
            return Err(DbError::InvalidQuery(format!("negative step {}", params.step)));
        }
        let window = match params.windows.as_slice() {
            [] => None,
            [w] => Some(*w),
            many => {
                return Err(DbError::InvalidQuery(format!(
                    "at most one aggregation window is supported, got {:?}",
                    many
                )))
            }
        };

        let columns = params
            .requested_columns()
            .into_iter()
            .map(|col| -> Result<ColumnPlan, DbError> {
                let function = if col.function.is_empty() || config.disable_client_aggr {
                    None
                } else {
                    Some(col.function.parse::<AggregateFunction>()?)
                };
                let metric = if col.metric.is_empty() {
                    params.name.clone()
                } else {
                    col.metric
                };
                Ok(ColumnPlan {
                    metric,
                    function,
                    interpolator: col.interpolator.parse()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let has_raw = columns.iter().any(|c| c.function.is_none());
        let has_aggr = columns.iter().any(|c| c.function.is_some());
        if has_raw && has_aggr && params.step == 0 {
            return Err(DbError::InvalidQuery(
                "raw and aggregated columns can only be mixed with a step".to_string(),
            ));
        }

        Ok(Self {
            mint: params.from,
            maxt: params.to,
            step: params.step,
            filter: params.filter.clone(),
            window,
            columns,
            events: Arc::clone(&config.event_listener),
        })
    }

    /// Reads every partition on `pool`, merges the partial results
    /// by series identity and builds one frame per series. The first failing partition
    /// fails the whole query.
    fn start(
        &self,
        pool: &rayon::ThreadPool,
        parts: &[Arc<Partition>],
        reader: &dyn PartitionReader,
    ) -> Result<FrameSet, DbError> {

        let mut metrics: Vec<&str> = Vec::new();
        for col in &self.columns {
            if !metrics.contains(&col.metric.as_str()) {
                metrics.push(&col.metric);
            }
        }

        let mut frames = Vec::new();
        for metric in metrics {
            let request = ReadRequest {
                metric: metric.to_string(),
                filter: self.filter.clone(),
                mint: self.mint,
                maxt: self.maxt,
            };
            let merged = pool.install(|| {
                parts
                    .par_iter()
                    .map(|p| self.read_partition(reader, p, &request))
                    .try_reduce(PartialResult::default, PartialResult::merge)
            })?;
            query_metrics::record_partitions_read(parts.len() as u64);

            let plans: Vec<&ColumnPlan> =
                self.columns.iter().filter(|c| c.metric == metric).collect();
            let mut series: Vec<PartialSeries> = merged.series.into_values().collect();
            series.sort_by(|a, b| a.labels.cmp(&b.labels));
            for s in series {
                frames.push(self.build_frame(s, &plans)?);
            }
        }
        Ok(FrameSet::new(frames))
    }

    fn read_partition(
        &self,
        reader: &dyn PartitionReader,
        partition: &Partition,
        request: &ReadRequest,
    ) -> Result<PartialResult, DbError> {
        let stored = reader.read_series(partition, request).map_err(|e| {
            self.events.on_event(QueryEvent::PartitionReadFailed {
                partition: partition.name.clone(),
                error: e.to_string(),
            });
            DbError::partition_read(partition.name.as_str(), e)
        })?;

        let mut out = PartialResult::default();
        for s in stored {
            let mut samples: Option<Samples> = None;
            for encoded in &s.chunks {
                let chunk = encoded.decode()?;
                let buf = samples.get_or_insert_with(|| Samples::for_encoding(chunk.encoding()));
                let mut it = chunk.iterator();
                if !it.seek(self.mint) {
                    continue;
                }
                loop {
                    let (t, v) = it.at();
                    if t > self.maxt {
                        break;
                    }
                    buf.push(t, v)?;
                    if !it.next() {
                        break;
                    }
                }
                if let Some(e) = it.err() {
                    return Err(DbError::Decode(e.to_string()));
                }
            }
            if let Some(samples) = samples {
                out.insert(PartialSeries {
                    key: s.labels.hash_key(),
                    labels: s.labels,
                    samples,
                })?;
            }
        }
        Ok(out)
    }

    fn build_frame(&self, series: PartialSeries, plans: &[&ColumnPlan]) -> Result<DataFrame, DbError> {
        let PartialSeries {
            labels, samples, ..
        } = series;
        match samples {
            Samples::Text(mut points) => {
                // String series are never aggregated; they surface as one raw column.
                points.sort_by_key(|(t, _)| *t);
                let metric = plans.first().map_or("", |p| p.metric.as_str());
                let (times, values): (Vec<Timestamp>, Vec<String>) = points.into_iter().unzip();
                let column: Arc<dyn Column> =
                    Arc::new(StringColumn::new(ColumnSpec::raw(metric), values));
                DataFrame::new(
                    labels,
                    Encoding::Var,
                    Arc::new(TimeColumn::new(times)),
                    vec![column],
                    None,
                )
            }
            Samples::Float(mut points) => {
                points.sort_by_key(|(t, _)| *t);
                let has_raw = plans.iter().any(|p| p.function.is_none());
                let has_aggr = plans.iter().any(|p| p.function.is_some());

                if !has_aggr && self.step == 0 {
                    let (times, values): (Vec<Timestamp>, Vec<Value>) = points.into_iter().unzip();
                    let columns = plans
                        .iter()
                        .map(|p| -> Arc<dyn Column> {
                            Arc::new(FloatColumn::new(self.column_spec(p), values.clone()))
                        })
                        .collect();
                    return DataFrame::new(
                        labels,
                        Encoding::Xor,
                        Arc::new(TimeColumn::new(times)),
                        columns,
                        None,
                    );
                }

                let extent = points.first().zip(points.last()).map(|(f, l)| (f.0, l.0));
                let buckets =
                    Buckets::around(self.mint, self.maxt, self.step, self.window, extent)?;
                let times = buckets.start_times();
                let aggregates = if has_aggr {
                    buckets.aggregate(&points)
                } else {
                    Vec::new()
                };

                let columns = plans
                    .iter()
                    .map(|p| -> Arc<dyn Column> {
                        let values = match p.function {
                            Some(f) => aggregates
                                .iter()
                                .map(|a| {
                                    // Without a count column, empty buckets must read as NaN.
                                    if has_raw && a.is_empty() {
                                        f64::NAN
                                    } else {
                                        a.value(f)
                                    }
                                })
                                .collect(),
                            None => interpolate(&points, &times, p.interpolator, buckets.step),
                        };
                        Arc::new(FloatColumn::new(self.column_spec(p), values))
                    })
                    .collect();

                let count: Option<Arc<dyn Column>> = if has_raw {
                    None
                } else {
                    Some(Arc::new(FloatColumn::new(
                        ColumnSpec::aggregated(
                            plans.first().map_or("", |p| p.metric.as_str()),
                            AggregateFunction::Count,
                        ),
                        aggregates.iter().map(|a| a.count as Value).collect(),
                    )))
                };

                DataFrame::new(
                    labels,
                    Encoding::Xor,
                    Arc::new(TimeColumn::new(times)),
                    columns,
                    count,
                )
            }
        }
    }

    fn column_spec(&self, plan: &ColumnPlan) -> ColumnSpec {
        ColumnSpec {
            metric: plan.metric.clone(),
            function: plan.function,
            interpolator: plan.interpolator,
        }
    }
}

#[derive(Debug)]
enum Samples {
    Float(Vec<(Timestamp, Value)>),
    Text(Vec<(Timestamp, String)>),
}

impl Samples {
    fn for_encoding(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Xor => Samples::Float(Vec::new()),
            Encoding::Var => Samples::Text(Vec::new()),
        }
    }

    fn push(&mut self, t: Timestamp, v: SampleValue<'_>) -> Result<(), DbError> {
        match (self, v) {
            (Samples::Float(points), SampleValue::Float(v)) => points.push((t, v)),
            (Samples::Text(points), SampleValue::Text(s)) => points.push((t, s.to_string())),
            _ => {
                return Err(DbError::Decode(
                    "series mixes numeric and string chunks".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn extend(&mut self, other: Samples) -> Result<(), DbError> {
        match (self, other) {
            (Samples::Float(a), Samples::Float(b)) => a.extend(b),
            (Samples::Text(a), Samples::Text(b)) => a.extend(b),
            _ => {
                return Err(DbError::Decode(
                    "series mixes numeric and string chunks".to_string(),
                ))
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PartialSeries {
    key: u64,
    labels: Labels,
    samples: Samples,
}

/// Samples gathered from a subset of partitions, keyed by series identity.
#[derive(Debug, Default)]
struct PartialResult {
    series: HashMap<u64, PartialSeries>,
}

impl PartialResult {
    fn insert(&mut self, series: PartialSeries) -> Result<(), DbError> {
        match self.series.get_mut(&series.key) {
            Some(existing) => existing.samples.extend(series.samples),
            None => {
                self.series.insert(series.key, series);
                Ok(())
            }
        }
    }

    fn merge(mut self, other: PartialResult) -> Result<PartialResult, DbError> {
        for (_, s) in other.series {
            self.insert(s)?;
        }
        Ok(self)
    }
}
