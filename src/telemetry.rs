use std::sync::Arc;
use std::time::{Duration, Instant};

/// Structured, in-process event hook for observability.
///
/// This crate is a library; it does not print. Callers provide an implementation that
/// forwards these events to `log`, metrics, or custom sinks. [`LogEventListener`] is the
/// stock `log` forwarder.
pub trait QueryEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: QueryEvent);
}

/// Structured events emitted by the query path.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    QueryStarted {
        metric: String,
        from: i64,
        to: i64,
        step: i64,
        functions: String,
        filter: String,
        windows: Vec<i64>,
        disable_client_aggr: bool,
    },
    PartitionsResolved {
        count: usize,
    },
    PartitionReadFailed {
        partition: String,
        error: String,
    },
    QueryFailed {
        error: String,
    },
    QueryCompleted {
        series: usize,
        duration: Duration,
    },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl QueryEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: QueryEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn QueryEventListener> {
    Arc::new(NoopEventListener)
}

/// Forwards query events to the `log` facade under the `tsquery` target.
#[derive(Debug, Default)]
pub struct LogEventListener;

impl QueryEventListener for LogEventListener {
    fn on_event(&self, event: QueryEvent) {
        match event {
            QueryEvent::QueryStarted {
                metric,
                from,
                to,
                step,
                functions,
                filter,
                windows,
                disable_client_aggr,
            } => log::debug!(
                target: "tsquery",
                "Select query: metric={} from={} to={} functions={:?} step={} filter={:?} windows={:?} disable_client_aggr={}",
                metric, from, to, functions, step, filter, windows, disable_client_aggr
            ),
            QueryEvent::PartitionsResolved { count } => {
                log::debug!(target: "tsquery", "resolved {} partitions", count)
            }
            QueryEvent::PartitionReadFailed { partition, error } => {
                log::warn!(target: "tsquery", "partition {} read failed: {}", partition, error)
            }
            QueryEvent::QueryFailed { error } => {
                log::error!(target: "tsquery", "query failed: {}", error)
            }
            QueryEvent::QueryCompleted { series, duration } => log::debug!(
                target: "tsquery",
                "query returned {} frames in {:?}",
                series,
                duration
            ),
        }
    }
}

/// Scoped timing of named operations.
pub trait PerformanceReporter: std::fmt::Debug + Send + Sync + 'static {
    fn record_duration(&self, name: &str, duration: Duration);
}

/// Runs `f`, reports its wall time under `name`, and returns whatever `f` returned.
pub fn with_timer<R>(reporter: &dyn PerformanceReporter, name: &str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let out = f();
    reporter.record_duration(name, start.elapsed());
    out
}

#[derive(Debug, Default)]
pub struct NoopReporter;

impl PerformanceReporter for NoopReporter {
    #[inline]
    fn record_duration(&self, _name: &str, _duration: Duration) {}
}

pub fn noop_reporter() -> Arc<dyn PerformanceReporter> {
    Arc::new(NoopReporter)
}

/// Reports timers as `metrics` histograms labeled by operation name.
///
/// Emitting is effectively a no-op until the embedding process installs a recorder.
#[derive(Debug, Default)]
pub struct MetricsReporter;

impl MetricsReporter {
    pub fn new() -> Self {
        query_metrics::describe_all();
        Self
    }
}

impl PerformanceReporter for MetricsReporter {
    fn record_duration(&self, name: &str, duration: Duration) {
        query_metrics::record_timer(name, duration);
    }
}

/// Metric names and recording helpers for the query path.
pub mod query_metrics {
    use super::*;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    pub const OPERATION_DURATION_SECONDS: &str = "tsquery_operation_duration_seconds";
    pub const PARTITIONS_READ: &str = "tsquery_partitions_read";
    pub const QUERY_FAILURES: &str = "tsquery_query_failures";

    #[inline]
    pub fn record_timer(name: &str, duration: Duration) {
        ::metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => name.to_string())
            .record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_partitions_read(count: u64) {
        if count > 0 {
            ::metrics::counter!(PARTITIONS_READ).increment(count);
        }
    }

    #[inline]
    pub fn record_query_failure() {
        ::metrics::counter!(QUERY_FAILURES).increment(1);
    }

    pub fn describe_all() {
        describe_histogram!(
            OPERATION_DURATION_SECONDS,
            Unit::Seconds,
            "Wall time of timed query operations, labeled by operation name."
        );
        describe_counter!(
            PARTITIONS_READ,
            Unit::Count,
            "Total number of partitions read by select queries."
        );
        describe_counter!(
            QUERY_FAILURES,
            Unit::Count,
            "Total number of select queries that failed."
        );
    }
}
