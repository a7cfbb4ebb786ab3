use crate::encoding::{Appender, Encoding};
use crate::error::DbError;
use crate::partition::{
    EncodedChunk, Partition, PartitionManager, PartitionReader, ReadRequest, StoredSeries,
};
use crate::query::METRIC_NAME_ATTRIBUTE;
use crate::types::{Labels, SampleValue, Timestamp, METRIC_NAME_LABEL};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Largest number of samples encoded into one chunk (the sample count is stored as u16).
pub const MAX_SAMPLES_PER_CHUNK: usize = u16::MAX as usize;

/// Simple in-memory partitioned store.
///
/// Implements both collaborator seams of the query path, so it backs tests, benches and
/// the CLI. Data is cut into fixed-width time partitions; inside a partition each series
/// keeps a list of encoded chunks.
#[derive(Debug)]
pub struct InMemoryStorage {
    partition_interval: i64,
    chunk_capacity: usize,
    partitions: RwLock<BTreeMap<Timestamp, PartitionData>>,
}

#[derive(Debug)]
struct PartitionData {
    partition: Arc<Partition>,
    // metric -> series key -> series
    series: HashMap<String, HashMap<u64, StoredSeries>>,
}

impl InMemoryStorage {
    /// Creates a store with partitions `partition_interval` milliseconds wide.
    pub fn new(partition_interval: i64) -> Result<Self, DbError> {
        if partition_interval <= 0 {
            return Err(DbError::Configuration(format!(
                "partition interval must be > 0, got {}",
                partition_interval
            )));
        }
        Ok(Self {
            partition_interval,
            chunk_capacity: MAX_SAMPLES_PER_CHUNK,
            partitions: RwLock::new(BTreeMap::new()),
        })
    }

    /// Caps the number of samples per encoded chunk (clamped to `1..=u16::MAX`).
    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity.clamp(1, MAX_SAMPLES_PER_CHUNK);
        self
    }

    fn partition_start(&self, t: Timestamp) -> Timestamp {
        t - t.rem_euclid(self.partition_interval)
    }

    /// Appends a batch of samples of one series, split across partitions and chunks.
    /// **Sorts the samples by timestamp before encoding.** The chunk encoding follows
    /// the kind of the first sample.
    pub fn append_batch(
        &self,
        metric: &str,
        labels: &Labels,
        samples: &[(Timestamp, SampleValue<'_>)],
    ) -> Result<(), DbError> {
        let encoding = match samples.first() {
            Some((_, SampleValue::Text(_))) => Encoding::Var,
            Some((_, SampleValue::Float(_))) => Encoding::Xor,
            None => return Ok(()),
        };
        let labels = labels.with(METRIC_NAME_LABEL, metric);
        let key = labels.hash_key();

        let mut sorted: Vec<(Timestamp, SampleValue<'_>)> = samples.to_vec();
        sorted.sort_by_key(|&(t, _)| t);

        let mut by_partition: BTreeMap<Timestamp, Vec<(Timestamp, SampleValue<'_>)>> =
            BTreeMap::new();
        for (t, v) in sorted {
            by_partition
                .entry(self.partition_start(t))
                .or_default()
                .push((t, v));
        }

        let mut guard = self
            .partitions
            .write()
            .map_err(|e| DbError::Internal(format!("storage lock poisoned: {}", e)))?;
        for (start, points) in by_partition {
            let data = guard.entry(start).or_insert_with(|| PartitionData {
                partition: Arc::new(Partition::new(
                    format!("{}", start),
                    start,
                    start + self.partition_interval - 1,
                )),
                series: HashMap::new(),
            });
            let series = data
                .series
                .entry(metric.to_string())
                .or_default()
                .entry(key)
                .or_insert_with(|| StoredSeries {
                    labels: labels.clone(),
                    chunks: Vec::new(),
                });
            for batch in points.chunks(self.chunk_capacity) {
                let mut app = Appender::new(encoding);
                for &(t, v) in batch {
                    app.append(t, v);
                }
                series.chunks.push(EncodedChunk {
                    encoding,
                    bytes: app.bytes().to_vec(),
                    samples: app.len() as u16,
                });
            }
        }
        Ok(())
    }

    /// Number of partitions currently held.
    pub fn partition_count(&self) -> usize {
        self.partitions.read().map(|g| g.len()).unwrap_or(0)
    }
}

impl PartitionManager for InMemoryStorage {
    fn read_and_update_schema(&self) -> Result<(), DbError> {
        // Schema lives in memory and is always current.
        Ok(())
    }

    fn parts_for_range(
        &self,
        from: Timestamp,
        to: Timestamp,
        _must_exist: bool,
    ) -> Vec<Arc<Partition>> {
        let guard = match self.partitions.read() {
            Ok(g) => g,
            Err(_) => return Vec::new(),
        };
        guard
            .values()
            .filter(|p| p.partition.overlaps(from, to))
            .map(|p| Arc::clone(&p.partition))
            .collect()
    }
}

impl PartitionReader for InMemoryStorage {
    fn read_series(
        &self,
        partition: &Partition,
        request: &ReadRequest,
    ) -> Result<Vec<StoredSeries>, DbError> {
        let filter = parse_filter(&request.filter)?;
        let guard = self
            .partitions
            .read()
            .map_err(|e| DbError::Internal(format!("storage lock poisoned: {}", e)))?;
        let data = match guard.get(&partition.start_time) {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        let series = match data.series.get(&request.metric) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        Ok(series
            .values()
            .filter(|s| matches_filter(&request.metric, &s.labels, &filter))
            .cloned()
            .collect())
    }
}

/// Exact-match clauses of the form `name=='value'` joined by `and`.
fn parse_filter(filter: &str) -> Result<Vec<(String, String)>, DbError> {
    let filter = filter.trim();
    if filter.is_empty() {
        return Ok(Vec::new());
    }
    filter
        .split(" and ")
        .map(|clause| {
            let (name, value) = clause.split_once("==").ok_or_else(|| {
                DbError::InvalidQuery(format!("unsupported filter clause '{}'", clause.trim()))
            })?;
            let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
            Ok((name.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn matches_filter(metric: &str, labels: &Labels, filter: &[(String, String)]) -> bool {
    filter.iter().all(|(name, value)| {
        if name == METRIC_NAME_ATTRIBUTE {
            metric == value
        } else {
            labels.get(name) == Some(value.as_str())
        }
    })
}
