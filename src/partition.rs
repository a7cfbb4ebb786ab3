//! Collaborator seams of the query path: partition metadata and per-partition reads.

use crate::encoding::{Chunk, Encoding};
use crate::error::DbError;
use crate::types::{Labels, Timestamp};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A time-bounded physical storage unit covering `[start_time, end_time]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

impl Partition {
    pub fn new(name: impl Into<String>, start_time: Timestamp, end_time: Timestamp) -> Self {
        Self {
            name: name.into(),
            start_time,
            end_time,
        }
    }

    pub fn overlaps(&self, from: Timestamp, to: Timestamp) -> bool {
        self.start_time <= to && self.end_time >= from
    }
}

/// Partition discovery and schema synchronisation.
pub trait PartitionManager: fmt::Debug + Send + Sync {
    fn read_and_update_schema(&self) -> Result<(), DbError>;

    /// Partitions overlapping `[from, to]`, ordered by start time.
    fn parts_for_range(&self, from: Timestamp, to: Timestamp, must_exist: bool)
        -> Vec<Arc<Partition>>;
}

/// What one partition read is asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub metric: String,
    /// Storage filter expression, already rewritten to internal attribute names.
    pub filter: String,
    pub mint: Timestamp,
    pub maxt: Timestamp,
}

/// An encoded chunk as kept by storage, with the sample count recorded beside it.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub encoding: Encoding,
    pub bytes: Vec<u8>,
    pub samples: u16,
}

impl EncodedChunk {
    pub fn decode(&self) -> Result<Chunk, DbError> {
        Chunk::from_data(self.encoding, &self.bytes, self.samples)
    }
}

/// The chunks of one series found in one partition, in time order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSeries {
    pub labels: Labels,
    pub chunks: Vec<EncodedChunk>,
}

/// Reads raw chunk bytes for one partition. This is the only blocking call on the
/// query path.
pub trait PartitionReader: fmt::Debug + Send + Sync {
    fn read_series(
        &self,
        partition: &Partition,
        request: &ReadRequest,
    ) -> Result<Vec<StoredSeries>, DbError>;
}
