#![doc = include_str!("../README.md")]
// Declare modules
pub mod aggregate;
pub mod column;
pub mod config;
pub mod encoding;
pub mod error;
pub mod frames;
pub mod partition;
pub mod query;
pub mod series;
pub mod storage;
pub mod telemetry;
pub mod types;

/// Aggregation functions and raw-column interpolation modes.
pub use crate::aggregate::{AggregateFunction, Interpolator};
/// Configuration options for the querier.
pub use crate::config::QuerierConfig;
/// Chunk codec: encoder, decoded chunk and chunk iterator.
pub use crate::encoding::{Appender, Chunk, ChunkIterator, Encoding};
/// Error type for codec, iterator and query operations.
pub use crate::error::DbError;
/// Query result containers.
pub use crate::frames::{DataFrame, FrameSet, SeriesSet};
/// Collaborator seams consumed by the query path.
pub use crate::partition::{Partition, PartitionManager, PartitionReader};
/// Main entry point for select queries.
pub use crate::query::{Querier, SelectParams};
/// Series abstraction and its sample cursor.
pub use crate::series::{Series, SeriesIterator};
/// In-memory partitioned store implementing both collaborator seams.
pub use crate::storage::InMemoryStorage;
/// Structured event hook and timer sink.
pub use crate::telemetry::{PerformanceReporter, QueryEvent, QueryEventListener};
/// Series label set.
pub use crate::types::Labels;
/// Type alias for a timestamp (milliseconds since epoch).
pub use crate::types::Timestamp;
/// Type alias for a numeric sample value (f64).
pub use crate::types::Value;
