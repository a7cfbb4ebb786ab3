use thiserror::Error;

use crate::types::Timestamp;

/// Custom error type for the codec, iterators and query path.
#[derive(Error, Debug)]
pub enum DbError {
    /// `to` lies before `from`.
    #[error("End time '{to}' is lower than start time '{from}'")]
    Range { from: Timestamp, to: Timestamp },

    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Failed to read/update the TSDB schema: {0}")]
    SchemaRefresh(#[source] Box<DbError>),

    /// Malformed, truncated or kind-mismatched chunk bytes.
    #[error("Chunk decode error: {0}")]
    Decode(String),

    /// Out-of-range or type-conversion failure reading a column cell.
    #[error("Column access error: {0}")]
    ColumnAccess(String),

    #[error("Failed to read partition '{partition}': {source}")]
    PartitionRead {
        partition: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Wraps a collaborator failure as a schema refresh error.
    pub fn schema_refresh(err: DbError) -> Self {
        DbError::SchemaRefresh(Box::new(err))
    }

    /// Wraps a storage failure for one partition.
    pub fn partition_read(partition: impl Into<String>, err: DbError) -> Self {
        DbError::PartitionRead {
            partition: partition.into(),
            source: Box::new(err),
        }
    }
}
