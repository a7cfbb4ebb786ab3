//! Read-only, randomly indexable typed columns backing frames and column series.

use crate::aggregate::{AggregateFunction, Interpolator};
use crate::error::DbError;
use crate::types::{Timestamp, Value};

use std::fmt;

/// Describes what a column holds: the metric it was read from and, for derived
/// columns, the aggregation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub metric: String,
    pub function: Option<AggregateFunction>,
    pub interpolator: Interpolator,
}

impl ColumnSpec {
    pub fn raw(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            function: None,
            interpolator: Interpolator::default(),
        }
    }

    pub fn aggregated(metric: impl Into<String>, function: AggregateFunction) -> Self {
        Self {
            metric: metric.into(),
            function: Some(function),
            interpolator: Interpolator::default(),
        }
    }

    /// Column name as exposed to callers, e.g. `cpu` or `avg(cpu)`.
    pub fn name(&self) -> String {
        match self.function {
            Some(f) => format!("{}({})", f, self.metric),
            None => self.metric.clone(),
        }
    }
}

/// A typed, fixed-length column. Accessors fail with [`DbError::ColumnAccess`] on an
/// out-of-range index or when the cell cannot be converted to the requested type.
pub trait Column: fmt::Debug + Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spec(&self) -> &ColumnSpec;

    fn time_at(&self, i: usize) -> Result<Timestamp, DbError>;

    fn float_at(&self, i: usize) -> Result<Value, DbError>;

    fn string_at(&self, i: usize) -> Result<&str, DbError>;
}

fn out_of_range(column: &ColumnSpec, i: usize, len: usize) -> DbError {
    DbError::ColumnAccess(format!(
        "index {} out of range for column '{}' of length {}",
        i,
        column.name(),
        len
    ))
}

fn not_convertible(column: &ColumnSpec, what: &str) -> DbError {
    DbError::ColumnAccess(format!(
        "column '{}' cannot be read as {}",
        column.name(),
        what
    ))
}

/// Index column of timestamps.
#[derive(Debug, Clone)]
pub struct TimeColumn {
    spec: ColumnSpec,
    data: Vec<Timestamp>,
}

impl TimeColumn {
    pub fn new(data: Vec<Timestamp>) -> Self {
        Self {
            spec: ColumnSpec::raw("time"),
            data,
        }
    }

    pub fn values(&self) -> &[Timestamp] {
        &self.data
    }
}

impl Column for TimeColumn {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    fn time_at(&self, i: usize) -> Result<Timestamp, DbError> {
        self.data
            .get(i)
            .copied()
            .ok_or_else(|| out_of_range(&self.spec, i, self.data.len()))
    }

    fn float_at(&self, i: usize) -> Result<Value, DbError> {
        Ok(self.time_at(i)? as Value)
    }

    fn string_at(&self, _i: usize) -> Result<&str, DbError> {
        Err(not_convertible(&self.spec, "string"))
    }
}

/// Numeric data column; NaN marks a cell without data. Also used for count columns.
#[derive(Debug, Clone)]
pub struct FloatColumn {
    spec: ColumnSpec,
    data: Vec<Value>,
}

impl FloatColumn {
    pub fn new(spec: ColumnSpec, data: Vec<Value>) -> Self {
        Self { spec, data }
    }

    pub fn values(&self) -> &[Value] {
        &self.data
    }
}

impl Column for FloatColumn {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    fn time_at(&self, _i: usize) -> Result<Timestamp, DbError> {
        Err(not_convertible(&self.spec, "time"))
    }

    fn float_at(&self, i: usize) -> Result<Value, DbError> {
        self.data
            .get(i)
            .copied()
            .ok_or_else(|| out_of_range(&self.spec, i, self.data.len()))
    }

    fn string_at(&self, _i: usize) -> Result<&str, DbError> {
        Err(not_convertible(&self.spec, "string"))
    }
}

/// Text data column.
#[derive(Debug, Clone)]
pub struct StringColumn {
    spec: ColumnSpec,
    data: Vec<String>,
}

impl StringColumn {
    pub fn new(spec: ColumnSpec, data: Vec<String>) -> Self {
        Self { spec, data }
    }
}

impl Column for StringColumn {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn spec(&self) -> &ColumnSpec {
        &self.spec
    }

    fn time_at(&self, _i: usize) -> Result<Timestamp, DbError> {
        Err(not_convertible(&self.spec, "time"))
    }

    fn float_at(&self, i: usize) -> Result<Value, DbError> {
        let s = self.string_at(i)?;
        s.trim()
            .parse::<Value>()
            .map_err(|_| not_convertible(&self.spec, &format!("float (cell {} = {:?})", i, s)))
    }

    fn string_at(&self, i: usize) -> Result<&str, DbError> {
        self.data
            .get(i)
            .map(String::as_str)
            .ok_or_else(|| out_of_range(&self.spec, i, self.data.len()))
    }
}
