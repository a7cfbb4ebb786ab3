//! Series iteration contract and the two series shapes returned by queries.

use crate::column::Column;
use crate::encoding::{Appender, Chunk, Encoding};
use crate::error::DbError;
use crate::types::{Labels, SampleValue, Timestamp, Value, AGGREGATE_LABEL};

use std::fmt;
use std::sync::Arc;

/// Forward cursor over `(timestamp, value)` pairs.
///
/// A fresh iterator is positioned before the first element; `at` is only meaningful
/// after a successful `next` or `seek`. Once `err` returns an error it stays set and
/// every further `next`/`seek` returns false without doing any work.
pub trait SeriesIterator {
    /// Advances to the first element with timestamp >= `t`. Never moves backward;
    /// returns true without moving when the current element already satisfies `t`.
    fn seek(&mut self, t: Timestamp) -> bool;

    /// Advances one element. Returns false once exhausted or after an error.
    fn next(&mut self) -> bool;

    fn at(&self) -> (Timestamp, SampleValue<'_>);

    fn err(&self) -> Option<&DbError>;
}

/// A labeled series with a stable identity and an iterator factory.
pub trait Series: fmt::Debug + Send + Sync {
    fn labels(&self) -> &Labels;

    /// Hash of the series label set (before any aggregation label is added).
    fn key(&self) -> u64;

    /// Returns a fresh iterator positioned before the first element.
    fn iterator(&self) -> Box<dyn SeriesIterator + '_>;
}

/// Series backed by an index column, a data column and an optional count column.
///
/// The three columns share one length, checked once on construction. When the data
/// column was produced by an aggregation, the label set carries `Aggregate=<function>`.
#[derive(Debug, Clone)]
pub struct DataFrameColumnSeries {
    index_column: Arc<dyn Column>,
    data_column: Arc<dyn Column>,
    count_column: Option<Arc<dyn Column>>,
    labels: Labels,
    key: u64,
}

impl DataFrameColumnSeries {
    pub fn new(
        index_column: Arc<dyn Column>,
        data_column: Arc<dyn Column>,
        count_column: Option<Arc<dyn Column>>,
        labels: Labels,
        key: u64,
    ) -> Result<Self, DbError> {
        let len = index_column.len();
        if data_column.len() != len {
            return Err(DbError::ColumnAccess(format!(
                "data column '{}' has {} cells, index column has {}",
                data_column.spec().name(),
                data_column.len(),
                len
            )));
        }
        if let Some(count) = &count_column {
            if count.len() != len {
                return Err(DbError::ColumnAccess(format!(
                    "count column has {} cells, index column has {}",
                    count.len(),
                    len
                )));
            }
        }
        let labels = match data_column.spec().function {
            Some(f) => labels.with(AGGREGATE_LABEL, f.as_str()),
            None => labels,
        };
        Ok(Self {
            index_column,
            data_column,
            count_column,
            labels,
            key,
        })
    }

    pub fn column_iterator(&self) -> DataFrameColumnSeriesIterator {
        DataFrameColumnSeriesIterator {
            index_column: Arc::clone(&self.index_column),
            data_column: Arc::clone(&self.data_column),
            count_column: self.count_column.clone(),
            current: None,
            sample: (Timestamp::MIN, f64::NAN),
            err: None,
        }
    }
}

impl Series for DataFrameColumnSeries {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn iterator(&self) -> Box<dyn SeriesIterator + '_> {
        Box::new(self.column_iterator())
    }
}

/// Walks index/data[/count] columns in lock-step, skipping cells without data.
///
/// With a count column a cell is valid iff its count is > 0; without one, iff the
/// data value is not NaN. Validity is not monotonic, so the next valid cell is found
/// with a linear scan.
#[derive(Debug)]
pub struct DataFrameColumnSeriesIterator {
    index_column: Arc<dyn Column>,
    data_column: Arc<dyn Column>,
    count_column: Option<Arc<dyn Column>>,

    // None before the first `next`; Some(len) once exhausted.
    current: Option<usize>,
    sample: (Timestamp, Value),
    err: Option<DbError>,
}

impl DataFrameColumnSeriesIterator {
    fn cell_has_data(&self, cell: usize) -> Result<bool, DbError> {
        match &self.count_column {
            Some(count) => Ok(count.float_at(cell)? > 0.0),
            None => Ok(!self.data_column.float_at(cell)?.is_nan()),
        }
    }

    fn load(&mut self, cell: usize) -> Result<(), DbError> {
        let t = self.index_column.time_at(cell)?;
        let v = self.data_column.float_at(cell)?;
        self.sample = (t, v);
        Ok(())
    }

    fn fail(&mut self, err: DbError) -> bool {
        self.err = Some(err);
        self.current = Some(self.index_column.len());
        false
    }
}

impl SeriesIterator for DataFrameColumnSeriesIterator {
    fn seek(&mut self, t: Timestamp) -> bool {
        if self.err.is_some() {
            return false;
        }
        if let Some(c) = self.current {
            if c < self.index_column.len() && self.sample.0 >= t {
                return true;
            }
        }
        while self.next() {
            if self.sample.0 >= t {
                return true;
            }
        }
        false
    }

    fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        let len = self.index_column.len();
        let mut cell = self.current.map_or(0, |c| c.saturating_add(1));
        while cell < len {
            match self.cell_has_data(cell) {
                Ok(true) => {
                    if let Err(e) = self.load(cell) {
                        return self.fail(e);
                    }
                    self.current = Some(cell);
                    return true;
                }
                Ok(false) => cell += 1,
                Err(e) => return self.fail(e),
            }
        }
        self.current = Some(len);
        false
    }

    fn at(&self) -> (Timestamp, SampleValue<'_>) {
        (self.sample.0, SampleValue::Float(self.sample.1))
    }

    fn err(&self) -> Option<&DbError> {
        self.err.as_ref()
    }
}

/// String-valued (or raw) series held as one decoded chunk.
#[derive(Debug, Clone)]
pub struct RawChunkSeries {
    chunk: Chunk,
    labels: Labels,
    key: u64,
}

impl RawChunkSeries {
    pub fn new(chunk: Chunk, labels: Labels, key: u64) -> Self {
        Self { chunk, labels, key }
    }

    /// Re-encodes aligned index/data columns into a chunk of the given encoding.
    pub fn from_columns(
        encoding: Encoding,
        index_column: &dyn Column,
        data_column: &dyn Column,
        labels: Labels,
        key: u64,
    ) -> Result<Self, DbError> {
        let mut app = Appender::new(encoding);
        for i in 0..index_column.len() {
            let t = index_column.time_at(i)?;
            match encoding {
                Encoding::Var => app.append(t, data_column.string_at(i)?),
                Encoding::Xor => app.append(t, data_column.float_at(i)?),
            }
        }
        Ok(Self::new(app.finish()?, labels, key))
    }
}

impl Series for RawChunkSeries {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn iterator(&self) -> Box<dyn SeriesIterator + '_> {
        Box::new(self.chunk.iterator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFunction;
    use crate::column::{ColumnSpec, FloatColumn, StringColumn, TimeColumn};

    fn index(ts: &[Timestamp]) -> Arc<dyn Column> {
        Arc::new(TimeColumn::new(ts.to_vec()))
    }

    fn floats(spec: ColumnSpec, vals: &[Value]) -> Arc<dyn Column> {
        Arc::new(FloatColumn::new(spec, vals.to_vec()))
    }

    fn drain(it: &mut dyn SeriesIterator) -> Vec<(Timestamp, Value)> {
        let mut out = Vec::new();
        while it.next() {
            let (t, v) = it.at();
            out.push((t, v.as_f64()));
        }
        out
    }

    #[test]
    fn skips_nan_cells_without_count_column() {
        let s = DataFrameColumnSeries::new(
            index(&[0, 1, 2, 3, 4]),
            floats(ColumnSpec::raw("m"), &[0.0, f64::NAN, 2.0, f64::NAN, 4.0]),
            None,
            Labels::default(),
            1,
        )
        .unwrap();
        let mut it = s.iterator();
        assert_eq!(drain(it.as_mut()), vec![(0, 0.0), (2, 2.0), (4, 4.0)]);
        assert!(it.err().is_none());
    }

    #[test]
    fn count_column_decides_validity() {
        let s = DataFrameColumnSeries::new(
            index(&[0, 1, 2, 3, 4]),
            floats(ColumnSpec::raw("m"), &[0.0, 11.0, 2.0, 33.0, 4.0]),
            Some(floats(ColumnSpec::raw("count"), &[1.0, 0.0, 1.0, 0.0, 1.0])),
            Labels::default(),
            1,
        )
        .unwrap();
        let mut it = s.iterator();
        assert_eq!(drain(it.as_mut()), vec![(0, 0.0), (2, 2.0), (4, 4.0)]);
    }

    #[test]
    fn seek_never_moves_backward() {
        let s = DataFrameColumnSeries::new(
            index(&[10, 20, 30]),
            floats(ColumnSpec::raw("m"), &[1.0, 2.0, 3.0]),
            None,
            Labels::default(),
            1,
        )
        .unwrap();
        let mut it = s.iterator();
        assert!(it.seek(25));
        assert_eq!(it.at().0, 30);
        assert!(it.seek(15));
        assert_eq!(it.at().0, 30);
        assert!(!it.next());
        assert!(!it.seek(0));
    }

    #[test]
    fn seek_from_initial_state_scans() {
        let s = DataFrameColumnSeries::new(
            index(&[10, 20]),
            floats(ColumnSpec::raw("m"), &[1.0, 2.0]),
            None,
            Labels::default(),
            1,
        )
        .unwrap();
        let mut it = s.iterator();
        assert!(it.seek(Timestamp::MIN));
        assert_eq!(it.at().0, 10);
    }

    #[test]
    fn column_access_error_is_sticky() {
        // A string data column whose second cell does not convert to a float.
        let data: Arc<dyn Column> = Arc::new(StringColumn::new(
            ColumnSpec::raw("m"),
            vec!["1".into(), "x".into(), "3".into()],
        ));
        let s = DataFrameColumnSeries::new(index(&[1, 2, 3]), data, None, Labels::default(), 1)
            .unwrap();
        let mut it = s.iterator();
        assert!(it.next());
        assert!(!it.next());
        assert!(matches!(it.err(), Some(DbError::ColumnAccess(_))));
        assert!(!it.next());
        assert!(!it.seek(0));
        assert!(it.err().is_some());
    }

    #[test]
    fn rejects_misaligned_columns() {
        let err = DataFrameColumnSeries::new(
            index(&[1, 2]),
            floats(ColumnSpec::raw("m"), &[1.0]),
            None,
            Labels::default(),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, DbError::ColumnAccess(_)));
    }

    #[test]
    fn aggregate_label_is_added_once() {
        let s = DataFrameColumnSeries::new(
            index(&[1]),
            floats(ColumnSpec::aggregated("cpu", AggregateFunction::Max), &[1.0]),
            None,
            Labels::from_pairs([("host", "a")]),
            7,
        )
        .unwrap();
        let first = s.labels().clone();
        assert_eq!(s.labels(), &first);
        assert_eq!(first.len(), 2);
        assert_eq!(first.get(AGGREGATE_LABEL), Some("max"));
        assert_eq!(s.key(), 7);
    }

    #[test]
    fn iterator_factory_restarts_from_scratch() {
        let s = DataFrameColumnSeries::new(
            index(&[1, 2]),
            floats(ColumnSpec::raw("m"), &[1.0, 2.0]),
            None,
            Labels::default(),
            1,
        )
        .unwrap();
        let mut a = s.iterator();
        assert_eq!(drain(a.as_mut()).len(), 2);
        let mut b = s.iterator();
        assert!(b.next());
        assert_eq!(b.at().0, 1);
    }

    #[test]
    fn raw_chunk_series_from_string_columns() {
        let idx = TimeColumn::new(vec![1, 2, 3]);
        let data = StringColumn::new(
            ColumnSpec::raw("state"),
            vec!["on".into(), "".into(), "off".into()],
        );
        let s = RawChunkSeries::from_columns(Encoding::Var, &idx, &data, Labels::default(), 3)
            .unwrap();
        let mut it = s.iterator();
        let mut got = Vec::new();
        while it.next() {
            let (t, v) = it.at();
            got.push((t, v.as_str().unwrap_or("<float>").to_string()));
        }
        assert_eq!(
            got,
            vec![(1, "on".to_string()), (2, String::new()), (3, "off".to_string())]
        );
    }
}
