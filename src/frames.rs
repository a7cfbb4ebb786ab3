//! Query result containers: column-oriented frames and the series view over them.
//!
//! Both containers have an empty form (`Default`) which is what a failed query leaves
//! the caller with; it is always safe to iterate.

use crate::column::Column;
use crate::encoding::Encoding;
use crate::error::DbError;
use crate::series::{DataFrameColumnSeries, RawChunkSeries, Series};
use crate::types::Labels;

use std::sync::Arc;

/// All requested columns of one series, aligned on a shared index column.
#[derive(Debug, Clone)]
pub struct DataFrame {
    labels: Labels,
    key: u64,
    encoding: Encoding,
    index: Arc<dyn Column>,
    columns: Vec<Arc<dyn Column>>,
    count: Option<Arc<dyn Column>>,
}

impl DataFrame {
    pub fn new(
        labels: Labels,
        encoding: Encoding,
        index: Arc<dyn Column>,
        columns: Vec<Arc<dyn Column>>,
        count: Option<Arc<dyn Column>>,
    ) -> Result<Self, DbError> {
        let len = index.len();
        let misaligned = columns
            .iter()
            .chain(count.iter())
            .find(|c| c.len() != len);
        if let Some(c) = misaligned {
            return Err(DbError::ColumnAccess(format!(
                "column '{}' has {} cells, index column has {}",
                c.spec().name(),
                c.len(),
                len
            )));
        }
        let key = labels.hash_key();
        Ok(Self {
            labels,
            key,
            encoding,
            index,
            columns,
            count,
        })
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn index(&self) -> &Arc<dyn Column> {
        &self.index
    }

    pub fn columns(&self) -> &[Arc<dyn Column>] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Arc<dyn Column>> {
        self.columns.iter().find(|c| c.spec().name() == name)
    }

    pub fn count_column(&self) -> Option<&Arc<dyn Column>> {
        self.count.as_ref()
    }

    /// Number of rows (cells per column).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// One series per data column.
    pub fn series(&self) -> Result<Vec<Box<dyn Series>>, DbError> {
        self.columns
            .iter()
            .map(|col| -> Result<Box<dyn Series>, DbError> {
                match self.encoding {
                    Encoding::Xor => Ok(Box::new(DataFrameColumnSeries::new(
                        Arc::clone(&self.index),
                        Arc::clone(col),
                        self.count.clone(),
                        self.labels.clone(),
                        self.key,
                    )?)),
                    Encoding::Var => Ok(Box::new(RawChunkSeries::from_columns(
                        Encoding::Var,
                        self.index.as_ref(),
                        col.as_ref(),
                        self.labels.clone(),
                        self.key,
                    )?)),
                }
            })
            .collect()
    }
}

/// Column-oriented query result.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    frames: Vec<DataFrame>,
}

impl FrameSet {
    pub fn new(frames: Vec<DataFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DataFrame> {
        self.frames.iter()
    }
}

impl IntoIterator for FrameSet {
    type Item = DataFrame;
    type IntoIter = std::vec::IntoIter<DataFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl<'a> IntoIterator for &'a FrameSet {
    type Item = &'a DataFrame;
    type IntoIter = std::slice::Iter<'a, DataFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Series-oriented query result. Series are grouped by identity; no ordering across
/// series is implied.
#[derive(Debug, Default)]
pub struct SeriesSet {
    series: Vec<Box<dyn Series>>,
}

impl SeriesSet {
    pub fn new(series: Vec<Box<dyn Series>>) -> Self {
        Self { series }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Series> {
        self.series.iter().map(|s| s.as_ref())
    }
}

impl IntoIterator for SeriesSet {
    type Item = Box<dyn Series>;
    type IntoIter = std::vec::IntoIter<Box<dyn Series>>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.into_iter()
    }
}

impl TryFrom<FrameSet> for SeriesSet {
    type Error = DbError;

    fn try_from(frames: FrameSet) -> Result<Self, Self::Error> {
        let mut series = Vec::new();
        for frame in &frames {
            series.extend(frame.series()?);
        }
        Ok(SeriesSet::new(series))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFunction;
    use crate::column::{ColumnSpec, FloatColumn, TimeColumn};
    use crate::types::AGGREGATE_LABEL;

    #[test]
    fn empty_sets_are_safe_to_iterate() {
        let frames = FrameSet::default();
        assert!(frames.is_empty());
        assert_eq!(frames.iter().count(), 0);
        let set = SeriesSet::try_from(frames).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.iter().count(), 0);
    }

    #[test]
    fn frame_splits_into_one_series_per_column() {
        let index: Arc<dyn Column> = Arc::new(TimeColumn::new(vec![0, 10]));
        let sum: Arc<dyn Column> = Arc::new(FloatColumn::new(
            ColumnSpec::aggregated("cpu", AggregateFunction::Sum),
            vec![1.0, 2.0],
        ));
        let max: Arc<dyn Column> = Arc::new(FloatColumn::new(
            ColumnSpec::aggregated("cpu", AggregateFunction::Max),
            vec![1.0, 2.0],
        ));
        let frame = DataFrame::new(
            Labels::from_pairs([("host", "a")]),
            Encoding::Xor,
            index,
            vec![sum, max],
            None,
        )
        .unwrap();
        assert!(frame.column("max(cpu)").is_some());

        let set = SeriesSet::try_from(FrameSet::new(vec![frame])).unwrap();
        let aggs: Vec<_> = set
            .iter()
            .map(|s| s.labels().get(AGGREGATE_LABEL).map(str::to_string))
            .collect();
        assert_eq!(aggs, vec![Some("sum".to_string()), Some("max".to_string())]);
        // Both series keep the identity of the underlying label set.
        let keys: Vec<u64> = set.iter().map(|s| s.key()).collect();
        assert_eq!(keys[0], keys[1]);
    }

    #[test]
    fn frame_rejects_misaligned_count_column() {
        let index: Arc<dyn Column> = Arc::new(TimeColumn::new(vec![0, 10]));
        let count: Arc<dyn Column> =
            Arc::new(FloatColumn::new(ColumnSpec::raw("count"), vec![1.0]));
        let err =
            DataFrame::new(Labels::default(), Encoding::Xor, index, vec![], Some(count)).unwrap_err();
        assert!(matches!(err, DbError::ColumnAccess(_)));
    }
}
