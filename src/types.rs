use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Timestamp type (milliseconds since epoch).
pub type Timestamp = i64;

/// Numeric value type.
pub type Value = f64;

/// Label name carrying the metric name inside storage.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label appended to series derived by an aggregation function.
pub const AGGREGATE_LABEL: &str = "Aggregate";

/// Value of one sample as seen through a [`crate::series::SeriesIterator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue<'a> {
    Float(Value),
    Text(&'a str),
}

impl<'a> SampleValue<'a> {
    /// Returns the numeric value, or NaN for text samples.
    pub fn as_f64(&self) -> Value {
        match self {
            SampleValue::Float(v) => *v,
            SampleValue::Text(_) => f64::NAN,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            SampleValue::Text(s) => Some(s),
            SampleValue::Float(_) => None,
        }
    }
}

impl From<Value> for SampleValue<'_> {
    fn from(v: Value) -> Self {
        SampleValue::Float(v)
    }
}

impl<'a> From<&'a str> for SampleValue<'a> {
    fn from(s: &'a str) -> Self {
        SampleValue::Text(s)
    }
}

impl<'a> From<&'a String> for SampleValue<'a> {
    fn from(s: &'a String) -> Self {
        SampleValue::Text(s.as_str())
    }
}

/// One name/value pair of a series label set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

/// Label set of a series, kept sorted by name then value.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Builds a label set from name/value pairs. Pairs are sorted so two equivalent
    /// sets compare (and hash) equal.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels: Vec<Label> = pairs
            .into_iter()
            .map(|(k, v)| Label {
                name: k.into(),
                value: v.into(),
            })
            .collect();
        labels.sort();
        Labels(labels)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Returns a copy with `name` set to `value`, replacing any previous value.
    pub fn with(&self, name: &str, value: &str) -> Self {
        let mut labels: Vec<Label> = self.0.iter().filter(|l| l.name != name).cloned().collect();
        labels.push(Label {
            name: name.to_string(),
            value: value.to_string(),
        });
        labels.sort();
        Labels(labels)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable identity of the label set, used to join partial results of one series.
    pub fn hash_key(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.hash(&mut h);
        h.finish()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", l.name, l.value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_canonical_ordering() {
        let a = Labels::from_pairs([("b", "2"), ("a", "1")]);
        let b = Labels::from_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
        assert_eq!(a.hash_key(), b.hash_key());
        assert_eq!(a.to_string(), r#"{a="1", b="2"}"#);
    }

    #[test]
    fn with_replaces_existing_label() {
        let l = Labels::from_pairs([("host", "a")]).with("host", "b");
        assert_eq!(l.len(), 1);
        assert_eq!(l.get("host"), Some("b"));
    }
}
