//! Metric field sets: the fields treated as monotonic counters.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SampleError};
use crate::row::Row;

/// Ordered, de-duplicated, non-empty list of counter field names.
///
/// Fields outside the set are tags and pass through the differ unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct MetricSet {
    names: Vec<String>,
}

impl MetricSet {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        if out.is_empty() {
            return Err(SampleError::EmptyMetricSet);
        }
        Ok(Self { names: out })
    }

    /// Builds the set from the columns of a sample row that satisfy `is_metric`
    /// and hold numeric values. Column order follows the row.
    ///
    /// Collectors whose metric columns vary by server version use this on the
    /// first row of a poll, e.g. every `total_*` column plus `execution_count`.
    pub fn discover<F>(row: &Row, mut is_metric: F) -> Result<Self>
    where
        F: FnMut(&str) -> bool,
    {
        Self::new(
            row.iter()
                .filter(|(name, value)| value.is_numeric() && is_metric(name))
                .map(|(name, _)| name.clone()),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Checks that every metric is present, numeric and finite in `row`.
    pub fn validate(&self, row: &Row) -> Result<()> {
        for name in &self.names {
            row.number(name)?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<String>> for MetricSet {
    type Error = SampleError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::new(names)
    }
}

impl From<MetricSet> for Vec<String> {
    fn from(set: MetricSet) -> Self {
        set.names
    }
}
