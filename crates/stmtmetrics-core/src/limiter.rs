//! Cardinality bounding: keep the extremes of each metric.
//!
//! For every metric in a [`QuotaTable`] the limiter keeps the `top` rows with
//! the largest value and the `bottom` rows with the smallest value, and returns
//! the union of those windows with duplicates removed.
//!
//! ## Ranking
//!
//! Rows are ranked per metric `m` by a total order:
//!
//! 1. `row[m]` ascending,
//! 2. `row[primary_metric]`: with [`SortOrder::Desc`] a larger primary value
//!    ranks higher, with [`SortOrder::Asc`] a smaller one does,
//! 3. input position: earlier rows rank lower.
//!
//! The top window is the high end of that order and the bottom window the low
//! end, so ties on `m` are settled by the primary metric and never by hash or
//! sort stability. Output is ordered by the primary metric in the configured
//! direction, ties by input position.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{Result, SampleError};
use crate::key::RowKeyFn;
use crate::row::{Number, Row};

/// Per-metric row budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Quota {
    /// Rows kept from the largest values.
    pub top: usize,
    /// Rows kept from the smallest values.
    pub bottom: usize,
}

impl Quota {
    pub fn new(top: usize, bottom: usize) -> Self {
        Self { top, bottom }
    }

    /// Validates bounds coming from untrusted configuration.
    pub fn from_signed(metric: &str, top: i64, bottom: i64) -> Result<Self> {
        if top < 0 || bottom < 0 {
            return Err(SampleError::NegativeQuota {
                metric: metric.to_string(),
                top,
                bottom,
            });
        }
        let bound = |v: i64| {
            usize::try_from(v).map_err(|_| {
                SampleError::Config(format!("quota for {} does not fit in usize: {}", metric, v))
            })
        };
        Ok(Self {
            top: bound(top)?,
            bottom: bound(bottom)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.bottom == 0
    }
}

/// Metric name → quota. Iterates in name order.
pub type QuotaTable = BTreeMap<String, Quota>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn from_descending(descending: bool) -> Self {
        if descending {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn is_descending(self) -> bool {
        self == SortOrder::Desc
    }
}

impl FromStr for SortOrder {
    type Err = SampleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            _ => Err(SampleError::UnknownSortOrder(s.to_string())),
        }
    }
}

/// Ordering policy for ties and for the returned rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieBreak {
    pub primary_metric: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl TieBreak {
    pub fn new(primary_metric: impl Into<String>, order: SortOrder) -> Self {
        Self {
            primary_metric: primary_metric.into(),
            order,
        }
    }
}

/// Returns the union of the per-metric top/bottom windows, one row per key.
///
/// Every metric in `quotas` and `primary_metric` must be present and numeric
/// in every row; otherwise the lookup error is returned. A table whose quotas
/// are all `(0, 0)` selects nothing without looking at the rows.
pub fn apply_row_limits<F>(
    rows: &[Row],
    quotas: &QuotaTable,
    primary_metric: &str,
    descending: bool,
    key_fn: &F,
) -> Result<Vec<Row>>
where
    F: RowKeyFn,
{
    if rows.is_empty() || quotas.values().all(Quota::is_empty) {
        return Ok(Vec::new());
    }

    let primary = column(rows, primary_metric)?;
    let n = rows.len();
    let mut selected = vec![false; n];

    for (metric, quota) in quotas {
        let values = column(rows, metric)?;
        if quota.is_empty() {
            continue;
        }

        let mut ranked: Vec<usize> = (0..n).collect();
        ranked.sort_unstable_by(|&a, &b| {
            values[a]
                .total_cmp(&values[b])
                .then_with(|| directed(primary[a].total_cmp(&primary[b]), descending))
                .then_with(|| a.cmp(&b))
        });

        let bottom = quota.bottom.min(n);
        let top = quota.top.min(n);
        for &i in ranked[..bottom].iter().chain(&ranked[n - top..]) {
            selected[i] = true;
        }
        trace!(metric = metric.as_str(), top, bottom, rows = n, "applied row quota");
    }

    let mut picked: Vec<usize> = (0..n).filter(|&i| selected[i]).collect();
    picked.sort_by(|&a, &b| {
        directed(primary[a].total_cmp(&primary[b]), descending)
            .reverse()
            .then_with(|| a.cmp(&b))
    });

    let mut seen = HashSet::with_capacity(picked.len());
    let mut out = Vec::with_capacity(picked.len());
    for i in picked {
        if seen.insert(key_fn.key(&rows[i])?) {
            out.push(rows[i].clone());
        }
    }
    Ok(out)
}

/// Sorts by `metric` descending and keeps at most `max` rows; ties keep input
/// order. Used to cap a payload after limiting.
pub fn top_rows_by(rows: &[Row], metric: &str, max: usize) -> Result<Vec<Row>> {
    let values = column(rows, metric)?;
    let mut idx: Vec<usize> = (0..rows.len()).collect();
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then_with(|| a.cmp(&b)));
    Ok(idx.into_iter().take(max).map(|i| rows[i].clone()).collect())
}

/// `ord` when larger should rank higher, reversed otherwise.
fn directed(ord: Ordering, descending: bool) -> Ordering {
    if descending { ord } else { ord.reverse() }
}

fn column(rows: &[Row], metric: &str) -> Result<Vec<Number>> {
    rows.iter().map(|r| r.number(metric)).collect()
}

/// Owned quota configuration applied once per collection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLimiter {
    quotas: QuotaTable,
    tie_break: TieBreak,
}

impl RowLimiter {
    pub fn new(quotas: QuotaTable, tie_break: TieBreak) -> Self {
        if quotas.values().all(Quota::is_empty) {
            warn!(
                metrics = quotas.len(),
                "row limits select no rows; every cycle will report nothing"
            );
        }
        Self { quotas, tie_break }
    }

    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    pub fn tie_break(&self) -> &TieBreak {
        &self.tie_break
    }

    /// Upper bound on the number of rows [`RowLimiter::apply`] can return.
    pub fn max_rows(&self) -> usize {
        self.quotas
            .values()
            .fold(0usize, |acc, q| acc.saturating_add(q.top).saturating_add(q.bottom))
    }

    pub fn apply<F>(&self, rows: &[Row], key_fn: &F) -> Result<Vec<Row>>
    where
        F: RowKeyFn,
    {
        apply_row_limits(
            rows,
            &self.quotas,
            &self.tie_break.primary_metric,
            self.tie_break.order.is_descending(),
            key_fn,
        )
    }
}
