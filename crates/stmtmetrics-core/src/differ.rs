//! Per-interval deltas from monotonically increasing counter snapshots.
//!
//! [`SnapshotDiffer`] keeps the previous poll per key and turns each new poll
//! into delta rows. Keys move through these states:
//!
//! ```text
//! UNSEEN ──first sighting──▶ BASELINED ──any metric grew──▶ GROWING (emit)
//!                                │   ▲                          │
//!                                │   └──── nothing changed ─────┤ STEADY
//!                                └──── any metric decreased ────▶ RESET (no emit,
//!                                                                 re-baseline)
//! ```
//!
//! A reset (stats cleared, server restart) suppresses the affected key for
//! exactly one cycle. That is expected behavior and only logged at debug level.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use crate::error::Result;
use crate::key::{RowKey, RowKeyFn};
use crate::metrics::MetricSet;
use crate::row::{Number, Row, counter_delta};

/// Per-call tuning for [`SnapshotDiffer::compute_derivative_rows_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeriveOptions {
    /// Fields that must change for a row to count as executed (e.g. `calls`,
    /// `exec_count`). When set and none of them moved, the row is not emitted
    /// even if other metrics grew: a statement evicted and re-inserted with
    /// the same call count shows timing drift without having run.
    pub execution_indicators: Vec<String>,
}

impl DeriveOptions {
    pub fn with_execution_indicators<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            execution_indicators: indicators.into_iter().map(Into::into).collect(),
        }
    }
}

/// Counters describing the most recent successful call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Rows passed in, duplicates included.
    pub observed: usize,
    /// Keys seen for the first time.
    pub baselined: usize,
    pub emitted: usize,
    /// Keys whose tracked metrics did not change.
    pub unchanged: usize,
    /// Keys whose metrics changed but whose execution indicators did not.
    pub idle: usize,
    /// Keys with at least one decreased metric.
    pub resets: usize,
    /// Rows superseded by a later row with the same key in the same poll.
    pub duplicates: usize,
    /// Keys present in the previous poll but absent from this one.
    pub dropped: usize,
}

enum Derived {
    Delta(Row),
    Unchanged,
    Idle,
    Reset,
}

/// Stateful differ owning the previous poll's snapshot.
///
/// One instance per monitored target; not meant to be shared between
/// concurrent callers.
#[derive(Debug)]
pub struct SnapshotDiffer<K = RowKey> {
    snapshot: HashMap<K, Row>,
    last_stats: DiffStats,
}

impl<K> Default for SnapshotDiffer<K> {
    fn default() -> Self {
        Self {
            snapshot: HashMap::new(),
            last_stats: DiffStats::default(),
        }
    }
}

impl<K> SnapshotDiffer<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns rows whose tracked counters grew since the previous call.
    ///
    /// Non-metric fields are copied from the current row; metric fields are
    /// replaced by `current - previous`. First sightings, unchanged rows and
    /// resets produce nothing. The snapshot is replaced by this poll's rows,
    /// so keys missing from `rows` are forgotten.
    ///
    /// On error (missing key field, missing or non-numeric metric) the
    /// snapshot is left untouched.
    pub fn compute_derivative_rows<F>(
        &mut self,
        rows: &[Row],
        metrics: &MetricSet,
        key_fn: &F,
    ) -> Result<Vec<Row>>
    where
        F: RowKeyFn<Key = K>,
    {
        self.compute_derivative_rows_with(rows, metrics, key_fn, &DeriveOptions::default())
    }

    pub fn compute_derivative_rows_with<F>(
        &mut self,
        rows: &[Row],
        metrics: &MetricSet,
        key_fn: &F,
        options: &DeriveOptions,
    ) -> Result<Vec<Row>>
    where
        F: RowKeyFn<Key = K>,
    {
        // Duplicate keys collapse last-seen-wins, keeping the last position.
        let mut latest: HashMap<K, usize> = HashMap::with_capacity(rows.len());
        let mut duplicates = 0;
        for (idx, row) in rows.iter().enumerate() {
            let key = key_fn.key(row)?;
            metrics.validate(row)?;
            for field in &options.execution_indicators {
                row.number(field)?;
            }
            if latest.insert(key, idx).is_some() {
                duplicates += 1;
            }
        }
        let mut order: Vec<(usize, K)> = latest.into_iter().map(|(k, i)| (i, k)).collect();
        order.sort_unstable_by_key(|(i, _)| *i);

        let mut stats = DiffStats {
            observed: rows.len(),
            duplicates,
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut next = HashMap::with_capacity(order.len());
        for (idx, key) in order {
            let row = &rows[idx];
            if let Some(prev) = self.snapshot.get(&key) {
                match derive_row(row, prev, metrics, options)? {
                    Derived::Delta(d) => {
                        stats.emitted += 1;
                        out.push(d);
                    }
                    Derived::Unchanged => stats.unchanged += 1,
                    Derived::Idle => stats.idle += 1,
                    Derived::Reset => stats.resets += 1,
                }
            } else {
                stats.baselined += 1;
            }
            next.insert(key, row.clone());
        }
        stats.dropped = self
            .snapshot
            .keys()
            .filter(|k| !next.contains_key(*k))
            .count();

        if stats.resets > 0 {
            debug!(
                resets = stats.resets,
                "counter decrease detected, keys re-baselined"
            );
        }
        debug!(
            observed = stats.observed,
            baselined = stats.baselined,
            emitted = stats.emitted,
            unchanged = stats.unchanged,
            idle = stats.idle,
            dropped = stats.dropped,
            duplicates = stats.duplicates,
            "computed derivative rows"
        );

        self.snapshot = next;
        self.last_stats = stats;
        Ok(out)
    }

    /// Number of keys currently baselined.
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.snapshot.contains_key(key)
    }

    /// Last observed row for `key`.
    pub fn baseline(&self, key: &K) -> Option<&Row> {
        self.snapshot.get(key)
    }

    pub fn last_stats(&self) -> DiffStats {
        self.last_stats
    }

    /// Forgets every baseline; the next call behaves like a first poll.
    pub fn clear(&mut self) {
        self.snapshot.clear();
        self.last_stats = DiffStats::default();
    }

    pub fn shrink_to_fit(&mut self) {
        self.snapshot.shrink_to_fit();
    }
}

fn derive_row(
    curr: &Row,
    prev: &Row,
    metrics: &MetricSet,
    options: &DeriveOptions,
) -> Result<Derived> {
    let mut deltas: Vec<(&str, Number)> = Vec::with_capacity(metrics.len());
    for m in metrics.iter() {
        match counter_delta(m, curr.number(m)?, prev.number(m)?)? {
            Some(d) => deltas.push((m, d)),
            None => return Ok(Derived::Reset),
        }
    }
    if deltas.iter().all(|(_, d)| d.is_zero()) {
        return Ok(Derived::Unchanged);
    }

    if !options.execution_indicators.is_empty() {
        let mut executed = false;
        for field in &options.execution_indicators {
            if curr.number(field)?.total_cmp(&prev.number(field)?).is_ne() {
                executed = true;
                break;
            }
        }
        if !executed {
            return Ok(Derived::Idle);
        }
    }

    let mut delta = curr.clone();
    for (m, d) in deltas {
        delta.insert(m, d);
    }
    Ok(Derived::Delta(delta))
}
