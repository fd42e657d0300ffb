//! One collection cycle: diff the raw poll, then bound its cardinality.

use tracing::debug;

use crate::differ::{DeriveOptions, SnapshotDiffer};
use crate::error::Result;
use crate::key::{KeyFields, RowKey};
use crate::limiter::RowLimiter;
use crate::metrics::MetricSet;
use crate::row::Row;

/// Statement sampler for a single monitored target.
///
/// Owns the differ state, so each target needs its own instance.
#[derive(Debug)]
pub struct StatementSampler {
    differ: SnapshotDiffer<RowKey>,
    metrics: MetricSet,
    keys: KeyFields,
    options: DeriveOptions,
    limiter: Option<RowLimiter>,
}

impl StatementSampler {
    pub fn new(metrics: MetricSet, keys: KeyFields) -> Self {
        Self {
            differ: SnapshotDiffer::new(),
            metrics,
            keys,
            options: DeriveOptions::default(),
            limiter: None,
        }
    }

    pub fn with_options(mut self, options: DeriveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_limiter(mut self, limiter: RowLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Turns one raw poll into the rows to report this cycle.
    pub fn sample(&mut self, rows: &[Row]) -> Result<Vec<Row>> {
        let deltas = self.differ.compute_derivative_rows_with(
            rows,
            &self.metrics,
            &self.keys,
            &self.options,
        )?;
        let Some(limiter) = &self.limiter else {
            return Ok(deltas);
        };
        let limited = limiter.apply(&deltas, &self.keys)?;
        debug!(
            deltas = deltas.len(),
            reported = limited.len(),
            "applied row limits"
        );
        Ok(limited)
    }

    pub fn differ(&self) -> &SnapshotDiffer<RowKey> {
        &self.differ
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn keys(&self) -> &KeyFields {
        &self.keys
    }

    pub fn limiter(&self) -> Option<&RowLimiter> {
        self.limiter.as_ref()
    }

    /// Drops all baselines, e.g. after reconnecting to a different server.
    pub fn reset(&mut self) {
        self.differ.clear();
    }
}
