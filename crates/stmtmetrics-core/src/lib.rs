//! stmtmetrics-core — statement-level metrics sampling for database monitoring.
//!
//! Provides:
//! - `row` — typed flat rows (`Row`, `Value`, `Number`)
//! - `metrics` — `MetricSet`, the fields treated as monotonic counters
//! - `key` — row identity (`RowKeyFn`, `KeyFields`, `signature`)
//! - `differ` — `SnapshotDiffer`, counter snapshots → per-interval deltas
//! - `limiter` — `apply_row_limits` / `RowLimiter`, per-metric top/bottom quotas
//! - `sampler` — `StatementSampler`, one target's diff + limit cycle
//! - `config` — serde configuration for samplers and limits
//!
//! Fetching rows and emitting metrics are left to the caller:
//!
//! ```text
//! raw rows ─▶ SnapshotDiffer ─▶ delta rows ─▶ RowLimiter ─▶ reported rows
//! ```

pub mod config;
pub mod differ;
pub mod error;
pub mod key;
pub mod limiter;
pub mod metrics;
pub mod row;
pub mod sampler;

pub use config::{LimitsConfig, QuotaConfig, SamplerConfig};
pub use differ::{DeriveOptions, DiffStats, SnapshotDiffer};
pub use error::{Result, SampleError};
pub use key::{KeyFields, KeyPart, RowKey, RowKeyFn, signature};
pub use limiter::{
    Quota, QuotaTable, RowLimiter, SortOrder, TieBreak, apply_row_limits, top_rows_by,
};
pub use metrics::MetricSet;
pub use row::{Number, Row, Value};
pub use sampler::StatementSampler;
