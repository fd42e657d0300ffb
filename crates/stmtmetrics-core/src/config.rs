//! Serializable configuration for samplers and row limits.
//!
//! Values are validated when built into runtime types; nothing is clamped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::differ::DeriveOptions;
use crate::error::{Result, SampleError};
use crate::key::KeyFields;
use crate::limiter::{Quota, QuotaTable, RowLimiter, SortOrder, TieBreak};
use crate::metrics::MetricSet;
use crate::sampler::StatementSampler;

/// Raw quota bounds. Signed so that negative values can be reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    #[serde(default)]
    pub top: i64,
    #[serde(default)]
    pub bottom: i64,
}

/// Row limit settings.
///
/// ```json
/// {
///   "primary_metric": "total_time",
///   "order": "desc",
///   "quotas": { "calls": { "top": 200, "bottom": 0 }, "total_time": { "top": 200, "bottom": 20 } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    pub primary_metric: String,
    #[serde(default)]
    pub order: SortOrder,
    pub quotas: BTreeMap<String, QuotaConfig>,
}

impl LimitsConfig {
    pub fn build(&self) -> Result<RowLimiter> {
        if self.primary_metric.is_empty() {
            return Err(SampleError::Config(
                "primary_metric must not be empty".to_string(),
            ));
        }
        let mut quotas = QuotaTable::new();
        for (metric, q) in &self.quotas {
            if metric.is_empty() {
                return Err(SampleError::Config(
                    "quota metric names must not be empty".to_string(),
                ));
            }
            quotas.insert(metric.clone(), Quota::from_signed(metric, q.top, q.bottom)?);
        }
        Ok(RowLimiter::new(
            quotas,
            TieBreak::new(self.primary_metric.clone(), self.order),
        ))
    }
}

/// Full per-target sampler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplerConfig {
    /// Monotonic counter fields.
    pub metrics: Vec<String>,
    /// Tag fields identifying a row across polls.
    pub key_fields: Vec<String>,
    /// Key fields that some rows may lack.
    #[serde(default)]
    pub optional_key_fields: Vec<String>,
    #[serde(default)]
    pub execution_indicators: Vec<String>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
}

impl SamplerConfig {
    pub fn build(&self) -> Result<StatementSampler> {
        let metrics = MetricSet::new(self.metrics.iter().cloned())?;
        if self.key_fields.is_empty() && self.optional_key_fields.is_empty() {
            return Err(SampleError::Config(
                "key_fields must name at least one field".to_string(),
            ));
        }
        let keys = self
            .optional_key_fields
            .iter()
            .fold(KeyFields::new(self.key_fields.iter().cloned()), |k, f| {
                k.optional(f.clone())
            });

        let mut sampler = StatementSampler::new(metrics, keys).with_options(
            DeriveOptions::with_execution_indicators(self.execution_indicators.iter().cloned()),
        );
        if let Some(limits) = &self.limits {
            sampler = sampler.with_limiter(limits.build()?);
        }
        Ok(sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "metrics": ["calls", "total_time"],
        "key_fields": ["query_signature", "query_hash"],
        "optional_key_fields": ["database_name"],
        "execution_indicators": ["calls"],
        "limits": {
            "primary_metric": "total_time",
            "quotas": {
                "calls": { "top": 5, "bottom": 1 },
                "total_time": { "top": 10 }
            }
        }
    }"#;

    #[test]
    fn full_config_builds_sampler() {
        let cfg: SamplerConfig = serde_json::from_str(FULL).unwrap();
        let sampler = cfg.build().unwrap();
        assert_eq!(sampler.keys().len(), 3);
        let limiter = sampler.limiter().unwrap();
        assert_eq!(limiter.tie_break().order, SortOrder::Desc);
        assert_eq!(limiter.quotas()["total_time"], Quota::new(10, 0));
        assert_eq!(limiter.max_rows(), 16);
    }

    #[test]
    fn negative_quota_fails_build() {
        let cfg = LimitsConfig {
            primary_metric: "calls".to_string(),
            order: SortOrder::Asc,
            quotas: [("calls".to_string(), QuotaConfig { top: 3, bottom: -2 })].into(),
        };
        assert_eq!(
            cfg.build(),
            Err(SampleError::NegativeQuota {
                metric: "calls".to_string(),
                top: 3,
                bottom: -2
            })
        );
    }

    #[test]
    fn empty_metrics_fail_build() {
        let cfg = SamplerConfig {
            metrics: vec![],
            key_fields: vec!["query".to_string()],
            optional_key_fields: vec![],
            execution_indicators: vec![],
            limits: None,
        };
        assert_eq!(cfg.build().unwrap_err(), SampleError::EmptyMetricSet);
    }

    #[test]
    fn missing_key_fields_fail_build() {
        let cfg = SamplerConfig {
            metrics: vec!["calls".to_string()],
            key_fields: vec![],
            optional_key_fields: vec![],
            execution_indicators: vec![],
            limits: None,
        };
        assert!(matches!(cfg.build(), Err(SampleError::Config(_))));
    }

    #[test]
    fn unknown_order_is_rejected_by_parser() {
        let raw = r#"{ "primary_metric": "calls", "order": "sideways", "quotas": {} }"#;
        assert!(serde_json::from_str::<LimitsConfig>(raw).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"{ "metrics": ["calls"], "key_fields": ["q"], "metric": [] }"#;
        assert!(serde_json::from_str::<SamplerConfig>(raw).is_err());
    }
}
