//! Error type shared by the differ, the limiter and configuration loading.

/// Error type for sampling operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleError {
    /// A delta computation was requested with no metric fields.
    EmptyMetricSet,
    /// A quota with a negative bound.
    NegativeQuota { metric: String, top: i64, bottom: i64 },
    /// Sort order string other than `asc` / `desc`.
    UnknownSortOrder(String),
    /// A row lacks a field required by a metric set, key or quota.
    MissingField(String),
    /// A metric field holds a string.
    NotNumeric { field: String },
    /// A metric field holds NaN or an infinity.
    NonFinite { field: String },
    /// Integer delta did not fit in i64.
    Overflow { field: String },
    /// Any other invalid configuration.
    Config(String),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::EmptyMetricSet => write!(f, "metric set must not be empty"),
            SampleError::NegativeQuota {
                metric,
                top,
                bottom,
            } => write!(
                f,
                "quota for '{}' must be non-negative, got ({}, {})",
                metric, top, bottom
            ),
            SampleError::UnknownSortOrder(s) => {
                write!(f, "unknown sort order '{}', expected 'asc' or 'desc'", s)
            }
            SampleError::MissingField(name) => write!(f, "row has no field '{}'", name),
            SampleError::NotNumeric { field } => {
                write!(f, "field '{}' is not numeric", field)
            }
            SampleError::NonFinite { field } => {
                write!(f, "field '{}' is not a finite number", field)
            }
            SampleError::Overflow { field } => {
                write!(f, "integer overflow computing delta of '{}'", field)
            }
            SampleError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for SampleError {}

pub type Result<T> = std::result::Result<T, SampleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_field() {
        let e = SampleError::MissingField("calls".to_string());
        assert_eq!(e.to_string(), "row has no field 'calls'");

        let e = SampleError::NegativeQuota {
            metric: "time".to_string(),
            top: -1,
            bottom: 3,
        };
        assert_eq!(
            e.to_string(),
            "quota for 'time' must be non-negative, got (-1, 3)"
        );
    }
}
