//! Row identity across polls.

use std::hash::Hash;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::row::{Row, Value};

/// Extracts the stable identity of a row.
///
/// Implementations must be pure and deterministic: the same row always maps
/// to the same key, independent of any mutable external state, since keys are
/// compared across collection cycles. Closures `Fn(&Row) -> Result<K>`
/// implement this trait directly.
pub trait RowKeyFn {
    type Key: Eq + Hash + Clone;

    fn key(&self, row: &Row) -> Result<Self::Key>;
}

impl<K, F> RowKeyFn for F
where
    F: Fn(&Row) -> Result<K>,
    K: Eq + Hash + Clone,
{
    type Key = K;

    fn key(&self, row: &Row) -> Result<K> {
        self(row)
    }
}

/// Hashable form of one key component. Floats are keyed by bit pattern, with
/// `-0.0` folded into `0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Absent,
    Int(i64),
    Float(u64),
    Str(String),
}

impl From<&Value> for KeyPart {
    fn from(v: &Value) -> Self {
        match v {
            Value::Int(i) => KeyPart::Int(*i),
            Value::Float(f) if *f == 0.0 => KeyPart::Float(0.0f64.to_bits()),
            Value::Float(f) => KeyPart::Float(f.to_bits()),
            Value::Str(s) => KeyPart::Str(s.clone()),
        }
    }
}

/// Key produced by [`KeyFields`]: one part per configured field, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(pub Vec<KeyPart>);

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyField {
    name: String,
    optional: bool,
}

/// Key extractor over a fixed list of tag fields, e.g. `(query, db, user)`.
///
/// Required fields fail fast when absent; optional fields contribute
/// [`KeyPart::Absent`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFields {
    fields: Vec<KeyField>,
}

impl KeyFields {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: required
                .into_iter()
                .map(|name| KeyField {
                    name: name.into(),
                    optional: false,
                })
                .collect(),
        }
    }

    /// Appends a field that may be missing from some rows.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.fields.push(KeyField {
            name: name.into(),
            optional: true,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl RowKeyFn for KeyFields {
    type Key = RowKey;

    fn key(&self, row: &Row) -> Result<RowKey> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for f in &self.fields {
            let part = if f.optional {
                row.get(&f.name).map(KeyPart::from).unwrap_or(KeyPart::Absent)
            } else {
                KeyPart::from(row.field(&f.name)?)
            };
            parts.push(part);
        }
        Ok(RowKey(parts))
    }
}

/// Compact fingerprint (16 hex digits, xxh3) for long key components such as
/// normalized statement text.
pub fn signature(text: &str) -> String {
    format!("{:016x}", xxh3_64(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SampleError;

    #[test]
    fn key_fields_follow_configured_order() {
        let keys = KeyFields::new(["query", "db"]);
        let row = Row::new()
            .with("db", "puppies")
            .with("query", "COMMIT")
            .with("count", 1);
        assert_eq!(
            keys.key(&row).unwrap(),
            RowKey(vec![
                KeyPart::Str("COMMIT".to_string()),
                KeyPart::Str("puppies".to_string()),
            ])
        );
    }

    #[test]
    fn missing_required_field_fails_fast() {
        let keys = KeyFields::new(["query", "user"]);
        let row = Row::new().with("query", "COMMIT");
        assert_eq!(
            keys.key(&row),
            Err(SampleError::MissingField("user".to_string()))
        );
    }

    #[test]
    fn optional_field_may_be_absent() {
        let keys = KeyFields::new(["query_signature"]).optional("database_name");
        let with_db = Row::new()
            .with("query_signature", "abc")
            .with("database_name", "master");
        let without_db = Row::new().with("query_signature", "abc");
        assert_ne!(keys.key(&with_db).unwrap(), keys.key(&without_db).unwrap());
        assert_eq!(keys.key(&without_db).unwrap().0[1], KeyPart::Absent);
    }

    #[test]
    fn closures_are_key_functions() {
        let by_query = |r: &Row| -> Result<String> {
            Ok(r.field("query")?.as_str().unwrap_or_default().to_string())
        };
        let row = Row::new().with("query", "ROLLBACK");
        assert_eq!(by_query.key(&row).unwrap(), "ROLLBACK");
    }

    #[test]
    fn signed_zero_is_one_identity() {
        let keys = KeyFields::new(["plan_cost"]);
        let pos = Row::new().with("plan_cost", 0.0);
        let neg = Row::new().with("plan_cost", -0.0);
        assert_eq!(keys.key(&pos).unwrap(), keys.key(&neg).unwrap());
        assert_ne!(
            keys.key(&pos).unwrap(),
            keys.key(&Row::new().with("plan_cost", 0.5)).unwrap()
        );
    }

    #[test]
    fn signature_is_stable_and_fixed_width() {
        let a = signature("SELECT * FROM t WHERE id = ?");
        assert_eq!(a.len(), 16);
        assert_eq!(a, signature("SELECT * FROM t WHERE id = ?"));
        assert_ne!(a, signature("SELECT * FROM u WHERE id = ?"));
    }
}
