/// Metadata filter parsing
///
/// User-supplied per-field expression strings become typed filter
/// expressions. Invalid entries (blank field, blank value, malformed
/// numeric comparison) are dropped silently and never fail the batch.
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// One parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Exact string match
    StringEquals(String),
    /// Bounded numeric range; either bound may be absent
    NumberRange {
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl FilterExpr {
    /// Parse a raw expression string
    ///
    /// `">=N"` and `"<=N"` form one-sided ranges; anything else non-empty
    /// is an exact string match. A comparison operator followed by a
    /// non-number is malformed and yields `None`.
    pub fn parse(raw: &str) -> Option<FilterExpr> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        for (prefix, is_min) in [(">=", true), ("<=", false)] {
            if let Some(rest) = trimmed.strip_prefix(prefix) {
                return match rest.trim().parse::<f64>() {
                    Ok(n) if is_min => Some(FilterExpr::NumberRange {
                        min: Some(n),
                        max: None,
                    }),
                    Ok(n) => Some(FilterExpr::NumberRange {
                        min: None,
                        max: Some(n),
                    }),
                    Err(_) => None, // malformed comparison drops the field
                };
            }
        }

        Some(FilterExpr::StringEquals(trimmed.to_string()))
    }

    fn to_json(&self) -> Value {
        match self {
            FilterExpr::StringEquals(value) => json!({ "$eq": value }),
            FilterExpr::NumberRange { min, max } => {
                let mut obj = serde_json::Map::new();
                if let Some(min) = min {
                    obj.insert("$gte".to_string(), json!(min));
                }
                if let Some(max) = max {
                    obj.insert("$lte".to_string(), json!(max));
                }
                Value::Object(obj)
            }
        }
    }
}

/// Field-keyed filter set sent with vector queries
///
/// Backed by a BTreeMap so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    fields: BTreeMap<String, FilterExpr>,
}

impl MetadataFilter {
    /// Build a filter from raw field/expression pairs
    ///
    /// Entries with a blank field name or an unparseable expression are
    /// dropped; valid entries in the same batch are unaffected.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut fields = BTreeMap::new();
        for (field, raw) in entries {
            let name = field.as_ref().trim();
            if name.is_empty() {
                debug!("Dropping filter entry with blank field name");
                continue;
            }
            match FilterExpr::parse(raw.as_ref()) {
                Some(expr) => {
                    fields.insert(name.to_string(), expr);
                }
                None => {
                    debug!("Dropping unparseable filter expression for field '{}'", name);
                }
            }
        }
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field: &str) -> Option<&FilterExpr> {
        self.fields.get(field)
    }

    /// Wire representation for the vector backend's query endpoint
    pub fn to_query_json(&self) -> Option<Value> {
        if self.fields.is_empty() {
            return None;
        }
        let obj: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, expr)| (name.clone(), expr.to_json()))
            .collect();
        Some(Value::Object(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gte_parses_to_min_bound() {
        assert_eq!(
            FilterExpr::parse(">=2024"),
            Some(FilterExpr::NumberRange {
                min: Some(2024.0),
                max: None
            })
        );
    }

    #[test]
    fn test_lte_parses_to_max_bound() {
        assert_eq!(
            FilterExpr::parse("<=10.5"),
            Some(FilterExpr::NumberRange {
                min: None,
                max: Some(10.5)
            })
        );
    }

    #[test]
    fn test_plain_value_is_string_equals() {
        assert_eq!(
            FilterExpr::parse("fiction"),
            Some(FilterExpr::StringEquals("fiction".to_string()))
        );
    }

    #[test]
    fn test_blank_value_dropped() {
        assert_eq!(FilterExpr::parse("   "), None);
    }

    #[test]
    fn test_malformed_comparison_dropped() {
        assert_eq!(FilterExpr::parse(">=next year"), None);
    }

    #[test]
    fn test_blank_field_dropped_others_kept() {
        let filter = MetadataFilter::from_entries(vec![
            ("  ", "x"),
            ("year", ">=2024"),
            ("genre", "   "),
            ("author", "le guin"),
        ]);

        assert_eq!(filter.len(), 2);
        assert_eq!(
            filter.get("year"),
            Some(&FilterExpr::NumberRange {
                min: Some(2024.0),
                max: None
            })
        );
        assert_eq!(
            filter.get("author"),
            Some(&FilterExpr::StringEquals("le guin".to_string()))
        );
    }

    #[test]
    fn test_query_json_shape() {
        let filter = MetadataFilter::from_entries(vec![("year", ">=2024"), ("genre", "fiction")]);
        let json = filter.to_query_json().unwrap();

        assert_eq!(json["year"]["$gte"], 2024.0);
        assert_eq!(json["genre"]["$eq"], "fiction");
    }

    #[test]
    fn test_empty_filter_has_no_wire_form() {
        let filter = MetadataFilter::from_entries(Vec::<(&str, &str)>::new());
        assert!(filter.is_empty());
        assert!(filter.to_query_json().is_none());
    }
}
