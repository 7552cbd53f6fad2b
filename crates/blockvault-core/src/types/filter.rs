//! Typed filters for listing store records.
//!
//! A [`Filter`] is a conjunction of [`Condition`]s over the field enum of
//! one record kind. Field enums are closed, so a filter can only name
//! columns the record kind actually exposes. The textual `field__op` form
//! used by the CLI is parsed strictly: unknown fields or operators are
//! rejected instead of being silently dropped.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::result::AppResult;

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Exact equality.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl FilterOp {
    /// The SQL comparison operator.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Whether `ordering` (record value compared to the filter value)
    /// satisfies the operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Neq => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }

    /// Return the operator as its textual suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }
}

impl FromStr for FilterOp {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            other => Err(AppError::validation(format!(
                "Unsupported filter operator '{other}'"
            ))),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed filter operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// A UUID value (record ids).
    Uuid(Uuid),
    /// A timestamp value.
    Timestamp(DateTime<Utc>),
    /// A boolean value.
    Boolean(bool),
    /// An integer value.
    Integer(i64),
    /// A string value.
    String(String),
}

impl FilterValue {
    /// Compare two values of the same variant. Mixed variants are
    /// incomparable.
    pub fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// The closed set of filterable columns of one record kind.
pub trait FilterField: Copy + fmt::Debug + PartialEq + FromStr<Err = AppError> {
    /// Column name in the store.
    fn column(&self) -> &'static str;

    /// Parse a textual operand into the value type of this field.
    fn parse_value(&self, raw: &str) -> AppResult<FilterValue>;
}

/// A record whose fields can be evaluated against a [`Filter`].
pub trait Filterable {
    /// Field enum of this record kind.
    type Field: FilterField;

    /// Current value of `field`; `None` for SQL `NULL`, which matches no
    /// condition.
    fn field_value(&self, field: Self::Field) -> Option<FilterValue>;
}

/// A single condition on a named field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition<F> {
    /// The field to compare.
    pub field: F,
    /// The comparison operator.
    pub op: FilterOp,
    /// The value to compare against.
    pub value: FilterValue,
}

impl<F: FilterField> Condition<F> {
    /// Parse a `field__op` key (the `__op` part is optional and defaults
    /// to `eq`) and a raw operand.
    pub fn parse(key: &str, raw_value: &str) -> AppResult<Self> {
        let (field, op) = match key.rsplit_once("__") {
            Some((field, op)) => (field, op),
            None => (key, ""),
        };
        let field: F = field.parse()?;
        let op: FilterOp = op.parse()?;
        let value = field.parse_value(raw_value)?;
        Ok(Self { field, op, value })
    }

    /// Whether the record satisfies this condition.
    pub fn matches<R: Filterable<Field = F>>(&self, record: &R) -> bool {
        record
            .field_value(self.field)
            .and_then(|actual| actual.compare(&self.value))
            .is_some_and(|ordering| self.op.accepts(ordering))
    }
}

/// A conjunction of conditions; the empty filter matches everything.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter<F> {
    conditions: Vec<Condition<F>>,
}

impl<F: FilterField> Filter<F> {
    /// A filter without conditions.
    pub fn all() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Add a condition.
    pub fn and(mut self, field: F, op: FilterOp, value: impl Into<FilterValue>) -> Self {
        self.conditions.push(Condition {
            field,
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality condition.
    pub fn eq(self, field: F, value: impl Into<FilterValue>) -> Self {
        self.and(field, FilterOp::Eq, value)
    }

    /// Build a filter from textual `field__op=value` pairs.
    pub fn parse_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> AppResult<Self> {
        let conditions = pairs
            .into_iter()
            .map(|(key, value)| Condition::parse(key, value))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { conditions })
    }

    /// The conditions of this filter.
    pub fn conditions(&self) -> &[Condition<F>] {
        &self.conditions
    }

    /// Whether the record satisfies every condition.
    pub fn matches<R: Filterable<Field = F>>(&self, record: &R) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

impl<F: FilterField> Default for Filter<F> {
    fn default() -> Self {
        Self::all()
    }
}

/// Parse an RFC 3339 timestamp operand.
pub fn parse_timestamp(raw: &str) -> AppResult<FilterValue> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| FilterValue::Timestamp(dt.with_timezone(&Utc)))
        .map_err(|e| AppError::validation(format!("Invalid timestamp '{raw}': {e}")))
}

/// Parse a UUID operand.
pub fn parse_uuid(raw: &str) -> AppResult<FilterValue> {
    Uuid::parse_str(raw)
        .map(FilterValue::Uuid)
        .map_err(|e| AppError::validation(format!("Invalid id '{raw}': {e}")))
}

/// Parse a boolean operand (`true`/`false`/`1`/`0`).
pub fn parse_bool(raw: &str) -> AppResult<FilterValue> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(FilterValue::Boolean(true)),
        "false" | "0" => Ok(FilterValue::Boolean(false)),
        _ => Err(AppError::validation(format!("Invalid boolean '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Field {
        Name,
        Size,
    }

    impl FromStr for Field {
        type Err = AppError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "name" => Ok(Self::Name),
                "size" => Ok(Self::Size),
                other => Err(AppError::validation(format!("unknown field {other}"))),
            }
        }
    }

    impl FilterField for Field {
        fn column(&self) -> &'static str {
            match self {
                Self::Name => "name",
                Self::Size => "size",
            }
        }

        fn parse_value(&self, raw: &str) -> AppResult<FilterValue> {
            match self {
                Self::Name => Ok(FilterValue::from(raw)),
                Self::Size => raw
                    .parse::<i64>()
                    .map(FilterValue::Integer)
                    .map_err(|e| AppError::validation(e.to_string())),
            }
        }
    }

    struct Row {
        name: String,
        size: Option<i64>,
    }

    impl Filterable for Row {
        type Field = Field;

        fn field_value(&self, field: Field) -> Option<FilterValue> {
            match field {
                Field::Name => Some(FilterValue::from(self.name.as_str())),
                Field::Size => self.size.map(FilterValue::Integer),
            }
        }
    }

    fn row(name: &str, size: Option<i64>) -> Row {
        Row {
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::<Field>::all().matches(&row("a", None)));
    }

    #[test]
    fn test_comparison_operators() {
        let r = row("a", Some(5));
        assert!(Filter::all().and(Field::Size, FilterOp::Gte, 5i64).matches(&r));
        assert!(Filter::all().and(Field::Size, FilterOp::Lt, 6i64).matches(&r));
        assert!(!Filter::all().and(Field::Size, FilterOp::Gt, 5i64).matches(&r));
        assert!(Filter::all().and(Field::Name, FilterOp::Neq, "b").matches(&r));
    }

    #[test]
    fn test_null_never_matches() {
        let r = row("a", None);
        assert!(!Filter::all().and(Field::Size, FilterOp::Neq, 1i64).matches(&r));
    }

    #[test]
    fn test_parse_pairs() {
        let filter = Filter::<Field>::parse_pairs([("size__lte", "10"), ("name", "x")])
            .expect("valid filter");
        assert_eq!(filter.conditions().len(), 2);
        assert_eq!(filter.conditions()[0].op, FilterOp::Lte);
        assert_eq!(filter.conditions()[1].op, FilterOp::Eq);
        assert!(filter.matches(&row("x", Some(3))));
    }

    #[test]
    fn test_unknown_field_or_operator_rejected() {
        assert!(Filter::<Field>::parse_pairs([("color", "red")]).is_err());
        assert!(Filter::<Field>::parse_pairs([("size__like", "1")]).is_err());
        assert!(Filter::<Field>::parse_pairs([("size", "big")]).is_err());
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_bool("1").expect("bool"), FilterValue::Boolean(true));
        assert!(parse_timestamp("2024-01-01T00:00:00Z").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_uuid("nope").is_err());
    }
}
