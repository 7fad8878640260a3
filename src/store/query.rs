//! Query building blocks.
//!
//! Callers build a [`Filter`]; only the secure query layer can turn it into
//! a [`ScopedQuery`], which always carries the owning identity. Store
//! implementations receive nothing else, so there is no way to ask a store
//! for "all rows matching X" without an owner predicate attached.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::security::context::ResourceKind;
use crate::security::identity::Identity;
use crate::store::resource::OWNER_FIELD;

/// Equality predicate on one serialized field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Caller-supplied narrowing. Conditions are conjoined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            value,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True if every condition holds on the serialized record.
    pub fn matches(&self, record: &Value) -> bool {
        self.conditions
            .iter()
            .all(|c| record.get(&c.field) == Some(&c.value))
    }
}

/// Tenant-scoped query handed to a store.
#[derive(Debug, Clone, Copy)]
pub struct ScopedQuery<'a> {
    owner: &'a Identity,
    kind: ResourceKind,
    filter: &'a Filter,
}

impl<'a> ScopedQuery<'a> {
    pub(crate) fn new(owner: &'a Identity, kind: ResourceKind, filter: &'a Filter) -> Self {
        Self { owner, kind, filter }
    }

    pub fn owner(&self) -> &Identity {
        self.owner
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn filter(&self) -> &Filter {
        self.filter
    }

    /// Owner predicate AND caller filter, evaluated on a serialized record.
    pub fn matches(&self, record: &Value) -> bool {
        record.get(OWNER_FIELD).and_then(Value::as_str) == Some(self.owner.as_str())
            && self.filter.matches(record)
    }
}

/// Field updates for an existing record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First field not listed in `allowed`, if any.
    pub fn first_disallowed(&self, allowed: &[&str]) -> Option<&str> {
        self.0
            .keys()
            .map(String::as_str)
            .find(|field| !allowed.contains(field))
    }
}

/// Total order over the JSON values records serialize to.
///
/// RFC 3339 strings compare as instants so timestamps with differing
/// fractional precision still sort chronologically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                x.parse::<DateTime<Utc>>(),
                y.parse::<DateTime<Utc>>(),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
