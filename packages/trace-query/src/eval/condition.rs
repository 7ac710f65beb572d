//! Per-span attribute conditions.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::span::{AttributeValue, SpanField, SpanRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equal,
    LessThan,
    GreaterThan,
}

impl Comparator {
    /// Whether `ordering` (span value relative to condition value) satisfies
    /// the comparator. Incomparable values never do.
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        matches!(
            (self, ordering),
            (Comparator::Equal, Some(Ordering::Equal))
                | (Comparator::LessThan, Some(Ordering::Less))
                | (Comparator::GreaterThan, Some(Ordering::Greater))
        )
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparator::Equal => "equal",
            Comparator::LessThan => "less_than",
            Comparator::GreaterThan => "greater_than",
        })
    }
}

/// `accessor(span) <comparator> value` on the span that query node
/// `node_index` maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCondition {
    pub node_index: usize,
    pub accessor: SpanField,
    pub comparator: Comparator,
    pub value: AttributeValue,
}

impl QueryCondition {
    pub fn new(
        node_index: usize,
        accessor: SpanField,
        comparator: Comparator,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            node_index,
            accessor,
            comparator,
            value: value.into(),
        }
    }

    pub fn property_name(&self) -> &str {
        self.accessor.property_name()
    }

    /// Compare an already-read value against the condition value.
    pub fn accepts(&self, actual: &AttributeValue) -> bool {
        self.comparator.holds(actual.compare(&self.value))
    }

    pub fn evaluate(&self, span: &SpanRecord) -> bool {
        self.accessor
            .read(span)
            .map_or(false, |actual| self.accepts(&actual))
    }
}
