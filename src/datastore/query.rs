use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::entity::{Entity, Kind};
use super::value::NativeValue;
use crate::namespace::Namespace;

// ============================================================================
// Native Query Model
// ============================================================================
//
// The store executes one conjunctive filter per query, plus ordering, a
// limit and cursor continuation. Anything richer is compiled down to a set
// of these by the query module.
//
// ============================================================================

/// Comparison operators the store can evaluate natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl FilterOp {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Equal => ordering == Ordering::Equal,
            FilterOp::GreaterThan => ordering == Ordering::Greater,
            FilterOp::LessThan => ordering == Ordering::Less,
            FilterOp::GreaterThanOrEqual => ordering != Ordering::Less,
            FilterOp::LessThanOrEqual => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub op: FilterOp,
    pub value: NativeValue,
}

impl PropertyFilter {
    pub fn new(property: impl Into<String>, op: FilterOp, value: NativeValue) -> Self {
        Self {
            property: property.into(),
            op,
            value,
        }
    }

    pub fn equal(property: impl Into<String>, value: NativeValue) -> Self {
        Self::new(property, FilterOp::Equal, value)
    }

    /// Missing properties and values of another type never match.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity
            .get(&self.property)
            .and_then(|actual| actual.compare(&self.value))
            .map(|ordering| self.op.accepts(ordering))
            .unwrap_or(false)
    }
}

/// AND of one or more property filters. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConjunctiveFilter {
    filters: Vec<PropertyFilter>,
}

impl ConjunctiveFilter {
    /// Starts a conjunction anchored on `first`.
    pub fn of(first: PropertyFilter) -> Self {
        Self {
            filters: vec![first],
        }
    }

    pub fn and(mut self, next: PropertyFilter) -> Self {
        self.filters.push(next);
        self
    }

    pub fn filters(&self) -> &[PropertyFilter] {
        &self.filters
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.filters.iter().all(|filter| filter.matches(entity))
    }
}

impl fmt::Display for ConjunctiveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{} {:?} {:?}", filter.property, filter.op, filter.value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub property: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }
}

/// Compares two entities by a list of orderings; a missing property sorts as null.
pub fn compare_entities(order: &[OrderBy], a: &Entity, b: &Entity) -> Ordering {
    for order_by in order {
        let left = a.get(&order_by.property).unwrap_or(&NativeValue::Null);
        let right = b.get(&order_by.property).unwrap_or(&NativeValue::Null);
        let ordering = match order_by.direction {
            Direction::Ascending => left.total_cmp(right),
            Direction::Descending => right.total_cmp(left),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Opaque continuation token for a partially consumed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    pub namespace: Namespace,
    pub kind: Kind,
    pub filter: Option<ConjunctiveFilter>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub start_cursor: Option<Cursor>,
    pub keys_only: bool,
}

impl EntityQuery {
    pub fn new(namespace: Namespace, kind: Kind) -> Self {
        Self {
            namespace,
            kind,
            filter: None,
            order: Vec::new(),
            limit: None,
            start_cursor: None,
            keys_only: false,
        }
    }

    pub fn with_filter(mut self, filter: Option<ConjunctiveFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

impl fmt::Display for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind={} namespace={:?}", self.kind, self.namespace.as_str())?;
        if let Some(filter) = &self.filter {
            write!(f, " filter=[{filter}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    pub entities: Vec<Entity>,
    pub end_cursor: Option<Cursor>,
    pub more_results: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Key;

    fn entity(name: &str, priority: i64, title: &str) -> Entity {
        Entity::new(Key::new(Namespace::default(), Kind::new("Task"), name))
            .with("priority", NativeValue::Integer(priority))
            .with("title", NativeValue::String(title.to_string()))
    }

    #[test]
    fn test_property_filter_operators() {
        let e = entity("a", 5, "x");
        assert!(PropertyFilter::equal("priority", NativeValue::Integer(5)).matches(&e));
        assert!(PropertyFilter::new("priority", FilterOp::GreaterThan, NativeValue::Integer(4)).matches(&e));
        assert!(PropertyFilter::new("priority", FilterOp::LessThanOrEqual, NativeValue::Integer(5)).matches(&e));
        assert!(!PropertyFilter::new("priority", FilterOp::LessThan, NativeValue::Integer(5)).matches(&e));
    }

    #[test]
    fn test_missing_property_and_type_mismatch_do_not_match() {
        let e = entity("a", 5, "x");
        assert!(!PropertyFilter::equal("owner", NativeValue::Null).matches(&e));
        assert!(!PropertyFilter::equal("priority", NativeValue::String("5".into())).matches(&e));
    }

    #[test]
    fn test_conjunction_requires_all() {
        let e = entity("a", 5, "x");
        let filter = ConjunctiveFilter::of(PropertyFilter::equal("priority", NativeValue::Integer(5)))
            .and(PropertyFilter::equal("title", NativeValue::String("y".into())));
        assert!(!filter.matches(&e));
        assert_eq!(filter.filters().len(), 2);
    }

    #[test]
    fn test_compare_entities_uses_orderings_in_sequence() {
        let a = entity("a", 1, "b");
        let b = entity("b", 1, "a");
        let order = vec![OrderBy::desc("priority"), OrderBy::asc("title")];
        assert_eq!(compare_entities(&order, &a, &b), Ordering::Greater);
    }
}
