use serde::{Deserialize, Serialize};

use crate::column::ColumnValue;

// ============================================================================
// Query Predicates - boolean expressions over record columns
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// Has no native filter; compiling it fails.
    NotEqual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub column: String,
    pub operator: Operator,
    pub value: ColumnValue,
}

impl Parameter {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<ColumnValue>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        Self::new(column, Operator::Equal, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        Self::new(column, Operator::GreaterThan, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        Self::new(column, Operator::LessThan, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        Self::new(column, Operator::GreaterOrEqual, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        Self::new(column, Operator::LessOrEqual, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    And,
    Or,
}

/// A logical node: its own parameters and child nodes, combined by `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPredicate {
    pub operator: LogicalOperator,
    pub parameters: Vec<Parameter>,
    pub children: Vec<QueryPredicate>,
}

impl QueryPredicate {
    /// The predicate matching everything.
    pub fn empty() -> Self {
        Self::all(Vec::new())
    }

    /// AND of `parameters`.
    pub fn all(parameters: Vec<Parameter>) -> Self {
        Self {
            operator: LogicalOperator::And,
            parameters,
            children: Vec::new(),
        }
    }

    /// OR of `parameters`.
    pub fn any(parameters: Vec<Parameter>) -> Self {
        Self {
            operator: LogicalOperator::Or,
            parameters,
            children: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_child(mut self, child: QueryPredicate) -> Self {
        self.children.push(child);
        self
    }

    /// No parameters and no children at this node.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.children.is_empty()
    }
}

impl Default for QueryPredicate {
    fn default() -> Self {
        Self::empty()
    }
}
