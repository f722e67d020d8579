use std::sync::Arc;

use super::predicate::{LogicalOperator, Operator, Parameter, QueryPredicate};
use crate::column::ColumnMapping;
use crate::datastore::{ConjunctiveFilter, FilterOp, PropertyFilter};
use crate::error::{Result, StorageError};

// ============================================================================
// Predicate Compiler - AND/OR expressions -> conjunctive native filters
// ============================================================================
//
// The store runs one AND-only filter per query. An arbitrary predicate is
// first normalized to disjunctive normal form (an OR of AND-groups), then
// each disjunct becomes one filter. Running every filter and taking the union
// of the results is equivalent to evaluating the predicate.
//
//   AND(a, OR(b, c))          -> [a AND b, a AND c]
//   OR(p, q, AND(a, b))       -> [p, q, a AND b]
//   <empty>                   -> []   (no filtering at all)
//
// Parameters attached directly to an OR node stay independent one-parameter
// filters; they are never distributed into the sibling AND-groups.
//
// ============================================================================

pub struct PredicateCompiler {
    mapping: Arc<ColumnMapping>,
}

impl PredicateCompiler {
    pub fn new(mapping: Arc<ColumnMapping>) -> Self {
        Self { mapping }
    }

    /// Compiles `predicate` into filters whose result union equals the predicate.
    ///
    /// An empty result means "match everything".
    pub fn compile(&self, predicate: &QueryPredicate) -> Result<Vec<ConjunctiveFilter>> {
        if predicate.is_empty() {
            return Ok(Vec::new());
        }

        let normalized = normalize(predicate)?;
        let filters = match normalized.operator {
            LogicalOperator::And => vec![self.conjunction(&normalized.parameters)?],
            LogicalOperator::Or => {
                let mut filters =
                    Vec::with_capacity(normalized.parameters.len() + normalized.children.len());
                for parameter in &normalized.parameters {
                    filters.push(self.conjunction(std::slice::from_ref(parameter))?);
                }
                for group in &normalized.children {
                    filters.push(self.conjunction(&group.parameters)?);
                }
                filters
            }
        };

        tracing::trace!(filters = filters.len(), "Predicate compiled");
        Ok(filters)
    }

    /// First parameter anchors the filter; the rest are ANDed on in order.
    fn conjunction(&self, parameters: &[Parameter]) -> Result<ConjunctiveFilter> {
        let (first, rest) = parameters
            .split_first()
            .ok_or(StorageError::EmptyConjunction)?;
        let mut filter = ConjunctiveFilter::of(self.property_filter(first)?);
        for parameter in rest {
            filter = filter.and(self.property_filter(parameter)?);
        }
        Ok(filter)
    }

    fn property_filter(&self, parameter: &Parameter) -> Result<PropertyFilter> {
        let op = native_operator(parameter.operator)?;
        let value = self.mapping.apply(&parameter.value)?;
        Ok(PropertyFilter::new(parameter.column.clone(), op, value))
    }
}

pub fn native_operator(operator: Operator) -> Result<FilterOp> {
    match operator {
        Operator::Equal => Ok(FilterOp::Equal),
        Operator::GreaterThan => Ok(FilterOp::GreaterThan),
        Operator::LessThan => Ok(FilterOp::LessThan),
        Operator::GreaterOrEqual => Ok(FilterOp::GreaterThanOrEqual),
        Operator::LessOrEqual => Ok(FilterOp::LessThanOrEqual),
        Operator::NotEqual => Err(StorageError::UnsupportedOperator(operator)),
    }
}

/// Rewrites `predicate` into disjunctive normal form.
///
/// The result is either a single AND node holding only parameters, or an OR
/// node whose children are AND nodes holding only parameters. Parameters of a
/// top-level OR node are kept on that node.
pub fn normalize(predicate: &QueryPredicate) -> Result<QueryPredicate> {
    if predicate.is_empty() {
        return Ok(predicate.clone());
    }

    match predicate.operator {
        LogicalOperator::And => {
            let mut terms = disjuncts(predicate)?;
            if terms.len() == 1 {
                let parameters = terms.pop().unwrap_or_default();
                return Ok(QueryPredicate::all(parameters));
            }
            Ok(QueryPredicate {
                operator: LogicalOperator::Or,
                parameters: Vec::new(),
                children: terms.into_iter().map(QueryPredicate::all).collect(),
            })
        }
        LogicalOperator::Or => {
            let mut groups = Vec::new();
            for child in &predicate.children {
                groups.extend(disjuncts(child)?.into_iter().map(QueryPredicate::all));
            }
            Ok(QueryPredicate {
                operator: LogicalOperator::Or,
                parameters: predicate.parameters.clone(),
                children: groups,
            })
        }
    }
}

/// Disjuncts of `node`, each a list of parameters to AND together.
fn disjuncts(node: &QueryPredicate) -> Result<Vec<Vec<Parameter>>> {
    if node.is_empty() {
        return Err(StorageError::EmptyConjunction);
    }

    match node.operator {
        LogicalOperator::And => {
            let mut terms = vec![node.parameters.clone()];
            for child in &node.children {
                let child_terms = disjuncts(child)?;
                terms = terms
                    .iter()
                    .flat_map(|left| {
                        child_terms.iter().map(move |right| {
                            let mut term = left.clone();
                            term.extend(right.iter().cloned());
                            term
                        })
                    })
                    .collect();
            }
            Ok(terms)
        }
        LogicalOperator::Or => {
            let mut terms: Vec<Vec<Parameter>> =
                node.parameters.iter().map(|p| vec![p.clone()]).collect();
            for child in &node.children {
                terms.extend(disjuncts(child)?);
            }
            Ok(terms)
        }
    }
}
