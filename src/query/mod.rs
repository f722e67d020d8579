// ============================================================================
// Queries - predicates over record columns and their compilation
// ============================================================================

pub mod compiler;
pub mod predicate;

pub use compiler::{normalize, PredicateCompiler};
pub use predicate::{LogicalOperator, Operator, Parameter, QueryPredicate};
