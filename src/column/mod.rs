// ============================================================================
// Columns - typed projections of a record used for filtering and ordering
// ============================================================================

pub mod mapping;
pub mod value;

pub use mapping::{ColumnMapping, TypeMapping};
pub use value::{ColumnValue, ValueType};
