//! Read path: predicate translation and pushdown scans.

pub mod columns;
pub mod filter;
pub mod predicate;
pub mod scan;
pub mod translate;

pub use columns::{ColumnRef, QueryColumn, QueryColumns};
pub use filter::{parse_filter, FilterSyntaxError};
pub use predicate::{ComparisonOp, PredicateNode, StringMatchKind};
pub use scan::{PushdownResult, Scan, ScanBuilder};
pub use translate::{NativeExpr, NativeOp, PredicateTranslator, Translation};
