//! Predicate Translation
//!
//! Renders a host [`PredicateNode`] tree into the store's functional query
//! vocabulary. Translation is a pure recursion: every node either maps to a
//! [`NativeExpr`] or the whole subtree is reported as unsupported and stays
//! with the host for local filtering.
//!
//! ## Mapping
//!
//! | Host | Native |
//! |---|---|
//! | `c = v`, `c != v`, `<`, `<=`, `>`, `>=` | `op.eq/ne/lt/le/gt/ge(c, v)` |
//! | `c <=> v` | `op.and(op.isDefined(c), op.eq(c, v))` |
//! | `c IS NULL` | `op.not(op.isDefined(c))` |
//! | `c IS NOT NULL` | `op.isDefined(c)` |
//! | `contains/startsWith/endsWith` | `fn.contains/startsWith/endsWith(c, 'p')` |
//! | `c IN (..)` | `op.in(c, [..])` |
//! | `AND`, `OR`, `NOT` | `op.and`, `op.or`, `op.not`, grouping kept as is |

use crate::error::UnsupportedPredicate;
use crate::read::columns::{quote, QueryColumn, QueryColumns};
use crate::read::predicate::{and3, or3, ComparisonOp, PredicateNode, StringMatchKind};
use crate::value::{DataType, Value};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;

pub use crate::read::columns::ColumnRef;

/// Comparison operators of the store's query vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl NativeOp {
    pub fn name(&self) -> &'static str {
        match self {
            NativeOp::Eq => "eq",
            NativeOp::Ne => "ne",
            NativeOp::Lt => "lt",
            NativeOp::Le => "le",
            NativeOp::Gt => "gt",
            NativeOp::Ge => "ge",
        }
    }

    fn test(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            NativeOp::Eq => ordering == Equal,
            NativeOp::Ne => ordering != Equal,
            NativeOp::Lt => ordering == Less,
            NativeOp::Le => ordering != Greater,
            NativeOp::Gt => ordering == Greater,
            NativeOp::Ge => ordering != Less,
        }
    }
}

/// A filter expression in the store's query vocabulary
#[derive(Debug, Clone, PartialEq)]
pub enum NativeExpr {
    Compare {
        op: NativeOp,
        column: ColumnRef,
        value: Value,
    },
    IsDefined(ColumnRef),
    And(Box<NativeExpr>, Box<NativeExpr>),
    Or(Box<NativeExpr>, Box<NativeExpr>),
    Not(Box<NativeExpr>),
    StringFn {
        kind: StringMatchKind,
        column: ColumnRef,
        pattern: String,
    },
    In {
        column: ColumnRef,
        values: Vec<Value>,
    },
}

impl NativeExpr {
    /// Evaluate the way the store does: an undefined column makes
    /// comparisons unknown, and `op.isDefined` is never unknown.
    pub fn evaluate<'a, F>(&self, lookup: &F) -> Option<bool>
    where
        F: Fn(&ColumnRef) -> Option<&'a Value>,
    {
        let defined = |column: &ColumnRef| lookup(column).filter(|v| !v.is_null());
        match self {
            NativeExpr::Compare { op, column, value } => defined(column)?
                .compare(value)
                .map(|ordering| op.test(ordering)),
            NativeExpr::IsDefined(column) => Some(defined(column).is_some()),
            NativeExpr::And(l, r) => and3(l.evaluate(lookup), r.evaluate(lookup)),
            NativeExpr::Or(l, r) => or3(l.evaluate(lookup), r.evaluate(lookup)),
            NativeExpr::Not(inner) => inner.evaluate(lookup).map(|b| !b),
            NativeExpr::StringFn {
                kind,
                column,
                pattern,
            } => defined(column)?.as_str().map(|s| kind.test(s, pattern)),
            NativeExpr::In { column, values } => {
                let actual = defined(column)?;
                Some(values.iter().any(|v| v == actual))
            }
        }
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        other => other.to_string(),
    }
}

impl fmt::Display for NativeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeExpr::Compare { op, column, value } => {
                write!(f, "op.{}({column}, {})", op.name(), literal(value))
            }
            NativeExpr::IsDefined(column) => write!(f, "op.isDefined({column})"),
            NativeExpr::And(l, r) => write!(f, "op.and({l}, {r})"),
            NativeExpr::Or(l, r) => write!(f, "op.or({l}, {r})"),
            NativeExpr::Not(inner) => write!(f, "op.not({inner})"),
            NativeExpr::StringFn {
                kind,
                column,
                pattern,
            } => write!(f, "fn.{}({column}, {})", kind.name(), quote(pattern)),
            NativeExpr::In { column, values } => {
                let items: Vec<String> = values.iter().map(literal).collect();
                write!(f, "op.in({column}, [{}])", items.join(", "))
            }
        }
    }
}

/// Result of translating one predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Translated(NativeExpr),
    Unsupported(UnsupportedPredicate),
}

impl Translation {
    pub fn is_translated(&self) -> bool {
        matches!(self, Translation::Translated(_))
    }

    pub fn native(&self) -> Option<&NativeExpr> {
        match self {
            Translation::Translated(expr) => Some(expr),
            Translation::Unsupported(_) => None,
        }
    }
}

/// Translates host predicates against the output columns of one query
#[derive(Debug)]
pub struct PredicateTranslator {
    columns: QueryColumns,
    /// Unsupported shapes already logged
    logged: Mutex<HashSet<String>>,
}

impl PredicateTranslator {
    pub fn new(columns: QueryColumns) -> Self {
        PredicateTranslator {
            columns,
            logged: Mutex::new(HashSet::new()),
        }
    }

    pub fn columns(&self) -> &QueryColumns {
        &self.columns
    }

    pub fn translate(&self, node: &PredicateNode) -> Translation {
        match self.translate_node(node) {
            Ok(expr) => Translation::Translated(expr),
            Err((failed, reason)) => {
                self.log_once(failed, &reason);
                Translation::Unsupported(reason)
            }
        }
    }

    fn log_once(&self, node: &PredicateNode, reason: &UnsupportedPredicate) {
        let shape = format!("{}: {}", node.shape(), reason_kind(reason));
        if self.logged.lock().insert(shape.clone()) {
            tracing::info!(shape = %shape, reason = %reason, "predicate_not_pushed");
        }
    }

    /// On failure, returns the innermost node that could not be translated
    fn translate_node<'n>(
        &self,
        node: &'n PredicateNode,
    ) -> Result<NativeExpr, (&'n PredicateNode, UnsupportedPredicate)> {
        let leaf = |result: Result<NativeExpr, UnsupportedPredicate>| result.map_err(|e| (node, e));
        match node {
            PredicateNode::And(l, r) => Ok(NativeExpr::And(
                Box::new(self.translate_node(l)?),
                Box::new(self.translate_node(r)?),
            )),
            PredicateNode::Or(l, r) => Ok(NativeExpr::Or(
                Box::new(self.translate_node(l)?),
                Box::new(self.translate_node(r)?),
            )),
            PredicateNode::Not(inner) => Ok(NativeExpr::Not(Box::new(self.translate_node(inner)?))),
            PredicateNode::Comparison {
                column,
                op,
                literal,
            } => leaf(self.comparison(column, *op, literal)),
            PredicateNode::IsNull(column) => leaf(
                self.columns
                    .resolve(column)
                    .map(|(c, _)| NativeExpr::Not(Box::new(NativeExpr::IsDefined(c)))),
            ),
            PredicateNode::IsNotNull(column) => {
                leaf(self.columns.resolve(column).map(|(c, _)| NativeExpr::IsDefined(c)))
            }
            PredicateNode::StringMatch {
                column,
                kind,
                pattern,
            } => leaf(self.string_match(column, *kind, pattern)),
            PredicateNode::In { column, literals } => leaf(self.membership(column, literals)),
        }
    }

    fn comparison(
        &self,
        reference: &str,
        op: ComparisonOp,
        value: &Value,
    ) -> Result<NativeExpr, UnsupportedPredicate> {
        let (column, resolved) = self.columns.resolve(reference)?;
        if value.is_null() {
            return match op {
                ComparisonOp::NullSafeEq => Ok(NativeExpr::Not(Box::new(NativeExpr::IsDefined(column)))),
                _ => Err(UnsupportedPredicate::NullLiteral(reference.to_string())),
            };
        }
        check_comparable(reference, resolved)?;
        check_literal(reference, resolved, value)?;
        let native_op = match op {
            ComparisonOp::Eq | ComparisonOp::NullSafeEq => NativeOp::Eq,
            ComparisonOp::NotEq => NativeOp::Ne,
            ComparisonOp::Lt => NativeOp::Lt,
            ComparisonOp::LtEq => NativeOp::Le,
            ComparisonOp::Gt => NativeOp::Gt,
            ComparisonOp::GtEq => NativeOp::Ge,
        };
        let compare = NativeExpr::Compare {
            op: native_op,
            column: column.clone(),
            value: value.clone(),
        };
        if op == ComparisonOp::NullSafeEq {
            Ok(NativeExpr::And(
                Box::new(NativeExpr::IsDefined(column)),
                Box::new(compare),
            ))
        } else {
            Ok(compare)
        }
    }

    fn string_match(
        &self,
        reference: &str,
        kind: StringMatchKind,
        pattern: &str,
    ) -> Result<NativeExpr, UnsupportedPredicate> {
        let (column, resolved) = self.columns.resolve(reference)?;
        if resolved.data_type != DataType::String {
            return Err(UnsupportedPredicate::NotStringColumn {
                column: reference.to_string(),
                data_type: resolved.data_type.name().to_string(),
            });
        }
        Ok(NativeExpr::StringFn {
            kind,
            column,
            pattern: pattern.to_string(),
        })
    }

    fn membership(&self, reference: &str, literals: &[Value]) -> Result<NativeExpr, UnsupportedPredicate> {
        let (column, resolved) = self.columns.resolve(reference)?;
        if literals.is_empty() {
            return Err(UnsupportedPredicate::EmptyInList(reference.to_string()));
        }
        check_comparable(reference, resolved)?;
        for value in literals {
            if value.is_null() {
                return Err(UnsupportedPredicate::NullLiteral(reference.to_string()));
            }
            check_literal(reference, resolved, value)?;
        }
        Ok(NativeExpr::In {
            column,
            values: literals.to_vec(),
        })
    }
}

/// Binary and struct columns have no native comparison
fn check_comparable(reference: &str, column: &QueryColumn) -> Result<(), UnsupportedPredicate> {
    if column.data_type.is_orderable() {
        Ok(())
    } else {
        Err(UnsupportedPredicate::NotOrderable {
            column: reference.to_string(),
            data_type: column.data_type.name().to_string(),
        })
    }
}

fn check_literal(reference: &str, column: &QueryColumn, value: &Value) -> Result<(), UnsupportedPredicate> {
    if column.data_type.matches(value) {
        Ok(())
    } else {
        Err(UnsupportedPredicate::TypeMismatch {
            column: reference.to_string(),
            expected: column.data_type.name().to_string(),
            got: value.type_name().to_string(),
        })
    }
}

fn reason_kind(reason: &UnsupportedPredicate) -> &'static str {
    match reason {
        UnsupportedPredicate::UnknownColumn(_) => "unknown_column",
        UnsupportedPredicate::AmbiguousColumn { .. } => "ambiguous_column",
        UnsupportedPredicate::TypeMismatch { .. } => "type_mismatch",
        UnsupportedPredicate::NullLiteral(_) => "null_literal",
        UnsupportedPredicate::EmptyInList(_) => "empty_in_list",
        UnsupportedPredicate::NotOrderable { .. } => "not_orderable",
        UnsupportedPredicate::NotStringColumn { .. } => "not_string_column",
    }
}
