//! Host predicate trees
//!
//! The filter shapes the host engine offers for pushdown, plus their
//! evaluation under the host's three-valued logic (`None` = unknown).
//! Scans use [`PredicateNode::evaluate`] to apply residual filters locally.

use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// `<=>`: null-safe equality, never unknown
    NullSafeEq,
}

impl ComparisonOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
            ComparisonOp::NullSafeEq => "<=>",
        }
    }

    /// True for `<`, `<=`, `>`, `>=`
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            ComparisonOp::Lt | ComparisonOp::LtEq | ComparisonOp::Gt | ComparisonOp::GtEq
        )
    }

    /// Apply to an ordering between column value and literal
    pub fn test(&self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Eq | ComparisonOp::NullSafeEq => ordering == Ordering::Equal,
            ComparisonOp::NotEq => ordering != Ordering::Equal,
            ComparisonOp::Lt => ordering == Ordering::Less,
            ComparisonOp::LtEq => ordering != Ordering::Greater,
            ComparisonOp::Gt => ordering == Ordering::Greater,
            ComparisonOp::GtEq => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringMatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

impl StringMatchKind {
    pub fn name(&self) -> &'static str {
        match self {
            StringMatchKind::Contains => "contains",
            StringMatchKind::StartsWith => "startsWith",
            StringMatchKind::EndsWith => "endsWith",
        }
    }

    pub fn test(&self, haystack: &str, pattern: &str) -> bool {
        match self {
            StringMatchKind::Contains => haystack.contains(pattern),
            StringMatchKind::StartsWith => haystack.starts_with(pattern),
            StringMatchKind::EndsWith => haystack.ends_with(pattern),
        }
    }
}

/// A host filter over the output columns of a query.
///
/// Column references are the names the host uses: bare `column`,
/// `view.column` or `schema.view.column`.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateNode {
    Comparison {
        column: String,
        op: ComparisonOp,
        literal: Value,
    },
    And(Box<PredicateNode>, Box<PredicateNode>),
    Or(Box<PredicateNode>, Box<PredicateNode>),
    Not(Box<PredicateNode>),
    IsNull(String),
    IsNotNull(String),
    StringMatch {
        column: String,
        kind: StringMatchKind,
        pattern: String,
    },
    In {
        column: String,
        literals: Vec<Value>,
    },
}

impl PredicateNode {
    pub fn compare(column: impl Into<String>, op: ComparisonOp, literal: impl Into<Value>) -> Self {
        PredicateNode::Comparison {
            column: column.into(),
            op,
            literal: literal.into(),
        }
    }

    pub fn eq(column: impl Into<String>, literal: impl Into<Value>) -> Self {
        Self::compare(column, ComparisonOp::Eq, literal)
    }

    pub fn and(left: PredicateNode, right: PredicateNode) -> Self {
        PredicateNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: PredicateNode, right: PredicateNode) -> Self {
        PredicateNode::Or(Box::new(left), Box::new(right))
    }

    pub fn not(inner: PredicateNode) -> Self {
        PredicateNode::Not(Box::new(inner))
    }

    pub fn string_match(
        column: impl Into<String>,
        kind: StringMatchKind,
        pattern: impl Into<String>,
    ) -> Self {
        PredicateNode::StringMatch {
            column: column.into(),
            kind,
            pattern: pattern.into(),
        }
    }

    pub fn is_in(column: impl Into<String>, literals: Vec<Value>) -> Self {
        PredicateNode::In {
            column: column.into(),
            literals,
        }
    }

    /// Operator name without columns or literals, e.g. `StringMatch(contains)`
    pub fn shape(&self) -> String {
        match self {
            PredicateNode::Comparison { op, .. } => format!("Comparison({})", op.symbol()),
            PredicateNode::And(..) => "And".to_string(),
            PredicateNode::Or(..) => "Or".to_string(),
            PredicateNode::Not(_) => "Not".to_string(),
            PredicateNode::IsNull(_) => "IsNull".to_string(),
            PredicateNode::IsNotNull(_) => "IsNotNull".to_string(),
            PredicateNode::StringMatch { kind, .. } => format!("StringMatch({})", kind.name()),
            PredicateNode::In { .. } => "In".to_string(),
        }
    }

    /// Every column reference in the tree, left to right
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PredicateNode::Comparison { column, .. }
            | PredicateNode::IsNull(column)
            | PredicateNode::IsNotNull(column)
            | PredicateNode::StringMatch { column, .. }
            | PredicateNode::In { column, .. } => out.push(column),
            PredicateNode::And(l, r) | PredicateNode::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            PredicateNode::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Evaluate with SQL semantics; `lookup` returns `None` for unknown columns,
    /// which evaluate like null.
    pub fn evaluate<'a, F>(&self, lookup: &F) -> Option<bool>
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        let value_of = |column: &str| lookup(column).filter(|v| !v.is_null());
        match self {
            PredicateNode::Comparison {
                column,
                op: ComparisonOp::NullSafeEq,
                literal,
            } => match (value_of(column), literal.is_null()) {
                (None, true) => Some(true),
                (None, false) | (Some(_), true) => Some(false),
                (Some(value), false) => Some(value == literal),
            },
            PredicateNode::Comparison {
                column,
                op,
                literal,
            } => {
                let value = value_of(column)?;
                value.compare(literal).map(|ordering| op.test(ordering))
            }
            PredicateNode::And(l, r) => and3(l.evaluate(lookup), r.evaluate(lookup)),
            PredicateNode::Or(l, r) => or3(l.evaluate(lookup), r.evaluate(lookup)),
            PredicateNode::Not(inner) => inner.evaluate(lookup).map(|b| !b),
            PredicateNode::IsNull(column) => Some(value_of(column).is_none()),
            PredicateNode::IsNotNull(column) => Some(value_of(column).is_some()),
            PredicateNode::StringMatch {
                column,
                kind,
                pattern,
            } => value_of(column)?
                .as_str()
                .map(|s| kind.test(s, pattern)),
            PredicateNode::In { column, literals } => {
                let value = value_of(column)?;
                if literals.iter().any(|l| l == value) {
                    Some(true)
                } else if literals.iter().any(Value::is_null) {
                    None
                } else {
                    Some(false)
                }
            }
        }
    }
}

/// Three-valued AND
pub(crate) fn and3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Three-valued OR
pub(crate) fn or3(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

impl fmt::Display for PredicateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateNode::Comparison {
                column,
                op,
                literal,
            } => write!(f, "{column} {} {literal}", op.symbol()),
            PredicateNode::And(l, r) => write!(f, "({l} AND {r})"),
            PredicateNode::Or(l, r) => write!(f, "({l} OR {r})"),
            PredicateNode::Not(inner) => write!(f, "NOT {inner}"),
            PredicateNode::IsNull(column) => write!(f, "{column} IS NULL"),
            PredicateNode::IsNotNull(column) => write!(f, "{column} IS NOT NULL"),
            PredicateNode::StringMatch {
                column,
                kind,
                pattern,
            } => write!(f, "{column} {} '{pattern}'", kind.name()),
            PredicateNode::In { column, literals } => {
                let items: Vec<String> = literals.iter().map(ToString::to_string).collect();
                write!(f, "{column} IN ({})", items.join(", "))
            }
        }
    }
}
