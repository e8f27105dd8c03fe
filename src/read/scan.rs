//! Scans with filter pushdown
//!
//! The host offers its filters once per scan through
//! [`ScanBuilder::push_filters`]. Filters that translate are merged into the
//! base query; the rest come back as residual and [`Scan::execute`] applies
//! them to the returned rows, so no row is ever dropped by a filter the
//! store did not evaluate.
//!
//! Residual column references are bound to output positions when the scan
//! is built. A reference that names no column, or more than one, fails the
//! scan instead of evaluating as null.

use crate::error::ReadError;
use crate::options::ReadOptions;
use crate::read::columns::QueryColumns;
use crate::read::predicate::PredicateNode;
use crate::read::translate::{NativeExpr, PredicateTranslator, Translation};
use crate::store::{DocumentStore, QueryRequest};
use crate::value::Row;
use std::collections::HashMap;

/// Outcome of offering filters to the scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushdownResult {
    /// Filters the store evaluates
    pub pushed: Vec<PredicateNode>,
    /// Filters the caller must still evaluate
    pub residual: Vec<PredicateNode>,
}

#[derive(Debug)]
pub struct ScanBuilder {
    options: ReadOptions,
    translator: PredicateTranslator,
    pushed: Vec<(PredicateNode, NativeExpr)>,
    residual: Vec<PredicateNode>,
}

impl ScanBuilder {
    pub fn new(options: ReadOptions, columns: QueryColumns) -> Self {
        ScanBuilder {
            options,
            translator: PredicateTranslator::new(columns),
            pushed: Vec::new(),
            residual: Vec::new(),
        }
    }

    /// Offer the host's conjunctive filters. Replaces any earlier offer.
    pub fn push_filters(&mut self, filters: Vec<PredicateNode>) -> PushdownResult {
        self.pushed.clear();
        self.residual.clear();

        for filter in filters {
            if !self.options.push_down_filters {
                self.residual.push(filter);
                continue;
            }
            match self.translator.translate(&filter) {
                Translation::Translated(expr) => self.pushed.push((filter, expr)),
                Translation::Unsupported(_) => self.residual.push(filter),
            }
        }

        tracing::debug!(
            pushed = self.pushed.len(),
            residual = self.residual.len(),
            "filters_pushed"
        );

        PushdownResult {
            pushed: self.pushed.iter().map(|(node, _)| node.clone()).collect(),
            residual: self.residual.clone(),
        }
    }

    pub fn pushed_filters(&self) -> Vec<&PredicateNode> {
        self.pushed.iter().map(|(node, _)| node).collect()
    }

    pub fn build(self) -> Scan {
        let bindings = bind_residual(self.translator.columns(), &self.residual);
        let request = QueryRequest {
            base_query: self.options.optic_query,
            filters: self.pushed.into_iter().map(|(_, expr)| expr).collect(),
        };
        Scan {
            request,
            residual: self.residual,
            bindings,
        }
    }
}

/// Output position of every column reference in the residual filters
fn bind_residual(
    columns: &QueryColumns,
    residual: &[PredicateNode],
) -> Result<HashMap<String, usize>, ReadError> {
    let mut bindings: HashMap<String, usize> = HashMap::new();
    for filter in residual {
        for reference in filter.columns() {
            if bindings.contains_key(reference) {
                continue;
            }
            let (_, position) = columns.resolve_position(reference).map_err(|reason| {
                ReadError::UnresolvedColumn {
                    filter: filter.to_string(),
                    reason,
                }
            })?;
            bindings.insert(reference.to_string(), position);
        }
    }
    Ok(bindings)
}

/// A planned scan: the query sent to the store plus local residual filters.
///
/// Returned rows are laid out in output-column order.
#[derive(Debug, Clone)]
pub struct Scan {
    request: QueryRequest,
    residual: Vec<PredicateNode>,
    bindings: Result<HashMap<String, usize>, ReadError>,
}

impl Scan {
    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    /// Query text with pushed filters chained as `.where(...)`
    pub fn query_text(&self) -> String {
        self.request.text()
    }

    pub fn residual(&self) -> &[PredicateNode] {
        &self.residual
    }

    /// Run the query and apply residual filters to the result
    pub async fn execute<S: DocumentStore>(&self, store: &S) -> Result<Vec<Row>, ReadError> {
        let bindings = self.bindings.as_ref().map_err(Clone::clone)?;
        let rows = store.query(self.request.clone()).await?;
        let fetched = rows.len();
        let rows: Vec<Row> = rows
            .into_iter()
            .filter(|row| self.matches_residual(bindings, row))
            .collect();
        tracing::debug!(fetched, returned = rows.len(), "scan_complete");
        Ok(rows)
    }

    fn matches_residual(&self, bindings: &HashMap<String, usize>, row: &Row) -> bool {
        let lookup = |reference: &str| {
            bindings.get(reference).and_then(|&position| row.value(position))
        };
        self.residual
            .iter()
            .all(|filter| filter.evaluate(&lookup) == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataType, Field, Schema};

    fn builder(push_down: bool) -> ScanBuilder {
        let schema = Schema::new(vec![
            Field::new("CitationID", DataType::Integer),
            Field::new("Photo", DataType::Binary),
        ]);
        ScanBuilder::new(
            ReadOptions {
                optic_query: "op.fromView('Medical', 'Authors')".to_string(),
                push_down_filters: push_down,
            },
            QueryColumns::from_view("Medical", "Authors", None, &schema),
        )
    }

    #[test]
    fn test_push_filters_splits_pushed_and_residual() {
        let mut b = builder(true);
        let pushable = PredicateNode::eq("CitationID", 1);
        let residual = PredicateNode::eq("Photo", vec![1u8]);
        let result = b.push_filters(vec![pushable.clone(), residual.clone()]);
        assert_eq!(result.pushed, vec![pushable]);
        assert_eq!(result.residual, vec![residual]);

        let scan = b.build();
        assert_eq!(
            scan.query_text(),
            "op.fromView('Medical', 'Authors').where(op.eq(op.col('CitationID'), 1))"
        );
        assert_eq!(scan.residual().len(), 1);
    }

    #[test]
    fn test_pushdown_disabled_keeps_everything_residual() {
        let mut b = builder(false);
        let result = b.push_filters(vec![PredicateNode::eq("CitationID", 1)]);
        assert!(result.pushed.is_empty());
        assert_eq!(result.residual.len(), 1);
        assert_eq!(b.build().query_text(), "op.fromView('Medical', 'Authors')");
    }

    #[test]
    fn test_push_filters_replaces_previous_offer() {
        let mut b = builder(true);
        b.push_filters(vec![PredicateNode::eq("CitationID", 1)]);
        b.push_filters(vec![PredicateNode::eq("CitationID", 2)]);
        assert_eq!(b.pushed_filters(), vec![&PredicateNode::eq("CitationID", 2)]);
    }

    #[test]
    fn test_residual_columns_bound_at_build() {
        let mut b = builder(false);
        b.push_filters(vec![
            PredicateNode::eq("Photo", vec![1u8]),
            PredicateNode::eq("Authors.CitationID", 3),
        ]);
        let scan = b.build();
        let bindings = scan.bindings.as_ref().unwrap();
        assert_eq!(bindings.get("Photo"), Some(&1));
        assert_eq!(bindings.get("Authors.CitationID"), Some(&0));
    }

    #[test]
    fn test_unresolvable_residual_fails_scan() {
        let mut b = builder(true);
        b.push_filters(vec![PredicateNode::IsNull("Missing".to_string())]);
        let scan = b.build();
        assert!(matches!(
            &scan.bindings,
            Err(ReadError::UnresolvedColumn {
                reason: crate::error::UnsupportedPredicate::UnknownColumn(_),
                ..
            })
        ));
    }
}
