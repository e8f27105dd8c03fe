//! Output columns of the active query and column-reference resolution.
//!
//! A host filter may name a column three ways:
//! - bare: `CitationID`
//! - view or alias qualified: `Authors.CitationID`, `myView.CitationID`
//! - fully qualified: `Medical.Authors.CitationID`
//!
//! Qualification only narrows the candidate set. A reference that matches
//! more than one output column is ambiguous and is never guessed.

use crate::error::UnsupportedPredicate;
use crate::value::{DataType, Schema};
use std::fmt;

/// Column reference in the store's query vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub schema: Option<String>,
    pub view: Option<String>,
    pub name: String,
}

impl ColumnRef {
    /// `op.col('name')`
    pub fn bare(name: impl Into<String>) -> Self {
        ColumnRef {
            schema: None,
            view: None,
            name: name.into(),
        }
    }

    /// `op.viewCol('view', 'name')`
    pub fn in_view(view: impl Into<String>, name: impl Into<String>) -> Self {
        ColumnRef {
            schema: None,
            view: Some(view.into()),
            name: name.into(),
        }
    }

    /// `op.schemaCol('schema', 'view', 'name')`
    pub fn qualified(
        schema: impl Into<String>,
        view: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        ColumnRef {
            schema: Some(schema.into()),
            view: Some(view.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.schema, &self.view) {
            (Some(schema), Some(view)) => write!(
                f,
                "op.schemaCol({}, {}, {})",
                quote(schema),
                quote(view),
                quote(&self.name)
            ),
            (_, Some(view)) => write!(f, "op.viewCol({}, {})", quote(view), quote(&self.name)),
            _ => write!(f, "op.col({})", quote(&self.name)),
        }
    }
}

/// Single-quoted string literal with `\` and `'` escaped
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// One output column of the query, with the view it comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryColumn {
    pub schema: Option<String>,
    pub view: Option<String>,
    /// Alias given to the view in the query, if any
    pub alias: Option<String>,
    pub name: String,
    pub data_type: DataType,
}

impl QueryColumn {
    fn matches_view(&self, qualifier: &str) -> bool {
        self.alias.as_deref() == Some(qualifier) || self.view.as_deref() == Some(qualifier)
    }
}

/// The output columns of the active query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryColumns {
    columns: Vec<QueryColumn>,
}

impl QueryColumns {
    pub fn new(columns: Vec<QueryColumn>) -> Self {
        QueryColumns { columns }
    }

    /// All columns of one view, as produced by `op.fromView(schema, view, alias)`
    pub fn from_view(schema: &str, view: &str, alias: Option<&str>, fields: &Schema) -> Self {
        let columns = fields
            .fields()
            .iter()
            .map(|field| QueryColumn {
                schema: Some(schema.to_string()),
                view: Some(view.to_string()),
                alias: alias.map(str::to_string),
                name: field.name.clone(),
                data_type: field.data_type.clone(),
            })
            .collect();
        QueryColumns { columns }
    }

    /// Append the columns of another query (a join)
    pub fn join(mut self, other: QueryColumns) -> Self {
        self.columns.extend(other.columns);
        self
    }

    pub fn columns(&self) -> &[QueryColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Resolve a host column reference to exactly one output column.
    ///
    /// The returned [`ColumnRef`] keeps the qualification the host used.
    pub fn resolve(&self, reference: &str) -> Result<(ColumnRef, &QueryColumn), UnsupportedPredicate> {
        let (column_ref, position) = self.resolve_position(reference)?;
        self.columns
            .get(position)
            .map(|column| (column_ref, column))
            .ok_or_else(|| UnsupportedPredicate::UnknownColumn(reference.to_string()))
    }

    /// Like [`QueryColumns::resolve`], returning the column's position in the
    /// query output instead of the column itself.
    pub fn resolve_position(&self, reference: &str) -> Result<(ColumnRef, usize), UnsupportedPredicate> {
        let unknown = || UnsupportedPredicate::UnknownColumn(reference.to_string());
        let parts = split_reference(reference);
        let (mut column_ref, mut candidates) = self.candidates(&parts).ok_or_else(unknown)?;

        // `Medical.Authors.CitationID` inside a single pair of backquotes
        if candidates.is_empty() {
            if let [whole] = parts.as_slice() {
                if whole.contains('.') {
                    let split: Vec<&str> = whole.split('.').collect();
                    if let Some(found) = self.candidates(&split) {
                        (column_ref, candidates) = found;
                    }
                }
            }
        }

        match candidates.as_slice() {
            [] => Err(unknown()),
            [position] => Ok((column_ref, *position)),
            many => Err(UnsupportedPredicate::AmbiguousColumn {
                column: reference.to_string(),
                candidates: many.len(),
            }),
        }
    }

    /// Positions of the columns a split reference can name; `None` when the
    /// reference has more parts than schema, view and column
    fn candidates(&self, parts: &[&str]) -> Option<(ColumnRef, Vec<usize>)> {
        match parts {
            [name] => Some((ColumnRef::bare(*name), self.positions(|c| c.name == *name))),
            [view, name] => Some((
                ColumnRef::in_view(*view, *name),
                self.positions(|c| c.name == *name && c.matches_view(view)),
            )),
            [schema, view, name] => Some((
                ColumnRef::qualified(*schema, *view, *name),
                self.positions(|c| {
                    c.name == *name
                        && c.schema.as_deref() == Some(*schema)
                        && c.view.as_deref() == Some(*view)
                }),
            )),
            _ => None,
        }
    }

    fn positions(&self, keep: impl Fn(&QueryColumn) -> bool) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, column)| keep(column))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Split on dots outside backquotes, then strip wrapping quotes per part
fn split_reference(reference: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in reference.char_indices() {
        match c {
            '`' => quoted = !quoted,
            '.' if !quoted => {
                parts.push(strip_quotes(&reference[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(strip_quotes(&reference[start..]));
    parts
}

fn strip_quotes(part: &str) -> &str {
    let trimmed = part.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && matches!((bytes[0], bytes[bytes.len() - 1]), (b'`', b'`') | (b'"', b'"'))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}
