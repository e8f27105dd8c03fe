//! CSV Row Loading
//!
//! Feeds the CLI and local jobs with rows from delimited text files.
//!
//! ## Format
//!
//! - First row is header with column names
//! - Column types are inferred over the whole file:
//!   - Integers: every non-empty field parses as i64
//!   - Booleans: every non-empty field is "true"/"false" (case-insensitive)
//!   - Strings: anything else
//! - Empty fields are null; every inferred column is nullable
//!
//! ## Example
//!
//! ```csv
//! URI,CitationID,LastName
//! /author/1.json,1,Smith
//! /author/2.json,,"O""Brien"
//! ```

use std::fs;
use std::path::Path;

use crate::value::{DataType, Field, Row, RowError, Schema, Value};

#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Line {line}: {source}")]
    Row { line: usize, source: RowError },
}

/// Options for CSV parsing
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Field delimiter (default: ',')
    pub delimiter: char,
    /// Quote character (default: '"')
    pub quote_char: char,
    /// Infer integer and boolean columns; otherwise every column is a string
    pub infer_types: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: ',',
            quote_char: '"',
            infer_types: true,
        }
    }
}

/// Load rows from a CSV file
pub fn load_rows<P: AsRef<Path>>(path: P, options: &CsvOptions) -> Result<Vec<Row>, CsvError> {
    let text = fs::read_to_string(path)?;
    parse_rows(&text, options)
}

/// Parse CSV text into rows sharing one inferred schema
pub fn parse_rows(text: &str, options: &CsvOptions) -> Result<Vec<Row>, CsvError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let names = parse_line(header, options);

    let mut records = Vec::new();
    for (index, line) in lines {
        let fields = parse_line(line, options);
        if fields.len() != names.len() {
            return Err(CsvError::Parse {
                line: index + 1,
                message: format!("{} fields, expected {}", fields.len(), names.len()),
            });
        }
        records.push((index + 1, fields));
    }

    let schema = Schema::new(
        names
            .iter()
            .enumerate()
            .map(|(column, name)| {
                let data_type = if options.infer_types {
                    infer_type(records.iter().map(|(_, fields)| fields[column].as_str()))
                } else {
                    DataType::String
                };
                Field::nullable(name.clone(), data_type)
            })
            .collect(),
    )
    .into_shared();

    records
        .into_iter()
        .map(|(line, fields)| {
            let values = fields
                .iter()
                .zip(schema.fields())
                .map(|(text, field)| parse_value(text, &field.data_type))
                .collect();
            Row::new(schema.clone(), values).map_err(|source| CsvError::Row { line, source })
        })
        .collect()
}

fn infer_type<'a>(fields: impl Iterator<Item = &'a str>) -> DataType {
    let fields: Vec<&str> = fields.filter(|f| !f.is_empty()).collect();
    if fields.is_empty() {
        DataType::String
    } else if fields.iter().all(|f| f.parse::<i64>().is_ok()) {
        DataType::Integer
    } else if fields
        .iter()
        .all(|f| f.eq_ignore_ascii_case("true") || f.eq_ignore_ascii_case("false"))
    {
        DataType::Boolean
    } else {
        DataType::String
    }
}

fn parse_value(text: &str, data_type: &DataType) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    match data_type {
        DataType::Integer => text.parse().map_or_else(|_| Value::from(text), Value::Integer),
        DataType::Boolean => Value::Boolean(text.eq_ignore_ascii_case("true")),
        _ => Value::from(text),
    }
}

/// Split one line into unquoted, trimmed fields
fn parse_line(line: &str, options: &CsvOptions) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == options.quote_char {
            if in_quotes && chars.peek() == Some(&options.quote_char) {
                current.push(c);
                chars.next();
            } else {
                in_quotes = !in_quotes;
            }
        } else if c == options.delimiter && !in_quotes {
            fields.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    fields.push(current.trim().to_string());
    fields
}
