//! Row conversion
//!
//! Turns one input row into the item the invocation strategy sends to the
//! store: a [`Document`] in document mode, or a [`CodeInvocation`] in
//! custom-code mode.
//!
//! ## Variable precedence (custom-code mode)
//!
//! Bindings are layered, later layers replacing earlier ones on a name
//! collision:
//! 1. literal variables from `variable-prefix.*` options
//! 2. one variable per row column
//! 3. the external variable (default `URI`) bound to the row's primary value
//!
//! Row-derived bindings therefore always win over user literals.

use crate::error::ConversionError;
use crate::options::{UriSource, WriteOptions};
use crate::value::{DataType, Row, Value};
use crate::write::item::{CodeInvocation, ConvertedItem, Document, DocumentFormat};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("valid placeholder regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Column(String),
}

/// A URI template such as `/authors/{CitationID}/{LastName}.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut last = 0;
        for captures in placeholder_regex().captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let column = name.as_str().trim();
            if column.is_empty() {
                return Err("empty placeholder '{}'".to_string());
            }
            push_literal(&mut segments, &template[last..whole.start()])?;
            segments.push(Segment::Column(column.to_string()));
            last = whole.end();
        }
        push_literal(&mut segments, &template[last..])?;
        if !segments.iter().any(|s| matches!(s, Segment::Column(_))) {
            return Err("template must reference at least one column".to_string());
        }
        Ok(UriTemplate { segments })
    }

    /// Column names referenced by the template, in order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Column(c) => Some(c.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, row: &Row) -> Result<String, ConversionError> {
        let mut uri = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => uri.push_str(text),
                Segment::Column(column) => {
                    let value = row.get(column).ok_or_else(|| ConversionError::MissingColumn {
                        column: column.clone(),
                    })?;
                    let text = value
                        .to_text()
                        .ok_or_else(|| ConversionError::NullTemplateValue {
                            column: column.clone(),
                        })?;
                    uri.push_str(&text);
                }
            }
        }
        Ok(uri)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), String> {
    if text.contains('{') || text.contains('}') {
        return Err(format!("unbalanced brace in '{text}'"));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

/// Converts rows according to the job's output mode
#[derive(Debug, Clone)]
pub struct RowConverter {
    options: Arc<WriteOptions>,
}

impl RowConverter {
    pub fn new(options: Arc<WriteOptions>) -> Self {
        RowConverter { options }
    }

    pub fn convert(&self, row: &Row) -> Result<ConvertedItem, ConversionError> {
        if self.options.is_custom_code() {
            Ok(ConvertedItem::Invocation(self.to_invocation(row)))
        } else {
            self.to_document(row).map(ConvertedItem::Document)
        }
    }

    fn to_invocation(&self, row: &Row) -> CodeInvocation {
        let mut variables: BTreeMap<String, serde_json::Value> = self
            .options
            .user_variables
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
            .collect();

        for (name, value) in row.columns() {
            variables.insert(name.to_string(), value.to_json());
        }

        let primary = primary_value(row);
        variables.insert(self.options.external_variable_name.clone(), primary.clone());

        CodeInvocation { variables, primary }
    }

    fn to_document(&self, row: &Row) -> Result<Document, ConversionError> {
        let options = &self.options;
        let (content, format) = match &options.content_column {
            Some(column) => {
                let content = content_bytes(row, column)?;
                validate_content(&content, options.format)?;
                (content, options.format)
            }
            None => {
                let json = serde_json::Value::Object(row.to_json_object());
                (json.to_string().into_bytes(), DocumentFormat::Json)
            }
        };

        let (base, default_suffix) = match &options.uri {
            UriSource::Column(column) => {
                let value = row.get(column).ok_or_else(|| ConversionError::MissingColumn {
                    column: column.clone(),
                })?;
                let uri = value.to_text().ok_or_else(|| ConversionError::NullUri {
                    column: column.clone(),
                })?;
                (uri, "")
            }
            UriSource::Template(template) => (template.render(row)?, ""),
            UriSource::Generated => (uuid::Uuid::new_v4().to_string(), format.extension()),
        };

        let uri = format!(
            "{}{}{}",
            options.uri_prefix.as_deref().unwrap_or(""),
            base,
            options.uri_suffix.as_deref().unwrap_or(default_suffix)
        );
        if uri.trim().is_empty() {
            return Err(ConversionError::EmptyUri);
        }

        Ok(Document {
            uri,
            content,
            format,
            permissions: options.permissions.clone(),
            collections: options.collections.clone(),
        })
    }
}

/// Single-column rows bind the column's text; wider rows bind the row object
fn primary_value(row: &Row) -> serde_json::Value {
    match row.values() {
        [single] => single
            .to_text()
            .map_or(serde_json::Value::Null, serde_json::Value::String),
        _ => serde_json::Value::Object(row.to_json_object()),
    }
}

fn content_bytes(row: &Row, column: &str) -> Result<Vec<u8>, ConversionError> {
    let field = row
        .schema()
        .field(column)
        .ok_or_else(|| ConversionError::MissingColumn {
            column: column.to_string(),
        })?;
    if !matches!(field.data_type, DataType::String | DataType::Binary) {
        return Err(ConversionError::UnsupportedContentType {
            column: column.to_string(),
            data_type: field.data_type.name().to_string(),
        });
    }
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone().into_bytes()),
        Some(Value::Binary(bytes)) => Ok(bytes.clone()),
        _ => Err(ConversionError::NullContent {
            column: column.to_string(),
        }),
    }
}

fn validate_content(content: &[u8], format: DocumentFormat) -> Result<(), ConversionError> {
    let invalid = |reason: String| ConversionError::InvalidContent {
        format: format.to_string(),
        reason,
    };
    match format {
        DocumentFormat::Json => serde_json::from_slice::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
        DocumentFormat::Xml => check_well_formed_xml(content).map_err(invalid),
        DocumentFormat::Text => std::str::from_utf8(content)
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
        DocumentFormat::Binary => Ok(()),
    }
}

fn check_well_formed_xml(content: &[u8]) -> Result<(), String> {
    let mut reader = Reader::from_reader(content);
    let mut buf = Vec::new();
    let mut open: Vec<Vec<u8>> = Vec::new();
    let mut roots = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                if open.is_empty() {
                    roots += 1;
                }
                open.push(start.name().as_ref().to_vec());
            }
            Ok(Event::End(end)) => match open.pop() {
                Some(name) if name == end.name().as_ref() => {}
                _ => return Err("mismatched end tag".to_string()),
            },
            Ok(Event::Empty(_)) => {
                if open.is_empty() {
                    roots += 1;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
        buf.clear();
    }
    match (open.is_empty(), roots) {
        (true, 1) => Ok(()),
        (true, 0) => Err("no root element".to_string()),
        (true, _) => Err("multiple root elements".to_string()),
        (false, _) => Err("unclosed element".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteDefaults;
    use crate::options::{self, OptionMap};
    use crate::value::{Field, Schema};

    fn converter(pairs: &[(&str, &str)]) -> RowConverter {
        let map: OptionMap = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let parsed = WriteOptions::parse(&map, &WriteDefaults::default()).unwrap();
        RowConverter::new(Arc::new(parsed))
    }

    fn uri_row(uri: &str) -> Row {
        let schema = Schema::new(vec![Field::new("URI", DataType::String)]).into_shared();
        Row::new(schema, vec![Value::from(uri)]).unwrap()
    }

    fn author_row() -> Row {
        let schema = Schema::new(vec![
            Field::new("CitationID", DataType::Integer),
            Field::new("LastName", DataType::String),
        ])
        .into_shared();
        Row::new(schema, vec![Value::Integer(1), Value::from("Awton")]).unwrap()
    }

    #[test]
    fn test_single_column_binds_external_variable() {
        let conv = converter(&[(options::EVAL_SCRIPT_PRIMARY, "var URI;")]);
        let ConvertedItem::Invocation(inv) = conv.convert(&uri_row("/process-test1")).unwrap()
        else {
            panic!("expected invocation");
        };
        assert_eq!(inv.variables["URI"], serde_json::json!("/process-test1"));
        assert_eq!(inv.primary, serde_json::json!("/process-test1"));
    }

    #[test]
    fn test_custom_external_variable_name() {
        let conv = converter(&[
            (options::EVAL_SCRIPT_PRIMARY, "var MY_VAR;"),
            (options::EXTERNAL_VARIABLE_NAME, "MY_VAR"),
        ]);
        let ConvertedItem::Invocation(inv) = conv.convert(&uri_row("/a")).unwrap() else {
            panic!("expected invocation");
        };
        assert_eq!(inv.variables["MY_VAR"], serde_json::json!("/a"));
        assert_eq!(inv.variables["URI"], serde_json::json!("/a"));
    }

    #[test]
    fn test_multi_column_row_binds_object() {
        let conv = converter(&[
            (options::INVOKE_MODULE_PATH, "/processObject.sjs"),
            (options::EXTERNAL_VARIABLE_NAME, "author"),
        ]);
        let ConvertedItem::Invocation(inv) = conv.convert(&author_row()).unwrap() else {
            panic!("expected invocation");
        };
        assert_eq!(
            inv.variables["author"],
            serde_json::json!({"CitationID": 1, "LastName": "Awton"})
        );
        assert_eq!(inv.variables["CitationID"], serde_json::json!(1));
    }

    #[test]
    fn test_row_variables_win_over_user_literals() {
        let conv = converter(&[
            (options::INVOKE_MODULE_PATH, "/processObject.sjs"),
            (options::EXTERNAL_VARIABLE_NAME, "author"),
            ("variable-prefix.LastName", "literal"),
            ("variable-prefix.keyName", "hello"),
        ]);
        let ConvertedItem::Invocation(inv) = conv.convert(&author_row()).unwrap() else {
            panic!("expected invocation");
        };
        assert_eq!(inv.variables["LastName"], serde_json::json!("Awton"));
        assert_eq!(inv.variables["keyName"], serde_json::json!("hello"));
    }

    #[test]
    fn test_external_variable_wins_over_user_literal() {
        let conv = converter(&[
            (options::EVAL_SCRIPT_PRIMARY, "var URI;"),
            ("variable-prefix.URI", "literal"),
        ]);
        let ConvertedItem::Invocation(inv) = conv.convert(&uri_row("/row")).unwrap() else {
            panic!("expected invocation");
        };
        assert_eq!(inv.variables["URI"], serde_json::json!("/row"));
    }

    #[test]
    fn test_document_from_uri_column() {
        let conv = converter(&[
            (options::URI_COLUMN, "URI"),
            (options::COLLECTIONS, "imported"),
        ]);
        let ConvertedItem::Document(doc) = conv.convert(&uri_row("/a.json")).unwrap() else {
            panic!("expected document");
        };
        assert_eq!(doc.uri, "/a.json");
        assert_eq!(doc.format, DocumentFormat::Json);
        assert!(doc.collections.contains("imported"));
        let body: serde_json::Value = serde_json::from_slice(&doc.content).unwrap();
        assert_eq!(body, serde_json::json!({"URI": "/a.json"}));
    }

    #[test]
    fn test_missing_uri_column_is_conversion_error() {
        let conv = converter(&[(options::URI_COLUMN, "id")]);
        let err = conv.convert(&uri_row("/a")).unwrap_err();
        assert_eq!(
            err,
            ConversionError::MissingColumn {
                column: "id".to_string()
            }
        );
    }

    #[test]
    fn test_uri_template() {
        let conv = converter(&[
            (options::URI_TEMPLATE, "/author/{CitationID}/{LastName}"),
            (options::URI_SUFFIX, ".json"),
        ]);
        let ConvertedItem::Document(doc) = conv.convert(&author_row()).unwrap() else {
            panic!("expected document");
        };
        assert_eq!(doc.uri, "/author/1/Awton.json");
    }

    #[test]
    fn test_uri_template_validation() {
        assert!(UriTemplate::parse("/static.json").is_err());
        assert!(UriTemplate::parse("/{}.json").is_err());
        assert!(UriTemplate::parse("/{id.json").is_err());
        let t = UriTemplate::parse("/{a}/{b}").unwrap();
        assert_eq!(t.columns().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_generated_uri_gets_prefix_and_extension() {
        let conv = converter(&[(options::URI_PREFIX, "/imported/")]);
        let ConvertedItem::Document(doc) = conv.convert(&author_row()).unwrap() else {
            panic!("expected document");
        };
        assert!(doc.uri.starts_with("/imported/"));
        assert!(doc.uri.ends_with(".json"));
    }

    fn content_row(content: &str) -> Row {
        let schema = Schema::new(vec![
            Field::new("URI", DataType::String),
            Field::new("content", DataType::String),
        ])
        .into_shared();
        Row::new(schema, vec![Value::from("/d"), Value::from(content)]).unwrap()
    }

    #[test]
    fn test_xml_content_validation() {
        let conv = converter(&[
            (options::URI_COLUMN, "URI"),
            (options::CONTENT_COLUMN, "content"),
            (options::DOCUMENT_FORMAT, "xml"),
        ]);
        assert!(conv.convert(&content_row("<hello>world</hello>")).is_ok());
        assert!(matches!(
            conv.convert(&content_row("<hello>world</goodbye>")),
            Err(ConversionError::InvalidContent { .. })
        ));
        assert!(matches!(
            conv.convert(&content_row("<hello>world")),
            Err(ConversionError::InvalidContent { .. })
        ));
        assert!(matches!(
            conv.convert(&content_row("just text")),
            Err(ConversionError::InvalidContent { .. })
        ));
    }

    #[test]
    fn test_json_content_validation() {
        let conv = converter(&[
            (options::URI_COLUMN, "URI"),
            (options::CONTENT_COLUMN, "content"),
        ]);
        assert!(conv.convert(&content_row(r#"{"hello":"world"}"#)).is_ok());
        assert!(matches!(
            conv.convert(&content_row("{not json")),
            Err(ConversionError::InvalidContent { .. })
        ));
    }

    #[test]
    fn test_content_column_type_checked() {
        let conv = converter(&[(options::CONTENT_COLUMN, "CitationID")]);
        assert!(matches!(
            conv.convert(&author_row()),
            Err(ConversionError::UnsupportedContentType { .. })
        ));
    }
}
