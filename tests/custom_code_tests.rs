//! Custom-code write jobs end to end: invocation modes, variable binding,
//! and the abort policy as seen by the caller.

use docbridge::store::{CodeCall, CodeTarget};
use docbridge::write::{Document, DocumentFormat};
use docbridge::{
    DataType, DocumentWrite, Field, JobSummary, LocalJob, MemoryStore, OptionMap, Row, Schema, ScriptLanguage,
    Value, WriteDefaults, WriteError,
};
use std::collections::BTreeSet;
use std::sync::Arc;

const BOOM: &str = "Error running JavaScript request: Error: Boom!";

fn uri_rows(uris: &[&str]) -> Vec<Row> {
    let schema = Schema::new(vec![Field::new("URI", DataType::String)]).into_shared();
    uris.iter()
        .map(|uri| Row::new(schema.clone(), vec![Value::from(*uri)]).unwrap())
        .collect()
}

fn options(pairs: &[(&str, &str)]) -> OptionMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Script that stores a document per URI and throws on `b`
fn boom_on_b() -> MemoryStore {
    MemoryStore::new().with_code_handler(|call: &CodeCall| {
        let uri = call.variable_str("URI").unwrap_or_default().to_string();
        if uri == "b" {
            return Err(BOOM.to_string());
        }
        Ok(vec![Document {
            uri,
            content: b"{}".to_vec(),
            format: DocumentFormat::Json,
            permissions: BTreeSet::new(),
            collections: BTreeSet::new(),
        }])
    })
}

async fn run(
    store: Arc<MemoryStore>,
    pairs: &[(&str, &str)],
    uris: &[&str],
) -> Result<JobSummary, WriteError> {
    let write =
        DocumentWrite::from_options(store, &options(pairs), &WriteDefaults::default()).unwrap();
    LocalJob::new(write, 1).run(uri_rows(uris)).await
}

#[tokio::test]
async fn test_continue_mode_commits_with_logged_failure() {
    let store = Arc::new(boom_on_b());
    let summary = run(
        store.clone(),
        &[
            ("eval-script-primary", "declareUpdate(); var URI; /* insert */"),
            ("batch-size", "2"),
            ("abort-on-failure", "false"),
        ],
        &["a", "b", "c"],
    )
    .await
    .expect("continue mode commits");

    assert_eq!(store.uris(), vec!["a".to_string(), "c".to_string()]);
    assert_eq!(summary.items_written, 2);
    assert_eq!(summary.items_failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].message, BOOM);
    assert_eq!(summary.failures[0].item.as_deref(), Some("b"));
    assert!(summary.has_failures());
}

#[tokio::test]
async fn test_abort_mode_surfaces_script_error_text() {
    let store = Arc::new(boom_on_b());
    let err = run(
        store.clone(),
        &[
            ("eval-script-primary", "declareUpdate(); var URI;"),
            ("batch-size", "2"),
            ("abort-on-failure", "true"),
        ],
        &["a", "b", "c"],
    )
    .await
    .unwrap_err();

    match &err {
        WriteError::JobAborted {
            aborted_partitions,
            message,
        } => {
            assert_eq!(*aborted_partitions, 1);
            assert!(message.contains(BOOM), "message was: {message}");
        }
        other => panic!("expected JobAborted, got {other}"),
    }
    assert!(err.to_string().contains(BOOM));
    assert!(!store.uris().contains(&"b".to_string()));
}

#[tokio::test]
async fn test_secondary_script_uses_xquery() {
    let store = Arc::new(MemoryStore::new());
    run(
        store.clone(),
        &[("eval-script-secondary", "declare variable $URI external; ()")],
        &["x"],
    )
    .await
    .unwrap();

    let calls = store.code_calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0].target,
        CodeTarget::Script { language: ScriptLanguage::XQuery, body } if body.contains("$URI")
    ));
}

#[tokio::test]
async fn test_module_invocation_binds_custom_variable_name() {
    let store = Arc::new(MemoryStore::new());
    run(
        store.clone(),
        &[
            ("invoke-module-path", "/process.sjs"),
            ("external-variable-name", "DOC_ID"),
            ("variable-prefix.collection", "imported"),
        ],
        &["one", "two"],
    )
    .await
    .unwrap();

    let calls = store.code_calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.target, CodeTarget::Module("/process.sjs".to_string()));
        assert_eq!(call.variable_str("collection"), Some("imported"));
    }
    let mut ids: Vec<_> = calls.iter().filter_map(|c| c.variable_str("DOC_ID")).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["one", "two"]);
}

#[tokio::test]
async fn test_per_batch_mode_joins_values() {
    let store = Arc::new(MemoryStore::new());
    run(
        store.clone(),
        &[
            ("eval-script-primary", "var URI; URI.split(',')"),
            ("batch-size", "2"),
            ("invoke-per-batch", "true"),
            ("thread-count", "1"),
            ("variable-prefix.mode", "bulk"),
        ],
        &["a", "b", "c"],
    )
    .await
    .unwrap();

    let calls = store.code_calls();
    let joined: Vec<_> = calls.iter().filter_map(|c| c.variable_str("URI")).collect();
    assert_eq!(joined, vec!["a,b", "c"]);
    assert!(calls.iter().all(|c| c.variable_str("mode") == Some("bulk")));
}

#[tokio::test]
async fn test_multi_column_rows_bind_row_object() {
    let schema = Schema::new(vec![
        Field::new("id", DataType::Integer),
        Field::new("name", DataType::String),
    ])
    .into_shared();
    let rows = vec![Row::new(schema, vec![Value::Integer(7), Value::from("seven")]).unwrap()];

    let store = Arc::new(MemoryStore::new());
    let write = DocumentWrite::from_options(
        store.clone(),
        &options(&[("invoke-module-path", "/m.sjs")]),
        &WriteDefaults::default(),
    )
    .unwrap();
    LocalJob::new(write, 1).run(rows).await.unwrap();

    let calls = store.code_calls();
    let call = &calls[0];
    assert_eq!(
        call.variable("URI"),
        Some(&serde_json::json!({"id": 7, "name": "seven"}))
    );
    assert_eq!(call.variable("id"), Some(&serde_json::json!(7)));
}

#[test]
fn test_conflicting_custom_code_options_fail_setup() {
    let result = DocumentWrite::from_options(
        Arc::new(MemoryStore::new()),
        &options(&[
            ("eval-script-primary", "1"),
            ("eval-script-secondary", "2"),
        ]),
        &WriteDefaults::default(),
    );
    let err = result.err().expect("setup must fail");
    assert!(err.to_string().contains("eval-script-primary"));
}
