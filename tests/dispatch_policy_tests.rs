//! Abort and continue policies across dispatcher, partition writers and the
//! job coordinator.

use docbridge::store::{CodeCall, ScriptLanguage, Variables};
use docbridge::write::{
    BatchAccumulator, BatchDispatcher, CodeBinding, CodeInvocation, ConvertedItem, DispatchPhase,
    InvocationStrategy, SealedBatch, Submission, WriteJobState,
};
use docbridge::{
    DataType, DocumentWrite, Field, LocalJob, MemoryStore, OptionMap, PartitionMessage, Row,
    Schema, Value, WriteDefaults, WriteError,
};
use std::sync::Arc;
use std::time::Duration;

fn options(pairs: &[(&str, &str)]) -> OptionMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn uri_rows(uris: impl IntoIterator<Item = String>) -> Vec<Row> {
    let schema = Schema::new(vec![Field::new("URI", DataType::String)]).into_shared();
    uris.into_iter()
        .map(|uri| Row::new(schema.clone(), vec![Value::from(uri)]).unwrap())
        .collect()
}

fn script() -> Arc<InvocationStrategy> {
    Arc::new(InvocationStrategy::EvalScript {
        language: ScriptLanguage::JavaScript,
        body: "var URI;".to_string(),
        binding: CodeBinding {
            external_variable_name: "URI".to_string(),
            user_variables: Variables::new(),
            per_batch: false,
        },
    })
}

fn single_item_batches(count: usize) -> Vec<SealedBatch> {
    let mut acc = BatchAccumulator::new(0, 1);
    (0..count)
        .filter_map(|i| {
            let uri = format!("/doc/{i}");
            acc.push(ConvertedItem::Invocation(CodeInvocation {
                variables: [("URI".to_string(), serde_json::json!(uri))].into_iter().collect(),
                primary: serde_json::json!(uri),
            }))
        })
        .collect()
}

fn fail_uris(uris: &'static [&'static str]) -> MemoryStore {
    MemoryStore::new().with_code_handler(move |call: &CodeCall| match call.variable_str("URI") {
        Some(uri) if uris.iter().any(|u| *u == uri) => Err(format!("Error: rejected {uri}")),
        _ => Ok(Vec::new()),
    })
}

#[tokio::test]
async fn test_no_submission_after_failure_is_observed() {
    let store = Arc::new(fail_uris(&["/doc/0"]).with_latency(Duration::from_millis(5)));
    let mut dispatcher = BatchDispatcher::new(store.clone(), script(), 1, WriteJobState::new(0, true));

    let mut dispatched = 0;
    for batch in single_item_batches(10) {
        match dispatcher.submit(batch).await {
            Submission::Dispatched => dispatched += 1,
            Submission::Rejected => {}
        }
    }
    assert_eq!(dispatched, 1);
    assert_eq!(dispatcher.phase(), DispatchPhase::Aborting);

    let state = dispatcher.finish().await;
    assert_eq!(state.summary().batches_skipped, 9);
    assert_eq!(store.code_calls().len(), 1);
}

#[tokio::test]
async fn test_in_flight_batches_drain_after_abort() {
    let store = Arc::new(fail_uris(&["/doc/0"]).with_latency(Duration::from_millis(20)));
    let mut dispatcher = BatchDispatcher::new(store.clone(), script(), 4, WriteJobState::new(0, true));

    let mut dispatched = 0;
    for batch in single_item_batches(12) {
        if dispatcher.submit(batch).await == Submission::Dispatched {
            dispatched += 1;
        }
    }
    let state = dispatcher.finish().await;
    let summary = state.summary();

    // Everything dispatched finished and was counted; nothing was cancelled
    assert_eq!(summary.batches_succeeded + summary.batches_failed, dispatched);
    assert_eq!(summary.batches_skipped, 12 - dispatched);
    assert_eq!(store.code_calls().len() as u64, dispatched);
    assert!(state.is_aborting());
}

#[tokio::test]
async fn test_continue_mode_commits_with_exact_failure_count() {
    let store = Arc::new(fail_uris(&["/doc/1", "/doc/4", "/doc/7"]));
    let write = DocumentWrite::from_options(
        store.clone(),
        &options(&[
            ("invoke-module-path", "/load.sjs"),
            ("batch-size", "1"),
            ("abort-on-failure", "false"),
        ]),
        &WriteDefaults::default(),
    )
    .unwrap();

    let summary = LocalJob::new(write, 3)
        .run(uri_rows((0..10).map(|i| format!("/doc/{i}"))))
        .await
        .unwrap();

    assert_eq!(summary.partitions, 3);
    assert_eq!(summary.batches_failed, 3);
    assert_eq!(summary.batches_succeeded, 7);
    assert_eq!(summary.failures.len(), 3);
    assert_eq!(store.code_calls().len(), 10);
}

#[tokio::test]
async fn test_document_write_failures_in_continue_mode() {
    let store = Arc::new(MemoryStore::new().with_write_hook(|doc| {
        doc.uri.ends_with("/2.json").then(|| format!("XDMP-DOCFORBID: {}", doc.uri))
    }));
    let write = DocumentWrite::from_options(
        store.clone(),
        &options(&[
            ("uri-column", "URI"),
            ("batch-size", "2"),
            ("abort-on-failure", "false"),
        ]),
        &WriteDefaults::default(),
    )
    .unwrap();

    let summary = LocalJob::new(write, 1)
        .run(uri_rows((0..6).map(|i| format!("/doc/{i}.json"))))
        .await
        .unwrap();

    // The write set holding /doc/2.json is rejected as a whole
    assert_eq!(summary.batches_failed, 1);
    assert_eq!(summary.items_written, 4);
    assert_eq!(summary.items_failed, 2);
    assert!(summary.failures[0].message.starts_with("XDMP-DOCFORBID"));
    assert_eq!(store.document_count(), 4);
    assert!(store.document("/doc/3.json").is_none());
}

#[tokio::test]
async fn test_one_aborted_partition_aborts_the_job() {
    let store = Arc::new(fail_uris(&["/doc/8"]));
    let write = DocumentWrite::from_options(
        store,
        &options(&[("eval-script-primary", "var URI;"), ("batch-size", "2")]),
        &WriteDefaults::default(),
    )
    .unwrap();

    let err = LocalJob::new(write, 3)
        .run(uri_rows((0..9).map(|i| format!("/doc/{i}"))))
        .await
        .unwrap_err();

    match err {
        WriteError::JobAborted {
            aborted_partitions,
            message,
        } => {
            assert_eq!(aborted_partitions, 1);
            assert!(message.contains("Error: rejected /doc/8"));
        }
        other => panic!("expected JobAborted, got {other}"),
    }
}

#[tokio::test]
async fn test_conversion_failure_aborts_partition() {
    let schema = Schema::new(vec![Field::nullable("URI", DataType::String)]).into_shared();
    let rows = vec![
        Row::new(schema.clone(), vec![Value::from("/a.json")]).unwrap(),
        Row::new(schema.clone(), vec![Value::Null]).unwrap(),
        Row::new(schema, vec![Value::from("/c.json")]).unwrap(),
    ];
    let store = Arc::new(MemoryStore::new());
    let write = DocumentWrite::from_options(
        store.clone(),
        &options(&[("uri-column", "URI"), ("batch-size", "10")]),
        &WriteDefaults::default(),
    )
    .unwrap();

    let factory = write.create_batch_writer_factory();
    let mut writer = factory.create_writer(0);
    for row in &rows {
        writer.write(row).await;
    }
    let message = writer.commit().await;
    assert!(message.is_abort());
    assert_eq!(message.summary().conversion_failures, 1);
    // The open batch was never flushed
    assert_eq!(store.document_count(), 0);

    let err = write.commit(&[message]).unwrap_err();
    assert!(err.to_string().contains("URI column 'URI' is null"));
}

#[tokio::test]
async fn test_streaming_epochs_are_independent() {
    let store = Arc::new(fail_uris(&["/bad"]));
    let write = DocumentWrite::from_options(
        store,
        &options(&[("invoke-module-path", "/stream.sjs")]),
        &WriteDefaults::default(),
    )
    .unwrap();
    let job = LocalJob::new(write, 2);

    let first = job
        .run_epoch(0, uri_rows(["/ok/1".to_string(), "/ok/2".to_string()]))
        .await
        .unwrap();
    assert_eq!(first.epoch, Some(0));

    let err = job
        .run_epoch(1, uri_rows(["/ok/3".to_string(), "/bad".to_string()]))
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::EpochAborted { epoch: 1, .. }));

    let third = job.run_epoch(2, uri_rows(["/ok/4".to_string()])).await.unwrap();
    assert_eq!(third.items_written, 1);
}

#[tokio::test]
async fn test_host_abort_returns_abort_message() {
    let store = Arc::new(MemoryStore::new());
    let write = DocumentWrite::from_options(
        store.clone(),
        &options(&[("uri-column", "URI"), ("batch-size", "5")]),
        &WriteDefaults::default(),
    )
    .unwrap();
    let mut writer = write.create_streaming_writer_factory().create_writer(3, 9);
    for row in &uri_rows(["/x.json".to_string()]) {
        writer.write(row).await;
    }
    let message = writer.abort().await;
    assert!(matches!(&message, PartitionMessage::Abort(abort) if abort.epoch == Some(9) && abort.partition == 3));
    assert_eq!(store.document_count(), 0);
    assert!(write.abort_epoch(9, &[message]).to_string().contains("epoch 9"));
}
