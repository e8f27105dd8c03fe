//! In-memory document store
//!
//! Keeps documents by URI (last write wins), records every call it
//! receives, and evaluates pushed-down filters over registered view rows.
//! Remote-side behavior is emulated through hooks:
//!
//! - a code handler decides what a module or script does with its
//!   variables: fail with an error message, or insert documents
//! - a write hook can reject individual documents, failing their batch
//!
//! Each call holds one connection from a bounded pool for its whole
//! duration; the connection is released when the call returns, on success
//! or failure.

use crate::error::RemoteError;
use crate::read::translate::ColumnRef;
use crate::store::{
    DocumentStore, DocumentWriteSet, ModuleInvocation, QueryRequest, ScriptEvaluation,
    ScriptLanguage, Variables,
};
use crate::value::{Row, Value};
use crate::write::item::Document;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Default connection pool size
const DEFAULT_MAX_CONNECTIONS: usize = 64;

type CodeHandler = Arc<dyn Fn(&CodeCall) -> Result<Vec<Document>, String> + Send + Sync>;
type WriteHook = Arc<dyn Fn(&Document) -> Option<String> + Send + Sync>;

/// What a custom-code call executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeTarget {
    Module(String),
    Script { language: ScriptLanguage, body: String },
}

/// A module invocation or script evaluation as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeCall {
    pub target: CodeTarget,
    pub variables: Variables,
}

impl CodeCall {
    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }

    /// A string variable's value
    pub fn variable_str(&self, name: &str) -> Option<&str> {
        self.variable(name).and_then(serde_json::Value::as_str)
    }
}

/// A call received by the store, with the error it returned
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Write {
        uris: Vec<String>,
        error: Option<String>,
    },
    Code {
        call: CodeCall,
        error: Option<String>,
    },
    Query {
        text: String,
    },
}

impl RecordedCall {
    pub fn failed(&self) -> bool {
        match self {
            RecordedCall::Write { error, .. } | RecordedCall::Code { error, .. } => error.is_some(),
            RecordedCall::Query { .. } => false,
        }
    }
}

/// A document as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub document: Document,
    /// How many times the URI has been written
    pub versions: u32,
}

#[derive(Debug)]
struct RegisteredView {
    schema: String,
    view: String,
    rows: Vec<Row>,
}

/// Source view of a query: `op.fromView(schema, view, alias)`
#[derive(Debug, PartialEq, Eq)]
struct ViewSource {
    schema: Option<String>,
    view: String,
    alias: Option<String>,
}

fn from_view_regex() -> &'static Regex {
    static FROM_VIEW: OnceLock<Regex> = OnceLock::new();
    FROM_VIEW.get_or_init(|| {
        Regex::new(r"op\.fromView\(\s*(?:'([^']*)'|null)\s*,\s*'([^']*)'(?:\s*,\s*'([^']*)')?")
            .expect("valid fromView regex")
    })
}

fn parse_view_source(query: &str) -> Option<ViewSource> {
    let captures = from_view_regex().captures(query)?;
    Some(ViewSource {
        schema: captures.get(1).map(|m| m.as_str().to_string()),
        view: captures.get(2)?.as_str().to_string(),
        alias: captures
            .get(3)
            .map(|m| m.as_str().to_string())
            .filter(|a| !a.is_empty()),
    })
}

/// A pooled connection; dropping it returns the permit
struct Connection<'a> {
    _permit: SemaphorePermit<'a>,
    in_flight: &'a AtomicUsize,
}

impl Drop for Connection<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, StoredDocument>>,
    calls: Mutex<Vec<RecordedCall>>,
    views: RwLock<Vec<RegisteredView>>,
    code_handler: Option<CodeHandler>,
    write_hook: Option<WriteHook>,
    latency: Duration,
    connections: Semaphore,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("documents", &self.documents.lock().len())
            .field("calls", &self.calls.lock().len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            documents: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            views: RwLock::new(Vec::new()),
            code_handler: None,
            write_hook: None,
            latency: Duration::ZERO,
            connections: Semaphore::new(DEFAULT_MAX_CONNECTIONS),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Decide the effect of module and script calls.
    ///
    /// `Ok(docs)` inserts `docs`; `Err(message)` fails the call with
    /// `message` verbatim.
    pub fn with_code_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CodeCall) -> Result<Vec<Document>, String> + Send + Sync + 'static,
    {
        self.code_handler = Some(Arc::new(handler));
        self
    }

    /// Reject documents: returning `Some(message)` fails the whole write set
    pub fn with_write_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Document) -> Option<String> + Send + Sync + 'static,
    {
        self.write_hook = Some(Arc::new(hook));
        self
    }

    /// Delay every call by `latency` while holding its connection
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.connections = Semaphore::new(max.max(1));
        self
    }

    /// Make a view queryable through `op.fromView(schema, view)`
    pub fn register_view(&self, schema: &str, view: &str, rows: Vec<Row>) {
        let mut views = self.views.write();
        views.retain(|v| !(v.schema == schema && v.view == view));
        views.push(RegisteredView {
            schema: schema.to_string(),
            view: view.to_string(),
            rows,
        });
    }

    pub fn document(&self, uri: &str) -> Option<StoredDocument> {
        self.documents.lock().get(uri).cloned()
    }

    /// Stored URIs in sorted order
    pub fn uris(&self) -> Vec<String> {
        self.documents.lock().keys().cloned().collect()
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Module and script calls received, failed ones included
    pub fn code_calls(&self) -> Vec<CodeCall> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Code { call, .. } => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    /// Query texts received
    pub fn queries(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Query { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of calls that held a connection at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<Connection<'_>, RemoteError> {
        let permit = self
            .connections
            .acquire()
            .await
            .map_err(|_| RemoteError::new("connection pool closed"))?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let connection = Connection {
            _permit: permit,
            in_flight: &self.in_flight,
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(connection)
    }

    fn insert(&self, documents: Vec<Document>) -> usize {
        let mut stored = self.documents.lock();
        let count = documents.len();
        for document in documents {
            let versions = stored.get(&document.uri).map_or(0, |d| d.versions) + 1;
            stored.insert(
                document.uri.clone(),
                StoredDocument { document, versions },
            );
        }
        count
    }

    fn run_code(&self, call: CodeCall) -> Result<(), RemoteError> {
        let result = match &self.code_handler {
            Some(handler) => handler(&call),
            None => Ok(Vec::new()),
        };
        let error = result.as_ref().err().cloned();
        self.calls.lock().push(RecordedCall::Code { call, error });
        match result {
            Ok(documents) => {
                self.insert(documents);
                Ok(())
            }
            Err(message) => Err(RemoteError::new(message)),
        }
    }
}

impl DocumentStore for MemoryStore {
    async fn write_documents(&self, request: DocumentWriteSet) -> Result<usize, RemoteError> {
        let _connection = self.connect().await?;
        let uris = request.documents.iter().map(|d| d.uri.clone()).collect();
        let rejection = self
            .write_hook
            .as_ref()
            .and_then(|hook| request.documents.iter().find_map(|d| hook(d)));
        self.calls.lock().push(RecordedCall::Write {
            uris,
            error: rejection.clone(),
        });
        match rejection {
            Some(message) => Err(RemoteError::new(message)),
            None => Ok(self.insert(request.documents)),
        }
    }

    async fn invoke_module(&self, request: ModuleInvocation) -> Result<(), RemoteError> {
        let _connection = self.connect().await?;
        self.run_code(CodeCall {
            target: CodeTarget::Module(request.module_path),
            variables: request.variables,
        })
    }

    async fn eval_script(&self, request: ScriptEvaluation) -> Result<(), RemoteError> {
        let _connection = self.connect().await?;
        self.run_code(CodeCall {
            target: CodeTarget::Script {
                language: request.language,
                body: request.script,
            },
            variables: request.variables,
        })
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>, RemoteError> {
        let _connection = self.connect().await?;
        let text = request.text();
        self.calls.lock().push(RecordedCall::Query { text: text.clone() });

        let source = parse_view_source(&request.base_query)
            .ok_or_else(|| RemoteError::new(format!("Unsupported query: {text}")))?;
        let views = self.views.read();
        let view = views
            .iter()
            .find(|v| {
                v.view == source.view && source.schema.as_deref().is_none_or(|s| s == v.schema)
            })
            .ok_or_else(|| {
                RemoteError::new(format!(
                    "SQL-TABLENOTFOUND: Unknown table: {}.{}",
                    source.schema.as_deref().unwrap_or(""),
                    source.view
                ))
            })?;

        let rows = view
            .rows
            .iter()
            .filter(|row| {
                let lookup = |column: &ColumnRef| lookup_column(&source, &view.schema, row, column);
                request
                    .filters
                    .iter()
                    .all(|filter| filter.evaluate(&lookup) == Some(true))
            })
            .cloned()
            .collect();
        Ok(rows)
    }
}

/// Resolve a column reference against the single view a query reads
fn lookup_column<'r>(
    source: &ViewSource,
    schema: &str,
    row: &'r Row,
    column: &ColumnRef,
) -> Option<&'r Value> {
    if let Some(qualifier) = &column.view {
        let matches_view = source.alias.as_deref() == Some(qualifier.as_str()) || *qualifier == source.view;
        if !matches_view {
            return None;
        }
    }
    if let Some(s) = &column.schema {
        if s != schema {
            return None;
        }
    }
    row.get(&column.name)
}
