//! Remote Store Boundary
//!
//! The write and read paths talk to the document database only through the
//! [`DocumentStore`] trait. Requests are plain data; every call returns the
//! store's own error text unmodified so operators can see which script or
//! module failed.
//!
//! ```text
//! InvocationStrategy ──► write_documents / invoke_module / eval_script
//! Scan               ──► query
//! ```
//!
//! [`MemoryStore`] is the in-process implementation used by the local
//! driver, the CLI and the tests.

mod memory;

pub use memory::{CodeCall, CodeTarget, MemoryStore, RecordedCall, StoredDocument};

use crate::error::RemoteError;
use crate::read::translate::NativeExpr;
use crate::value::Row;
use crate::write::item::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

/// Variable bindings sent with a custom-code call
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Language of an inline script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    /// Server-side JavaScript (`eval-script-primary`)
    JavaScript,
    /// XQuery (`eval-script-secondary`)
    XQuery,
}

impl fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptLanguage::JavaScript => f.write_str("JavaScript"),
            ScriptLanguage::XQuery => f.write_str("XQuery"),
        }
    }
}

/// One batch of documents written in a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWriteSet {
    pub documents: Vec<Document>,
}

/// Execute a module already installed on the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInvocation {
    pub module_path: String,
    pub variables: Variables,
}

/// Evaluate an inline script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEvaluation {
    pub language: ScriptLanguage,
    pub script: String,
    pub variables: Variables,
    /// Name under which the item value is bound
    pub external_variable_name: String,
}

/// A read query: the user's base query plus pushed-down filters
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub base_query: String,
    pub filters: Vec<NativeExpr>,
}

impl QueryRequest {
    /// Full query text: `base.where(f1).where(f2)...`
    pub fn text(&self) -> String {
        let mut query = self.base_query.clone();
        for filter in &self.filters {
            query.push_str(&format!(".where({filter})"));
        }
        query
    }
}

/// A remote document database.
///
/// Implementations acquire their own connection per call and must release
/// it whether the call succeeds or fails.
pub trait DocumentStore: Send + Sync + 'static {
    /// Write a batch of documents; returns how many were written
    fn write_documents(
        &self,
        request: DocumentWriteSet,
    ) -> impl Future<Output = Result<usize, RemoteError>> + Send;

    fn invoke_module(
        &self,
        request: ModuleInvocation,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn eval_script(
        &self,
        request: ScriptEvaluation,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Execute a query and return its rows
    fn query(&self, request: QueryRequest)
        -> impl Future<Output = Result<Vec<Row>, RemoteError>> + Send;
}
