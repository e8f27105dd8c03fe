//! # docbridge
//!
//! Connector between a row-oriented analytics engine and a document
//! database.
//!
//! ## Write path
//! ```text
//! Row
//!     ↓
//! [RowConverter]        → Document | CodeInvocation
//!     ↓
//! [BatchAccumulator]    → SealedBatch (batch-size items, arrival order)
//!     ↓
//! [BatchDispatcher]     → up to thread-count concurrent store calls
//!     ↓
//! [InvocationStrategy]  → write_documents | invoke_module | eval_script
//!     ↓
//! PartitionMessage      → DocumentWrite::commit / abort
//! ```
//!
//! ## Read path
//! ```text
//! PredicateNode ─► PredicateTranslator ─► NativeExpr ─► QueryRequest ─► DocumentStore::query
//!                        └─► residual filters evaluated locally
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docbridge::{DocumentWrite, LocalJob, MemoryStore, OptionMap, WriteDefaults};
//! use std::sync::Arc;
//!
//! let mut options = OptionMap::new();
//! options.insert("eval-script-primary".into(), "declareUpdate(); var URI;".into());
//! options.insert("batch-size".into(), "2".into());
//!
//! let store = Arc::new(MemoryStore::new());
//! let write = DocumentWrite::from_options(store, &options, &WriteDefaults::default())?;
//! let summary = LocalJob::new(write, 4).run(rows).await?;
//! ```

pub mod config;
pub mod csv;
pub mod driver;
pub mod error;
pub mod options;
pub mod read;
pub mod store;
pub mod telemetry;
pub mod value;
pub mod write;

pub use config::{Config, LoggingConfig, ReadDefaults, WriteDefaults};
pub use driver::LocalJob;
pub use error::{
    ConfigurationError, ConversionError, ErrorDetail, FailureKind, ReadError, RemoteError,
    UnsupportedPredicate, WriteError,
};
pub use options::{OptionMap, ReadOptions, WriteOptions};
pub use read::{
    ColumnRef, ComparisonOp, NativeExpr, PredicateNode, PredicateTranslator, QueryColumns, Scan,
    ScanBuilder, StringMatchKind, Translation,
};
pub use store::{DocumentStore, MemoryStore, ScriptLanguage};
pub use value::{DataType, Field, Row, Schema, Value};
pub use write::{
    DocumentWrite, InvocationStrategy, JobSummary, PartitionMessage, PartitionWriter, WriteStatus,
};
