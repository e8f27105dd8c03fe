//! Error Types
//!
//! One enum per concern:
//! - `ConfigurationError`: invalid or conflicting options, fatal at job setup
//! - `ConversionError`: a row that cannot become a document or invocation
//! - `RemoteError`: the store rejected a request; message kept verbatim
//! - `UnsupportedPredicate`: a filter the store cannot evaluate natively
//! - `WriteError` / `ReadError`: what the host engine ultimately sees

use serde::{Deserialize, Serialize};
use std::fmt;

/// Invalid job configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// More than one option of a mutually exclusive group was set
    #[error("Only one of the following options may be set: {}; found: {}", .allowed.join(", "), .found.join(", "))]
    MutuallyExclusive {
        allowed: Vec<String>,
        found: Vec<String>,
    },

    /// A required option is absent
    #[error("Missing required option: {0}")]
    MissingOption(String),

    /// An option value could not be parsed
    #[error("Invalid value '{value}' for option '{option}': {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    /// Options that cannot be combined for the chosen output mode
    #[error("Incompatible options: {0}")]
    Incompatible(String),

    /// Configuration file could not be loaded
    #[error("Configuration file error: {0}")]
    File(String),
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        ConfigurationError::File(e.to_string())
    }
}

/// A row that cannot be turned into a document or code invocation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// The configured URI or content column does not exist in the row schema
    #[error("Column '{column}' not found in row schema")]
    MissingColumn { column: String },

    /// The URI-bearing column is null for this row
    #[error("URI column '{column}' is null")]
    NullUri { column: String },

    /// The resolved URI is the empty string
    #[error("Document URI must not be empty")]
    EmptyUri,

    /// A URI template placeholder resolved to null
    #[error("URI template column '{column}' is null")]
    NullTemplateValue { column: String },

    /// Content does not satisfy the declared document format
    #[error("Content is not valid {format}: {reason}")]
    InvalidContent { format: String, reason: String },

    /// Content column has a type that cannot carry document content
    #[error("Content column '{column}' has unsupported type {data_type}")]
    UnsupportedContentType { column: String, data_type: String },

    /// Content column is null for this row
    #[error("Content column '{column}' is null")]
    NullContent { column: String },
}

/// Error returned by the remote store.
///
/// The message is exactly what the store reported so operators can locate
/// the failing script and line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        RemoteError {
            message: message.into(),
        }
    }
}

/// Where a recorded failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Row could not be converted
    Conversion,
    /// Store or script execution failed
    RemoteExecution,
}

/// A recorded write failure, carried in outcomes and partition messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    /// Verbatim error text
    pub message: String,
    /// Batch the failure belongs to (None for rows rejected before batching)
    pub batch_id: Option<u64>,
    /// Document URI or external-variable value of the failing item, if known
    pub item: Option<String>,
}

impl ErrorDetail {
    pub fn remote(error: &RemoteError, batch_id: u64, item: Option<String>) -> Self {
        ErrorDetail {
            kind: FailureKind::RemoteExecution,
            message: error.message.clone(),
            batch_id: Some(batch_id),
            item,
        }
    }

    pub fn conversion(error: &ConversionError) -> Self {
        ErrorDetail {
            kind: FailureKind::Conversion,
            message: error.to_string(),
            batch_id: None,
            item: None,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.batch_id, &self.item) {
            (Some(batch), Some(item)) => write!(f, "batch {batch}, item {item}: {}", self.message),
            (Some(batch), None) => write!(f, "batch {batch}: {}", self.message),
            (None, _) => f.write_str(&self.message),
        }
    }
}

/// A predicate the store cannot evaluate natively.
///
/// Not a failure: the predicate stays with the host engine, which filters
/// the returned rows itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsupportedPredicate {
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Column reference '{column}' is ambiguous ({candidates} candidates)")]
    AmbiguousColumn { column: String, candidates: usize },

    #[error("Column '{column}' is {expected}, literal is {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    #[error("Comparison with a null literal on '{0}'")]
    NullLiteral(String),

    #[error("Empty IN list on '{0}'")]
    EmptyInList(String),

    #[error("Column '{column}' of type {data_type} has no native ordering")]
    NotOrderable { column: String, data_type: String },

    #[error("String match on non-string column '{column}' ({data_type})")]
    NotStringColumn { column: String, data_type: String },
}

/// Failure surfaced to the host engine by the write path
#[derive(Debug, Clone, thiserror::Error)]
pub enum WriteError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The driver aborted the job; `message` is the representative failure
    #[error("Write job aborted: {message}")]
    JobAborted {
        aborted_partitions: usize,
        message: String,
    },

    /// A streaming micro-batch was aborted
    #[error("Streaming epoch {epoch} aborted: {message}")]
    EpochAborted { epoch: u64, message: String },

    /// A partition task died before producing a message
    #[error("Partition {partition} failed: {message}")]
    PartitionFailed { partition: usize, message: String },
}

/// Failure surfaced to the host engine by the read path
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReadError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Query failed: {0}")]
    Remote(#[from] RemoteError),

    /// A filter left for local evaluation names no single output column
    #[error("Cannot evaluate filter {filter}: {reason}")]
    UnresolvedColumn {
        filter: String,
        reason: UnsupportedPredicate,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_is_verbatim() {
        let err = RemoteError::new("Error running JavaScript request: Error: Boom!");
        assert_eq!(err.to_string(), "Error running JavaScript request: Error: Boom!");
    }

    #[test]
    fn test_error_detail_display_keeps_message() {
        let detail = ErrorDetail::remote(&RemoteError::new("Boom"), 3, Some("b".to_string()));
        assert_eq!(detail.to_string(), "batch 3, item b: Boom");
        assert_eq!(detail.kind, FailureKind::RemoteExecution);
    }

    #[test]
    fn test_mutually_exclusive_display() {
        let err = ConfigurationError::MutuallyExclusive {
            allowed: vec!["a".to_string(), "b".to_string()],
            found: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Only one of the following options may be set: a, b; found: a, b"
        );
    }

    #[test]
    fn test_job_aborted_contains_message() {
        let err = WriteError::JobAborted {
            aborted_partitions: 1,
            message: "batch 0, item b: Error: Boom!".to_string(),
        };
        assert!(err.to_string().contains("Error: Boom!"));
    }
}
