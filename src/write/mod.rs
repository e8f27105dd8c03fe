//! Write path
//!
//! ```text
//! Row ─► RowConverter ─► BatchAccumulator ─► BatchDispatcher ─► DocumentStore
//!                                                  │
//!                                   WriteJobState ─┴─► PartitionMessage ─► DocumentWrite
//! ```

pub mod batch;
pub mod convert;
pub mod coordinator;
pub mod dispatch;
pub mod item;
pub mod state;
pub mod strategy;
pub mod writer;

pub use batch::{BatchAccumulator, SealedBatch};
pub use convert::{RowConverter, UriTemplate};
pub use coordinator::{DocumentWrite, JobSummary};
pub use dispatch::{AbortSignal, BatchDispatcher, DispatchPhase, Submission};
pub use item::{Capability, CodeInvocation, ConvertedItem, Document, DocumentFormat, Permission};
pub use state::{DispatchOutcome, PartitionSummary, WriteJobState};
pub use strategy::{CodeBinding, InvocationStrategy};
pub use writer::{
    AbortMessage, CommitMessage, PartitionMessage, PartitionWriter, StreamingWriterFactory,
    WriteStatus, WriterFactory,
};
