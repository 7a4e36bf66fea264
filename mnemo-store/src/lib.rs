//! Schema-driven persistence for conversational-agent runtimes.
//!
//! The core is a generic table engine over a minimal SQL-executing
//! [`SqlBinding`]: dynamic schemas, a record codec with fail-safe JSON
//! decoding, a small filtered/paginated query layer, and atomic batch
//! writes. Domain repositories for threads, messages, traces, and workflow
//! snapshots are built on top as methods of [`AgentStore`].
//!
//! Concrete bindings live in their own crates; see `mnemo-store-sqlite`.

pub mod binding;
pub mod codec;
pub mod domain;
pub mod error;
pub mod query;
pub mod schema;
pub mod store;

mod messages;
mod threads;
mod traces;
mod workflows;

pub use binding::{BindingError, ExecResult, SqlBinding, SqlRow, SqlStatement, SqlValue};
pub use codec::JsonOrRaw;
pub use domain::{
    ContentPart, ContentV2, Message, MessageContent, MessageFormat, MessageRole, Thread, Trace,
    WorkflowRun, WorkflowState,
};
pub use error::{Result, StoreError};
pub use query::{Filter, OrderBy, Page, Pagination};
pub use schema::{
    ColumnDef, ColumnType, TableSchema, MESSAGES_TABLE, THREADS_TABLE, TRACES_TABLE,
    WORKFLOW_SNAPSHOT_TABLE,
};
pub use store::{AgentStore, StoreConfig};
pub use traces::TraceFilter;
pub use workflows::WorkflowRunFilter;
