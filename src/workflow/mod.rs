//! Workflow engine
//!
//! Workflows are Markdown documents holding a mermaid flowchart (the
//! activity graph) and a set of prompts. The reader turns a document into a
//! [`Workflow`], the interpreter walks it with a [`Context`] and records
//! every step in a [`History`].

pub mod cli;
pub mod context;
pub mod error;
pub mod history;
pub mod interpreter;
pub mod loader;
pub mod operation;
pub mod reader;
pub mod types;
pub mod writer;

pub use self::context::{ConsoleOperator, Context, Operator};
pub use self::error::WorkflowError;
pub use self::history::{History, HistoryRecord};
pub use self::interpreter::Interpreter;
pub use self::operation::Operation;
pub use self::reader::WorkflowReader;
pub use self::types::{Activity, ActivityKind, EdgeLabel, Status, Workflow};
