//! codementor: Markdown workflows mixing agent prompts and shell commands
//!
//! This library provides the workflow engine used by the `codementor` binary:
//! the document reader and writer, the interpreter, and the persistent shell
//! and SSH command executors.

pub mod agent;
pub mod commands;
pub mod config;
pub mod constants;
pub mod text;
pub mod workflow;
