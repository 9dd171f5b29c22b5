//! Error types for the trigger engine.
//!
//! The split mirrors the recovery boundaries: `ProgramError` is
//! startup-fatal, everything else is scoped to a single message and is
//! logged and dropped at the dispatch boundary.

use thiserror::Error;

/// Errors from expression parsing, checking, or evaluation.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("parse error: {message}")]
    Parse { message: String },
    #[error("check error: {message}")]
    Check { message: String },
    #[error("evaluation error: {message}")]
    Eval { message: String },
}

/// Errors from loading and validating a trigger program.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("i/o error reading trigger program: {message}")]
    Io { message: String },
    #[error("{file}: {message}")]
    Parse { file: String, message: String },
    #[error("{file}: invalid statement: {message}")]
    Statement { file: String, message: String },
    #[error("{file}: declaration is missing '{field}'")]
    MissingField { file: String, field: String },
    #[error("function '{name}' is declared more than once")]
    DuplicateFunction { name: String },
}

/// Errors from evaluating a trigger body against a message.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("setting '{name}': {message}")]
    Assign { name: String, message: String },
    #[error("condition '{expr}': {message}")]
    Condition { expr: String, message: String },
    #[error("condition '{expr}' evaluated to {kind}, expected bool")]
    ConditionKind { expr: String, kind: String },
    #[error("call depth exceeded the limit of {max}")]
    CallDepth { max: usize },
    #[error("no function named '{name}'")]
    UnknownFunction { name: String },
    #[error("function '{name}' never set its output variable '{output}'")]
    NoOutput { name: String, output: String },
}

/// Errors from rendering a text template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder starting at offset {offset}")]
    Unterminated { offset: usize },
    #[error("empty placeholder at offset {offset}")]
    Empty { offset: usize },
}

/// Errors from `applyResources`.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{message}")]
    Path { message: String },
    #[error("i/o error: {message}")]
    Io { message: String },
    #[error("template {file}: {message}")]
    Render { file: String, message: String },
    #[error("manifest {file}: {message}")]
    Manifest { file: String, message: String },
    #[error("manifest {file} has no namespace")]
    MissingNamespace { file: String },
    #[error("no resource sink is configured")]
    NoSink,
    #[error("failed to create {namespace}/{name}: {message}")]
    Create {
        namespace: String,
        name: String,
        message: String,
    },
}

/// Errors surfaced by `Dispatcher::process_message`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no triggers bound to event source '{event_source}'")]
    NoTriggers { event_source: String },
    #[error("trigger {index} on '{event_source}' failed: {message}")]
    Trigger {
        event_source: String,
        index: usize,
        message: String,
    },
}
