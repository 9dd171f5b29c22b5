//! eventgate-engine — declarative trigger evaluation over incoming
//! events.
//!
//! The engine ingests a message, evaluates the trigger program loaded
//! from the bundle against it with a typed expression language, and
//! performs side effects (resource creation, event republication)
//! through built-in functions as the evaluation runs. Collaborators the
//! engine does not own — the orchestrator client, source-control
//! clients, secret stores — are consumed through the traits in
//! [`traits`].

pub(crate) mod bindings;
pub(crate) mod builtins;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod evaluator;
pub mod expr;
pub mod jobid;
pub mod names;
pub mod program;
pub(crate) mod resources;
pub mod secrets;
pub mod statement;
pub mod template;
pub mod traits;
pub mod value;

// Re-export the public surface at the crate level.

pub use bindings::Bindings;
pub use context::{installation_namespace, EngineContext, EngineContextBuilder};
pub use dispatcher::Dispatcher;
pub use errors::{
    ApplyError, DispatchError, EvalError, ExprError, ProgramError, TemplateError,
};
pub use jobid::JobIdSource;
pub use names::{kind_to_plural, to_domain_name, to_label};
pub use program::{Function, Trigger, TriggerProgram, EVENT_DEFINITIONS_FILE};
pub use resources::JOBID_LABEL;
pub use secrets::{select_credential, AnnotatedSecret, StaticCredentialSource};
pub use traits::{
    Credential, CredentialError, CredentialSource, FetchError, FetchedFile, RepoFileFetcher,
    ResourceSink, SinkError,
};
pub use value::{webhook_message, Kind, Value};
