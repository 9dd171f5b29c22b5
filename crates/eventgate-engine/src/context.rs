//! The engine context record.
//!
//! Everything a side-effecting built-in needs — program, message
//! service, resource sink, namespace, job-ID source — travels in one
//! explicit record owned by the dispatcher. Built-ins receive it
//! through their evaluation scope; there is no process-wide state.

use std::path::PathBuf;
use std::sync::Arc;

use eventgate_messages::Service;

use crate::jobid::JobIdSource;
use crate::program::TriggerProgram;
use crate::traits::{RepoFileFetcher, ResourceSink};

/// Environment variable naming the installation namespace.
pub const NAMESPACE_ENV: &str = "KUBE_NAMESPACE";
/// Namespace used when [`NAMESPACE_ENV`] is unset.
pub const DEFAULT_NAMESPACE: &str = "kabanero";

/// Namespace this service is installed in.
pub fn installation_namespace() -> String {
    std::env::var(NAMESPACE_ENV).unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string())
}

/// Read-only record shared by one dispatcher and every evaluation it
/// runs.
pub struct EngineContext {
    pub(crate) program: Arc<TriggerProgram>,
    pub(crate) messages: Option<Arc<Service>>,
    pub(crate) sink: Option<Arc<dyn ResourceSink>>,
    pub(crate) fetcher: Option<Arc<dyn RepoFileFetcher>>,
    pub(crate) namespace: String,
    pub(crate) bundle_root: PathBuf,
    pub(crate) dryrun: bool,
    pub(crate) job_ids: JobIdSource,
    pub(crate) max_call_depth: usize,
}

impl EngineContext {
    pub fn builder(program: TriggerProgram) -> EngineContextBuilder {
        EngineContextBuilder {
            program,
            messages: None,
            sink: None,
            fetcher: None,
            namespace: None,
            bundle_root: None,
            max_call_depth: None,
        }
    }

    pub fn program(&self) -> &TriggerProgram {
        &self.program
    }

    pub fn dryrun(&self) -> bool {
        self.dryrun
    }
}

/// Fluent builder for [`EngineContext`].
pub struct EngineContextBuilder {
    program: TriggerProgram,
    messages: Option<Arc<Service>>,
    sink: Option<Arc<dyn ResourceSink>>,
    fetcher: Option<Arc<dyn RepoFileFetcher>>,
    namespace: Option<String>,
    bundle_root: Option<PathBuf>,
    max_call_depth: Option<usize>,
}

impl EngineContextBuilder {
    pub fn message_service(mut self, service: Arc<Service>) -> Self {
        self.messages = Some(service);
        self
    }

    pub fn resource_sink(mut self, sink: Arc<dyn ResourceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn repo_file_fetcher(mut self, fetcher: Arc<dyn RepoFileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Root of the extracted trigger bundle; `applyResources`
    /// directories are resolved against it.
    pub fn bundle_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.bundle_root = Some(root.into());
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = Some(depth);
        self
    }

    pub fn build(self) -> EngineContext {
        let dryrun = self.program.dryrun();
        EngineContext {
            program: Arc::new(self.program),
            messages: self.messages,
            sink: self.sink,
            fetcher: self.fetcher,
            namespace: self.namespace.unwrap_or_else(installation_namespace),
            bundle_root: self.bundle_root.unwrap_or_else(|| PathBuf::from(".")),
            dryrun,
            job_ids: JobIdSource::new(),
            max_call_depth: self.max_call_depth.unwrap_or(64),
        }
    }
}
