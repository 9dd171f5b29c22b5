//! Collaborator interfaces consumed by the engine.
//!
//! The orchestrator client, source-control client, and secret store
//! live outside this crate; the engine only defines the seams it needs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::value::Value;

/// Errors from a [`ResourceSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("resource sink error: {message}")]
    Sink { message: String },
}

/// Creates orchestrator resources from rendered manifest bytes.
///
/// The engine hands over a fully prepared JSON manifest (namespace
/// checked, job-ID label applied); the sink owns transport, auth, and
/// API-group discovery.
#[async_trait]
pub trait ResourceSink: Send + Sync {
    async fn create(&self, manifest: &[u8]) -> Result<(), SinkError>;
}

/// Errors from a [`RepoFileFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch error: {message}")]
    Fetch { message: String },
}

/// A file fetched from the repository a webhook message refers to.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    /// Whether the file exists in the repository.
    pub exists: bool,
    /// Parsed content when it exists.
    pub content: Option<Value>,
}

/// Backs the `downloadYAML` built-in: resolves a file in the repository
/// named by a webhook message. Implementations live with the
/// source-control clients, outside the engine.
#[async_trait]
pub trait RepoFileFetcher: Send + Sync {
    async fn fetch_yaml(
        &self,
        message: &BTreeMap<String, Value>,
        file_name: &str,
    ) -> Result<FetchedFile, FetchError>;
}

/// Errors from a [`CredentialSource`].
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential matches url '{url}'")]
    NotFound { url: String },
    #[error("credential lookup failed: {message}")]
    Lookup { message: String },
}

/// A repository credential resolved by URL prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub token: String,
    pub secret_name: String,
}

/// Resolves a credential for a repository URL. The cluster-backed
/// implementation lives with the orchestrator client; see
/// [`crate::secrets`] for the prefix-matching rules.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn lookup(&self, repo_url: &str) -> Result<Credential, CredentialError>;
}
