//! Message providers and the event dispatch service.
//!
//! A provider is a transport (broker pub/sub or HTTP request/response)
//! behind a uniform capability surface: `send`, `subscribe`, `receive`,
//! `listen_and_serve`. Providers are declared in the bundle's
//! `eventDefinitions.yaml` together with named event destinations, and
//! registered with a [`Service`] that resolves destination → provider at
//! send time. The service is built once at startup and read-only
//! afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

mod broker;
mod http;
mod service;

pub use broker::BrokerProvider;
pub use http::HttpProvider;
pub use service::Service;

/// Timeout applied when a provider definition leaves `timeout` unset.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Opaque message header: name → ordered list of values.
pub type Header = BTreeMap<String, Vec<String>>;

/// Callback invoked with each payload delivered by `listen_and_serve`.
pub type ReceiverFn = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Errors from provider construction and message operations.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message configuration error: {message}")]
    Config { message: String },
    #[error("provider '{name}' has unrecognized type '{provider_type}'")]
    UnknownProviderType { name: String, provider_type: String },
    #[error("no event destination named '{name}'")]
    UnknownNode { name: String },
    #[error("no provider named '{name}'")]
    UnknownProvider { name: String },
    #[error("provider '{name}' failed to connect: {message}")]
    Connect { name: String, message: String },
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("send to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("{operation} is not supported on a {provider_type} provider")]
    Unsupported {
        provider_type: String,
        operation: String,
    },
    #[error("node '{name}' has no active subscription")]
    NotSubscribed { name: String },
    #[error("receive on '{name}' timed out after {seconds}s")]
    Timeout { name: String, seconds: u64 },
    #[error("subscription for '{name}' is closed")]
    Closed { name: String },
}

/// A message transport. Implementations must be safe to share across
/// tasks; the registry hands out `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Publish `payload` to the node's topic or endpoint. `header` is
    /// opaque transport metadata (HTTP providers fan it out as request
    /// headers; broker providers ignore it).
    async fn send(
        &self,
        node: &EventNode,
        payload: &[u8],
        header: Option<&Header>,
    ) -> Result<(), MessageError>;

    /// Register a subscription for the node's topic.
    async fn subscribe(&self, node: &EventNode) -> Result<(), MessageError>;

    /// Wait for the next message on a previously subscribed node,
    /// bounded by the provider's configured timeout.
    async fn receive(&self, node: &EventNode) -> Result<Vec<u8>, MessageError>;

    /// Deliver messages for the node to `receiver`, in arrival order,
    /// until `cancel` fires. Consumes the node's subscription.
    async fn listen_and_serve(
        &self,
        node: &EventNode,
        receiver: ReceiverFn,
        cancel: CancellationToken,
    ) -> Result<(), MessageError>;
}

/// Parsed `eventDefinitions.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventDefinition {
    #[serde(default, rename = "messageProviders")]
    pub providers: Vec<ProviderDefinition>,
    #[serde(default, rename = "eventDestinations")]
    pub event_destinations: Vec<EventNode>,
}

/// One `messageProviders` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDefinition {
    pub name: String,
    #[serde(rename = "providerType")]
    pub provider_type: String,
    pub url: String,
    /// Seconds. Zero means "use [`DEFAULT_TIMEOUT_SECS`]".
    #[serde(default)]
    pub timeout: u64,
    #[serde(default, rename = "skipTLSVerify")]
    pub skip_tls_verify: bool,
}

impl ProviderDefinition {
    /// Effective timeout in seconds.
    pub fn timeout_secs(&self) -> u64 {
        if self.timeout == 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout
        }
    }
}

/// A named event source or destination: a topic on a provider.
#[derive(Debug, Clone, Deserialize)]
pub struct EventNode {
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(rename = "providerRef")]
    pub provider_ref: String,
}
