//! HTTP request/response provider.
//!
//! Stateless: `send` POSTs the payload as JSON to the provider URL with
//! optional header fan-out. Subscription-style operations are not
//! meaningful over plain HTTP and fail with a clear error.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{EventNode, Header, MessageError, Provider, ProviderDefinition, ReceiverFn};

/// Provider that delivers events by POSTing them to a fixed endpoint.
pub struct HttpProvider {
    definition: ProviderDefinition,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Build the underlying client. The configured timeout is in plain
    /// seconds; `skipTLSVerify` disables certificate validation for
    /// endpoints with private CAs.
    pub fn new(definition: ProviderDefinition) -> Result<Self, MessageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(definition.timeout_secs()))
            .danger_accept_invalid_certs(definition.skip_tls_verify)
            .build()
            .map_err(|e| MessageError::Connect {
                name: definition.name.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { definition, client })
    }

    fn unsupported(&self, operation: &str) -> MessageError {
        MessageError::Unsupported {
            provider_type: "http".into(),
            operation: operation.into(),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn send(
        &self,
        node: &EventNode,
        payload: &[u8],
        header: Option<&Header>,
    ) -> Result<(), MessageError> {
        tracing::debug!(
            node = %node.name,
            url = %self.definition.url,
            bytes = payload.len(),
            "http provider sending"
        );

        let mut request = self
            .client
            .post(&self.definition.url)
            .header("Content-Type", "application/json")
            .body(payload.to_vec());

        if let Some(header) = header {
            for (name, values) in header {
                for value in values {
                    request = request.header(name.as_str(), value.as_str());
                }
            }
        }

        let response = request.send().await.map_err(|e| MessageError::Transport {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MessageError::Status {
                url: self.definition.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, _node: &EventNode) -> Result<(), MessageError> {
        Err(self.unsupported("subscribe"))
    }

    async fn receive(&self, _node: &EventNode) -> Result<Vec<u8>, MessageError> {
        Err(self.unsupported("receive"))
    }

    async fn listen_and_serve(
        &self,
        _node: &EventNode,
        _receiver: ReceiverFn,
        _cancel: CancellationToken,
    ) -> Result<(), MessageError> {
        Err(self.unsupported("listen_and_serve"))
    }
}
