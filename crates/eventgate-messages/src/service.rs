//! Provider registry and the unified send path.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::{
    BrokerProvider, EventDefinition, EventNode, Header, HttpProvider, MessageError, Provider,
};

/// Named registry of message providers plus the destination table.
///
/// Built once from `eventDefinitions.yaml` at startup; afterwards it is
/// only read, so it can be shared as an `Arc<Service>` without locking.
pub struct Service {
    definition: EventDefinition,
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("definition", &self.definition)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service {
    /// Read `eventDefinitions.yaml` from `path` and construct every
    /// declared provider. An unrecognized `providerType` is a
    /// configuration error.
    pub async fn from_config_file(path: &Path) -> Result<Service, MessageError> {
        let bytes = std::fs::read(path).map_err(|e| MessageError::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let definition: EventDefinition =
            serde_yaml::from_slice(&bytes).map_err(|e| MessageError::Config {
                message: format!("failed to parse {}: {e}", path.display()),
            })?;
        Self::from_definition(definition).await
    }

    /// Construct a service from an already parsed definition.
    pub async fn from_definition(definition: EventDefinition) -> Result<Service, MessageError> {
        let mut service = Service {
            definition: definition.clone(),
            providers: BTreeMap::new(),
        };

        for def in &definition.providers {
            tracing::debug!(name = %def.name, provider_type = %def.provider_type, "creating provider");
            let provider: Arc<dyn Provider> = match def.provider_type.as_str() {
                "broker" => Arc::new(BrokerProvider::connect(def.clone()).await?),
                "http" => Arc::new(HttpProvider::new(def.clone())?),
                other => {
                    return Err(MessageError::UnknownProviderType {
                        name: def.name.clone(),
                        provider_type: other.to_string(),
                    })
                }
            };
            service.register(&def.name, provider);
        }

        Ok(service)
    }

    /// Register a provider under `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, provider: Arc<dyn Provider>) {
        self.providers.insert(name.to_string(), provider);
    }

    /// The provider registered under `name`.
    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// The event destination named `name`.
    pub fn node(&self, name: &str) -> Option<&EventNode> {
        self.definition
            .event_destinations
            .iter()
            .find(|node| node.name == name)
    }

    /// Send `payload` to the destination named `dest`, resolving its
    /// provider through the registry.
    pub async fn send(
        &self,
        dest: &str,
        payload: &[u8],
        header: Option<&Header>,
    ) -> Result<(), MessageError> {
        let node = self.node(dest).ok_or_else(|| MessageError::UnknownNode {
            name: dest.to_string(),
        })?;
        let provider =
            self.provider(&node.provider_ref)
                .ok_or_else(|| MessageError::UnknownProvider {
                    name: node.provider_ref.clone(),
                })?;
        provider.send(node, payload, header).await
    }
}
