//! Broker (MQTT) pub/sub provider.
//!
//! Holds one persistent connection per provider definition. A
//! background driver task polls the MQTT event loop for the lifetime of
//! the provider: it performs the actual network I/O for publishes and
//! routes incoming messages into per-subscription channels. `receive`
//! and `listen_and_serve` drain those channels; delivery order within
//! one subscription matches arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{EventNode, Header, MessageError, Provider, ProviderDefinition, ReceiverFn};

/// Buffered messages per subscription before the driver starts
/// dropping.
const SUBSCRIPTION_BUFFER: usize = 64;

type SubscriptionRx = Arc<Mutex<mpsc::Receiver<Vec<u8>>>>;

/// Provider backed by a persistent MQTT connection.
pub struct BrokerProvider {
    definition: ProviderDefinition,
    client: AsyncClient,
    /// topic → channel feeding that topic's subscription.
    topics: Arc<Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>>,
    /// node name → receiving end handed to `receive`/`listen_and_serve`.
    subscriptions: Mutex<HashMap<String, SubscriptionRx>>,
    shutdown: CancellationToken,
}

impl BrokerProvider {
    /// Connect to the broker at the definition's URL
    /// (`mqtt://host:port`, `tcp://host:port`, or bare `host:port`;
    /// port defaults to 1883) and start the connection driver.
    pub async fn connect(definition: ProviderDefinition) -> Result<Self, MessageError> {
        let (host, port) = parse_broker_url(&definition.url).ok_or_else(|| {
            MessageError::Connect {
                name: definition.name.clone(),
                message: format!("cannot parse broker url '{}'", definition.url),
            }
        })?;

        let client_id = format!("eventgate-{}", definition.name);
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, SUBSCRIPTION_BUFFER);
        let topics: Arc<Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let driver_topics = Arc::clone(&topics);
        let driver_shutdown = shutdown.clone();
        let provider_name = definition.name.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = driver_shutdown.cancelled() => {
                        tracing::debug!(provider = %provider_name, "broker driver stopping");
                        break;
                    }
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let senders = driver_topics.lock().await;
                            if let Some(tx) = senders.get(&publish.topic) {
                                if tx.try_send(publish.payload.to_vec()).is_err() {
                                    tracing::warn!(
                                        provider = %provider_name,
                                        topic = %publish.topic,
                                        "subscription buffer full, dropping message"
                                    );
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(provider = %provider_name, "broker poll error: {e} (retrying)");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });

        Ok(Self {
            definition,
            client,
            topics,
            subscriptions: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    async fn subscription(&self, node: &EventNode) -> Result<SubscriptionRx, MessageError> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions
            .get(&node.name)
            .cloned()
            .ok_or_else(|| MessageError::NotSubscribed {
                name: node.name.clone(),
            })
    }
}

impl Drop for BrokerProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Provider for BrokerProvider {
    /// Publish to the node's topic at QoS 1. The connection driver
    /// flushes the write and collects the broker acknowledgment.
    async fn send(
        &self,
        node: &EventNode,
        payload: &[u8],
        _header: Option<&Header>,
    ) -> Result<(), MessageError> {
        tracing::debug!(
            provider = %self.definition.name,
            topic = %node.topic,
            bytes = payload.len(),
            "broker provider publishing"
        );
        self.client
            .publish(&node.topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| MessageError::Transport {
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, node: &EventNode) -> Result<(), MessageError> {
        self.client
            .subscribe(&node.topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MessageError::Transport {
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.topics.lock().await.insert(node.topic.clone(), tx);
        self.subscriptions
            .lock()
            .await
            .insert(node.name.clone(), Arc::new(Mutex::new(rx)));

        tracing::info!(
            provider = %self.definition.name,
            node = %node.name,
            topic = %node.topic,
            "subscribed"
        );
        Ok(())
    }

    async fn receive(&self, node: &EventNode) -> Result<Vec<u8>, MessageError> {
        let rx = self.subscription(node).await?;
        let mut rx = rx.lock().await;

        let seconds = self.definition.timeout_secs();
        match tokio::time::timeout(Duration::from_secs(seconds), rx.recv()).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(MessageError::Closed {
                name: node.name.clone(),
            }),
            Err(_) => Err(MessageError::Timeout {
                name: node.name.clone(),
                seconds,
            }),
        }
    }

    async fn listen_and_serve(
        &self,
        node: &EventNode,
        receiver: ReceiverFn,
        cancel: CancellationToken,
    ) -> Result<(), MessageError> {
        let rx = self.subscription(node).await?;
        let mut rx = rx.lock().await;

        tracing::info!(
            provider = %self.definition.name,
            node = %node.name,
            topic = %node.topic,
            "listening"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                payload = rx.recv() => match payload {
                    Some(payload) => receiver(payload),
                    None => {
                        return Err(MessageError::Closed {
                            name: node.name.clone(),
                        })
                    }
                }
            }
        }
    }
}

/// Split a broker URL into host and port. Accepts an optional
/// `mqtt://` or `tcp://` scheme; the port defaults to 1883.
fn parse_broker_url(url: &str) -> Option<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    if rest.is_empty() {
        return None;
    }
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().ok()?;
            if host.is_empty() {
                return None;
            }
            Some((host.to_string(), port))
        }
        None => Some((rest.to_string(), 1883)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(timeout: u64) -> ProviderDefinition {
        ProviderDefinition {
            name: "broker0".into(),
            provider_type: "broker".into(),
            url: "mqtt://127.0.0.1:1883".into(),
            timeout,
            skip_tls_verify: false,
        }
    }

    fn node(name: &str, topic: &str) -> EventNode {
        EventNode {
            name: name.into(),
            topic: topic.into(),
            provider_ref: "broker0".into(),
        }
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://broker.example.com:1884"),
            Some(("broker.example.com".into(), 1884))
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.1:1883"),
            Some(("10.0.0.1".into(), 1883))
        );
        assert_eq!(
            parse_broker_url("broker.example.com"),
            Some(("broker.example.com".into(), 1883))
        );
        assert_eq!(parse_broker_url(""), None);
        assert_eq!(parse_broker_url("mqtt://:1883"), None);
        assert_eq!(parse_broker_url("host:notaport"), None);
    }

    #[tokio::test]
    async fn test_receive_without_subscribe() {
        let provider = BrokerProvider::connect(definition(1)).await.unwrap();
        let err = provider.receive(&node("n", "t")).await.unwrap_err();
        assert!(matches!(err, MessageError::NotSubscribed { .. }));
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        // The client enqueues the subscription without a live broker;
        // receive must bound the wait by the configured timeout.
        let provider = BrokerProvider::connect(definition(1)).await.unwrap();
        provider.subscribe(&node("n", "t")).await.unwrap();

        let err = provider.receive(&node("n", "t")).await.unwrap_err();
        assert!(matches!(err, MessageError::Timeout { seconds: 1, .. }));
    }

    #[tokio::test]
    async fn test_listen_and_serve_stops_on_cancel() {
        let provider = BrokerProvider::connect(definition(1)).await.unwrap();
        provider.subscribe(&node("n", "t")).await.unwrap();

        let cancel = CancellationToken::new();
        let receiver: ReceiverFn = Arc::new(|_| {});
        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });

        provider
            .listen_and_serve(&node("n", "t"), receiver, cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delivery_order_preserved() {
        // Feed the subscription channel directly through the topic
        // table, as the driver does, and drain with receive().
        let provider = BrokerProvider::connect(definition(1)).await.unwrap();
        provider.subscribe(&node("n", "t")).await.unwrap();

        {
            let topics = provider.topics.lock().await;
            let tx = topics.get("t").unwrap();
            tx.try_send(b"first".to_vec()).unwrap();
            tx.try_send(b"second".to_vec()).unwrap();
        }

        assert_eq!(provider.receive(&node("n", "t")).await.unwrap(), b"first");
        assert_eq!(provider.receive(&node("n", "t")).await.unwrap(), b"second");
    }
}
