//! Event Bus (§4.5). Per-deployment pub/sub fanning out to WebSocket
//! subscribers (broadcast channel, grounded on `deployer/src/deployment/build_logs.rs`'s
//! `BuildLogsManager`) and outbound webhooks with retry (grounded bit-exact on
//! `original_source/.../services/lifecycle.py`'s `LifecycleService`).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::{broadcast, RwLock};

use crate::domain::{Event, EventKind, HookInvocation, WebhookConfig};

const BROADCAST_CAPACITY: usize = 256;
const HISTORY_LIMIT: usize = 100;

/// A published event stamped once at publish time, so every subscriber
/// serializes the identical timestamp (§8 property 5 / S5).
pub type TimestampedEvent = (DateTime<Utc>, Event);

pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<TimestampedEvent>>>,
    hooks: RwLock<HashMap<String, Vec<WebhookConfig>>>,
    history: RwLock<HashMap<String, Vec<HookInvocation>>>,
    client: Client,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            client: Client::new(),
        }
    }

    /// Subscribes to a deployment's event stream. Returns the receiver along
    /// with the post-subscription count; the caller (the WebSocket handler)
    /// is responsible for sending the `connected` event to its own socket
    /// only — it must never be broadcast to already-connected sinks.
    pub async fn subscribe(&self, deployment_id: &str) -> (broadcast::Receiver<TimestampedEvent>, usize) {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(deployment_id.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0);
        let receiver = sender.subscribe();
        let count = sender.receiver_count();
        (receiver, count)
    }

    pub async fn subscriber_count(&self, deployment_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(deployment_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub async fn all_subscriber_counts(&self) -> HashMap<String, usize> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.receiver_count()))
            .collect()
    }

    /// Publishes to in-process WebSocket subscribers and outbound webhooks.
    /// The timestamp is assigned once here so every sink — broadcast or
    /// webhook — serializes the identical value for this event (§8 property 5).
    /// A send failing because there are no receivers is not an error — the
    /// bus does not require a subscriber to exist.
    pub async fn publish(&self, deployment_id: &str, event: Event) {
        let timestamp = Utc::now();

        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(deployment_id) {
            let _ = sender.send((timestamp, event.clone()));
        }
        drop(channels);

        self.deliver_webhooks(deployment_id, event, timestamp).await;
    }

    pub async fn register_hook(&self, deployment_id: &str, config: WebhookConfig) {
        self.hooks
            .write()
            .await
            .entry(deployment_id.to_string())
            .or_default()
            .push(config);
    }

    pub async fn unregister_hooks(&self, deployment_id: &str) -> usize {
        self.hooks
            .write()
            .await
            .remove(deployment_id)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    pub async fn hooks(&self, deployment_id: &str) -> Vec<WebhookConfig> {
        self.hooks
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn history(&self, deployment_id: &str, limit: usize) -> Vec<HookInvocation> {
        self.history
            .read()
            .await
            .get(deployment_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    async fn deliver_webhooks(&self, deployment_id: &str, event: Event, timestamp: DateTime<Utc>) {
        let kind = event.kind();
        let hooks = self.hooks.read().await.get(deployment_id).cloned().unwrap_or_default();
        let relevant: Vec<_> = hooks.into_iter().filter(|h| h.events.contains(&kind)).collect();
        if relevant.is_empty() {
            return;
        }

        let envelope = event.to_envelope(deployment_id, timestamp);

        let invocations = futures::future::join_all(relevant.into_iter().map(|hook| {
            let client = self.client.clone();
            let deployment_id = deployment_id.to_string();
            let envelope = envelope.clone();
            async move { invoke_hook(&client, &deployment_id, kind, &hook, &envelope).await }
        }))
        .await;

        let mut history = self.history.write().await;
        let entry = history.entry(deployment_id.to_string()).or_default();
        entry.extend(invocations);
        if entry.len() > HISTORY_LIMIT {
            let drain_to = entry.len() - HISTORY_LIMIT;
            entry.drain(0..drain_to);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Invokes a single webhook with retry, serially across attempts (§4.5).
async fn invoke_hook(
    client: &Client,
    deployment_id: &str,
    kind: EventKind,
    hook: &WebhookConfig,
    payload: &serde_json::Value,
) -> HookInvocation {
    let start = Utc::now();
    let mut last_error = None;
    let mut last_status = None;

    for attempt in 0..hook.retry_count {
        let mut request = client
            .post(&hook.url)
            .timeout(Duration::from_secs_f64(hook.timeout_secs))
            .header("Content-Type", "application/json")
            .header("X-Sandbox-Event", kind.to_string())
            .header("X-Sandbox-Deployment", deployment_id);
        for (key, value) in &hook.headers {
            request = request.header(key, value);
        }

        match request.json(payload).send().await {
            Ok(response) => {
                let status = response.status();
                last_status = Some(status.as_u16());
                if status.is_success() {
                    let elapsed = (Utc::now() - start).num_milliseconds() as f64;
                    tracing::info!(deployment_id, event = %kind, url = %hook.url, status = status.as_u16(), "webhook delivered");
                    return HookInvocation {
                        event: kind,
                        webhook_url: hook.url.clone(),
                        timestamp: start,
                        success: true,
                        status_code: last_status,
                        error: None,
                        response_time_ms: elapsed,
                    };
                }
                last_error = Some(format!("HTTP {}", status.as_u16()));
            }
            Err(e) if e.is_timeout() => last_error = Some("timeout".to_string()),
            Err(e) => last_error = Some(e.to_string()),
        }

        if attempt + 1 < hook.retry_count {
            tokio::time::sleep(Duration::from_secs_f64(hook.retry_delay_secs)).await;
        }
    }

    let elapsed = (Utc::now() - start).num_milliseconds() as f64;
    tracing::warn!(deployment_id, event = %kind, url = %hook.url, error = ?last_error, "webhook delivery failed after retries");
    HookInvocation {
        event: kind,
        webhook_url: hook.url.clone(),
        timestamp: start,
        success: false,
        status_code: last_status,
        error: last_error,
        response_time_ms: elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn webhook_succeeds_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let hook = WebhookConfig {
            url: format!("{}/hook", server.uri()),
            events: vec![EventKind::Started],
            headers: HashMap::new(),
            timeout_secs: 5.0,
            retry_count: 3,
            retry_delay_secs: 0.0,
        };
        bus.register_hook("abc", hook).await;

        bus.publish(
            "abc",
            Event::Started {
                image: "ex/app:1".to_string(),
                url: "https://sandbox.example.com/abc/".to_string(),
            },
        )
        .await;

        let history = bus.history("abc", 20).await;
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].status_code, Some(200));

        server.verify().await;
    }

    #[tokio::test]
    async fn subscribe_does_not_broadcast_connected() {
        let bus = EventBus::new();
        let (_a, count_a) = bus.subscribe("abc").await;
        assert_eq!(count_a, 1);
        let (mut b, count_b) = bus.subscribe("abc").await;
        assert_eq!(count_b, 2);

        bus.publish("abc", Event::Healthy { url: "u".to_string() }).await;
        let (_, event) = b.recv().await.unwrap();
        assert!(matches!(event, Event::Healthy { .. }));
    }

    #[tokio::test]
    async fn in_order_delivery_with_matching_timestamps() {
        let bus = EventBus::new();
        let (mut a, _) = bus.subscribe("abc").await;
        let (mut b, _) = bus.subscribe("abc").await;

        bus.publish("abc", Event::Healthy { url: "u".to_string() }).await;

        let (ts_a, ea) = a.recv().await.unwrap();
        let (ts_b, eb) = b.recv().await.unwrap();
        assert!(matches!(ea, Event::Healthy { .. }));
        assert!(matches!(eb, Event::Healthy { .. }));
        assert_eq!(ts_a, ts_b);
    }
}
