use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a tracked deployment (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Pulling,
    Starting,
    Running,
    Unhealthy,
    Stopping,
    Failed,
    Removed,
}

impl DeploymentState {
    /// States reachable from this one via a single `advance` call.
    pub fn allowed_transitions(self) -> &'static [DeploymentState] {
        use DeploymentState::*;
        match self {
            Pending => &[Pulling, Failed],
            Pulling => &[Starting, Failed],
            Starting => &[Running, Failed],
            Running => &[Stopping, Failed, Unhealthy],
            Unhealthy => &[Running, Stopping, Failed],
            Stopping => &[Removed, Failed],
            Failed => &[],
            Removed => &[],
        }
    }

    pub fn can_advance_to(self, next: DeploymentState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentState::Failed | DeploymentState::Removed)
    }
}

/// A tracked deployment. Merges the two record shapes the source kept separate
/// (see SPEC_FULL.md §9) into one enriched record.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: String,
    pub image: String,
    pub port: u16,
    pub env: HashMap<String, String>,
    pub ttl_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub state: DeploymentState,
    pub container_id: Option<String>,
    pub url: String,
}

impl Deployment {
    pub fn container_name(prefix: &str, deployment_id: &str) -> String {
        format!("{prefix}-{deployment_id}")
    }
}

/// Resource caps applied at deploy time.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    pub memory_mb: Option<u64>,
    pub cpu_nanos: Option<u64>,
    pub pids_limit: Option<i64>,
}

/// Optional container healthcheck, translated into the engine's native healthcheck.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub path: String,
    pub port: u16,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub retries: u32,
    pub start_period_secs: u64,
}

/// Artifact metadata row (§3, §4.2).
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactMetadata {
    pub id: String,
    pub deployment_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    pub path: String,
}

impl ArtifactMetadata {
    pub fn url(&self) -> String {
        format!("/api/artifacts/{}", self.id)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "deployment_id": self.deployment_id,
            "filename": self.filename,
            "content_type": self.content_type,
            "size": self.size,
            "sha256": self.sha256,
            "created_at": self.created_at.to_rfc3339(),
            "url": self.url(),
        })
    }
}

/// Lifecycle webhook registration (§3).
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub events: Vec<EventKind>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: f64,
    pub retry_count: u32,
    pub retry_delay_secs: f64,
}

impl WebhookConfig {
    pub fn all_events(url: String) -> Self {
        Self {
            url,
            events: EventKind::all().to_vec(),
            headers: HashMap::new(),
            timeout_secs: 10.0,
            retry_count: 3,
            retry_delay_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Started,
    Pulling,
    Healthy,
    Unhealthy,
    LogLine,
    ArtifactUploaded,
    Completed,
    Failed,
    Stopped,
    Error,
    Disconnected,
    Keepalive,
}

impl EventKind {
    pub fn all() -> &'static [EventKind] {
        use EventKind::*;
        &[
            Connected,
            Started,
            Pulling,
            Healthy,
            Unhealthy,
            LogLine,
            ArtifactUploaded,
            Completed,
            Failed,
            Stopped,
            Error,
            Disconnected,
            Keepalive,
        ]
    }
}

/// A lifecycle event. Payloads are a tagged variant (§9 "Dynamic payload maps")
/// rather than an open map, but still serialize to the same wire shape.
#[derive(Debug, Clone)]
pub enum Event {
    Connected { subscriber_count: usize },
    Started { image: String, url: String },
    Pulling { image: String },
    Healthy { url: String },
    Unhealthy { reason: String },
    LogLine { line: String },
    ArtifactUploaded { artifact_id: String, filename: String },
    Completed,
    Failed { error: String },
    Stopped { reason: String },
    Error { message: String },
    Disconnected,
    Keepalive,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected { .. } => EventKind::Connected,
            Event::Started { .. } => EventKind::Started,
            Event::Pulling { .. } => EventKind::Pulling,
            Event::Healthy { .. } => EventKind::Healthy,
            Event::Unhealthy { .. } => EventKind::Unhealthy,
            Event::LogLine { .. } => EventKind::LogLine,
            Event::ArtifactUploaded { .. } => EventKind::ArtifactUploaded,
            Event::Completed => EventKind::Completed,
            Event::Failed { .. } => EventKind::Failed,
            Event::Stopped { .. } => EventKind::Stopped,
            Event::Error { .. } => EventKind::Error,
            Event::Disconnected => EventKind::Disconnected,
            Event::Keepalive => EventKind::Keepalive,
        }
    }

    fn data(&self) -> serde_json::Value {
        match self {
            Event::Connected { subscriber_count } => {
                serde_json::json!({ "subscriber_count": subscriber_count })
            }
            Event::Started { image, url } => serde_json::json!({ "image": image, "url": url }),
            Event::Pulling { image } => serde_json::json!({ "image": image }),
            Event::Healthy { url } => serde_json::json!({ "url": url }),
            Event::Unhealthy { reason } => serde_json::json!({ "reason": reason }),
            Event::LogLine { line } => serde_json::json!({ "line": line }),
            Event::ArtifactUploaded {
                artifact_id,
                filename,
            } => serde_json::json!({ "artifact_id": artifact_id, "filename": filename }),
            Event::Completed => serde_json::json!({}),
            Event::Failed { error } => serde_json::json!({ "error": error }),
            Event::Stopped { reason } => serde_json::json!({ "reason": reason }),
            Event::Error { message } => serde_json::json!({ "message": message }),
            Event::Disconnected => serde_json::json!({}),
            Event::Keepalive => serde_json::json!({}),
        }
    }

    /// Wire envelope: `{event, deployment_id, timestamp, data}`.
    pub fn to_envelope(&self, deployment_id: &str, timestamp: DateTime<Utc>) -> serde_json::Value {
        serde_json::json!({
            "event": self.kind().to_string(),
            "deployment_id": deployment_id,
            "timestamp": timestamp.to_rfc3339(),
            "data": self.data(),
        })
    }
}

/// Ring-buffer entry recording one webhook attempt (§3).
#[derive(Debug, Clone, Serialize)]
pub struct HookInvocation {
    pub event: EventKind,
    pub webhook_url: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub response_time_ms: f64,
}

/// Outcome of one Reaper cycle (§4.4).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupResult {
    pub expired_count: usize,
    pub orphan_count: usize,
    pub failed_count: usize,
    pub containers_removed: Vec<String>,
    pub errors: Vec<String>,
}
