//! Deployment endpoints, grounded on `original_source/.../api/deployments.py`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::AppContext;
use crate::domain::{Deployment, DeploymentState, Event, HealthCheck, ResourceLimits};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub image: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ttl_minutes: Option<u32>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub cpu_limit_nanos: Option<u64>,
    #[serde(default)]
    pub healthcheck_path: Option<String>,
}

fn random_id() -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..12).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}

#[tracing::instrument(skip(context, request))]
pub async fn deploy(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<DeployRequest>,
) -> Json<serde_json::Value> {
    let deployment_id = request.path_prefix.clone().unwrap_or_else(random_id);
    let container_name = Deployment::container_name(&context.config.container_prefix, &deployment_id);
    let url = format!("https://{}/{}/", context.config.sandbox_domain, deployment_id);
    let ttl_minutes = request.ttl_minutes.unwrap_or(context.config.reaper_default_ttl_minutes);

    let deployment = Deployment {
        id: deployment_id.clone(),
        image: request.image.clone(),
        port: request.port,
        env: request.env.clone(),
        ttl_minutes,
        created_at: Utc::now(),
        state: DeploymentState::Pending,
        container_id: None,
        url: url.clone(),
    };

    // Idempotent redeploy: an existing id is simply dropped and re-reserved,
    // mirroring the driver's own force-remove-then-create semantics (§8 property 3).
    context.registry.drop_deployment(&deployment_id).await;
    if let Err(e) = context.registry.reserve(deployment).await {
        return Json(json!({ "status": "failed", "deployment_id": deployment_id, "error": e.to_string() }));
    }

    let result = deploy_inner(&context, &deployment_id, &container_name, &request).await;

    match result {
        Ok(container_id) => {
            context.metrics.deployments_total.with_label_values(&["success"]).inc();
            Json(json!({
                "status": "deployed",
                "deployment_id": deployment_id,
                "url": url,
                "container_id": container_id,
            }))
        }
        Err(e) => {
            context.metrics.deployments_total.with_label_values(&["failed"]).inc();
            let _ = context
                .registry
                .advance(&deployment_id, DeploymentState::Failed, |_| {})
                .await;
            context
                .events
                .publish(&deployment_id, Event::Failed { error: e.to_string() })
                .await;
            tracing::error!(deployment_id, error = %e, "deploy failed");
            Json(json!({ "status": "failed", "deployment_id": deployment_id, "error": e.to_string() }))
        }
    }
}

async fn deploy_inner(
    context: &Arc<AppContext>,
    deployment_id: &str,
    container_name: &str,
    request: &DeployRequest,
) -> Result<String> {
    context
        .registry
        .advance(deployment_id, DeploymentState::Pulling, |_| {})
        .await?;
    context
        .events
        .publish(deployment_id, Event::Pulling { image: request.image.clone() })
        .await;

    context
        .registry
        .advance(deployment_id, DeploymentState::Starting, |_| {})
        .await?;

    let limits = ResourceLimits {
        memory_mb: request.memory_limit_mb,
        cpu_nanos: request.cpu_limit_nanos,
        pids_limit: None,
    };
    let healthcheck = request.healthcheck_path.clone().map(|path| HealthCheck {
        path,
        port: request.port,
        interval_secs: 30,
        timeout_secs: 5,
        retries: 3,
        start_period_secs: 5,
    });

    let container_id = context
        .driver
        .deploy(
            &request.image,
            container_name,
            deployment_id,
            request.port,
            request.env.clone(),
            limits,
            healthcheck,
        )
        .await
        .map_err(|e| Error::DriverError(e.to_string()))?;

    let deployment = context
        .registry
        .advance(deployment_id, DeploymentState::Running, |d| {
            d.container_id = Some(container_id.clone());
        })
        .await?;

    context
        .reaper
        .register(deployment_id, deployment.created_at, deployment.ttl_minutes)
        .await;

    let url = format!("https://{}/{}/", context.config.sandbox_domain, deployment_id);
    context
        .events
        .publish(
            deployment_id,
            Event::Started { image: request.image.clone(), url: url.clone() },
        )
        .await;
    context
        .events
        .publish(deployment_id, Event::Healthy { url })
        .await;

    Ok(container_id)
}

#[derive(Debug, Serialize)]
pub struct TeardownResponse {
    status: &'static str,
    deployment_id: String,
}

/// Idempotent: a second teardown is also a success (§7 NotFound-is-success).
#[tracing::instrument(skip(context))]
pub async fn teardown(
    State(context): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<TeardownResponse>> {
    let container_name = Deployment::container_name(&context.config.container_prefix, &deployment_id);
    context
        .driver
        .teardown(&container_name)
        .await
        .map_err(|e| Error::DriverError(e.to_string()))?;

    context.registry.drop_deployment(&deployment_id).await;
    context.reaper.unregister(&deployment_id).await;
    context.events.unregister_hooks(&deployment_id).await;
    context
        .events
        .publish(&deployment_id, Event::Stopped { reason: "manual".to_string() })
        .await;

    Ok(Json(TeardownResponse {
        status: "removed",
        deployment_id,
    }))
}

pub async fn list(State(context): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let deployments = context.registry.list().await;
    let containers = context.driver.list_sandbox_containers().await.unwrap_or_default();
    Json(json!({ "deployments": deployments, "containers": containers }))
}

#[tracing::instrument(skip(context))]
pub async fn detail(
    State(context): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deployment = context.registry.get(&deployment_id).await.ok_or(Error::NotFound)?;
    let container_name = Deployment::container_name(&context.config.container_prefix, &deployment_id);

    let uptime_seconds = (Utc::now() - deployment.created_at).num_seconds().max(0);

    let (container_state, resource_usage) = match context.driver.stats(&container_name).await {
        Ok(stats) => ("running".to_string(), Some(json!({
            "cpu_percent": stats.cpu_percent,
            "memory_usage_bytes": stats.memory_usage_bytes,
            "memory_limit_bytes": stats.memory_limit_bytes,
            "memory_percent": stats.memory_percent,
            "network_rx_bytes": stats.network_rx_bytes,
            "network_tx_bytes": stats.network_tx_bytes,
            "pids": stats.pids,
        }))),
        Err(_) => ("unknown".to_string(), None),
    };

    let health_status = context
        .driver
        .health(&container_name)
        .await
        .map(|h| h.status)
        .unwrap_or_else(|_| "unknown".to_string());

    Ok(Json(json!({
        "deployment_id": deployment.id,
        "image": deployment.image,
        "port": deployment.port,
        "status": deployment.state.to_string(),
        "container_id": deployment.container_id,
        "url": deployment.url,
        "ttl_minutes": deployment.ttl_minutes,
        "created_at": deployment.created_at.to_rfc3339(),
        "container_state": container_state,
        "health_status": health_status,
        "uptime_seconds": uptime_seconds,
        "resource_usage": resource_usage,
        "logs_url": format!("/deployments/{}/logs", deployment.id),
        "artifacts_url": format!("/artifacts?deployment_id={}", deployment.id),
        "metrics_url": "/metrics",
        "websocket_url": format!("/ws/progress/{}", deployment.id),
    })))
}
