//! Metrics endpoints, grounded on `original_source/.../api/metrics.py`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::context::AppContext;

#[tracing::instrument(skip(context))]
pub async fn get_metrics(State(context): State<Arc<AppContext>>) -> Response {
    refresh_gauges(&context).await;
    let body = context.metrics.render();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

pub async fn get_metrics_json(State(context): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    refresh_gauges(&context).await;
    let deployments = context.registry.list().await;
    let containers = context.driver.list_sandbox_containers().await.unwrap_or_default();

    Json(json!({
        "deployments_active": deployments.len(),
        "containers_running": containers.iter().filter(|c| c.status == "running").count(),
        "deployments_total": context.metrics.deployments_total.with_label_values(&["success"]).get()
            + context.metrics.deployments_total.with_label_values(&["failed"]).get(),
        "artifacts_total": context.metrics.artifacts_total.get(),
    }))
}

async fn refresh_gauges(context: &AppContext) {
    let deployments = context.registry.list().await;
    context.metrics.deployments_active.set(deployments.len() as f64);

    let running = context
        .driver
        .list_sandbox_containers()
        .await
        .map(|containers| containers.iter().filter(|c| c.status == "running").count())
        .unwrap_or(0);
    context.metrics.containers_running.set(running as f64);
}
