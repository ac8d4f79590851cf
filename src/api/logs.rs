//! Log endpoints, grounded on `original_source/.../api/logs.py`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::context::AppContext;
use crate::domain::Deployment;
use crate::error::{Error, Result};
use crate::logs::{stream_logs, LogEvent};

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_tail")]
    tail: usize,
    #[serde(default)]
    follow: bool,
    #[serde(default)]
    #[allow(dead_code)]
    timestamps: bool,
}

fn default_tail() -> usize {
    100
}

#[tracing::instrument(skip(context))]
pub async fn get_logs(
    State(context): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Response> {
    let container_name = Deployment::container_name(&context.config.container_prefix, &deployment_id);

    if query.follow {
        let events = stream_logs(context.driver.clone(), container_name).map(to_sse);
        let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
        return Ok((
            [
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
                (header::HeaderName::from_static("x-accel-buffering"), "no"),
            ],
            sse,
        )
            .into_response());
    }

    let logs = context
        .driver
        .logs(&container_name, query.tail)
        .await
        .map_err(|e| Error::DriverError(e.to_string()))?;

    Ok(Json(json!({
        "deployment_id": deployment_id,
        "container": container_name,
        "lines": logs.lines().count(),
        "logs": logs,
    }))
    .into_response())
}

fn to_sse(event: LogEvent) -> std::result::Result<SseEvent, Infallible> {
    Ok(match event {
        LogEvent::Line(line) => SseEvent::default().data(line),
        LogEvent::Error(message) => SseEvent::default().event("error").data(message),
        LogEvent::Close => SseEvent::default().event("close").data("Stream ended"),
    })
}

#[tracing::instrument(skip(context))]
pub async fn download_logs(
    State(context): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
) -> Result<Response> {
    let container_name = Deployment::container_name(&context.config.container_prefix, &deployment_id);
    let logs = context
        .driver
        .logs(&container_name, 10_000)
        .await
        .map_err(|e| Error::DriverError(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{deployment_id}.log\""),
            ),
        ],
        logs,
    )
        .into_response())
}
