//! Artifact endpoints, grounded on `original_source/.../api/artifacts.py`.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::context::AppContext;
use crate::domain::Event;
use crate::error::{Error, Result};

#[tracing::instrument(skip(context, multipart))]
pub async fn upload(
    State(context): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut deployment_id = None;
    let mut filename = None;
    let mut content_type = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::ValidationError(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "deployment_id" => {
                deployment_id = Some(field.text().await.map_err(|e| Error::ValidationError(e.to_string()))?);
            }
            "file" => {
                filename = field.file_name().map(str::to_string);
                content_type = field.content_type().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| Error::ValidationError(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let deployment_id = deployment_id.ok_or_else(|| Error::ValidationError("missing deployment_id field".into()))?;
    let bytes = bytes.ok_or_else(|| Error::ValidationError("missing file field".into()))?;
    if bytes.is_empty() {
        return Err(Error::ValidationError("uploaded file is empty".into()));
    }

    let filename = filename.unwrap_or_else(|| "artifact.bin".to_string());
    let content_type = match content_type {
        Some(ct) if ct != "application/octet-stream" => ct,
        _ => mime_guess::from_path(&filename)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    };

    let metadata = context.storage.save(&deployment_id, &filename, &bytes, &content_type).await?;

    context.metrics.artifacts_total.inc();
    context.metrics.artifact_upload_bytes.observe(bytes.len() as f64);
    context
        .events
        .publish(
            &deployment_id,
            Event::ArtifactUploaded {
                artifact_id: metadata.id.clone(),
                filename: metadata.filename.clone(),
            },
        )
        .await;

    Ok(Json(metadata.to_json()))
}

#[tracing::instrument(skip(context))]
pub async fn download(
    State(context): State<Arc<AppContext>>,
    Path(artifact_id): Path<String>,
) -> Result<Response> {
    let (metadata, content) = context.storage.get(&artifact_id).await?.ok_or(Error::NotFound)?;

    Ok((
        [
            (header::CONTENT_TYPE, metadata.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", metadata.filename),
            ),
            ("X-Artifact-ID".parse().unwrap(), metadata.id.clone()),
            ("X-Artifact-SHA256".parse().unwrap(), metadata.sha256.clone()),
        ],
        content,
    )
        .into_response())
}

pub async fn metadata(
    State(context): State<Arc<AppContext>>,
    Path(artifact_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let (metadata, _) = context.storage.get(&artifact_id).await?.ok_or(Error::NotFound)?;
    Ok(Json(metadata.to_json()))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    deployment_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list(
    State(context): State<Arc<AppContext>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>> {
    let artifacts = context
        .storage
        .list(query.deployment_id.as_deref(), query.limit, query.offset)
        .await?;
    Ok(Json(json!({
        "artifacts": artifacts.iter().map(|a| a.to_json()).collect::<Vec<_>>(),
        "count": artifacts.len(),
    })))
}

pub async fn delete(
    State(context): State<Arc<AppContext>>,
    Path(artifact_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deleted = context.storage.delete(&artifact_id).await?;
    if !deleted {
        return Err(Error::NotFound);
    }
    Ok(Json(json!({ "status": "deleted", "artifact_id": artifact_id })))
}

pub async fn delete_deployment_artifacts(
    State(context): State<Arc<AppContext>>,
    Path(deployment_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let count = context.storage.delete_deployment(&deployment_id).await?;
    Ok(Json(json!({ "status": "deleted", "deployment_id": deployment_id, "count": count })))
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    deployment_id: String,
    repo: String,
    #[serde(default = "default_base_branch")]
    base_branch: String,
    #[serde(default = "default_commit_message")]
    message: String,
    #[serde(default)]
    create_pr: bool,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_commit_message() -> String {
    "Add agent artifacts".to_string()
}

/// Mirrors the source's non-propagating error handling: both a validation
/// failure and an unexpected git/network error come back as a 200 JSON body
/// with a `status` field, never as an HTTP error.
#[tracing::instrument(skip(context))]
pub async fn commit(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<CommitRequest>,
) -> Json<serde_json::Value> {
    let result = context
        .git
        .commit_artifacts(
            &context.storage,
            &request.deployment_id,
            &request.repo,
            &request.base_branch,
            &request.message,
            request.create_pr,
        )
        .await;

    match result {
        Ok(commit) => {
            context.metrics.artifact_commits_total.with_label_values(&["success"]).inc();
            Json(json!({
                "status": "committed",
                "commit_sha": commit.sha,
                "commit_url": commit.commit_url,
                "branch": commit.branch,
                "pr_url": commit.pr_url,
            }))
        }
        Err(Error::ValidationError(message)) => {
            context.metrics.artifact_commits_total.with_label_values(&["failed"]).inc();
            Json(json!({ "status": "failed", "deployment_id": request.deployment_id, "error": message }))
        }
        Err(e) => {
            context.metrics.artifact_commits_total.with_label_values(&["error"]).inc();
            tracing::error!(deployment_id = request.deployment_id, error = %e, "artifact commit error");
            Json(json!({ "status": "error", "deployment_id": request.deployment_id, "error": e.to_string() }))
        }
    }
}
