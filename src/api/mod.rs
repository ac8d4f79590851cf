//! API Surface (§4 G, §6). Axum router wiring; response shapes grounded on
//! `original_source/apps/api/src/app/api/*.py`. Route/handler style grounded
//! on the modern-axum idiom of `gateway/src/api/latest.rs` (`State<...>`
//! extractor, explicit route table) rather than the older `RequestParts`
//! style in `gateway/src/auth.rs`.

mod artifacts;
mod auth;
mod deployments;
mod logs;
mod metrics;
mod ws;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::context::AppContext;

pub fn build_router(context: Arc<AppContext>) -> Router {
    let cors = build_cors_layer(&context.config.cors_origins);

    let deploy_routes = Router::new()
        .route("/webhook/deploy", post(deployments::deploy))
        .route("/webhook/deploy/:id", delete(deployments::teardown))
        .route_layer(axum::middleware::from_fn_with_state(
            context.clone(),
            auth::require_webhook_secret,
        ));

    Router::new()
        .merge(deploy_routes)
        .route("/deployments", get(deployments::list))
        .route("/deployments/:id", get(deployments::detail))
        .route("/deployments/:id/logs", get(logs::get_logs))
        .route("/deployments/:id/logs/download", get(logs::download_logs))
        .route("/deployments/:id/artifacts", delete(artifacts::delete_deployment_artifacts))
        .route("/artifacts/upload", post(artifacts::upload))
        .route("/artifacts/:id", get(artifacts::download).delete(artifacts::delete))
        .route("/artifacts/:id/metadata", get(artifacts::metadata))
        .route("/artifacts", get(artifacts::list))
        .route("/artifacts/commit", post(artifacts::commit))
        .route("/metrics", get(metrics::get_metrics))
        .route("/metrics/json", get(metrics::get_metrics_json))
        .route("/ws/status", get(ws::status))
        .route("/ws/progress/:id", get(ws::progress))
        .layer(cors)
        .with_state(context)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        CorsLayer::new()
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
    }
}
