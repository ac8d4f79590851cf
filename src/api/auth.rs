//! Webhook secret check, grounded on `original_source/.../api/deployments.py`'s
//! `_verify_secret`. Applied only to the deploy routes, not globally.

use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::context::AppContext;
use crate::error::Error;

pub async fn require_webhook_secret<B>(
    State(context): State<Arc<AppContext>>,
    request: Request<B>,
    next: Next<B>,
) -> Result<Response, Error> {
    if let Some(expected) = context.config.webhook_secret() {
        let provided = request
            .headers()
            .get("X-Sandbox-Secret")
            .and_then(|v| v.to_str().ok());

        if provided != Some(expected) {
            return Err(Error::AuthFailure);
        }
    }

    Ok(next.run(request).await)
}
