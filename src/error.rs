use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{ser::SerializeMap, Serialize};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("webhook secret mismatch")]
    AuthFailure,

    #[error("record could not be found")]
    NotFound,

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("container engine error: {0}")]
    DriverError(String),

    #[error("artifact {artifact_id} failed integrity check")]
    IntegrityError { artifact_id: String },

    #[error("artifact row exists without backing file")]
    CorruptStore,

    #[error("external call failed: {0}")]
    TransientExternal(String),

    #[error("shutdown in progress")]
    Canceled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", &format!("{:?}", self))?;
        map.serialize_entry("message", &self.to_string())?;
        map.end()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = match &self {
            Error::AuthFailure => StatusCode::UNAUTHORIZED,
            Error::NotFound | Error::CorruptStore => StatusCode::NOT_FOUND,
            Error::ValidationError(_) => StatusCode::BAD_REQUEST,
            Error::DriverError(_)
            | Error::IntegrityError { .. }
            | Error::TransientExternal(_)
            | Error::Database(_)
            | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Canceled => StatusCode::SERVICE_UNAVAILABLE,
        };

        if !matches!(self, Error::AuthFailure) {
            tracing::error!(error = %self, "request failed");
        }

        (
            code,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Json(json!({ "message": self })),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
