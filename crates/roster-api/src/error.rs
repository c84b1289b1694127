//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  extract::rejection::{JsonRejection, PathRejection, QueryRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use roster_core::error::PortError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The terminal could not be reached.
  #[error("terminal unavailable: {0}")]
  Unavailable(String),

  /// The terminal answered but refused the request.
  #[error("terminal rejected the request: {0}")]
  Upstream(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<roster_core::Error> for ApiError {
  fn from(err: roster_core::Error) -> Self {
    use roster_core::Error as E;
    match err {
      E::Rule(e) => Self::BadRequest(e.to_string()),
      E::Legacy(m) => Self::BadRequest(m),
      E::Port(PortError::Unavailable(m)) => Self::Unavailable(m),
      E::Port(PortError::Rejected(m)) => Self::Upstream(m),
      E::Port(e @ PortError::NotFound(_)) => Self::NotFound(e.to_string()),
      e @ (E::NotPresent(_) | E::NoSnapshot(_)) => Self::NotFound(e.to_string()),
      E::Store(e) => Self::Store(e),
      e @ E::Serialization(_) => Self::Store(Box::new(e)),
    }
  }
}

impl From<PathRejection> for ApiError {
  fn from(rejection: PathRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m.clone()),
      ApiError::Store(e) => {
        tracing::error!(error = %e, "store failure");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
