//! Error taxonomy for the grading backend and its HTTP mapping.
//!
//! Validation problems that should not stop a computation are returned as
//! `warnings` on the result types instead of going through these errors.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;

/// External JSON did not match the schema we expect at the boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
  #[error("{what}: invalid JSON: {message}")]
  Json { what: &'static str, message: String },
  #[error("{what}: missing field `{field}`")]
  MissingField { what: &'static str, field: &'static str },
  #[error("{what}: field `{field}` out of range: {value}")]
  OutOfRange { what: &'static str, field: &'static str, value: f64 },
  #[error("{what}: unexpected shape: {message}")]
  Shape { what: &'static str, message: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
  #[error("{kind} `{id}` not found")]
  NotFound { kind: &'static str, id: String },
  #[error("conflict: {0}")]
  Conflict(String),
  #[allow(dead_code)]
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

/// Failures talking to an HTTP collaborator (detection service, LLM API).
#[derive(Debug, Error)]
pub enum UpstreamError {
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("upstream HTTP {status}: {message}")]
  Status { status: u16, message: String },
  #[error(transparent)]
  Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum GradingError {
  #[error("validation failed: {0}")]
  Validation(String),
  #[error("criterion `{criterion}` has no level scored {score}")]
  InvalidSelection { criterion: String, score: f64 },
  #[error("role `{role}` may not {action}")]
  Forbidden { action: &'static str, role: &'static str },
  #[error("missing or invalid actor headers")]
  Unauthenticated,
  #[error("invalid transition: {0}")]
  InvalidTransition(String),
  #[error("{0} is not configured")]
  Disabled(&'static str),
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Upstream(#[from] UpstreamError),
}

impl GradingError {
  pub fn code(&self) -> &'static str {
    match self {
      GradingError::Validation(_) => "validation_failed",
      GradingError::InvalidSelection { .. } => "invalid_selection",
      GradingError::Forbidden { .. } => "forbidden",
      GradingError::Unauthenticated => "unauthenticated",
      GradingError::InvalidTransition(_) => "invalid_transition",
      GradingError::Disabled(_) => "disabled",
      GradingError::Parse(_) => "parse_error",
      GradingError::Store(StoreError::NotFound { .. }) => "not_found",
      GradingError::Store(StoreError::Conflict(_)) => "conflict",
      GradingError::Store(StoreError::Unavailable(_)) => "store_unavailable",
      GradingError::Upstream(_) => "upstream_error",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      GradingError::Validation(_) | GradingError::InvalidSelection { .. } => StatusCode::BAD_REQUEST,
      GradingError::Forbidden { .. } => StatusCode::FORBIDDEN,
      GradingError::Unauthenticated => StatusCode::UNAUTHORIZED,
      GradingError::InvalidTransition(_) => StatusCode::CONFLICT,
      GradingError::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
      GradingError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
      GradingError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
      GradingError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
      GradingError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
      GradingError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
  }
}

/// Guard shared by every instructor-only operation.
pub fn require_grader(actor: &crate::domain::CurrentActor, action: &'static str) -> Result<(), GradingError> {
  if actor.can_grade() {
    Ok(())
  } else {
    Err(GradingError::Forbidden { action, role: actor.role.as_str() })
  }
}

impl IntoResponse for GradingError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = Json(json!({ "error": { "code": self.code(), "message": self.to_string() } }));
    (status, body).into_response()
  }
}
