//! Error surface for the HTTP handlers.
//!
//! By the time a request reaches a handler, the interesting failures have
//! already been converted into data: adapter trouble lives in
//! `AttemptResult.error`, registry trouble is logged and swallowed, and
//! invalid input is rejected inline with a 422 before any orchestration
//! runs. What remains is the genuinely unexpected — a serialization fault,
//! a broken invariant — and [`AppError`] is the single type those collapse
//! into on their way out as HTTP 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// An internal fault that escaped the orchestrator.
///
/// Handlers return `Result<Response, AppError>` so `?` works on anything
/// that converts into [`anyhow::Error`] — reqwest, serde, and io errors
/// alike — without per-call-site mapping. The response body carries the
/// message so callers see *why* the 500 happened; the task's audit trail is
/// left at whatever status was last written.
#[derive(Debug)]
pub struct AppError {
    source: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.source, "internal error escaped the pipeline");
        let body = json!({ "error": self.source.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(source: E) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn renders_as_500_with_the_message_in_the_body() {
        let error: AppError = anyhow::anyhow!("state corrupted").into();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "state corrupted");
    }

    #[tokio::test]
    async fn converts_from_foreign_error_types_via_question_mark() {
        fn fallible() -> Result<(), AppError> {
            let _: serde_json::Value = serde_json::from_str("{ nope")?;
            Ok(())
        }
        let response = fallible().unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
