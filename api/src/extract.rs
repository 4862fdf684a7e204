//! Custom extractors that convert axum rejections to structured AppError responses.
//!
//! Use `AppJson<T>` in place of `axum::Json<T>` for request bodies and
//! `AppQuery<T>` in place of `axum::extract::Query<T>`. `OptionalJson<T>`
//! is for bodies whose fields are all optional: an empty body is `T::default()`.

use axum::{
    Json,
    body::Bytes,
    extract::{
        FromRequest, FromRequestParts, Query, Request,
        rejection::{JsonRejection, QueryRejection},
    },
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// JSON extractor that converts deserialization errors to structured `AppError` responses.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// JSON body that may be left out entirely.
pub struct OptionalJson<T>(pub T);

impl<S, T> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation {
                message: format!("Could not read request body: {}", rejection.body_text()),
                field: Some("body".to_string()),
                received: None,
                docs_hint: None,
            })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalJson(T::default()));
        }
        match Json::<T>::from_bytes(&bytes) {
            Ok(Json(value)) => Ok(OptionalJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Query-string extractor with the same structured error behaviour.
pub struct AppQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(AppQuery(value)),
            Err(rejection) => {
                let body_text = rejection.body_text();
                Err(AppError::Validation {
                    message: format!("Invalid query string: {body_text}"),
                    field: Some(
                        extract_field_from_serde_message(&body_text)
                            .unwrap_or_else(|| "query".to_string()),
                    ),
                    received: None,
                    docs_hint: None,
                })
            }
        }
    }
}

/// Convert a `JsonRejection` to a structured `AppError::Validation`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field_hint = extract_field_from_serde_message(&body_text);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field_hint.unwrap_or("body".to_string())),
        received: None,
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// Pull a field name out of serde's "missing field `x`" / "unknown field `x`" messages.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    for pattern in ["missing field `", "unknown field `"] {
        if let Some(start) = msg.find(pattern) {
            let after = &msg[start + pattern.len()..];
            if let Some(end) = after.find('`') {
                return Some(after[..end].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[test]
    fn extracts_missing_field_name() {
        let msg = "Failed to deserialize: missing field `name` at line 1 column 72";
        assert_eq!(
            extract_field_from_serde_message(msg),
            Some("name".to_string())
        );
    }

    #[test]
    fn extracts_unknown_field_name() {
        let msg = "unknown field `foo`, expected one of `bar`, `baz`";
        assert_eq!(
            extract_field_from_serde_message(msg),
            Some("foo".to_string())
        );
    }

    #[test]
    fn returns_none_for_generic_error() {
        let msg = "invalid type: string, expected u64";
        assert_eq!(extract_field_from_serde_message(msg), None);
    }

    #[derive(Deserialize)]
    struct NamedBody {
        #[allow(dead_code)]
        name: String,
    }

    async fn echo(AppJson(_body): AppJson<NamedBody>) -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }

    #[derive(Deserialize, Default)]
    struct NoteBody {
        note: Option<String>,
    }

    async fn note(OptionalJson(body): OptionalJson<NoteBody>) -> String {
        body.note.unwrap_or_else(|| "none".to_string())
    }

    async fn post_note(body: &'static str) -> (StatusCode, String) {
        let app = Router::new().route("/", post(note));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn optional_body_defaults_when_empty() {
        assert_eq!(post_note("").await, (StatusCode::OK, "none".to_string()));
        assert_eq!(post_note(" \n").await, (StatusCode::OK, "none".to_string()));
        assert_eq!(
            post_note(r#"{"note":"hi"}"#).await,
            (StatusCode::OK, "hi".to_string())
        );
        assert_eq!(post_note("{bad").await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_json_becomes_structured_400() {
        let app = Router::new().route("/", post(echo));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "name");
    }
}
