use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tower::{Layer, Service, ServiceExt};

use crate::error::AppError;

/// SHA-256 of a token. Comparing digests keeps the comparison length-independent.
fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Tower Layer guarding `/api/*` with a shared bearer token.
///
/// Without a configured token every request passes (local single-user setup).
/// With one: missing header → 401, wrong token → 403.
#[derive(Clone)]
pub struct RequireTokenLayer {
    expected: Option<Arc<[u8; 32]>>,
}

impl RequireTokenLayer {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            expected: token.map(|t| Arc::new(digest(t))),
        }
    }
}

impl<S> Layer<S> for RequireTokenLayer {
    type Service = RequireTokenService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireTokenService {
            inner,
            expected: self.expected.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequireTokenService<S> {
    inner: S,
    expected: Option<Arc<[u8; 32]>>,
}

impl<S> Service<Request> for RequireTokenService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);

        let decision = match &self.expected {
            Some(expected) if requires_token(&req) => check_token(&req, expected),
            _ => Ok(()),
        };

        Box::pin(async move {
            match decision {
                Ok(()) => Ok(ready.oneshot(req).await.into_response()),
                Err(err) => Ok(err.into_response()),
            }
        })
    }
}

fn requires_token(req: &Request) -> bool {
    req.method() != Method::OPTIONS && req.uri().path().starts_with("/api/")
}

/// Extract bearer token from Authorization header (synchronous, no body access).
fn extract_bearer_token(req: &Request) -> Option<&str> {
    let auth_header = req.headers().get("authorization")?.to_str().ok()?;
    auth_header.strip_prefix("Bearer ").map(str::trim)
}

fn check_token(req: &Request, expected: &[u8; 32]) -> Result<(), AppError> {
    let token = extract_bearer_token(req).ok_or_else(|| AppError::Unauthorized {
        message: "Missing or malformed Authorization header".to_string(),
    })?;

    if digest(token) == *expected {
        Ok(())
    } else {
        tracing::warn!(path = %req.uri().path(), "rejected request with wrong api token");
        Err(AppError::Forbidden {
            message: "API token not accepted".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;

    fn app(token: Option<&str>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/shopping/lists", get(|| async { "[]" }))
            .layer(RequireTokenLayer::new(token))
    }

    async fn status(app: Router, path: &str, auth: Option<&str>) -> StatusCode {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(a) = auth {
            builder = builder.header("authorization", a);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn no_configured_token_lets_everything_through() {
        assert_eq!(status(app(None), "/api/shopping/lists", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_is_401_and_wrong_token_is_403() {
        let secret = Some("s3cret");
        assert_eq!(
            status(app(secret), "/api/shopping/lists", None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(app(secret), "/api/shopping/lists", Some("Basic abc")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(app(secret), "/api/shopping/lists", Some("Bearer nope")).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(app(secret), "/api/shopping/lists", Some("Bearer s3cret")).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn health_stays_public() {
        assert_eq!(status(app(Some("s3cret")), "/health", None).await, StatusCode::OK);
    }
}
