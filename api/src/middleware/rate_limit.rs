use axum::http::Response;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

/// Rate limit for POST /api/market/refresh: 12 requests per minute per IP.
/// Each call fans out to one ESI request per trade hub.
pub fn esi_refresh_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(12)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for esi_refresh"),
    )
    .error_handler(json_error_handler)
}

/// Rate limit for agent write routes: 120 requests/minute per IP.
pub fn agent_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(500)
            .burst_size(60)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for agent"),
    )
    .error_handler(json_error_handler)
}

/// Returns JSON in ApiError format with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            wait_time.to_string(),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            String::new(),
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => {
            (code, String::new(), msg.unwrap_or_default().to_string())
        }
    };

    let body = serde_json::json!({
        "error": eve_copilot_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = Response::new(axum::body::Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json"),
    );

    if !retry_after.is_empty() {
        if let Ok(value) = retry_after.parse() {
            response.headers_mut().insert("retry-after", value);
        }
    }

    response
}
