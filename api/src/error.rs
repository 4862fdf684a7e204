use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eve_copilot_core::agent::AgentError;
use eve_copilot_core::error::{self, ApiError};
use eve_copilot_core::production::ProductionError;
use eve_copilot_core::shopping::ShoppingError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing credentials (401)
    Unauthorized { message: String },
    /// Credentials present but not accepted (403)
    Forbidden { message: String },
    /// Resource not found (404)
    NotFound { resource: String },
    /// State conflict, e.g. writing to an archived session (409)
    Conflict { message: String },
    /// Plan lifecycle violation (409)
    InvalidTransition { from: String, to: String },
    /// ESI or another upstream failed (502)
    Upstream(String),
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: resource.into(),
        }
    }
}

fn api_error(
    code: &str,
    message: String,
    field: Option<String>,
    received: Option<serde_json::Value>,
    docs_hint: Option<String>,
) -> ApiError {
    ApiError {
        error: code.to_string(),
        message,
        field,
        received,
        request_id: uuid::Uuid::now_v7().to_string(),
        docs_hint,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                api_error(
                    error::codes::VALIDATION_FAILED,
                    message,
                    field,
                    received,
                    docs_hint,
                ),
            ),
            AppError::Unauthorized { message } => (
                StatusCode::UNAUTHORIZED,
                api_error(
                    error::codes::UNAUTHORIZED,
                    message,
                    None,
                    None,
                    Some("Send 'Authorization: Bearer <COPILOT_API_TOKEN>'".to_string()),
                ),
            ),
            AppError::Forbidden { message } => (
                StatusCode::FORBIDDEN,
                api_error(error::codes::FORBIDDEN, message, None, None, None),
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                api_error(
                    error::codes::NOT_FOUND,
                    format!("{resource} not found"),
                    None,
                    None,
                    None,
                ),
            ),
            AppError::Conflict { message } => (
                StatusCode::CONFLICT,
                api_error(error::codes::CONFLICT, message, None, None, None),
            ),
            AppError::InvalidTransition { from, to } => (
                StatusCode::CONFLICT,
                api_error(
                    error::codes::INVALID_TRANSITION,
                    format!("Plan cannot move from '{from}' to '{to}'"),
                    Some("status".to_string()),
                    Some(serde_json::Value::String(from)),
                    Some(
                        "Allowed: proposed -> approved|rejected, approved -> executing|rejected, \
                         executing -> completed|failed"
                            .to_string(),
                    ),
                ),
            ),
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    api_error(error::codes::UPSTREAM_ERROR, msg, None, None, None),
                )
            }
            AppError::Database(err) => {
                if let sqlx::Error::Database(ref db_err) = err {
                    match db_err.code().as_deref() {
                        // foreign_key_violation: the referenced row is gone
                        Some("23503") => {
                            return AppError::not_found("referenced resource").into_response();
                        }
                        // unique_violation
                        Some("23505") => {
                            return AppError::Conflict {
                                message: "Resource already exists".to_string(),
                            }
                            .into_response();
                        }
                        // not_null_violation, check_violation
                        Some("23502") | Some("23514") => {
                            tracing::warn!("Constraint rejected write: {}", db_err.message());
                            return AppError::Validation {
                                message: "Value violates a data constraint".to_string(),
                                field: None,
                                received: None,
                                docs_hint: db_err.constraint().map(|c| format!("Constraint: {c}")),
                            }
                            .into_response();
                        }
                        _ => {}
                    }
                }
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    api_error(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        None,
                        None,
                        None,
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    api_error(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        None,
                        None,
                        None,
                    ),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::InvalidTransition { from, to } => AppError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            AgentError::InvalidPlan { field, message } => AppError::Validation {
                message,
                field: Some(field),
                received: None,
                docs_hint: None,
            },
            AgentError::UnknownValue { kind, value } => AppError::Validation {
                message: format!("unknown {kind} '{value}'"),
                field: None,
                received: Some(serde_json::Value::String(value)),
                docs_hint: None,
            },
        }
    }
}

impl From<ProductionError> for AppError {
    fn from(err: ProductionError) -> Self {
        let field = match err {
            ProductionError::InvalidRuns(_) => "runs",
            ProductionError::InvalidMaterialEfficiency(_) => "me",
        };
        AppError::validation(field, err.to_string())
    }
}

impl From<ShoppingError> for AppError {
    fn from(err: ShoppingError) -> Self {
        let received = match &err {
            ShoppingError::QuantityTooLarge { type_id } => serde_json::json!({"type_id": type_id}),
        };
        AppError::Validation {
            message: err.to_string(),
            field: Some("quantity".to_string()),
            received: Some(received),
            docs_hint: None,
        }
    }
}
