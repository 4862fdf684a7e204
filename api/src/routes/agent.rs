//! Agent runtime: chat sessions, their messages, proposed plans and the
//! append-only audit log that records every state change.

pub mod events;
pub mod plans;
pub mod stream;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use eve_copilot_core::agent::{AutonomyLevel, Message, MessageRole, Session, event_types};
use eve_copilot_core::error::ApiError;

use crate::error::AppError;
use crate::extract::{AppJson, AppQuery};
use crate::state::AppState;

use events::list_events;
use plans::{
    approve_plan, complete_plan, fail_plan, get_plan, list_plans, propose_plan, record_step,
    reject_plan, start_plan,
};
use stream::stream_events;

const MAX_TITLE_LEN: usize = 200;
const MAX_MESSAGE_LEN: usize = 100_000;

/// Session, message and plan writes. Rate limited in main.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agent/sessions", post(create_session))
        .route(
            "/api/agent/sessions/{id}",
            patch(update_session).delete(delete_session),
        )
        .route("/api/agent/sessions/{id}/messages", post(add_message))
        .route("/api/agent/sessions/{id}/plans", post(propose_plan))
        .route("/api/agent/plans/{plan_id}/approve", post(approve_plan))
        .route("/api/agent/plans/{plan_id}/reject", post(reject_plan))
        .route("/api/agent/plans/{plan_id}/start", post(start_plan))
        .route("/api/agent/plans/{plan_id}/complete", post(complete_plan))
        .route("/api/agent/plans/{plan_id}/fail", post(fail_plan))
        .route(
            "/api/agent/plans/{plan_id}/steps/{index}",
            post(record_step),
        )
}

/// Read-only agent routes.
pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/api/agent/sessions", get(list_sessions))
        .route("/api/agent/sessions/{id}", get(get_session))
        .route("/api/agent/sessions/{id}/messages", get(list_messages))
        .route("/api/agent/sessions/{id}/plans", get(list_plans))
        .route("/api/agent/sessions/{id}/events", get(list_events))
        .route("/api/agent/plans/{plan_id}", get(get_plan))
}

/// Long-lived SSE route, kept apart so request rate limits do not apply to it.
pub fn stream_router() -> Router<AppState> {
    Router::new().route("/api/agent/sessions/{id}/stream", get(stream_events))
}

// --- Row types ---

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    character_id: Option<i64>,
    title: Option<String>,
    autonomy_level: String,
    is_archived: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, AppError> {
        let autonomy_level = self.autonomy_level.parse::<AutonomyLevel>().map_err(|e| {
            AppError::Internal(format!("session {} has corrupt autonomy level: {e}", self.id))
        })?;
        Ok(Session {
            id: self.id,
            character_id: self.character_id,
            title: self.title,
            autonomy_level,
            is_archived: self.is_archived,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    role: String,
    content: String,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, AppError> {
        let role = self.role.parse::<MessageRole>().map_err(|e| {
            AppError::Internal(format!("message {} has corrupt role: {e}", self.id))
        })?;
        Ok(Message {
            id: self.id,
            session_id: self.session_id,
            role,
            content: self.content,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, character_id, title, autonomy_level, is_archived, created_at, updated_at";

/// Load a session, optionally locking its row for the rest of the transaction.
pub(crate) async fn fetch_session(
    conn: &mut sqlx::PgConnection,
    session_id: Uuid,
    for_update: bool,
) -> Result<Session, AppError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM agent_sessions WHERE id = $1{lock}"
    ))
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found(format!("agent session {session_id}")))?
    .into_session()
}

/// Archived sessions are read-only.
pub(crate) fn ensure_active(session: &Session) -> Result<(), AppError> {
    if session.is_archived {
        return Err(AppError::Conflict {
            message: format!("session {} is archived", session.id),
        });
    }
    Ok(())
}

async fn touch_session(conn: &mut sqlx::PgConnection, session_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE agent_sessions SET updated_at = now() WHERE id = $1")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn clean_title(title: Option<String>) -> Result<Option<String>, AppError> {
    let Some(title) = title else {
        return Ok(None);
    };
    let trimmed = title.trim();
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::validation(
            "title",
            format!("title must be at most {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(Some(trimmed.to_string()).filter(|t| !t.is_empty()))
}

// --- Sessions ---

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub character_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    /// Defaults to "recommendations" (L1)
    #[serde(default)]
    pub autonomy_level: Option<AutonomyLevel>,
}

/// Start a new agent session
#[utoipa::path(
    post,
    path = "/api/agent/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = Session),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn create_session(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let title = clean_title(req.title)?;
    let autonomy_level = req.autonomy_level.unwrap_or_default();

    let mut tx = state.db.begin().await?;
    let session = sqlx::query_as::<_, SessionRow>(&format!(
        "INSERT INTO agent_sessions (id, character_id, title, autonomy_level) \
         VALUES ($1, $2, $3, $4) RETURNING {SESSION_COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(req.character_id)
    .bind(&title)
    .bind(autonomy_level.as_str())
    .fetch_one(&mut *tx)
    .await?
    .into_session()?;

    let event = events::record_event(
        &mut tx,
        session.id,
        None,
        event_types::SESSION_CREATED,
        serde_json::json!({
            "autonomy_level": autonomy_level,
            "title": title,
            "character_id": req.character_id,
        }),
    )
    .await?;
    tx.commit().await?;
    state.events.publish(event);

    tracing::info!(session_id = %session.id, autonomy_level = %autonomy_level, "agent session created");
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SessionListQuery {
    /// Include archived sessions (default false)
    #[serde(default)]
    pub include_archived: bool,
}

/// List sessions, most recently active first
#[utoipa::path(
    get,
    path = "/api/agent/sessions",
    params(SessionListQuery),
    responses(
        (status = 200, description = "Sessions", body = Vec<Session>)
    ),
    tag = "agent"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<SessionListQuery>,
) -> Result<Json<Vec<Session>>, AppError> {
    let rows = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM agent_sessions \
         WHERE ($1 OR NOT is_archived) ORDER BY updated_at DESC"
    ))
    .bind(params.include_archived)
    .fetch_all(&state.db)
    .await?;

    let sessions = rows
        .into_iter()
        .map(SessionRow::into_session)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(sessions))
}

/// Get one session
#[utoipa::path(
    get,
    path = "/api/agent/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session", body = Session),
        (status = 404, description = "Session not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, AppError> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(fetch_session(&mut conn, session_id, false).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub autonomy_level: Option<AutonomyLevel>,
    #[serde(default)]
    pub is_archived: Option<bool>,
}

/// Change title, autonomy level or archive state
///
/// Autonomy changes only affect plans proposed afterwards.
#[utoipa::path(
    patch,
    path = "/api/agent/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = UpdateSessionRequest,
    responses(
        (status = 200, description = "Updated session", body = Session),
        (status = 404, description = "Session not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    AppJson(req): AppJson<UpdateSessionRequest>,
) -> Result<Json<Session>, AppError> {
    let title = clean_title(req.title)?;

    let mut tx = state.db.begin().await?;
    let before = fetch_session(&mut tx, session_id, true).await?;

    let session = sqlx::query_as::<_, SessionRow>(&format!(
        "UPDATE agent_sessions \
         SET title = COALESCE($2, title), \
             autonomy_level = COALESCE($3, autonomy_level), \
             is_archived = COALESCE($4, is_archived), \
             updated_at = now() \
         WHERE id = $1 RETURNING {SESSION_COLUMNS}"
    ))
    .bind(session_id)
    .bind(&title)
    .bind(req.autonomy_level.map(AutonomyLevel::as_str))
    .bind(req.is_archived)
    .fetch_one(&mut *tx)
    .await?
    .into_session()?;

    let mut changes = serde_json::Map::new();
    if session.title != before.title {
        changes.insert("title".into(), serde_json::json!(session.title));
    }
    if session.autonomy_level != before.autonomy_level {
        changes.insert(
            "autonomy_level".into(),
            serde_json::json!({"from": before.autonomy_level, "to": session.autonomy_level}),
        );
    }
    if session.is_archived != before.is_archived {
        changes.insert("is_archived".into(), serde_json::json!(session.is_archived));
    }

    let event = if changes.is_empty() {
        None
    } else {
        Some(
            events::record_event(
                &mut tx,
                session_id,
                None,
                event_types::SESSION_UPDATED,
                serde_json::Value::Object(changes),
            )
            .await?,
        )
    };
    tx.commit().await?;
    if let Some(event) = event {
        state.events.publish(event);
    }

    Ok(Json(session))
}

/// Delete a session with its messages, plans and events
#[utoipa::path(
    delete,
    path = "/api/agent/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Session not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query("DELETE FROM agent_sessions WHERE id = $1")
        .bind(session_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("agent session {session_id}")));
    }
    tracing::info!(session_id = %session_id, "agent session deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- Messages ---

/// Conversation history, oldest first
#[utoipa::path(
    get,
    path = "/api/agent/sessions/{id}/messages",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Messages", body = Vec<Message>),
        (status = 404, description = "Session not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, AppError> {
    let mut conn = state.db.acquire().await?;
    fetch_session(&mut conn, session_id, false).await?;

    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, session_id, role, content, metadata, created_at
        FROM agent_messages
        WHERE session_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(session_id)
    .fetch_all(&mut *conn)
    .await?;

    let messages = rows
        .into_iter()
        .map(MessageRow::into_message)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMessageRequest {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Append a message to the conversation
#[utoipa::path(
    post,
    path = "/api/agent/sessions/{id}/messages",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = AddMessageRequest,
    responses(
        (status = 201, description = "Message stored", body = Message),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Session not found", body = ApiError),
        (status = 409, description = "Session is archived", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn add_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    AppJson(req): AppJson<AddMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.content.trim().is_empty() {
        return Err(AppError::validation("content", "content must not be empty"));
    }
    if req.content.len() > MAX_MESSAGE_LEN {
        return Err(AppError::validation(
            "content",
            format!("content must be at most {MAX_MESSAGE_LEN} bytes"),
        ));
    }

    let mut tx = state.db.begin().await?;
    let session = fetch_session(&mut tx, session_id, true).await?;
    ensure_active(&session)?;

    let message = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO agent_messages (id, session_id, role, content, metadata)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, session_id, role, content, metadata, created_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(session_id)
    .bind(req.role.as_str())
    .bind(&req.content)
    .bind(&req.metadata)
    .fetch_one(&mut *tx)
    .await?
    .into_message()?;

    let event = events::record_event(
        &mut tx,
        session_id,
        None,
        event_types::MESSAGE_ADDED,
        serde_json::json!({
            "message_id": message.id,
            "role": message.role,
            "length": message.content.chars().count(),
        }),
    )
    .await?;
    touch_session(&mut tx, session_id).await?;
    tx.commit().await?;
    state.events.publish(event);

    Ok((StatusCode::CREATED, Json(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(archived: bool) -> Session {
        Session {
            id: Uuid::now_v7(),
            character_id: None,
            title: None,
            autonomy_level: AutonomyLevel::default(),
            is_archived: archived,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn archived_sessions_are_read_only() {
        assert!(ensure_active(&session(false)).is_ok());
        assert!(matches!(
            ensure_active(&session(true)),
            Err(AppError::Conflict { .. })
        ));
    }

    #[test]
    fn titles_are_trimmed_and_blank_means_none() {
        assert_eq!(clean_title(None).unwrap(), None);
        assert_eq!(clean_title(Some("   ".into())).unwrap(), None);
        assert_eq!(
            clean_title(Some(" Jita haul ".into())).unwrap().as_deref(),
            Some("Jita haul")
        );
        assert!(clean_title(Some("t".repeat(MAX_TITLE_LEN + 1))).is_err());
    }

    #[test]
    fn corrupt_rows_surface_as_internal_errors() {
        let row = SessionRow {
            id: Uuid::now_v7(),
            character_id: None,
            title: None,
            autonomy_level: "godmode".to_string(),
            is_archived: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(row.into_session(), Err(AppError::Internal(_))));
    }

    #[test]
    fn read_and_write_routers_share_paths() {
        let _ = read_router().merge(router()).merge(stream_router());
    }

    async fn post_json(
        state: &AppState,
        uri: String,
        body: serde_json::Value,
    ) -> axum::http::StatusCode {
        use tower::ServiceExt;

        router()
            .with_state(state.clone())
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn archived_session_rejects_messages_and_plans() {
        let Some(state) = crate::state::test_state().await else {
            return;
        };
        let session_id = Uuid::now_v7();
        sqlx::query("INSERT INTO agent_sessions (id, is_archived) VALUES ($1, TRUE)")
            .bind(session_id)
            .execute(&state.db)
            .await
            .expect("insert session");

        let message = post_json(
            &state,
            format!("/api/agent/sessions/{session_id}/messages"),
            serde_json::json!({"role": "user", "content": "restock Jita"}),
        )
        .await;
        assert_eq!(message, StatusCode::CONFLICT);

        let plan = post_json(
            &state,
            format!("/api/agent/sessions/{session_id}/plans"),
            serde_json::json!({
                "purpose": "restock",
                "steps": [{"tool": "shopping.add_item", "arguments": {}}]
            }),
        )
        .await;
        assert_eq!(plan, StatusCode::CONFLICT);

        let writes = sqlx::query_scalar::<_, i64>(
            "SELECT (SELECT count(*) FROM agent_messages WHERE session_id = $1) \
                  + (SELECT count(*) FROM agent_plans WHERE session_id = $1)",
        )
        .bind(session_id)
        .fetch_one(&state.db)
        .await
        .expect("count");
        assert_eq!(writes, 0);

        sqlx::query("DELETE FROM agent_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&state.db)
            .await
            .expect("cleanup");
    }
}
