use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use eve_copilot_core::agent::{AgentEvent, PaginatedResponse};
use eve_copilot_core::error::ApiError;

use crate::error::AppError;
use crate::extract::AppQuery;
use crate::state::AppState;

use super::fetch_session;

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    session_id: Uuid,
    plan_id: Option<Uuid>,
    event_type: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for AgentEvent {
    fn from(r: EventRow) -> Self {
        AgentEvent {
            id: r.id,
            session_id: r.session_id,
            plan_id: r.plan_id,
            event_type: r.event_type,
            payload: r.payload,
            created_at: r.created_at,
        }
    }
}

/// Append an entry to a session's audit log.
///
/// Runs inside the caller's transaction; publish the returned event to the
/// live stream only after that transaction commits.
pub(crate) async fn record_event(
    conn: &mut sqlx::PgConnection,
    session_id: Uuid,
    plan_id: Option<Uuid>,
    event_type: &str,
    payload: serde_json::Value,
) -> Result<AgentEvent, sqlx::Error> {
    // clock_timestamp keeps events from one transaction in insertion order
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        INSERT INTO agent_events (id, session_id, plan_id, event_type, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, clock_timestamp())
        RETURNING id, session_id, plan_id, event_type, payload, created_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(session_id)
    .bind(plan_id)
    .bind(event_type)
    .bind(&payload)
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(
        session_id = %session_id,
        plan_id = ?plan_id,
        event_type,
        "agent event recorded"
    );
    Ok(row.into())
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventQuery {
    /// Only events of this type, e.g. "plan_approved"
    #[serde(default)]
    pub event_type: Option<String>,
    /// Only events belonging to this plan
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    /// Page size (default 50, max 200)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Cursor from a previous response
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Audit log of a session, oldest first
#[utoipa::path(
    get,
    path = "/api/agent/sessions/{id}/events",
    params(("id" = Uuid, Path, description = "Session id"), EventQuery),
    responses(
        (status = 200, description = "Page of events", body = PaginatedResponse<AgentEvent>),
        (status = 400, description = "Invalid cursor", body = ApiError),
        (status = 404, description = "Session not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    AppQuery(params): AppQuery<EventQuery>,
) -> Result<Json<PaginatedResponse<AgentEvent>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    // Fetch one extra to determine has_more
    let fetch_limit = limit + 1;

    let cursor = params.cursor.as_deref().map(decode_cursor).transpose()?;

    let mut conn = state.db.acquire().await?;
    fetch_session(&mut conn, session_id, false).await?;

    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, session_id, plan_id, event_type, payload, created_at
        FROM agent_events
        WHERE session_id = $1
          AND ($2::TEXT IS NULL OR event_type = $2)
          AND ($3::UUID IS NULL OR plan_id = $3)
          AND ($4::TIMESTAMPTZ IS NULL OR (created_at, id) > ($4, $5))
        ORDER BY created_at, id
        LIMIT $6
        "#,
    )
    .bind(session_id)
    .bind(params.event_type.as_deref())
    .bind(params.plan_id)
    .bind(cursor.as_ref().map(|c| c.timestamp))
    .bind(cursor.as_ref().map(|c| c.id))
    .bind(fetch_limit)
    .fetch_all(&mut *conn)
    .await?;

    let has_more = rows.len() as i64 > limit;
    let data: Vec<AgentEvent> = rows
        .into_iter()
        .take(limit as usize)
        .map(AgentEvent::from)
        .collect();

    let next_cursor = if has_more {
        data.last().map(|e| encode_cursor(&e.created_at, &e.id))
    } else {
        None
    };

    Ok(Json(PaginatedResponse {
        data,
        next_cursor,
        has_more,
    }))
}

fn encode_cursor(timestamp: &DateTime<Utc>, id: &Uuid) -> String {
    use base64::Engine;
    let raw = format!("{}\0{}", timestamp.to_rfc3339(), id);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

#[derive(Debug)]
struct CursorData {
    timestamp: DateTime<Utc>,
    id: Uuid,
}

fn invalid_cursor(message: &str, received: Option<&str>) -> AppError {
    AppError::Validation {
        message: message.to_string(),
        field: Some("cursor".to_string()),
        received: received.map(|r| serde_json::Value::String(r.to_string())),
        docs_hint: Some("Use the next_cursor value from a previous response".to_string()),
    }
}

fn decode_cursor(cursor: &str) -> Result<CursorData, AppError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid_cursor("Invalid cursor format", Some(cursor)))?;

    let s = String::from_utf8(bytes).map_err(|_| invalid_cursor("Invalid cursor encoding", None))?;

    let Some((ts, id)) = s.split_once('\0') else {
        return Err(invalid_cursor("Invalid cursor structure", None));
    };

    let timestamp = DateTime::parse_from_rfc3339(ts)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid_cursor("Invalid cursor timestamp", None))?;
    let id = Uuid::parse_str(id).map_err(|_| invalid_cursor("Invalid cursor id", None))?;

    Ok(CursorData { timestamp, id })
}
