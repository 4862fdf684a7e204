use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use eve_copilot_core::agent::AgentEvent;
use eve_copilot_core::error::ApiError;

use crate::error::AppError;
use crate::state::AppState;

use super::fetch_session;

/// SSE event name sent when this subscriber fell behind and missed events.
pub const LAGGED_EVENT: &str = "lagged";

fn to_sse(event: &AgentEvent) -> Event {
    let sse = Event::default()
        .event(event.event_type.as_str())
        .id(event.id.to_string());
    match sse.json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            tracing::warn!(event_id = %event.id, error = %e, "failed to encode agent event");
            Event::default()
                .event("error")
                .data(format!("failed to encode event {}", event.id))
        }
    }
}

/// Turn a broadcast receiver into the live event stream of one session.
fn session_events(
    rx: broadcast::Receiver<AgentEvent>,
    session_id: Uuid,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.session_id == session_id => {
                    return Some((Ok(to_sse(&event)), rx));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %session_id, skipped, "stream subscriber lagged");
                    let notice = Event::default()
                        .event(LAGGED_EVENT)
                        .data(skipped.to_string());
                    return Some((Ok(notice), rx));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// Live audit events of a session as Server-Sent Events
///
/// Each SSE event is named after the audit event type and carries the event
/// as JSON. A `lagged` event means some events were dropped; re-read them
/// from the events endpoint.
#[utoipa::path(
    get,
    path = "/api/agent/sessions/{id}/stream",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Stream of agent events", body = String, content_type = "text/event-stream"),
        (status = 404, description = "Session not found", body = ApiError)
    ),
    tag = "agent"
)]
pub async fn stream_events(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // subscribe first so nothing committed after the existence check is missed
    let rx = state.events.subscribe();

    let mut conn = state.db.acquire().await?;
    fetch_session(&mut conn, session_id, false).await?;
    drop(conn);

    tracing::debug!(session_id = %session_id, "stream subscriber attached");
    Ok(Sse::new(session_events(rx, session_id))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;

    use crate::state::EventHub;

    fn event(session_id: Uuid, event_type: &str) -> AgentEvent {
        AgentEvent {
            id: Uuid::now_v7(),
            session_id,
            plan_id: None,
            event_type: event_type.to_string(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stream_only_carries_its_own_session() {
        let hub = EventHub::new(8);
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();
        let stream = session_events(hub.subscribe(), mine);
        futures::pin_mut!(stream);

        hub.publish(event(other, "message_added"));
        hub.publish(event(mine, "plan_proposed"));
        drop(hub);

        assert!(stream.next().await.is_some());
        // sender dropped: stream ends after the matching event
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_a_notice() {
        let hub = EventHub::new(2);
        let session = Uuid::now_v7();
        let stream = session_events(hub.subscribe(), session);
        futures::pin_mut!(stream);

        for _ in 0..5 {
            hub.publish(event(session, "message_added"));
        }
        drop(hub);

        let mut items = 0;
        while stream.next().await.is_some() {
            items += 1;
        }
        // one lag notice plus the two events still buffered
        assert_eq!(items, 3);
    }
}
