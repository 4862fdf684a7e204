use clap::Subcommand;
use futures::StreamExt;
use serde_json::json;
use uuid::Uuid;

use eve_copilot_core::agent::{AutonomyLevel, MessageRole, RiskLevel};
use eve_copilot_core::stream::{SseBuffer, SseEvent};

use crate::util::{
    SessionState, api_request, build_url, client, exit_code_for, exit_error, fetch_json, load_state,
    parse_json_arg, read_json_from_file, resolve_session, save_state,
};

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Start a session and make it the current one
    New {
        #[arg(long)]
        title: Option<String>,
        /// read_only|recommendations|assisted|autonomous (or l0-l3)
        #[arg(long)]
        autonomy: Option<String>,
        #[arg(long)]
        character_id: Option<i64>,
    },
    /// Make an existing session the current one
    Use { session_id: Uuid },
    /// Show the current session id
    Current,
    /// List sessions
    Sessions {
        /// Include archived sessions
        #[arg(long)]
        all: bool,
    },
    /// Show a session
    Show {
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Change the autonomy level of a session
    Autonomy {
        /// read_only|recommendations|assisted|autonomous (or l0-l3)
        level: String,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Archive a session (it becomes read-only)
    Archive {
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Append a message to the conversation
    Say {
        content: String,
        /// user|assistant|system|tool
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Show the conversation
    Messages {
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Propose a plan; steps come from a JSON array file ("-" for stdin)
    Propose {
        #[arg(long)]
        purpose: String,
        #[arg(long)]
        steps_file: String,
        /// low|medium|high|critical; raised to the riskiest step
        #[arg(long)]
        risk: Option<String>,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// List plans of a session
    Plans {
        /// Only plans in this status
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Show one plan
    Plan { plan_id: Uuid },
    /// Approve a proposed plan
    Approve { plan_id: Uuid },
    /// Reject a proposed or approved plan
    Reject {
        plan_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Mark an approved plan as executing
    Start { plan_id: Uuid },
    /// Mark an executing plan as completed
    Complete {
        plan_id: Uuid,
        #[arg(long)]
        note: Option<String>,
    },
    /// Mark an executing plan as failed
    Fail {
        plan_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Record the outcome of one step of an executing plan
    Step {
        plan_id: Uuid,
        /// Zero-based step index
        index: usize,
        /// Record a failure instead of a success
        #[arg(long)]
        failed: bool,
        /// Tool output as JSON
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        error: Option<String>,
    },
    /// Page through the audit log, oldest first
    Events {
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        plan_id: Option<Uuid>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Follow live audit events (one JSON object per line)
    Watch {
        #[arg(long)]
        session: Option<Uuid>,
    },
}

pub async fn run(api_url: &str, token: Option<&str>, command: AgentCommands) -> i32 {
    match command {
        AgentCommands::New {
            title,
            autonomy,
            character_id,
        } => new_session(api_url, token, title, autonomy.as_deref(), character_id).await,
        AgentCommands::Use { session_id } => use_session(api_url, token, session_id).await,
        AgentCommands::Current => current(),
        AgentCommands::Sessions { all } => {
            let query = if all {
                vec![("include_archived".to_string(), "true".to_string())]
            } else {
                Vec::new()
            };
            get(api_url, token, "/api/agent/sessions", &query).await
        }
        AgentCommands::Show { session } => {
            let id = resolve_session(api_url, session);
            get(api_url, token, &format!("/api/agent/sessions/{id}"), &[]).await
        }
        AgentCommands::Autonomy { level, session } => {
            let level = parse_autonomy(&level);
            let id = resolve_session(api_url, session);
            send(
                api_url,
                token,
                reqwest::Method::PATCH,
                &format!("/api/agent/sessions/{id}"),
                json!({"autonomy_level": level.as_str()}),
            )
            .await
        }
        AgentCommands::Archive { session } => {
            let id = resolve_session(api_url, session);
            send(
                api_url,
                token,
                reqwest::Method::PATCH,
                &format!("/api/agent/sessions/{id}"),
                json!({"is_archived": true}),
            )
            .await
        }
        AgentCommands::Say {
            content,
            role,
            session,
        } => {
            let role: MessageRole = role
                .parse()
                .unwrap_or_else(|e| exit_error(&format!("{e}"), Some("Use user|assistant|system|tool")));
            let id = resolve_session(api_url, session);
            send(
                api_url,
                token,
                reqwest::Method::POST,
                &format!("/api/agent/sessions/{id}/messages"),
                json!({"role": role.as_str(), "content": content}),
            )
            .await
        }
        AgentCommands::Messages { session } => {
            let id = resolve_session(api_url, session);
            get(api_url, token, &format!("/api/agent/sessions/{id}/messages"), &[]).await
        }
        AgentCommands::Propose {
            purpose,
            steps_file,
            risk,
            session,
        } => {
            let steps = read_json_from_file(&steps_file).unwrap_or_else(|e| exit_error(&e, None));
            let risk: Option<RiskLevel> = risk.map(|r| {
                r.parse().unwrap_or_else(|e| {
                    exit_error(&format!("{e}"), Some("Use low|medium|high|critical"))
                })
            });
            let id = resolve_session(api_url, session);
            send(
                api_url,
                token,
                reqwest::Method::POST,
                &format!("/api/agent/sessions/{id}/plans"),
                json!({
                    "purpose": purpose,
                    "steps": steps,
                    "risk_level": risk.map(RiskLevel::as_str),
                }),
            )
            .await
        }
        AgentCommands::Plans { status, session } => {
            let id = resolve_session(api_url, session);
            let query: Vec<(String, String)> = status
                .map(|s| ("status".to_string(), s))
                .into_iter()
                .collect();
            get(api_url, token, &format!("/api/agent/sessions/{id}/plans"), &query).await
        }
        AgentCommands::Plan { plan_id } => {
            get(api_url, token, &format!("/api/agent/plans/{plan_id}"), &[]).await
        }
        AgentCommands::Approve { plan_id } => plan_action(api_url, token, plan_id, "approve", None).await,
        AgentCommands::Reject { plan_id, reason } => {
            plan_action(api_url, token, plan_id, "reject", Some(reason)).await
        }
        AgentCommands::Start { plan_id } => plan_action(api_url, token, plan_id, "start", None).await,
        AgentCommands::Complete { plan_id, note } => {
            plan_action(api_url, token, plan_id, "complete", Some(note)).await
        }
        AgentCommands::Fail { plan_id, reason } => {
            plan_action(api_url, token, plan_id, "fail", Some(reason)).await
        }
        AgentCommands::Step {
            plan_id,
            index,
            failed,
            output,
            error,
        } => {
            let output = output.map(|o| parse_json_arg("output", &o));
            let body = json!({
                "outcome": if failed { "failed" } else { "completed" },
                "output": output,
                "error": error,
            });
            send(
                api_url,
                token,
                reqwest::Method::POST,
                &format!("/api/agent/plans/{plan_id}/steps/{index}"),
                body,
            )
            .await
        }
        AgentCommands::Events {
            event_type,
            plan_id,
            limit,
            cursor,
            session,
        } => {
            let id = resolve_session(api_url, session);
            let mut query = Vec::new();
            if let Some(t) = event_type {
                query.push(("event_type".to_string(), t));
            }
            if let Some(p) = plan_id {
                query.push(("plan_id".to_string(), p.to_string()));
            }
            if let Some(l) = limit {
                query.push(("limit".to_string(), l.to_string()));
            }
            if let Some(c) = cursor {
                query.push(("cursor".to_string(), c));
            }
            get(api_url, token, &format!("/api/agent/sessions/{id}/events"), &query).await
        }
        AgentCommands::Watch { session } => {
            let id = resolve_session(api_url, session);
            watch(api_url, token, id).await
        }
    }
}

fn parse_autonomy(raw: &str) -> AutonomyLevel {
    raw.parse().unwrap_or_else(|e| {
        exit_error(
            &format!("{e}"),
            Some("Use read_only|recommendations|assisted|autonomous or l0-l3"),
        )
    })
}

async fn get(api_url: &str, token: Option<&str>, path: &str, query: &[(String, String)]) -> i32 {
    api_request(api_url, reqwest::Method::GET, path, token, None, query).await
}

async fn send(
    api_url: &str,
    token: Option<&str>,
    method: reqwest::Method,
    path: &str,
    body: serde_json::Value,
) -> i32 {
    api_request(api_url, method, path, token, Some(body), &[]).await
}

/// `reason` is `None` for actions that take no body.
async fn plan_action(
    api_url: &str,
    token: Option<&str>,
    plan_id: Uuid,
    action: &str,
    reason: Option<Option<String>>,
) -> i32 {
    let body = reason.map(|r| json!({ "reason": r }));
    api_request(
        api_url,
        reqwest::Method::POST,
        &format!("/api/agent/plans/{plan_id}/{action}"),
        token,
        body,
        &[],
    )
    .await
}

fn remember(api_url: &str, session_id: Uuid) {
    let state = SessionState {
        api_url: api_url.to_string(),
        session_id,
        saved_at: chrono::Utc::now(),
    };
    if let Err(e) = save_state(&state) {
        exit_error(&format!("Failed to save session state: {e}"), None);
    }
}

async fn new_session(
    api_url: &str,
    token: Option<&str>,
    title: Option<String>,
    autonomy: Option<&str>,
    character_id: Option<i64>,
) -> i32 {
    let level = autonomy.map(parse_autonomy);
    let body = json!({
        "title": title,
        "autonomy_level": level.map(AutonomyLevel::as_str),
        "character_id": character_id,
    });
    let (status, resp) = match fetch_json(
        api_url,
        reqwest::Method::POST,
        "/api/agent/sessions",
        token,
        Some(body),
        &[],
    )
    .await
    {
        Ok(r) => r,
        Err(e) => exit_error(&e.to_string(), Some("Is the API server running? Check COPILOT_API_URL.")),
    };

    let code = exit_code_for(status);
    if code != 0 {
        eprintln!("{}", serde_json::to_string_pretty(&resp).unwrap_or_else(|_| resp.to_string()));
        return code;
    }

    match resp["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()) {
        Some(id) => remember(api_url, id),
        None => exit_error("Session response carried no id", None),
    }
    println!("{}", serde_json::to_string_pretty(&resp).unwrap_or_else(|_| resp.to_string()));
    0
}

async fn use_session(api_url: &str, token: Option<&str>, session_id: Uuid) -> i32 {
    // confirm it exists before saving
    let (status, resp) = match fetch_json(
        api_url,
        reqwest::Method::GET,
        &format!("/api/agent/sessions/{session_id}"),
        token,
        None,
        &[],
    )
    .await
    {
        Ok(r) => r,
        Err(e) => exit_error(&e.to_string(), Some("Is the API server running? Check COPILOT_API_URL.")),
    };
    let code = exit_code_for(status);
    if code != 0 {
        eprintln!("{}", serde_json::to_string_pretty(&resp).unwrap_or_else(|_| resp.to_string()));
        return code;
    }
    remember(api_url, session_id);
    println!("{}", json!({"current_session": session_id}));
    0
}

fn current() -> i32 {
    match load_state() {
        Some(state) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&state).unwrap_or_else(|_| format!("{state:?}"))
            );
            0
        }
        None => exit_error(
            "No agent session selected",
            Some("Run `copilot agent new` or `copilot agent use <id>`"),
        ),
    }
}

/// One output line per SSE event; `data` is inlined as JSON when it parses.
fn render_event(event: &SseEvent) -> serde_json::Value {
    let data = serde_json::from_str::<serde_json::Value>(&event.data)
        .unwrap_or_else(|_| serde_json::Value::String(event.data.clone()));
    json!({ "event": event.event, "data": data })
}

async fn watch(api_url: &str, token: Option<&str>, session_id: Uuid) -> i32 {
    let url = match build_url(api_url, &format!("/api/agent/sessions/{session_id}/stream"), &[]) {
        Ok(u) => u,
        Err(e) => {
            eprintln!("{}", json!({"error": "cli_error", "message": e}));
            return 4;
        }
    };

    let mut req = client()
        .get(url)
        .header("Accept", "text/event-stream");
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!(
                "{}",
                json!({
                    "error": "connection_error",
                    "message": e.to_string(),
                    "docs_hint": "Is the API server running? Check COPILOT_API_URL."
                })
            );
            return 3;
        }
    };

    let code = exit_code_for(resp.status().as_u16());
    if code != 0 {
        let body = resp.text().await.unwrap_or_default();
        eprintln!("{body}");
        return code;
    }

    let mut buffer = SseBuffer::new();
    let mut bytes_stream = resp.bytes_stream();
    while let Some(chunk) = bytes_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", json!({"error": "connection_error", "message": e.to_string()}));
                return 3;
            }
        };
        for event in buffer.push(&chunk) {
            println!("{}", render_event(&event));
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_data_is_inlined() {
        let event = SseEvent {
            event: "plan_proposed".to_string(),
            data: r#"{"plan_id":"x"}"#.to_string(),
            id: None,
        };
        let line = render_event(&event);
        assert_eq!(line["event"], "plan_proposed");
        assert_eq!(line["data"]["plan_id"], "x");
    }

    #[test]
    fn plain_data_stays_a_string() {
        let event = SseEvent {
            event: "lagged".to_string(),
            data: "3".to_string(),
            id: None,
        };
        // "3" parses as JSON number
        assert_eq!(render_event(&event)["data"], 3);

        let event = SseEvent {
            event: "error".to_string(),
            data: "failed to encode".to_string(),
            id: None,
        };
        assert_eq!(render_event(&event)["data"], "failed to encode");
    }
}
