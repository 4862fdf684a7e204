use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Agent session the CLI talks to when `--session` is not given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub api_url: String,
    pub session_id: Uuid,
    pub saved_at: DateTime<Utc>,
}

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn print_json(value: &serde_json::Value, raw: bool, to_stderr: bool) {
    let formatted = if raw {
        value.to_string()
    } else {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    };
    if to_stderr {
        eprintln!("{formatted}");
    } else {
        println!("{formatted}");
    }
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    print_json(&err, false, true);
    std::process::exit(1);
}

/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

pub fn build_url(
    api_url: &str,
    path: &str,
    query: &[(String, String)],
) -> Result<reqwest::Url, String> {
    let mut url = reqwest::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/')))
        .map_err(|e| format!("Invalid URL: {api_url}{path}: {e}"))?;
    if !query.is_empty() {
        let mut q = url.query_pairs_mut();
        for (k, v) in query {
            q.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Execute an API request, print the response, return a structured exit code.
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> i32 {
    match fetch_json(api_url, method, path, token, body, query).await {
        Ok((status, resp_body)) => {
            let code = exit_code_for(status);
            print_json(&resp_body, false, code != 0);
            code
        }
        Err(RequestError::Usage(message)) => {
            print_json(&json!({"error": "cli_error", "message": message}), false, true);
            4
        }
        Err(RequestError::Connection(message)) => {
            print_json(
                &json!({
                    "error": "connection_error",
                    "message": message,
                    "docs_hint": "Is the API server running? Check COPILOT_API_URL."
                }),
                false,
                true,
            );
            3
        }
    }
}

#[derive(Debug)]
pub enum RequestError {
    Usage(String),
    Connection(String),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(m) | Self::Connection(m) => f.write_str(m),
        }
    }
}

/// Execute an API request and return status and body without printing.
/// Empty bodies (204) come back as `null`.
pub async fn fetch_json(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> Result<(u16, serde_json::Value), RequestError> {
    let url = build_url(api_url, path, query).map_err(RequestError::Usage)?;
    tracing::debug!(%method, %url, "api request");

    let mut req = client().request(method, url);
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = req
        .send()
        .await
        .map_err(|e| RequestError::Connection(e.to_string()))?;
    let status = resp.status().as_u16();
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| RequestError::Connection(e.to_string()))?;

    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            json!({"raw_error": format!("Failed to parse response as JSON: {e}")})
        })
    };
    Ok((status, body))
}

pub fn state_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eve-copilot")
        .join("state.json")
}

pub fn load_state_from(path: &Path) -> Option<SessionState> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn save_state_to(path: &Path, state: &SessionState) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_string_pretty(state)?;

    // Write with restricted permissions (0o600)
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data.as_bytes())?;

    Ok(())
}

pub fn load_state() -> Option<SessionState> {
    load_state_from(&state_path())
}

pub fn save_state(state: &SessionState) -> Result<(), Box<dyn std::error::Error>> {
    save_state_to(&state_path(), state)
}

/// Session to act on: the explicit flag, else the saved one for this API.
pub fn resolve_session(api_url: &str, explicit: Option<Uuid>) -> Uuid {
    if let Some(id) = explicit {
        return id;
    }
    match load_state() {
        Some(state) if state.api_url == api_url => state.session_id,
        Some(state) => exit_error(
            &format!(
                "Saved session {} belongs to {}, not {api_url}",
                state.session_id, state.api_url
            ),
            Some("Pass --session or run `copilot agent use <id>`"),
        ),
        None => exit_error(
            "No agent session selected",
            Some("Run `copilot agent new` or `copilot agent use <id>`, or pass --session"),
        ),
    }
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<serde_json::Value, String> {
    let raw = if path == "-" {
        std::io::read_to_string(std::io::stdin())
            .map_err(|e| format!("Failed to read stdin: {e}"))?
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}

/// Parse a `--data`/`--output` style JSON argument.
pub fn parse_json_arg(name: &str, raw: &str) -> serde_json::Value {
    serde_json::from_str(raw)
        .unwrap_or_else(|e| exit_error(&format!("--{name} is not valid JSON: {e}"), None))
}

// Unix-specific imports for file permissions
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

// No-op on non-unix (won't compile for Windows without this)
#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
