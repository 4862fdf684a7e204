use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::broadcast;

use eve_copilot_core::agent::AgentEvent;

use crate::esi::EsiClient;

const DEFAULT_ESI_BASE_URL: &str = "https://esi.evetech.net/latest";
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173,http://localhost:3000";

/// Runtime configuration, read once from the environment at start-up.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub max_connections: u32,
    pub cors_origins: Vec<String>,
    /// When set, every `/api` route requires `Authorization: Bearer <token>`
    pub api_token: Option<String>,
    pub esi_base_url: String,
    pub esi_user_agent: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);
        let max_connections = lookup("COPILOT_DB_MAX_CONNECTIONS")
            .and_then(|p| p.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(20);
        let cors_origins = lookup("COPILOT_CORS_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let api_token = lookup("COPILOT_API_TOKEN").filter(|t| !t.trim().is_empty());
        let esi_base_url = lookup("ESI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_ESI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let esi_user_agent = lookup("ESI_USER_AGENT")
            .unwrap_or_else(|| format!("eve-copilot/{}", env!("CARGO_PKG_VERSION")));

        Self {
            port,
            max_connections,
            cors_origins,
            api_token,
            esi_base_url,
            esi_user_agent,
        }
    }
}

/// Fan-out of freshly written agent events to live stream subscribers.
/// Lagging subscribers lose events; the audit log stays authoritative.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: AgentEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Number of live stream subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub events: EventHub,
    pub esi: EsiClient,
}

/// Migrated state against `DATABASE_URL`, or `None` when no database is configured.
#[cfg(test)]
pub(crate) async fn test_state() -> Option<AppState> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return None;
    };
    let db = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .ok()?;
    sqlx::migrate!("../migrations")
        .run(&db)
        .await
        .expect("migrations should run");

    let config = AppConfig::from_lookup(|_| None);
    let esi = EsiClient::new(&config.esi_base_url, &config.esi_user_agent).ok()?;
    Some(AppState {
        db,
        config: Arc::new(config),
        events: EventHub::new(16),
        esi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let c = config(&[]);
        assert_eq!(c.port, 8000);
        assert_eq!(c.max_connections, 20);
        assert_eq!(c.cors_origins.len(), 2);
        assert!(c.api_token.is_none());
        assert_eq!(c.esi_base_url, DEFAULT_ESI_BASE_URL);
    }

    #[test]
    fn overrides_are_parsed_and_cleaned() {
        let c = config(&[
            ("PORT", "9100"),
            ("COPILOT_DB_MAX_CONNECTIONS", "0"),
            ("COPILOT_CORS_ORIGINS", " https://copilot.example , ,"),
            ("COPILOT_API_TOKEN", "   "),
            ("ESI_BASE_URL", "http://localhost:9999/"),
        ]);
        assert_eq!(c.port, 9100);
        assert_eq!(c.max_connections, 20);
        assert_eq!(c.cors_origins, vec!["https://copilot.example".to_string()]);
        assert!(c.api_token.is_none());
        assert_eq!(c.esi_base_url, "http://localhost:9999");
    }

    #[tokio::test]
    async fn hub_delivers_to_subscribers_only() {
        let hub = EventHub::new(8);
        // publishing without subscribers is a no-op
        hub.publish(sample_event());
        let mut rx = hub.subscribe();
        hub.publish(sample_event());
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_type, "session_created");
        assert_eq!(hub.subscriber_count(), 1);
        drop(rx);
        assert_eq!(hub.subscriber_count(), 0);
    }

    fn sample_event() -> AgentEvent {
        AgentEvent {
            id: uuid::Uuid::now_v7(),
            session_id: uuid::Uuid::now_v7(),
            plan_id: None,
            event_type: "session_created".to_string(),
            payload: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        }
    }
}
