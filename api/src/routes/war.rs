use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use eve_copilot_core::error::ApiError;
use eve_copilot_core::war::{Killmail, WarSummary, summarize_kills};

use crate::error::AppError;
use crate::extract::{AppJson, AppQuery};
use crate::state::AppState;

const MAX_INGEST_BATCH: usize = 1000;
const MAX_WINDOW_HOURS: i64 = 24 * 7;
const MAX_LIMIT: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/war/killmails", post(ingest_killmails))
        .route("/api/war/summary", get(summary))
}

#[derive(sqlx::FromRow)]
struct KillmailRow {
    killmail_id: i64,
    killed_at: DateTime<Utc>,
    solar_system_id: i64,
    region_id: i64,
    ship_type_id: i64,
    victim_corporation_id: Option<i64>,
    isk_value: f64,
    attacker_count: i32,
}

impl From<KillmailRow> for Killmail {
    fn from(r: KillmailRow) -> Self {
        Killmail {
            killmail_id: r.killmail_id,
            killed_at: r.killed_at,
            solar_system_id: r.solar_system_id,
            region_id: r.region_id,
            ship_type_id: r.ship_type_id,
            victim_corporation_id: r.victim_corporation_id,
            isk_value: r.isk_value,
            attacker_count: r.attacker_count,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestKillmailsRequest {
    pub killmails: Vec<Killmail>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestKillmailsResponse {
    pub received: usize,
    /// Rows actually written; duplicates are skipped
    pub inserted: u64,
}

fn validate_killmail(i: usize, k: &Killmail) -> Result<(), AppError> {
    if k.killmail_id <= 0 || k.solar_system_id <= 0 || k.region_id <= 0 || k.ship_type_id <= 0 {
        return Err(AppError::validation(
            &format!("killmails[{i}]"),
            format!("killmails[{i}]: ids must be positive"),
        ));
    }
    if !k.isk_value.is_finite() || k.isk_value < 0.0 || k.attacker_count < 0 {
        return Err(AppError::validation(
            &format!("killmails[{i}]"),
            format!("killmails[{i}]: isk_value and attacker_count must be non-negative"),
        ));
    }
    Ok(())
}

/// Bulk ingest of killmails
///
/// Idempotent on `killmail_id`: re-sending a kill is a no-op.
#[utoipa::path(
    post,
    path = "/api/war/killmails",
    request_body = IngestKillmailsRequest,
    responses(
        (status = 200, description = "Ingest result", body = IngestKillmailsResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "war"
)]
pub async fn ingest_killmails(
    State(state): State<AppState>,
    AppJson(req): AppJson<IngestKillmailsRequest>,
) -> Result<Json<IngestKillmailsResponse>, AppError> {
    if req.killmails.len() > MAX_INGEST_BATCH {
        return Err(AppError::Validation {
            message: format!(
                "at most {MAX_INGEST_BATCH} killmails per request, got {}",
                req.killmails.len()
            ),
            field: Some("killmails".to_string()),
            received: Some(serde_json::json!(req.killmails.len())),
            docs_hint: Some("Split large imports into chunks".to_string()),
        });
    }
    for (i, k) in req.killmails.iter().enumerate() {
        validate_killmail(i, k)?;
    }

    let mut inserted = 0;
    let mut tx = state.db.begin().await?;
    for k in &req.killmails {
        let result = sqlx::query(
            r#"
            INSERT INTO killmails (killmail_id, killed_at, solar_system_id, region_id,
                                   ship_type_id, victim_corporation_id, isk_value, attacker_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (killmail_id) DO NOTHING
            "#,
        )
        .bind(k.killmail_id)
        .bind(k.killed_at)
        .bind(k.solar_system_id)
        .bind(k.region_id)
        .bind(k.ship_type_id)
        .bind(k.victim_corporation_id)
        .bind(k.isk_value)
        .bind(k.attacker_count)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;

    tracing::info!(received = req.killmails.len(), inserted, "killmails ingested");

    Ok(Json(IngestKillmailsResponse {
        received: req.killmails.len(),
        inserted,
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SummaryParams {
    /// Restrict to one region
    #[serde(default)]
    pub region_id: Option<i64>,
    /// Look-back window in hours (default 24, max 168)
    #[serde(default)]
    pub hours: Option<i64>,
    /// Entries per top list (default 10, max 100)
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
    pub hours: i64,
    pub since: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: WarSummary,
}

fn window_hours(hours: Option<i64>) -> Result<i64, AppError> {
    match hours {
        None => Ok(24),
        Some(h) if (1..=MAX_WINDOW_HOURS).contains(&h) => Ok(h),
        Some(h) => Err(AppError::Validation {
            message: format!("hours must be between 1 and {MAX_WINDOW_HOURS}"),
            field: Some("hours".to_string()),
            received: Some(serde_json::json!(h)),
            docs_hint: None,
        }),
    }
}

/// Combat activity over a recent window
#[utoipa::path(
    get,
    path = "/api/war/summary",
    params(SummaryParams),
    responses(
        (status = 200, description = "Kill summary", body = SummaryResponse),
        (status = 400, description = "Invalid window", body = ApiError)
    ),
    tag = "war"
)]
pub async fn summary(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<SummaryParams>,
) -> Result<Json<SummaryResponse>, AppError> {
    let hours = window_hours(params.hours)?;
    let limit = params.limit.unwrap_or(10).clamp(1, MAX_LIMIT);
    let since = Utc::now() - Duration::hours(hours);

    let rows = sqlx::query_as::<_, KillmailRow>(
        r#"
        SELECT killmail_id, killed_at, solar_system_id, region_id, ship_type_id,
               victim_corporation_id, isk_value, attacker_count
        FROM killmails
        WHERE killed_at >= $1
          AND ($2::BIGINT IS NULL OR region_id = $2)
        "#,
    )
    .bind(since)
    .bind(params.region_id)
    .fetch_all(&state.db)
    .await?;

    let kills: Vec<Killmail> = rows.into_iter().map(Killmail::from).collect();

    Ok(Json(SummaryResponse {
        region_id: params.region_id,
        hours,
        since,
        summary: summarize_kills(&kills, limit),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kill(id: i64) -> Killmail {
        Killmail {
            killmail_id: id,
            killed_at: Utc::now(),
            solar_system_id: 30000142,
            region_id: 10000002,
            ship_type_id: 587,
            victim_corporation_id: None,
            isk_value: 1_000_000.0,
            attacker_count: 3,
        }
    }

    #[test]
    fn window_defaults_and_bounds() {
        assert_eq!(window_hours(None).unwrap(), 24);
        assert_eq!(window_hours(Some(168)).unwrap(), 168);
        assert!(window_hours(Some(0)).is_err());
        assert!(window_hours(Some(169)).is_err());
    }

    #[test]
    fn killmail_validation() {
        assert!(validate_killmail(0, &kill(1)).is_ok());
        assert!(validate_killmail(0, &kill(0)).is_err());

        let mut k = kill(2);
        k.isk_value = -5.0;
        match validate_killmail(4, &k) {
            Err(AppError::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("killmails[4]"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
