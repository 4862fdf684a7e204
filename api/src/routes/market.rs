use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use eve_copilot_core::error::ApiError;
use eve_copilot_core::market::{
    MarketOrder, MarketPrice, PriceComparison, PriceSummary, TRADE_HUBS, TradeHub, compare_prices,
    summarize_orders,
};

use crate::error::AppError;
use crate::esi::EsiError;
use crate::extract::{AppJson, AppQuery};
use crate::state::AppState;

const MAX_UPSERT_ROWS: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/market/prices", post(upsert_prices))
        .route("/api/market/prices/{type_id}", get(get_prices))
        .route("/api/market/compare/{type_id}", get(compare))
}

pub fn refresh_router() -> Router<AppState> {
    Router::new().route("/api/market/refresh/{type_id}", post(refresh_prices))
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct PriceRow {
    type_id: i64,
    region_id: i64,
    best_buy: Option<f64>,
    best_sell: Option<f64>,
    buy_volume: i64,
    sell_volume: i64,
    fetched_at: DateTime<Utc>,
}

impl From<PriceRow> for MarketPrice {
    fn from(r: PriceRow) -> Self {
        MarketPrice {
            type_id: r.type_id,
            region_id: r.region_id,
            best_buy: r.best_buy,
            best_sell: r.best_sell,
            buy_volume: r.buy_volume,
            sell_volume: r.sell_volume,
            fetched_at: r.fetched_at,
        }
    }
}

/// Prices for a set of types across every region we have data for.
pub(crate) async fn load_prices<'e, E>(
    executor: E,
    type_ids: &[i64],
) -> Result<Vec<MarketPrice>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    if type_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, PriceRow>(
        r#"
        SELECT type_id, region_id, best_buy, best_sell, buy_volume, sell_volume, fetched_at
        FROM market_prices
        WHERE type_id = ANY($1)
        ORDER BY type_id, region_id
        "#,
    )
    .bind(type_ids)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(MarketPrice::from).collect())
}

async fn upsert_price<'e, E>(
    executor: E,
    type_id: i64,
    region_id: i64,
    summary: &PriceSummary,
) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO market_prices (type_id, region_id, best_buy, best_sell, buy_volume, sell_volume, fetched_at)
        VALUES ($1, $2, $3, $4, $5, $6, now())
        ON CONFLICT (type_id, region_id) DO UPDATE
        SET best_buy = EXCLUDED.best_buy,
            best_sell = EXCLUDED.best_sell,
            buy_volume = EXCLUDED.buy_volume,
            sell_volume = EXCLUDED.sell_volume,
            fetched_at = EXCLUDED.fetched_at
        "#,
    )
    .bind(type_id)
    .bind(region_id)
    .bind(summary.best_buy)
    .bind(summary.best_sell)
    .bind(summary.buy_volume)
    .bind(summary.sell_volume)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PriceQuery {
    /// Restrict to one region (e.g. 10000002 for The Forge / Jita)
    #[serde(default)]
    pub region_id: Option<i64>,
}

/// Stored prices for one item
#[utoipa::path(
    get,
    path = "/api/market/prices/{type_id}",
    params(("type_id" = i64, Path, description = "Item type id"), PriceQuery),
    responses(
        (status = 200, description = "Prices per region", body = Vec<MarketPrice>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "market"
)]
pub async fn get_prices(
    State(state): State<AppState>,
    Path(type_id): Path<i64>,
    AppQuery(query): AppQuery<PriceQuery>,
) -> Result<Json<Vec<MarketPrice>>, AppError> {
    let prices = load_prices(&state.db, &[type_id]).await?;
    let prices = match query.region_id {
        Some(region_id) => prices
            .into_iter()
            .filter(|p| p.region_id == region_id)
            .collect(),
        None => prices,
    };
    Ok(Json(prices))
}

/// Compare one item across trade hubs
///
/// Returns the cheapest hub to buy from, the best hub to sell to, and the
/// spread between them, with a freshness bucket per hub.
#[utoipa::path(
    get,
    path = "/api/market/compare/{type_id}",
    params(("type_id" = i64, Path, description = "Item type id")),
    responses(
        (status = 200, description = "Hub comparison", body = PriceComparison),
        (status = 404, description = "No prices stored for this type", body = ApiError)
    ),
    tag = "market"
)]
pub async fn compare(
    State(state): State<AppState>,
    Path(type_id): Path<i64>,
) -> Result<Json<PriceComparison>, AppError> {
    let prices = load_prices(&state.db, &[type_id]).await?;
    if prices.is_empty() {
        return Err(AppError::not_found(format!("market prices for type {type_id}")));
    }
    Ok(Json(compare_prices(type_id, &prices, Utc::now())))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PriceInput {
    pub type_id: i64,
    pub region_id: i64,
    #[serde(default)]
    pub best_buy: Option<f64>,
    #[serde(default)]
    pub best_sell: Option<f64>,
    #[serde(default)]
    pub buy_volume: i64,
    #[serde(default)]
    pub sell_volume: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertPricesRequest {
    pub prices: Vec<PriceInput>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpsertPricesResponse {
    pub upserted: usize,
}

fn validate_price_input(i: usize, p: &PriceInput) -> Result<(), AppError> {
    let negative = [p.best_buy, p.best_sell]
        .iter()
        .flatten()
        .any(|v| !v.is_finite() || *v < 0.0);
    if negative || p.buy_volume < 0 || p.sell_volume < 0 {
        return Err(AppError::validation(
            &format!("prices[{i}]"),
            format!("prices[{i}]: prices and volumes must be finite and non-negative"),
        ));
    }
    if p.type_id <= 0 || p.region_id <= 0 {
        return Err(AppError::validation(
            &format!("prices[{i}]"),
            format!("prices[{i}]: type_id and region_id must be positive"),
        ));
    }
    Ok(())
}

/// Bulk upsert of externally computed prices
///
/// All rows are written in one transaction; a single invalid row rejects the batch.
#[utoipa::path(
    post,
    path = "/api/market/prices",
    request_body = UpsertPricesRequest,
    responses(
        (status = 200, description = "Rows written", body = UpsertPricesResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "market"
)]
pub async fn upsert_prices(
    State(state): State<AppState>,
    AppJson(req): AppJson<UpsertPricesRequest>,
) -> Result<Json<UpsertPricesResponse>, AppError> {
    if req.prices.is_empty() || req.prices.len() > MAX_UPSERT_ROWS {
        return Err(AppError::Validation {
            message: format!(
                "prices must contain between 1 and {MAX_UPSERT_ROWS} rows, got {}",
                req.prices.len()
            ),
            field: Some("prices".to_string()),
            received: Some(serde_json::json!(req.prices.len())),
            docs_hint: Some("Split large imports into chunks".to_string()),
        });
    }
    for (i, p) in req.prices.iter().enumerate() {
        validate_price_input(i, p)?;
    }

    let mut tx = state.db.begin().await?;
    for p in &req.prices {
        let summary = PriceSummary {
            best_buy: p.best_buy,
            best_sell: p.best_sell,
            buy_volume: p.buy_volume,
            sell_volume: p.sell_volume,
        };
        upsert_price(&mut *tx, p.type_id, p.region_id, &summary).await?;
    }
    tx.commit().await?;

    Ok(Json(UpsertPricesResponse {
        upserted: req.prices.len(),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub comparison: PriceComparison,
    /// Regions whose ESI fetch failed; their previous prices are kept
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_regions: Vec<i64>,
}

/// Per-hub outcome of one ESI refresh.
#[derive(Debug)]
struct HubRefresh {
    summaries: Vec<(TradeHub, PriceSummary)>,
    failed_regions: Vec<i64>,
}

/// Summarize the hubs that answered and note the ones that did not.
/// Only a refresh where every hub failed is an error.
fn fold_hub_results(
    type_id: i64,
    results: Vec<(TradeHub, Result<Vec<MarketOrder>, EsiError>)>,
) -> Result<HubRefresh, EsiError> {
    let mut refresh = HubRefresh {
        summaries: Vec::new(),
        failed_regions: Vec::new(),
    };
    let mut last_error = None;

    for (hub, result) in results {
        match result {
            Ok(orders) => {
                let summary = summarize_orders(&orders, Some(hub.station_id));
                refresh.summaries.push((hub, summary));
            }
            Err(e) => {
                tracing::warn!(hub = hub.name, type_id, error = %e, "ESI refresh failed");
                refresh.failed_regions.push(hub.region_id);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if refresh.summaries.is_empty() => Err(e),
        _ => Ok(refresh),
    }
}

/// Refresh one item from ESI at every trade hub
///
/// Fetches the regional order books concurrently and keeps only orders at
/// each hub's main station.
#[utoipa::path(
    post,
    path = "/api/market/refresh/{type_id}",
    params(("type_id" = i64, Path, description = "Item type id")),
    responses(
        (status = 200, description = "Refreshed comparison", body = RefreshResponse),
        (status = 429, description = "Rate limited", body = ApiError),
        (status = 502, description = "ESI unavailable for every hub", body = ApiError)
    ),
    tag = "market"
)]
pub async fn refresh_prices(
    State(state): State<AppState>,
    Path(type_id): Path<i64>,
) -> Result<Json<RefreshResponse>, AppError> {
    let fetches = TRADE_HUBS.iter().map(|hub| {
        let esi = state.esi.clone();
        async move {
            let result = esi.region_orders(hub.region_id, type_id).await;
            (*hub, result)
        }
    });

    let refresh = fold_hub_results(type_id, join_all(fetches).await)?;
    for (hub, summary) in &refresh.summaries {
        upsert_price(&state.db, type_id, hub.region_id, summary).await?;
    }
    let failed_regions = refresh.failed_regions;

    let prices = load_prices(&state.db, &[type_id]).await?;
    Ok(Json(RefreshResponse {
        comparison: compare_prices(type_id, &prices, Utc::now()),
        failed_regions,
    }))
}
