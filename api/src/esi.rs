//! Minimal client for the public ESI market endpoints.

use std::time::Duration;

use eve_copilot_core::market::MarketOrder;
use thiserror::Error;

use crate::error::AppError;

/// ESI pages market orders; more than this many pages for one type is a
/// misbehaving upstream rather than a real order book.
const MAX_PAGES: u32 = 20;

#[derive(Debug, Error)]
pub enum EsiError {
    #[error("ESI request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ESI returned status {status} for {url}")]
    Status { status: u16, url: String },
}

impl From<EsiError> for AppError {
    fn from(err: EsiError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

#[derive(Clone)]
pub struct EsiClient {
    http: reqwest::Client,
    base_url: String,
}

impl EsiClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, EsiError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn orders_url(&self, region_id: i64, type_id: i64, page: u32) -> String {
        format!(
            "{}/markets/{}/orders/?datasource=tranquility&order_type=all&type_id={}&page={}",
            self.base_url, region_id, type_id, page
        )
    }

    /// All open orders for one type in one region, every page.
    pub async fn region_orders(
        &self,
        region_id: i64,
        type_id: i64,
    ) -> Result<Vec<MarketOrder>, EsiError> {
        let mut orders = Vec::new();
        let mut page = 1;

        loop {
            let url = self.orders_url(region_id, type_id, page);
            let resp = self.http.get(&url).send().await?;

            if !resp.status().is_success() {
                return Err(EsiError::Status {
                    status: resp.status().as_u16(),
                    url,
                });
            }

            let pages = resp
                .headers()
                .get("x-pages")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1)
                .min(MAX_PAGES);

            let batch: Vec<MarketOrder> = resp.json().await?;
            orders.extend(batch);

            if page >= pages {
                break;
            }
            page += 1;
        }

        tracing::debug!(
            region_id,
            type_id,
            pages = page,
            orders = orders.len(),
            "fetched ESI market orders"
        );
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::extract::{Query, State};
    use axum::response::IntoResponse;
    use axum::routing::get;

    #[test]
    fn orders_url_has_region_type_and_page() {
        let client = EsiClient::new("https://esi.example/latest/", "test").unwrap();
        assert_eq!(
            client.orders_url(10000002, 34, 2),
            "https://esi.example/latest/markets/10000002/orders/?datasource=tranquility&order_type=all&type_id=34&page=2"
        );
    }

    #[test]
    fn esi_status_errors_become_bad_gateway() {
        let err: AppError = EsiError::Status {
            status: 503,
            url: "x".into(),
        }
        .into();
        assert_eq!(
            err.into_response().status(),
            axum::http::StatusCode::BAD_GATEWAY
        );
    }

    #[derive(Default)]
    struct FakeEsi {
        pages: u32,
        requests: AtomicU32,
    }

    async fn orders(
        State(fake): State<Arc<FakeEsi>>,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        fake.requests.fetch_add(1, Ordering::SeqCst);
        let page: f64 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(0.0);
        let body = vec![MarketOrder {
            is_buy_order: false,
            price: page,
            volume_remain: 1,
            location_id: 60003760,
            type_id: 34,
        }];
        ([("x-pages", fake.pages.to_string())], axum::Json(body))
    }

    /// Serve paged orders on a random local port.
    async fn serve(pages: u32) -> (EsiClient, Arc<FakeEsi>) {
        let fake = Arc::new(FakeEsi {
            pages,
            ..Default::default()
        });
        let app = Router::new()
            .route("/markets/{region_id}/orders/", get(orders))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let client = EsiClient::new(&format!("http://127.0.0.1:{port}"), "test").unwrap();
        (client, fake)
    }

    #[tokio::test]
    async fn region_orders_follows_every_page() {
        let (client, fake) = serve(3).await;
        let orders = client.region_orders(10000002, 34).await.unwrap();
        assert_eq!(fake.requests.load(Ordering::SeqCst), 3);
        let pages: Vec<f64> = orders.iter().map(|o| o.price).collect();
        assert_eq!(pages, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn region_orders_stops_at_page_cap() {
        let (client, fake) = serve(MAX_PAGES * 10).await;
        let orders = client.region_orders(10000002, 34).await.unwrap();
        assert_eq!(fake.requests.load(Ordering::SeqCst), MAX_PAGES);
        assert_eq!(orders.len(), MAX_PAGES as usize);
    }
}
