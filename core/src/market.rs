use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const PRICE_WARMING_AFTER_SECONDS: i64 = 300;
pub const PRICE_STALE_AFTER_SECONDS: i64 = 3600;

/// A major trade hub and the region its market belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradeHub {
    pub name: &'static str,
    pub region_id: i64,
    pub station_id: i64,
}

pub const JITA: TradeHub = TradeHub {
    name: "Jita",
    region_id: 10000002,
    station_id: 60003760,
};
pub const AMARR: TradeHub = TradeHub {
    name: "Amarr",
    region_id: 10000043,
    station_id: 60008494,
};
pub const DODIXIE: TradeHub = TradeHub {
    name: "Dodixie",
    region_id: 10000032,
    station_id: 60011866,
};
pub const RENS: TradeHub = TradeHub {
    name: "Rens",
    region_id: 10000030,
    station_id: 60004588,
};
pub const HEK: TradeHub = TradeHub {
    name: "Hek",
    region_id: 10000042,
    station_id: 60005686,
};

pub const TRADE_HUBS: [TradeHub; 5] = [JITA, AMARR, DODIXIE, RENS, HEK];

pub fn hub_for_region(region_id: i64) -> Option<TradeHub> {
    TRADE_HUBS.iter().copied().find(|h| h.region_id == region_id)
}

/// One market order as returned by ESI `/markets/{region_id}/orders/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub is_buy_order: bool,
    pub price: f64,
    pub volume_remain: i64,
    pub location_id: i64,
    #[serde(default)]
    pub type_id: i64,
}

/// Best prices for one item in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PriceSummary {
    /// Highest buy order price
    pub best_buy: Option<f64>,
    /// Lowest sell order price
    pub best_sell: Option<f64>,
    pub buy_volume: i64,
    pub sell_volume: i64,
}

/// Reduce a region's order book to its best prices. When `station_id` is
/// given only orders at that station count.
pub fn summarize_orders(orders: &[MarketOrder], station_id: Option<i64>) -> PriceSummary {
    let mut summary = PriceSummary {
        best_buy: None,
        best_sell: None,
        buy_volume: 0,
        sell_volume: 0,
    };

    for order in orders {
        if station_id.is_some_and(|s| s != order.location_id) {
            continue;
        }
        if order.is_buy_order {
            summary.buy_volume += order.volume_remain;
            summary.best_buy = Some(summary.best_buy.map_or(order.price, |p| p.max(order.price)));
        } else {
            summary.sell_volume += order.volume_remain;
            summary.best_sell =
                Some(summary.best_sell.map_or(order.price, |p| p.min(order.price)));
        }
    }

    summary
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceFreshnessStatus {
    Fresh,
    Warming,
    Stale,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
pub struct PriceFreshness {
    pub age_seconds: i64,
    pub status: PriceFreshnessStatus,
}

impl PriceFreshness {
    pub fn from_fetched_at(fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age_seconds = now.signed_duration_since(fetched_at).num_seconds().max(0);
        let status = if age_seconds <= PRICE_WARMING_AFTER_SECONDS {
            PriceFreshnessStatus::Fresh
        } else if age_seconds <= PRICE_STALE_AFTER_SECONDS {
            PriceFreshnessStatus::Warming
        } else {
            PriceFreshnessStatus::Stale
        };
        Self {
            age_seconds,
            status,
        }
    }
}

/// Stored price row for one item in one region.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarketPrice {
    pub type_id: i64,
    pub region_id: i64,
    pub best_buy: Option<f64>,
    pub best_sell: Option<f64>,
    pub buy_volume: i64,
    pub sell_volume: i64,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HubPrice {
    pub hub: String,
    pub region_id: i64,
    pub best_buy: Option<f64>,
    pub best_sell: Option<f64>,
    pub sell_volume: i64,
    pub freshness: PriceFreshness,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PriceComparison {
    pub type_id: i64,
    pub hubs: Vec<HubPrice>,
    /// Hub with the lowest sell price (where to buy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cheapest_sell_hub: Option<String>,
    /// Hub with the highest buy price (where to sell)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_buy_hub: Option<String>,
    /// Highest buy order anywhere minus lowest sell order anywhere.
    /// Positive means hauling between hubs is profitable before taxes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
}

fn hub_name(region_id: i64) -> String {
    hub_for_region(region_id)
        .map(|h| h.name.to_string())
        .unwrap_or_else(|| format!("region {region_id}"))
}

pub fn compare_prices(type_id: i64, prices: &[MarketPrice], now: DateTime<Utc>) -> PriceComparison {
    let hubs: Vec<HubPrice> = prices
        .iter()
        .filter(|p| p.type_id == type_id)
        .map(|p| HubPrice {
            hub: hub_name(p.region_id),
            region_id: p.region_id,
            best_buy: p.best_buy,
            best_sell: p.best_sell,
            sell_volume: p.sell_volume,
            freshness: PriceFreshness::from_fetched_at(p.fetched_at, now),
        })
        .collect();

    let cheapest = hubs
        .iter()
        .filter_map(|h| h.best_sell.map(|p| (h, p)))
        .min_by(|a, b| a.1.total_cmp(&b.1));
    let best_buy = hubs
        .iter()
        .filter_map(|h| h.best_buy.map(|p| (h, p)))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    let spread = match (cheapest, best_buy) {
        (Some((_, sell)), Some((_, buy))) => Some(buy - sell),
        _ => None,
    };

    PriceComparison {
        type_id,
        cheapest_sell_hub: cheapest.map(|(h, _)| h.hub.clone()),
        best_buy_hub: best_buy.map(|(h, _)| h.hub.clone()),
        spread,
        hubs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order(is_buy: bool, price: f64, volume: i64, location: i64) -> MarketOrder {
        MarketOrder {
            is_buy_order: is_buy,
            price,
            volume_remain: volume,
            location_id: location,
            type_id: 34,
        }
    }

    fn price(region_id: i64, buy: Option<f64>, sell: Option<f64>, now: DateTime<Utc>) -> MarketPrice {
        MarketPrice {
            type_id: 34,
            region_id,
            best_buy: buy,
            best_sell: sell,
            buy_volume: 0,
            sell_volume: 100,
            fetched_at: now,
        }
    }

    #[test]
    fn summarize_picks_highest_buy_and_lowest_sell() {
        let orders = vec![
            order(true, 4.5, 100, JITA.station_id),
            order(true, 4.9, 50, JITA.station_id),
            order(false, 5.3, 10, JITA.station_id),
            order(false, 5.1, 20, JITA.station_id),
        ];
        let s = summarize_orders(&orders, None);
        assert_eq!(s.best_buy, Some(4.9));
        assert_eq!(s.best_sell, Some(5.1));
        assert_eq!(s.buy_volume, 150);
        assert_eq!(s.sell_volume, 30);
    }

    #[test]
    fn summarize_station_filter_skips_outlying_orders() {
        let orders = vec![
            order(false, 1.0, 10, 1234),
            order(false, 5.0, 20, JITA.station_id),
        ];
        let s = summarize_orders(&orders, Some(JITA.station_id));
        assert_eq!(s.best_sell, Some(5.0));
        assert_eq!(s.best_buy, None);
        assert_eq!(s.sell_volume, 20);
    }

    #[test]
    fn compare_finds_cheapest_hub_and_spread() {
        let now = Utc::now();
        let prices = vec![
            price(JITA.region_id, Some(4.0), Some(5.0), now),
            price(AMARR.region_id, Some(6.0), Some(7.0), now),
            price(HEK.region_id, None, None, now),
        ];
        let cmp = compare_prices(34, &prices, now);
        assert_eq!(cmp.hubs.len(), 3);
        assert_eq!(cmp.cheapest_sell_hub.as_deref(), Some("Jita"));
        assert_eq!(cmp.best_buy_hub.as_deref(), Some("Amarr"));
        assert_eq!(cmp.spread, Some(1.0));
    }

    #[test]
    fn compare_without_prices_has_no_spread() {
        let cmp = compare_prices(34, &[], Utc::now());
        assert!(cmp.hubs.is_empty());
        assert!(cmp.cheapest_sell_hub.is_none());
        assert!(cmp.spread.is_none());
    }

    #[test]
    fn freshness_buckets() {
        let now = Utc::now();
        assert_eq!(
            PriceFreshness::from_fetched_at(now, now).status,
            PriceFreshnessStatus::Fresh
        );
        assert_eq!(
            PriceFreshness::from_fetched_at(now - Duration::minutes(30), now).status,
            PriceFreshnessStatus::Warming
        );
        assert_eq!(
            PriceFreshness::from_fetched_at(now - Duration::hours(2), now).status,
            PriceFreshnessStatus::Stale
        );
        // clock skew never yields a negative age
        assert_eq!(
            PriceFreshness::from_fetched_at(now + Duration::seconds(30), now).age_seconds,
            0
        );
    }

    #[test]
    fn unknown_region_gets_a_generic_name() {
        assert_eq!(hub_name(10000060), "region 10000060");
        assert_eq!(hub_for_region(DODIXIE.region_id), Some(DODIXIE));
    }
}
