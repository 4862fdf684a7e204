use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::market::{MarketPrice, hub_for_region};

/// Where a shopping list item came from.
pub const SOURCE_MANUAL: &str = "manual";

/// Upper bound for the quantity of a single list item.
pub const MAX_ITEM_QUANTITY: i64 = 1_000_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShoppingError {
    #[error("quantity of type {type_id} would exceed {MAX_ITEM_QUANTITY}")]
    QuantityTooLarge { type_id: i64 },
}

fn add_quantity(type_id: i64, a: i64, b: i64) -> Result<i64, ShoppingError> {
    a.checked_add(b)
        .filter(|q| *q <= MAX_ITEM_QUANTITY)
        .ok_or(ShoppingError::QuantityTooLarge { type_id })
}

pub fn production_source(product_type_id: i64) -> String {
    format!("production:{product_type_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShoppingList {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShoppingItem {
    pub id: Uuid,
    pub list_id: Uuid,
    pub type_id: i64,
    pub type_name: String,
    pub quantity: i64,
    pub is_purchased: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_price: Option<f64>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// A quantity to merge into a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAddition {
    pub type_id: i64,
    pub type_name: String,
    pub quantity: i64,
}

/// Outcome of merging one addition into the current items of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAction {
    /// Increase the open item with this id to the new quantity
    Increase { item_id: Uuid, quantity: i64 },
    /// No open item for this type; insert a fresh row
    Insert(ItemAddition),
}

/// Plan how additions land on a list: quantities of an already-listed,
/// not-yet-purchased type are summed; everything else becomes a new row.
/// Additions for the same type are combined first. Fails when a resulting
/// quantity would exceed [`MAX_ITEM_QUANTITY`].
pub fn plan_merge(
    existing: &[ShoppingItem],
    additions: &[ItemAddition],
) -> Result<Vec<MergeAction>, ShoppingError> {
    let mut combined: BTreeMap<i64, ItemAddition> = BTreeMap::new();
    for add in additions.iter().filter(|a| a.quantity > 0) {
        match combined.get_mut(&add.type_id) {
            Some(c) => c.quantity = add_quantity(add.type_id, c.quantity, add.quantity)?,
            None => {
                add_quantity(add.type_id, 0, add.quantity)?;
                combined.insert(add.type_id, add.clone());
            }
        }
    }

    combined
        .into_values()
        .map(|add| {
            match existing
                .iter()
                .find(|i| i.type_id == add.type_id && !i.is_purchased)
            {
                Some(open) => Ok(MergeAction::Increase {
                    item_id: open.id,
                    quantity: add_quantity(add.type_id, open.quantity, add.quantity)?,
                }),
                None => Ok(MergeAction::Insert(add)),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ListCost {
    pub region_id: i64,
    /// Sum of quantity * lowest sell price over every priced item
    pub total: f64,
    /// Same, restricted to items not yet purchased
    pub remaining: f64,
    /// Type ids without a sell price in this region
    pub unpriced_type_ids: Vec<i64>,
}

pub fn list_cost(items: &[ShoppingItem], prices: &[MarketPrice], region_id: i64) -> ListCost {
    let sell: HashMap<i64, f64> = prices
        .iter()
        .filter(|p| p.region_id == region_id)
        .filter_map(|p| p.best_sell.map(|s| (p.type_id, s)))
        .collect();

    let mut total = 0.0;
    let mut remaining = 0.0;
    let mut unpriced = Vec::new();

    for item in items {
        match sell.get(&item.type_id) {
            Some(price) => {
                let line = price * item.quantity as f64;
                total += line;
                if !item.is_purchased {
                    remaining += line;
                }
            }
            None => {
                if !unpriced.contains(&item.type_id) {
                    unpriced.push(item.type_id);
                }
            }
        }
    }
    unpriced.sort_unstable();

    ListCost {
        region_id,
        total,
        remaining,
        unpriced_type_ids: unpriced,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RegionTotal {
    pub region_id: i64,
    pub hub: String,
    pub total: f64,
    /// Items this region has no sell price for
    pub missing_items: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CheapestSource {
    pub type_id: i64,
    pub type_name: String,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ListComparison {
    /// Cost of buying everything in a single region
    pub regions: Vec<RegionTotal>,
    /// Cheapest region per open item
    pub items: Vec<CheapestSource>,
    /// Cost when each item is bought at its cheapest region
    pub split_total: f64,
}

/// Compare the open items of a list across every region present in `prices`.
pub fn compare_list(items: &[ShoppingItem], prices: &[MarketPrice]) -> ListComparison {
    let open: Vec<&ShoppingItem> = items.iter().filter(|i| !i.is_purchased).collect();

    let mut by_region: BTreeMap<i64, HashMap<i64, f64>> = BTreeMap::new();
    for p in prices {
        if let Some(sell) = p.best_sell {
            by_region.entry(p.region_id).or_default().insert(p.type_id, sell);
        }
    }

    let regions = by_region
        .iter()
        .map(|(region_id, sells)| {
            let mut total = 0.0;
            let mut missing = 0;
            for item in &open {
                match sells.get(&item.type_id) {
                    Some(price) => total += price * item.quantity as f64,
                    None => missing += 1,
                }
            }
            RegionTotal {
                region_id: *region_id,
                hub: hub_for_region(*region_id)
                    .map(|h| h.name.to_string())
                    .unwrap_or_else(|| format!("region {region_id}")),
                total,
                missing_items: missing,
            }
        })
        .collect();

    let mut split_total = 0.0;
    let items = open
        .iter()
        .map(|item| {
            let best = by_region
                .iter()
                .filter_map(|(region, sells)| sells.get(&item.type_id).map(|p| (*region, *p)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((_, price)) = best {
                split_total += price * item.quantity as f64;
            }
            CheapestSource {
                type_id: item.type_id,
                type_name: item.type_name.clone(),
                quantity: item.quantity,
                region_id: best.map(|(r, _)| r),
                unit_price: best.map(|(_, p)| p),
            }
        })
        .collect();

    ListComparison {
        regions,
        items,
        split_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{AMARR, JITA};

    fn item(type_id: i64, quantity: i64, purchased: bool) -> ShoppingItem {
        ShoppingItem {
            id: Uuid::now_v7(),
            list_id: Uuid::nil(),
            type_id,
            type_name: format!("type {type_id}"),
            quantity,
            is_purchased: purchased,
            target_price: None,
            source: SOURCE_MANUAL.to_string(),
            created_at: Utc::now(),
        }
    }

    fn add(type_id: i64, quantity: i64) -> ItemAddition {
        ItemAddition {
            type_id,
            type_name: format!("type {type_id}"),
            quantity,
        }
    }

    fn sell(type_id: i64, region_id: i64, price: f64) -> MarketPrice {
        MarketPrice {
            type_id,
            region_id,
            best_buy: None,
            best_sell: Some(price),
            buy_volume: 0,
            sell_volume: 1000,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn merge_sums_into_open_item() {
        let existing = vec![item(34, 100, false)];
        let actions = plan_merge(&existing, &[add(34, 50)]).unwrap();
        assert_eq!(
            actions,
            vec![MergeAction::Increase {
                item_id: existing[0].id,
                quantity: 150
            }]
        );
    }

    #[test]
    fn merge_ignores_purchased_rows_and_combines_duplicates() {
        let existing = vec![item(34, 100, true)];
        let actions =
            plan_merge(&existing, &[add(34, 10), add(35, 5), add(34, 15), add(36, 0)]).unwrap();
        assert_eq!(actions, vec![MergeAction::Insert(add(34, 25)), MergeAction::Insert(add(35, 5))]);
    }

    #[test]
    fn merge_rejects_quantities_past_the_cap() {
        let existing = vec![item(34, 2, false)];
        assert_eq!(
            plan_merge(&existing, &[add(34, i64::MAX)]),
            Err(ShoppingError::QuantityTooLarge { type_id: 34 })
        );
        assert_eq!(
            plan_merge(&[], &[add(35, i64::MAX), add(35, 1)]),
            Err(ShoppingError::QuantityTooLarge { type_id: 35 })
        );
        assert!(plan_merge(&existing, &[add(34, MAX_ITEM_QUANTITY - 2)]).is_ok());
        assert!(plan_merge(&existing, &[add(34, MAX_ITEM_QUANTITY - 1)]).is_err());
    }

    #[test]
    fn cost_tracks_remaining_and_unpriced() {
        let items = vec![item(34, 100, false), item(35, 10, true), item(40, 1, false)];
        let prices = vec![
            sell(34, JITA.region_id, 5.0),
            sell(35, JITA.region_id, 20.0),
            sell(40, AMARR.region_id, 1.0),
        ];
        let cost = list_cost(&items, &prices, JITA.region_id);
        assert_eq!(cost.total, 700.0);
        assert_eq!(cost.remaining, 500.0);
        assert_eq!(cost.unpriced_type_ids, vec![40]);
    }

    #[test]
    fn compare_picks_cheapest_region_per_item() {
        let items = vec![item(34, 100, false), item(35, 10, false), item(36, 1, true)];
        let prices = vec![
            sell(34, JITA.region_id, 5.0),
            sell(34, AMARR.region_id, 4.0),
            sell(35, JITA.region_id, 20.0),
        ];
        let cmp = compare_list(&items, &prices);

        assert_eq!(cmp.regions.len(), 2);
        let jita = cmp.regions.iter().find(|r| r.hub == "Jita").unwrap();
        assert_eq!(jita.total, 700.0);
        assert_eq!(jita.missing_items, 0);
        let amarr = cmp.regions.iter().find(|r| r.hub == "Amarr").unwrap();
        assert_eq!(amarr.missing_items, 1);

        assert_eq!(cmp.items.len(), 2);
        assert_eq!(cmp.items[0].region_id, Some(AMARR.region_id));
        assert_eq!(cmp.split_total, 600.0);
    }
}
