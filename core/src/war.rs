use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A destroyed ship, reduced to what the dashboards aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Killmail {
    pub killmail_id: i64,
    pub killed_at: DateTime<Utc>,
    pub solar_system_id: i64,
    pub region_id: i64,
    pub ship_type_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub victim_corporation_id: Option<i64>,
    #[serde(default)]
    pub isk_value: f64,
    #[serde(default)]
    pub attacker_count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CountedEntry {
    pub id: i64,
    pub kills: i64,
    pub isk_destroyed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WarSummary {
    pub total_kills: i64,
    pub total_isk_destroyed: f64,
    /// Busiest solar systems, most kills first
    pub hot_systems: Vec<CountedEntry>,
    /// Most destroyed hulls, most kills first
    pub top_ship_types: Vec<CountedEntry>,
    /// Largest fight measured by attackers on a single kill
    pub max_attackers: i32,
}

fn top_n<F>(kills: &[Killmail], key: F, limit: usize) -> Vec<CountedEntry>
where
    F: Fn(&Killmail) -> i64,
{
    let mut counts: HashMap<i64, CountedEntry> = HashMap::new();
    for k in kills {
        let id = key(k);
        let entry = counts.entry(id).or_insert(CountedEntry {
            id,
            kills: 0,
            isk_destroyed: 0.0,
        });
        entry.kills += 1;
        entry.isk_destroyed += k.isk_value;
    }

    let mut entries: Vec<CountedEntry> = counts.into_values().collect();
    // ties broken by id so output is stable
    entries.sort_by(|a, b| b.kills.cmp(&a.kills).then(a.id.cmp(&b.id)));
    entries.truncate(limit);
    entries
}

pub fn summarize_kills(kills: &[Killmail], limit: usize) -> WarSummary {
    WarSummary {
        total_kills: kills.len() as i64,
        total_isk_destroyed: kills.iter().map(|k| k.isk_value).sum(),
        hot_systems: top_n(kills, |k| k.solar_system_id, limit),
        top_ship_types: top_n(kills, |k| k.ship_type_id, limit),
        max_attackers: kills.iter().map(|k| k.attacker_count).max().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn km(id: i64, system: i64, ship: i64, isk: f64, attackers: i32) -> Killmail {
        Killmail {
            killmail_id: id,
            killed_at: Utc::now(),
            solar_system_id: system,
            region_id: 10000060,
            ship_type_id: ship,
            victim_corporation_id: None,
            isk_value: isk,
            attacker_count: attackers,
        }
    }

    #[test]
    fn summary_ranks_systems_and_ships() {
        let kills = vec![
            km(1, 30000001, 587, 1.0e6, 3),
            km(2, 30000002, 587, 2.0e6, 12),
            km(3, 30000002, 24690, 150.0e6, 40),
            km(4, 30000003, 11987, 5.0e5, 1),
        ];
        let s = summarize_kills(&kills, 2);
        assert_eq!(s.total_kills, 4);
        assert_eq!(s.total_isk_destroyed, 153.5e6);
        assert_eq!(s.hot_systems.len(), 2);
        assert_eq!(s.hot_systems[0].id, 30000002);
        assert_eq!(s.hot_systems[0].kills, 2);
        assert_eq!(s.hot_systems[1].id, 30000001);
        assert_eq!(s.top_ship_types[0].id, 587);
        assert_eq!(s.max_attackers, 40);
    }

    #[test]
    fn empty_summary() {
        let s = summarize_kills(&[], 10);
        assert_eq!(s.total_kills, 0);
        assert!(s.hot_systems.is_empty());
        assert_eq!(s.max_attackers, 0);
    }
}
