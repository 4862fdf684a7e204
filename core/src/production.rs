use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub const MAX_MATERIAL_EFFICIENCY: i32 = 10;
pub const MAX_RUNS: i64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProductionError {
    #[error("runs must be between 1 and {MAX_RUNS}, got {0}")]
    InvalidRuns(i64),
    #[error("material efficiency must be between 0 and {MAX_MATERIAL_EFFICIENCY}, got {0}")]
    InvalidMaterialEfficiency(i32),
}

/// Base material line of a blueprint (quantity for one run at ME 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BlueprintMaterial {
    pub type_id: i64,
    pub type_name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MaterialRequirement {
    pub type_id: i64,
    pub type_name: String,
    /// Quantity for one run before material efficiency
    pub base_quantity: i64,
    /// Total quantity for all runs after material efficiency
    pub quantity: i64,
}

pub fn validate_job(runs: i64, me: i32) -> Result<(), ProductionError> {
    if !(1..=MAX_RUNS).contains(&runs) {
        return Err(ProductionError::InvalidRuns(runs));
    }
    if !(0..=MAX_MATERIAL_EFFICIENCY).contains(&me) {
        return Err(ProductionError::InvalidMaterialEfficiency(me));
    }
    Ok(())
}

/// Quantity needed for `runs` runs at material efficiency `me`.
/// Never drops below one unit per run.
pub fn adjusted_quantity(base: i64, runs: i64, me: i32) -> i64 {
    // integer arithmetic in hundredths avoids float rounding on exact multiples
    let numerator = base * runs * i64::from(100 - me);
    let reduced = (numerator + 99) / 100;
    reduced.max(runs)
}

pub fn material_requirements(
    materials: &[BlueprintMaterial],
    runs: i64,
    me: i32,
) -> Result<Vec<MaterialRequirement>, ProductionError> {
    validate_job(runs, me)?;

    let mut out: Vec<MaterialRequirement> = materials
        .iter()
        .map(|m| MaterialRequirement {
            type_id: m.type_id,
            type_name: m.type_name.clone(),
            base_quantity: m.quantity,
            quantity: adjusted_quantity(m.quantity, runs, me),
        })
        .collect();
    out.sort_by_key(|m| m.type_id);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat(type_id: i64, name: &str, quantity: i64) -> BlueprintMaterial {
        BlueprintMaterial {
            type_id,
            type_name: name.to_string(),
            quantity,
        }
    }

    #[test]
    fn me_zero_is_plain_multiplication() {
        assert_eq!(adjusted_quantity(2000, 10, 0), 20000);
    }

    #[test]
    fn me_ten_rounds_up() {
        // 333 * 1 * 0.9 = 299.7 -> 300
        assert_eq!(adjusted_quantity(333, 1, 10), 300);
        // 1000 * 3 * 0.9 = 2700 exactly
        assert_eq!(adjusted_quantity(1000, 3, 10), 2700);
    }

    #[test]
    fn never_less_than_one_per_run() {
        assert_eq!(adjusted_quantity(1, 5, 10), 5);
    }

    #[test]
    fn requirements_are_sorted_and_validated() {
        let mats = vec![mat(36, "Mexallon", 300), mat(34, "Tritanium", 2500)];
        let reqs = material_requirements(&mats, 2, 10).unwrap();
        assert_eq!(reqs[0].type_id, 34);
        assert_eq!(reqs[0].quantity, 4500);
        assert_eq!(reqs[1].quantity, 540);

        assert_eq!(
            material_requirements(&mats, 0, 0),
            Err(ProductionError::InvalidRuns(0))
        );
        assert_eq!(
            material_requirements(&mats, 1, 11),
            Err(ProductionError::InvalidMaterialEfficiency(11))
        );
    }
}
