// =============================================================================
// Weight Table — versioned engine-weight multipliers
// =============================================================================
//
// The one shared mutable resource in the engine. Scorers read a cloned
// snapshot; the only writer is the weight optimizer inside the learning
// cycle, which installs a whole new table (never in-place field edits).
//
// Every multiplier is kept inside [floor, ceiling] at all times. Unknown
// engines read as the neutral multiplier 1.0.
// =============================================================================

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Neutral multiplier for engines with no learned adjustment.
pub const DEFAULT_MULTIPLIER: f64 = 1.0;

/// Versioned mapping of `engine_id -> weight multiplier`.
///
/// BTreeMap keeps serialised output stable, which makes the persisted table
/// diffable across versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightTable {
    /// Monotonically increasing version. Bumped by the optimizer on every
    /// applied update.
    pub version: u64,

    /// ISO 8601 timestamp of the last update.
    pub updated_at: String,

    /// Per-engine multipliers.
    pub multipliers: BTreeMap<String, f64>,
}

impl WeightTable {
    /// Build the boot-time table: every registered engine at 1.0, version 1.
    pub fn seeded<'a>(engine_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let multipliers = engine_ids
            .into_iter()
            .map(|id| (id.to_string(), DEFAULT_MULTIPLIER))
            .collect();
        Self {
            version: 1,
            updated_at: Utc::now().to_rfc3339(),
            multipliers,
        }
    }

    /// Multiplier for `engine_id`, falling back to 1.0 for unknown engines.
    pub fn multiplier(&self, engine_id: &str) -> f64 {
        self.multipliers
            .get(engine_id)
            .copied()
            .unwrap_or(DEFAULT_MULTIPLIER)
    }

    /// Set a multiplier, clamping into `[floor, ceiling]`.
    pub fn set_clamped(&mut self, engine_id: &str, value: f64, floor: f64, ceiling: f64) {
        let clamped = value.clamp(floor, ceiling);
        if (clamped - value).abs() > f64::EPSILON {
            debug!(
                engine_id,
                requested = value,
                applied = clamped,
                "weight clamped to bounds"
            );
        }
        self.multipliers.insert(engine_id.to_string(), clamped);
    }

    /// Mean absolute change between this table and `other`, over the union
    /// of engine ids. Missing entries count as 1.0 on the missing side.
    pub fn mean_abs_change(&self, other: &WeightTable) -> f64 {
        let ids: HashSet<&str> = self
            .multipliers
            .keys()
            .chain(other.multipliers.keys())
            .map(String::as_str)
            .collect();

        if ids.is_empty() {
            return 0.0;
        }

        let total: f64 = ids
            .iter()
            .map(|id| (self.multiplier(id) - other.multiplier(id)).abs())
            .sum();
        total / ids.len() as f64
    }

    /// True when every multiplier lies inside `[floor, ceiling]`.
    pub fn within_bounds(&self, floor: f64, ceiling: f64) -> bool {
        self.multipliers
            .values()
            .all(|&w| w >= floor && w <= ceiling)
    }

    /// Derive a successor table with the same multipliers, bumped version,
    /// and a fresh timestamp. The optimizer mutates the copy, never `self`.
    pub fn next_version(&self) -> Self {
        Self {
            version: self.version + 1,
            updated_at: Utc::now().to_rfc3339(),
            multipliers: self.multipliers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_table_is_all_neutral() {
        let table = WeightTable::seeded(["gamma", "sentiment"]);
        assert_eq!(table.version, 1);
        assert_eq!(table.multiplier("gamma"), 1.0);
        assert_eq!(table.multiplier("sentiment"), 1.0);
        // Unknown engines read as neutral too.
        assert_eq!(table.multiplier("nonexistent"), 1.0);
    }

    #[test]
    fn set_clamped_enforces_bounds() {
        let mut table = WeightTable::seeded(["gamma"]);
        table.set_clamped("gamma", 9.0, 0.5, 2.0);
        assert_eq!(table.multiplier("gamma"), 2.0);
        table.set_clamped("gamma", 0.01, 0.5, 2.0);
        assert_eq!(table.multiplier("gamma"), 0.5);
        assert!(table.within_bounds(0.5, 2.0));
    }

    #[test]
    fn mean_abs_change_over_union() {
        let a = WeightTable::seeded(["gamma", "sentiment"]);
        let mut b = a.next_version();
        b.set_clamped("gamma", 1.4, 0.5, 2.0);
        // gamma moved 0.4, sentiment moved 0.0 => mean 0.2.
        assert!((a.mean_abs_change(&b) - 0.2).abs() < 1e-12);
        // Symmetric.
        assert!((b.mean_abs_change(&a) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn next_version_bumps() {
        let a = WeightTable::seeded(["gamma"]);
        let b = a.next_version();
        assert_eq!(b.version, 2);
        assert_eq!(b.multiplier("gamma"), 1.0);
    }
}
