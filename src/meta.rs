//! Dimension metadata model for one dataset version.
//!
//! Every item carries two identities: `id` is the internal, version-local
//! row id handed out by the store, and `public_id` is the stable identifier
//! exposed to consumers, assigned during finalisation by either carrying the
//! identifier forward from a resolved mapping or minting a fresh one from the
//! internal id. Items arriving from an extract have no public id yet.

use std::collections::HashSet;

use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterOptionMeta {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterMeta {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Source data column this filter is read from. Doubles as the filter's
    /// structural identity across versions.
    pub column: String,
    pub options: Vec<FilterOptionMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationOptionMeta {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ukprn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationLevelMeta {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    /// Geographic level code, e.g. `LA` or `School`. Structural identity of
    /// the level across versions.
    pub code: String,
    pub label: String,
    pub options: Vec<LocationOptionMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorMeta {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub label: String,
    /// Source data column. Structural identity of the indicator.
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u8>,
}

/// The set of geographic levels a version's data covers, held as a single
/// entity so level-set changes surface as one change record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeographicLevelSetMeta {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub levels: Vec<String>,
}

impl GeographicLevelSetMeta {
    /// Levels in sorted order, the canonical form for comparison and display.
    pub fn sorted_levels(&self) -> Vec<String> {
        let mut levels = self.levels.clone();
        levels.sort();
        levels.dedup();
        levels
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimePeriodMeta {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    /// Time identifier code, e.g. `AY` for academic year.
    pub code: String,
    /// Period label, e.g. `2024` or `2024/25`.
    pub period: String,
}

impl TimePeriodMeta {
    /// The natural key: a time period's identity is its code plus period.
    pub fn natural_key(&self) -> (String, String) {
        (self.code.clone(), self.period.clone())
    }
}

/// All dimension metadata for one dataset version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetVersionMeta {
    pub filters: Vec<FilterMeta>,
    pub locations: Vec<LocationLevelMeta>,
    pub indicators: Vec<IndicatorMeta>,
    pub geographic_level_set: GeographicLevelSetMeta,
    pub time_periods: Vec<TimePeriodMeta>,
}

impl Default for GeographicLevelSetMeta {
    fn default() -> Self {
        GeographicLevelSetMeta {
            id: 0,
            public_id: None,
            levels: Vec::new(),
        }
    }
}

impl DatasetVersionMeta {
    /// True once every item in every category carries a public identifier.
    pub fn is_finalized(&self) -> bool {
        self.filters
            .iter()
            .all(|f| f.public_id.is_some() && f.options.iter().all(|o| o.public_id.is_some()))
            && self.locations.iter().all(|level| {
                level.public_id.is_some() && level.options.iter().all(|o| o.public_id.is_some())
            })
            && self.indicators.iter().all(|i| i.public_id.is_some())
            && self.geographic_level_set.public_id.is_some()
            && self.time_periods.iter().all(|t| t.public_id.is_some())
    }

    /// Checks that public identifiers are unique within each category.
    pub fn check_public_ids_unique(&self) -> Result<()> {
        check_unique("filter", self.filters.iter().map(|f| &f.public_id))?;
        check_unique(
            "filter option",
            self.filters
                .iter()
                .flat_map(|f| f.options.iter())
                .map(|o| &o.public_id),
        )?;
        check_unique("location level", self.locations.iter().map(|l| &l.public_id))?;
        check_unique(
            "location option",
            self.locations
                .iter()
                .flat_map(|l| l.options.iter())
                .map(|o| &o.public_id),
        )?;
        check_unique("indicator", self.indicators.iter().map(|i| &i.public_id))?;
        check_unique("time period", self.time_periods.iter().map(|t| &t.public_id))?;
        Ok(())
    }

    /// Total number of metadata items across all categories, counting the
    /// level set as one. Used to size internal-id allocations.
    pub fn item_count(&self) -> u64 {
        let filter_items: usize = self.filters.iter().map(|f| 1 + f.options.len()).sum();
        let location_items: usize = self.locations.iter().map(|l| 1 + l.options.len()).sum();
        (filter_items + location_items + self.indicators.len() + self.time_periods.len() + 1)
            as u64
    }
}

fn check_unique<'a>(
    category: &str,
    ids: impl Iterator<Item = &'a Option<String>>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids.flatten() {
        if !seen.insert(id.as_str()) {
            bail!("Duplicate {category} public id '{id}'");
        }
    }
    Ok(())
}

/// Asserts the finalisation precondition shared by the change computer and
/// the mapping builder's source side.
pub fn ensure_finalized(meta: &DatasetVersionMeta, role: &str) -> Result<()> {
    ensure!(
        meta.is_finalized(),
        "{role} metadata has items without public identifiers; finalize the version first"
    );
    meta.check_public_ids_unique()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: u64, public_id: &str, label: &str) -> FilterOptionMeta {
        FilterOptionMeta {
            id,
            public_id: Some(public_id.to_string()),
            label: label.to_string(),
        }
    }

    #[test]
    fn duplicate_public_ids_are_rejected() {
        let meta = DatasetVersionMeta {
            filters: vec![FilterMeta {
                id: 1,
                public_id: Some("abcd".to_string()),
                label: "Characteristic".to_string(),
                hint: None,
                column: "characteristic".to_string(),
                options: vec![option(2, "dupe", "Total"), option(3, "dupe", "FSM")],
            }],
            ..DatasetVersionMeta::default()
        };
        let err = meta.check_public_ids_unique().unwrap_err();
        assert!(err.to_string().contains("filter option"));
    }

    #[test]
    fn finalized_requires_every_category() {
        let mut meta = DatasetVersionMeta {
            geographic_level_set: GeographicLevelSetMeta {
                id: 1,
                public_id: Some("abcd".to_string()),
                levels: vec!["LA".to_string()],
            },
            ..DatasetVersionMeta::default()
        };
        assert!(meta.is_finalized());
        meta.time_periods.push(TimePeriodMeta {
            id: 2,
            public_id: None,
            code: "AY".to_string(),
            period: "2024/25".to_string(),
        });
        assert!(!meta.is_finalized());
    }

    #[test]
    fn sorted_levels_deduplicates() {
        let set = GeographicLevelSetMeta {
            id: 1,
            public_id: None,
            levels: vec!["School".to_string(), "LA".to_string(), "LA".to_string()],
        };
        assert_eq!(set.sorted_levels(), vec!["LA", "School"]);
    }
}
