//! Mapping plans: the structural correspondence between a source version's
//! dimension options and a target version's candidates.
//!
//! A plan holds one group per scoped unit (geographic level for locations,
//! filter column for filters). Each group pairs `mappings` (one entry per
//! source option, keyed by its structural key) with `candidates` (the full
//! target option set, keyed likewise). Groups present on only one side are
//! valid: candidates-only groups represent newly introduced levels/filters,
//! mappings-only groups represent removed ones.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    keys,
    meta::{DatasetVersionMeta, LocationOptionMeta},
    version::MappingSummary,
};

/// How a source option's fate in the target version was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Unresolved,
    AutoMapped,
    AutoNone,
    ManualMapped,
    ManualNone,
}

impl Resolution {
    /// Human-owned resolutions are frozen; the auto-mapper never rewrites
    /// them. Everything else is machine-owned and fair game to re-resolve.
    pub fn is_manual(self) -> bool {
        matches!(self, Resolution::ManualMapped | Resolution::ManualNone)
    }

    pub fn is_mapped(self) -> bool {
        matches!(self, Resolution::AutoMapped | Resolution::ManualMapped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Unresolved => "unresolved",
            Resolution::AutoMapped => "auto-mapped",
            Resolution::AutoNone => "auto-none",
            Resolution::ManualMapped => "manual-mapped",
            Resolution::ManualNone => "manual-none",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of one option, cached inside the plan so the reviewer UI and the
/// finaliser never need to re-join against version metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionDescriptor {
    /// Internal row id of the option in its own version.
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

impl OptionDescriptor {
    fn from_location_option(option: &LocationOptionMeta) -> Self {
        OptionDescriptor {
            id: option.id,
            public_id: option.public_id.clone(),
            label: option.label.clone(),
            code: option.code.clone(),
            old_code: option.old_code.clone(),
            urn: option.urn.clone(),
            ukprn: option.ukprn.clone(),
        }
    }

    fn from_label(id: u64, public_id: Option<String>, label: &str) -> Self {
        OptionDescriptor {
            id,
            public_id,
            label: label.to_string(),
            code: None,
            old_code: None,
            urn: None,
            ukprn: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingEntry {
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_key: Option<String>,
    /// Cached descriptor of the source option this entry maps from.
    pub source: OptionDescriptor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingGroup {
    /// Display label of the level or filter this group scopes.
    pub label: String,
    /// Source key -> resolution state.
    pub mappings: BTreeMap<String, MappingEntry>,
    /// Target key -> descriptor of the option available to map onto.
    pub candidates: BTreeMap<String, OptionDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingPlan {
    /// Group key (level code / filter column) -> group.
    pub groups: BTreeMap<String, MappingGroup>,
}

impl MappingPlan {
    /// Builds the location plan: the union of levels present in either
    /// version, with every source option unresolved and every target option
    /// a candidate.
    pub fn build_locations(source: &DatasetVersionMeta, target: &DatasetVersionMeta) -> Self {
        let mut plan = MappingPlan::default();
        for level in &source.locations {
            let group = plan.group_entry(keys::location_group_key(level), &level.label);
            for option in &level.options {
                group.mappings.insert(
                    keys::location_option_key(option),
                    MappingEntry {
                        resolution: Resolution::Unresolved,
                        candidate_key: None,
                        source: OptionDescriptor::from_location_option(option),
                    },
                );
            }
        }
        for level in &target.locations {
            let group = plan.group_entry(keys::location_group_key(level), &level.label);
            for option in &level.options {
                group.candidates.insert(
                    keys::location_option_key(option),
                    OptionDescriptor::from_location_option(option),
                );
            }
        }
        plan
    }

    /// Builds the filter plan, grouped by filter column.
    pub fn build_filters(source: &DatasetVersionMeta, target: &DatasetVersionMeta) -> Self {
        let mut plan = MappingPlan::default();
        for filter in &source.filters {
            let group = plan.group_entry(keys::filter_group_key(filter), &filter.label);
            for option in &filter.options {
                group.mappings.insert(
                    keys::filter_option_key(option),
                    MappingEntry {
                        resolution: Resolution::Unresolved,
                        candidate_key: None,
                        source: OptionDescriptor::from_label(
                            option.id,
                            option.public_id.clone(),
                            &option.label,
                        ),
                    },
                );
            }
        }
        for filter in &target.filters {
            let group = plan.group_entry(keys::filter_group_key(filter), &filter.label);
            for option in &filter.options {
                group.candidates.insert(
                    keys::filter_option_key(option),
                    OptionDescriptor::from_label(option.id, None, &option.label),
                );
            }
        }
        plan
    }

    fn group_entry(&mut self, key: String, label: &str) -> &mut MappingGroup {
        let group = self.groups.entry(key).or_default();
        if group.label.is_empty() {
            group.label = label.to_string();
        }
        group
    }

    /// Looks up the candidate a mapped entry resolves to.
    pub fn resolved_candidate(&self, group_key: &str, entry: &MappingEntry) -> Option<&OptionDescriptor> {
        let candidate_key = entry.candidate_key.as_deref()?;
        self.groups.get(group_key)?.candidates.get(candidate_key)
    }
}

/// Which two-level dimension a mapping operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappedDimension {
    Locations,
    Filters,
}

impl fmt::Display for MappedDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappedDimension::Locations => write!(f, "locations"),
            MappedDimension::Filters => write!(f, "filters"),
        }
    }
}

/// The 1:1 association between a source and a target dataset version,
/// holding one plan per two-level dimension plus the flags the version
/// number calculation consumes. Created once at the start of the mapping
/// stages and mutated in place as auto- and manual mapping proceed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMapping {
    pub source_version: Uuid,
    pub target_version: Uuid,
    pub locations: MappingPlan,
    pub filters: MappingPlan,
    pub locations_complete: bool,
    pub filters_complete: bool,
    pub deleted_indicators: bool,
    pub deleted_geographic_levels: bool,
    pub deleted_time_periods: bool,
}

impl VersionMapping {
    /// Builds the mapping for a freshly imported target version. The
    /// deletion flags are fixed here: they depend only on the two metadata
    /// snapshots, never on how options are later resolved.
    pub fn new(
        source_version: Uuid,
        target_version: Uuid,
        source: &DatasetVersionMeta,
        target: &DatasetVersionMeta,
    ) -> Self {
        let target_indicators: Vec<String> =
            target.indicators.iter().map(keys::indicator_key).collect();
        let deleted_indicators = source
            .indicators
            .iter()
            .any(|i| !target_indicators.contains(&keys::indicator_key(i)));

        let target_levels = target.geographic_level_set.sorted_levels();
        let deleted_geographic_levels = source
            .geographic_level_set
            .sorted_levels()
            .iter()
            .any(|level| !target_levels.contains(level));

        let target_periods: Vec<String> =
            target.time_periods.iter().map(keys::time_period_key).collect();
        let deleted_time_periods = source
            .time_periods
            .iter()
            .any(|t| !target_periods.contains(&keys::time_period_key(t)));

        VersionMapping {
            source_version,
            target_version,
            locations: MappingPlan::build_locations(source, target),
            filters: MappingPlan::build_filters(source, target),
            locations_complete: false,
            filters_complete: false,
            deleted_indicators,
            deleted_geographic_levels,
            deleted_time_periods,
        }
    }

    pub fn plan(&self, dimension: MappedDimension) -> &MappingPlan {
        match dimension {
            MappedDimension::Locations => &self.locations,
            MappedDimension::Filters => &self.filters,
        }
    }

    pub fn plan_mut(&mut self, dimension: MappedDimension) -> &mut MappingPlan {
        match dimension {
            MappedDimension::Locations => &mut self.locations,
            MappedDimension::Filters => &mut self.filters,
        }
    }

    /// The reviewer write path: records a human decision for one source
    /// option. A `Some` candidate key resolves to `ManualMapped`, `None`
    /// records a deliberate `ManualNone`. The group, source key, and
    /// candidate key must all exist.
    pub fn resolve_manual(
        &mut self,
        dimension: MappedDimension,
        group_key: &str,
        source_key: &str,
        candidate_key: Option<&str>,
    ) -> Result<()> {
        let plan = self.plan_mut(dimension);
        let Some(group) = plan.groups.get_mut(group_key) else {
            bail!("No {dimension} mapping group '{group_key}'");
        };
        if let Some(candidate) = candidate_key {
            if !group.candidates.contains_key(candidate) {
                bail!("No candidate '{candidate}' in {dimension} group '{group_key}'");
            }
        }
        let Some(entry) = group.mappings.get_mut(source_key) else {
            bail!("No source option '{source_key}' in {dimension} group '{group_key}'");
        };
        match candidate_key {
            Some(candidate) => {
                entry.resolution = Resolution::ManualMapped;
                entry.candidate_key = Some(candidate.to_string());
            }
            None => {
                entry.resolution = Resolution::ManualNone;
                entry.candidate_key = None;
            }
        }
        Ok(())
    }

    /// The flag bundle consumed by the version number calculation.
    pub fn summary(&self) -> MappingSummary {
        MappingSummary {
            locations_complete: self.locations_complete,
            filters_complete: self.filters_complete,
            deleted_indicators: self.deleted_indicators,
            deleted_geographic_levels: self.deleted_geographic_levels,
            deleted_time_periods: self.deleted_time_periods,
        }
    }
}
