//! Change computation between two finalized dataset versions.
//!
//! Given the source version's metadata and the target version's finalized
//! metadata (every item joined by stable public identifier), produces typed
//! addition/update/deletion records per dimension category, in the order
//! they are persisted and rendered: deletions first, then updates, then
//! additions, each block ascending by label. Consumers rely on that
//! insertion order without re-sorting.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, anyhow};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::meta::{DatasetVersionMeta, GeographicLevelSetMeta, ensure_finalized};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Deleted,
    Updated,
    Added,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Deleted => "deleted",
            ChangeKind::Updated => "updated",
            ChangeKind::Added => "added",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One side of a change record: the public identifier and display label the
/// item had in that version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeState {
    pub public_id: String,
    pub label: String,
}

/// A single typed change. Exactly one side is absent for additions and
/// deletions; both are present for updates. Records are created once, at the
/// create-changes stage, and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<ChangeState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<ChangeState>,
}

impl ChangeRecord {
    pub fn kind(&self) -> ChangeKind {
        match (&self.previous, &self.current) {
            (Some(_), None) => ChangeKind::Deleted,
            (Some(_), Some(_)) => ChangeKind::Updated,
            _ => ChangeKind::Added,
        }
    }
}

/// All change records computed for one target version, per category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub version_id: Uuid,
    pub filters: Vec<ChangeRecord>,
    pub filter_options: Vec<ChangeRecord>,
    pub locations: Vec<ChangeRecord>,
    pub location_options: Vec<ChangeRecord>,
    pub indicators: Vec<ChangeRecord>,
    pub geographic_level_set: Vec<ChangeRecord>,
    pub time_periods: Vec<ChangeRecord>,
}

/// One item flattened into the form the diff works over. `join_key` is the
/// public identifier for every category except time periods, which join on
/// their natural key instead; `content` is the comparable state whose change
/// turns a joined pair into an update.
struct DiffItem {
    join_key: String,
    public_id: String,
    label: String,
    content: String,
}

const FIELD_SEPARATOR: char = '\u{1f}';

impl ChangeSet {
    /// Computes the ordered change records between two versions. Both
    /// snapshots must be finalized: an item without a public identifier here
    /// means mapping never completed, which is a caller bug, not input to
    /// recover from.
    pub fn compute(
        old: &DatasetVersionMeta,
        new: &DatasetVersionMeta,
        version_id: Uuid,
    ) -> Result<ChangeSet> {
        ensure_finalized(old, "source")?;
        ensure_finalized(new, "target")?;

        Ok(ChangeSet {
            version_id,
            filters: diff(filter_items(old)?, filter_items(new)?),
            filter_options: diff(filter_option_items(old)?, filter_option_items(new)?),
            locations: diff(location_items(old)?, location_items(new)?),
            location_options: diff(location_option_items(old)?, location_option_items(new)?),
            indicators: diff(indicator_items(old)?, indicator_items(new)?),
            geographic_level_set: diff_level_set(
                &old.geographic_level_set,
                &new.geographic_level_set,
            ),
            time_periods: diff(time_period_items(old)?, time_period_items(new)?),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.categories().iter().map(|(_, records)| records.len()).sum()
    }

    /// Category name plus records, in the fixed rendering order.
    pub fn categories(&self) -> [(&'static str, &[ChangeRecord]); 7] {
        [
            ("filter", &self.filters),
            ("filter option", &self.filter_options),
            ("location level", &self.locations),
            ("location option", &self.location_options),
            ("indicator", &self.indicators),
            ("geographic level set", &self.geographic_level_set),
            ("time period", &self.time_periods),
        ]
    }

    /// Flattens the set into changelog rows: category, change kind, detail.
    pub fn changelog_rows(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        for (category, records) in self.categories() {
            for record in records {
                let detail = match (&record.previous, &record.current) {
                    (Some(previous), None) => {
                        format!("{} ({})", previous.label, previous.public_id)
                    }
                    (Some(previous), Some(current)) => format!(
                        "{} -> {} ({})",
                        previous.label, current.label, current.public_id
                    ),
                    (None, Some(current)) => {
                        format!("{} ({})", current.label, current.public_id)
                    }
                    (None, None) => String::new(),
                };
                rows.push(vec![
                    category.to_string(),
                    record.kind().to_string(),
                    detail,
                ]);
            }
        }
        rows
    }
}

/// The join-then-partition diff shared by every list category. Items present
/// only on the old side are deletions, only on the new side additions, and
/// items on both sides with differing content are updates. Each block is
/// sorted ascending by label before the blocks are chained.
fn diff(old: Vec<DiffItem>, new: Vec<DiffItem>) -> Vec<ChangeRecord> {
    let old_by_key: BTreeMap<&str, &DiffItem> =
        old.iter().map(|item| (item.join_key.as_str(), item)).collect();
    let new_by_key: BTreeMap<&str, &DiffItem> =
        new.iter().map(|item| (item.join_key.as_str(), item)).collect();

    let deletions = old
        .iter()
        .filter(|item| !new_by_key.contains_key(item.join_key.as_str()))
        .sorted_by(|a, b| a.label.cmp(&b.label))
        .map(|item| ChangeRecord {
            previous: Some(state(item)),
            current: None,
        });

    let updates = new
        .iter()
        .filter_map(|item| {
            old_by_key
                .get(item.join_key.as_str())
                .filter(|previous| previous.content != item.content)
                .map(|previous| (*previous, item))
        })
        .sorted_by(|(_, a), (_, b)| a.label.cmp(&b.label))
        .map(|(previous, current)| ChangeRecord {
            previous: Some(state(previous)),
            current: Some(state(current)),
        });

    let additions = new
        .iter()
        .filter(|item| !old_by_key.contains_key(item.join_key.as_str()))
        .sorted_by(|a, b| a.label.cmp(&b.label))
        .map(|item| ChangeRecord {
            previous: None,
            current: Some(state(item)),
        });

    deletions.chain(updates).chain(additions).collect()
}

/// The level set is single-valued: at most one record per version, present
/// only when the sorted level sets differ, always as an update since both
/// versions carry a set.
fn diff_level_set(
    old: &GeographicLevelSetMeta,
    new: &GeographicLevelSetMeta,
) -> Vec<ChangeRecord> {
    let old_levels = old.sorted_levels();
    let new_levels = new.sorted_levels();
    if old_levels == new_levels {
        return Vec::new();
    }
    vec![ChangeRecord {
        previous: Some(ChangeState {
            public_id: old.public_id.clone().unwrap_or_default(),
            label: old_levels.join(", "),
        }),
        current: Some(ChangeState {
            public_id: new.public_id.clone().unwrap_or_default(),
            label: new_levels.join(", "),
        }),
    }]
}

fn state(item: &DiffItem) -> ChangeState {
    ChangeState {
        public_id: item.public_id.clone(),
        label: item.label.clone(),
    }
}

fn required_id(public_id: &Option<String>, label: &str) -> Result<String> {
    public_id
        .clone()
        .ok_or_else(|| anyhow!("Item '{label}' has no public id"))
}

fn fingerprint(fields: &[&str]) -> String {
    fields.join(&FIELD_SEPARATOR.to_string())
}

fn filter_items(meta: &DatasetVersionMeta) -> Result<Vec<DiffItem>> {
    meta.filters
        .iter()
        .map(|filter| {
            let public_id = required_id(&filter.public_id, &filter.label)?;
            Ok(DiffItem {
                join_key: public_id.clone(),
                public_id,
                label: filter.label.clone(),
                content: fingerprint(&[&filter.label, filter.hint.as_deref().unwrap_or("")]),
            })
        })
        .collect()
}

/// Filter options span all parent filters flattened together; the ordering
/// contract is category-wide, not per filter.
fn filter_option_items(meta: &DatasetVersionMeta) -> Result<Vec<DiffItem>> {
    meta.filters
        .iter()
        .flat_map(|filter| filter.options.iter())
        .map(|option| {
            let public_id = required_id(&option.public_id, &option.label)?;
            Ok(DiffItem {
                join_key: public_id.clone(),
                public_id,
                label: option.label.clone(),
                content: option.label.clone(),
            })
        })
        .collect()
}

fn location_items(meta: &DatasetVersionMeta) -> Result<Vec<DiffItem>> {
    meta.locations
        .iter()
        .map(|level| {
            let public_id = required_id(&level.public_id, &level.label)?;
            Ok(DiffItem {
                join_key: public_id.clone(),
                public_id,
                label: level.label.clone(),
                content: level.label.clone(),
            })
        })
        .collect()
}

fn location_option_items(meta: &DatasetVersionMeta) -> Result<Vec<DiffItem>> {
    meta.locations
        .iter()
        .flat_map(|level| level.options.iter())
        .map(|option| {
            let public_id = required_id(&option.public_id, &option.label)?;
            Ok(DiffItem {
                join_key: public_id.clone(),
                public_id,
                label: option.label.clone(),
                content: fingerprint(&[
                    &option.label,
                    option.code.as_deref().unwrap_or(""),
                    option.old_code.as_deref().unwrap_or(""),
                    option.urn.as_deref().unwrap_or(""),
                    option.ukprn.as_deref().unwrap_or(""),
                ]),
            })
        })
        .collect()
}

fn indicator_items(meta: &DatasetVersionMeta) -> Result<Vec<DiffItem>> {
    meta.indicators
        .iter()
        .map(|indicator| {
            let public_id = required_id(&indicator.public_id, &indicator.label)?;
            let decimal_places = indicator
                .decimal_places
                .map(|dp| dp.to_string())
                .unwrap_or_default();
            Ok(DiffItem {
                join_key: public_id.clone(),
                public_id,
                label: indicator.label.clone(),
                content: fingerprint(&[
                    &indicator.label,
                    &indicator.column,
                    indicator.unit.as_deref().unwrap_or(""),
                    &decimal_places,
                ]),
            })
        })
        .collect()
}

/// Time periods join on their natural key of code plus period, so a joined
/// pair is identical by construction and no update case exists.
fn time_period_items(meta: &DatasetVersionMeta) -> Result<Vec<DiffItem>> {
    meta.time_periods
        .iter()
        .map(|period| {
            let label = format!("{} {}", period.code, period.period);
            Ok(DiffItem {
                join_key: label.clone(),
                public_id: required_id(&period.public_id, &label)?,
                label,
                content: String::new(),
            })
        })
        .collect()
}
