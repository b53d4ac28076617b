//! Auto-mapping: resolves every machine-owned mapping entry against the
//! candidate set and computes completeness per dimension type.

use log::debug;

use crate::plan::{MappingGroup, MappingPlan, Resolution, VersionMapping};

/// Resolves every entry not already settled by a human. An entry whose key
/// has an equal-keyed candidate in the same group becomes `AutoMapped`;
/// otherwise it becomes `AutoNone`. Prior `AutoMapped`/`AutoNone` states are
/// recomputed from scratch so stale machine decisions never survive a
/// candidate change. After this runs, no entry remains `Unresolved` outside
/// the manual states.
pub fn auto_map(plan: &mut MappingPlan) {
    for group in plan.groups.values_mut() {
        let MappingGroup {
            mappings,
            candidates,
            ..
        } = group;
        for (source_key, entry) in mappings.iter_mut() {
            if entry.resolution.is_manual() {
                continue;
            }
            if candidates.contains_key(source_key) {
                entry.resolution = Resolution::AutoMapped;
                entry.candidate_key = Some(source_key.clone());
            } else {
                entry.resolution = Resolution::AutoNone;
                entry.candidate_key = None;
            }
        }
    }
}

/// A mapping entry blocks completeness only while it is unsettled
/// (`AutoNone` or still `Unresolved`) and its group retains at least one
/// candidate. A group whose candidates all vanished (the whole level or
/// filter was removed) never blocks: there is nothing left to map onto.
pub fn is_complete(plan: &MappingPlan) -> bool {
    plan.groups.values().all(|group| {
        group.candidates.is_empty()
            || group.mappings.values().all(|entry| {
                !matches!(
                    entry.resolution,
                    Resolution::Unresolved | Resolution::AutoNone
                )
            })
    })
}

/// Runs auto-mapping across both plans of a version mapping and refreshes
/// its completeness flags.
pub fn apply(mapping: &mut VersionMapping) {
    auto_map(&mut mapping.locations);
    auto_map(&mut mapping.filters);
    refresh_completeness(mapping);
    debug!(
        "Auto-mapping applied: locations complete = {}, filters complete = {}",
        mapping.locations_complete, mapping.filters_complete
    );
}

/// Recomputes the completeness flags without touching resolutions. Used
/// after manual edits, which change entry states but not candidates.
pub fn refresh_completeness(mapping: &mut VersionMapping) {
    mapping.locations_complete = is_complete(&mapping.locations);
    mapping.filters_complete = is_complete(&mapping.filters);
}
