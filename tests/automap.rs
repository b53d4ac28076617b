use dataset_managed::automap;
use dataset_managed::meta::{DatasetVersionMeta, FilterMeta, FilterOptionMeta};
use dataset_managed::plan::{MappedDimension, MappingPlan, Resolution, VersionMapping};
use uuid::Uuid;

fn filter(id: u64, column: &str, options: &[(u64, &str)]) -> FilterMeta {
    FilterMeta {
        id,
        public_id: Some(format!("pid-{id}")),
        label: column.to_string(),
        hint: None,
        column: column.to_string(),
        options: options
            .iter()
            .map(|(option_id, label)| FilterOptionMeta {
                id: *option_id,
                public_id: Some(format!("pid-{option_id}")),
                label: label.to_string(),
            })
            .collect(),
    }
}

fn meta_with_options(options: &[(u64, &str)]) -> DatasetVersionMeta {
    DatasetVersionMeta {
        filters: vec![filter(1, "characteristic", options)],
        ..DatasetVersionMeta::default()
    }
}

fn resolution(plan: &MappingPlan, group: &str, source_key: &str) -> Resolution {
    plan.groups[group].mappings[source_key].resolution
}

#[test]
fn auto_mapping_leaves_nothing_unresolved() {
    let source = meta_with_options(&[(2, "Total"), (3, "FSM"), (4, "Ever FSM")]);
    let target = meta_with_options(&[(12, "Total"), (13, "Ever FSM 6")]);
    let mut plan = MappingPlan::build_filters(&source, &target);

    automap::auto_map(&mut plan);
    assert!(
        plan.groups
            .values()
            .flat_map(|group| group.mappings.values())
            .all(|entry| entry.resolution != Resolution::Unresolved)
    );
    assert_eq!(resolution(&plan, "characteristic", "Total"), Resolution::AutoMapped);
    assert_eq!(resolution(&plan, "characteristic", "FSM"), Resolution::AutoNone);
    assert_eq!(
        resolution(&plan, "characteristic", "Ever FSM"),
        Resolution::AutoNone
    );
}

#[test]
fn mapped_entries_point_at_their_candidate() {
    let source = meta_with_options(&[(2, "Total")]);
    let target = meta_with_options(&[(12, "Total")]);
    let mut plan = MappingPlan::build_filters(&source, &target);

    automap::auto_map(&mut plan);
    let entry = &plan.groups["characteristic"].mappings["Total"];
    assert_eq!(entry.candidate_key.as_deref(), Some("Total"));
    let candidate = plan.resolved_candidate("characteristic", entry).unwrap();
    assert_eq!(candidate.id, 12);
}

#[test]
fn manual_resolutions_survive_re_mapping() {
    let source = meta_with_options(&[(2, "Total"), (3, "FSM")]);
    let target = meta_with_options(&[(12, "Total"), (13, "Ever FSM")]);
    let mut mapping =
        VersionMapping::new(Uuid::new_v4(), Uuid::new_v4(), &source, &target);

    mapping
        .resolve_manual(MappedDimension::Filters, "characteristic", "FSM", Some("Ever FSM"))
        .unwrap();
    automap::apply(&mut mapping);

    let entry = &mapping.filters.groups["characteristic"].mappings["FSM"];
    assert_eq!(entry.resolution, Resolution::ManualMapped);
    assert_eq!(entry.candidate_key.as_deref(), Some("Ever FSM"));
    assert!(mapping.filters_complete);
}

#[test]
fn stale_auto_decisions_are_recomputed() {
    let source = meta_with_options(&[(2, "Total")]);
    let target_without = meta_with_options(&[(12, "Other")]);
    let mut mapping =
        VersionMapping::new(Uuid::new_v4(), Uuid::new_v4(), &source, &target_without);
    automap::apply(&mut mapping);
    assert_eq!(
        mapping.filters.groups["characteristic"].mappings["Total"].resolution,
        Resolution::AutoNone
    );
    assert!(!mapping.filters_complete);

    // A matching candidate appears (e.g. a corrected extract); re-running
    // auto-mapping flips the entry and completeness follows.
    mapping.filters.groups.get_mut("characteristic").unwrap().candidates.insert(
        "Total".to_string(),
        dataset_managed::plan::OptionDescriptor {
            id: 13,
            public_id: None,
            label: "Total".to_string(),
            code: None,
            old_code: None,
            urn: None,
            ukprn: None,
        },
    );
    automap::apply(&mut mapping);
    assert_eq!(
        mapping.filters.groups["characteristic"].mappings["Total"].resolution,
        Resolution::AutoMapped
    );
    assert!(mapping.filters_complete);
}

#[test]
fn removed_group_never_blocks_completeness() {
    // The whole filter is gone in the target: its options cannot be mapped
    // to anything, so they are exempt from the completeness rule.
    let source = meta_with_options(&[(2, "Total"), (3, "FSM")]);
    let target = DatasetVersionMeta::default();
    let mut mapping = VersionMapping::new(Uuid::new_v4(), Uuid::new_v4(), &source, &target);

    automap::apply(&mut mapping);
    let group = &mapping.filters.groups["characteristic"];
    assert!(group.candidates.is_empty());
    assert!(
        group
            .mappings
            .values()
            .all(|entry| entry.resolution == Resolution::AutoNone)
    );
    assert!(mapping.filters_complete);
    assert!(mapping.locations_complete);
}

#[test]
fn manual_none_does_not_block_completeness() {
    let source = meta_with_options(&[(2, "Total"), (3, "FSM")]);
    let target = meta_with_options(&[(12, "Total")]);
    let mut mapping = VersionMapping::new(Uuid::new_v4(), Uuid::new_v4(), &source, &target);

    automap::apply(&mut mapping);
    assert!(!mapping.filters_complete);

    mapping
        .resolve_manual(MappedDimension::Filters, "characteristic", "FSM", None)
        .unwrap();
    automap::refresh_completeness(&mut mapping);
    assert!(mapping.filters_complete);
}
