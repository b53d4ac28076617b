use dataset_managed::version::{MappingSummary, VersionNumber};

fn complete() -> MappingSummary {
    MappingSummary {
        locations_complete: true,
        filters_complete: true,
        deleted_indicators: false,
        deleted_geographic_levels: false,
        deleted_time_periods: false,
    }
}

#[test]
fn complete_mapping_without_deletions_is_a_minor_bump() {
    let current: VersionNumber = "1.0.0".parse().unwrap();
    assert_eq!(current.next(&complete()).to_string(), "1.1.0");
}

#[test]
fn incomplete_location_mapping_is_a_major_bump() {
    let current: VersionNumber = "1.0.0".parse().unwrap();
    let summary = MappingSummary {
        locations_complete: false,
        ..complete()
    };
    assert_eq!(current.next(&summary).to_string(), "2.0.0");
}

#[test]
fn incomplete_filter_mapping_is_a_major_bump() {
    let current: VersionNumber = "1.3.0".parse().unwrap();
    let summary = MappingSummary {
        filters_complete: false,
        ..complete()
    };
    assert_eq!(current.next(&summary).to_string(), "2.0.0");
}

#[test]
fn any_unmappable_deletion_is_a_major_bump() {
    let current: VersionNumber = "2.5.1".parse().unwrap();
    for summary in [
        MappingSummary {
            deleted_indicators: true,
            ..complete()
        },
        MappingSummary {
            deleted_geographic_levels: true,
            ..complete()
        },
        MappingSummary {
            deleted_time_periods: true,
            ..complete()
        },
    ] {
        assert_eq!(current.next(&summary).to_string(), "3.0.0");
    }
}

#[test]
fn minor_bump_resets_patch_and_keeps_major() {
    let current: VersionNumber = "3.2.7".parse().unwrap();
    assert_eq!(current.next(&complete()).to_string(), "3.3.0");
}

#[test]
fn bump_is_deterministic_for_identical_inputs() {
    let current: VersionNumber = "1.0.0".parse().unwrap();
    let summary = MappingSummary {
        filters_complete: false,
        ..complete()
    };
    assert_eq!(current.next(&summary), current.next(&summary));
}
